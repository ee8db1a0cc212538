pub mod export;

pub use export::{export_csv, export_json, history_to_csv, history_to_json};
