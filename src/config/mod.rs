pub mod settings;

pub use settings::{ParityConfig, SerialSettings, Settings, DEFAULT_SETTINGS_FILE};
