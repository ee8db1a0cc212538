pub mod dispatcher;
pub mod history;

pub use dispatcher::{CommandOutcome, CommandRequest, SessionContext};
pub use history::{CommandHistory, CommandHistoryEntry};
