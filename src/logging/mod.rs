pub mod channel;

pub use channel::{start_drain, ConsoleSink, LogEntry, LogLevel, Logger, LogSink};
