//! Observability path: producers push timestamped entries through a
//! cloneable [`Logger`] onto a bounded channel; a single consumer thread
//! blocks on `recv` and forwards entries to the sink in FIFO order.
//!
//! This path never feeds back into command execution; it only forwards.

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::thread::JoinHandle;

/// Entries the console sink can fall behind by before producers block.
const LOG_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Success,
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// Cloneable producer handle.
#[derive(Clone)]
pub struct Logger {
    tx: SyncSender<LogEntry>,
}

impl Logger {
    pub fn channel() -> (Logger, Receiver<LogEntry>) {
        let (tx, rx) = sync_channel(LOG_CHANNEL_CAPACITY);
        (Logger { tx }, rx)
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let entry = LogEntry {
            timestamp: Utc::now(),
            level,
            message: message.into(),
        };
        // The consumer outliving the producers is a shutdown race, not an
        // error worth surfacing to the operator.
        let _ = self.tx.send(entry);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.log(LogLevel::Success, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.log(LogLevel::Warning, message);
    }
}

pub trait LogSink: Send {
    fn write(&mut self, entry: &LogEntry);
}

/// Forwards entries to the `log` crate facade, prefixed with the time the
/// entry was produced (not drained).
pub struct ConsoleSink;

impl LogSink for ConsoleSink {
    fn write(&mut self, entry: &LogEntry) {
        let stamp = entry.timestamp.format("%H:%M:%S%.3f");
        match entry.level {
            LogLevel::Info => info!("[{}] {}", stamp, entry.message),
            LogLevel::Success => info!("[{}] ✅ {}", stamp, entry.message),
            LogLevel::Error => error!("[{}] {}", stamp, entry.message),
            LogLevel::Warning => warn!("[{}] {}", stamp, entry.message),
        }
    }
}

/// Spawn the single consumer. The thread exits once every `Logger` clone
/// has been dropped and the channel drains.
pub fn start_drain(rx: Receiver<LogEntry>, mut sink: Box<dyn LogSink>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        while let Ok(entry) = rx.recv() {
            sink.write(&entry);
        }
    })
}
