//! Modbus RTU Probe
//!
//! This library provides the protocol core of a serial Modbus RTU exerciser:
//! wire-correct request frame construction for the six supported function
//! codes, CRC16 checksumming, raw frame composition, a 64-slot register
//! bank backing both read display and write staging, and a command
//! dispatcher that orchestrates transport round trips and history keeping.

pub mod bank;
pub mod cli;
pub mod config;
pub mod logging;
pub mod modbus;
pub mod output;
pub mod session;
pub mod utils;

// Re-export commonly used types
pub use bank::{normalize_hex_text, parse_hex_text, RegisterBank};
pub use config::{SerialSettings, Settings};
pub use logging::{ConsoleSink, LogEntry, LogLevel, Logger};
pub use modbus::{
    compose_raw, crc16_modbus, FunctionKind, ModbusTransport, Request, SerialTransport,
};
pub use output::{export_csv, export_json};
pub use session::{CommandHistory, CommandHistoryEntry, CommandOutcome, CommandRequest, SessionContext};
pub use utils::error::ModbusError;

pub const VERSION: &str = "0.1.0";
