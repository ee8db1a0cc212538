use log::warn;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::utils::error::ModbusError;

/// Default location of the persisted operator settings.
pub const DEFAULT_SETTINGS_FILE: &str = "modbus_settings.json";

/// Operator-facing settings persisted between runs as JSON. Absence of the
/// file is not an error; load/save failures are reported as warnings and
/// never abort the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub port: String,
    pub baudrate: u32,
    pub slave_id: u8,
    pub command_type: String,
    pub address: u16,
    pub count: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: String::new(),
            baudrate: 115200,
            slave_id: 1,
            command_type: "Read Holding Registers".to_string(),
            address: 0,
            count: 1,
        }
    }
}

impl Settings {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ModbusError> {
        if !path.as_ref().exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)
            .map_err(|e| ModbusError::Persistence(format!("Failed to read settings: {}", e)))?;
        serde_json::from_str(&content)
            .map_err(|e| ModbusError::Persistence(format!("Failed to parse settings: {}", e)))
    }

    /// Like `load`, but degrades to defaults with a warning instead of
    /// surfacing the error.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(&path) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Failed to load settings: {}", e);
                Self::default()
            }
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ModbusError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ModbusError::Persistence(format!("Failed to encode settings: {}", e)))?;
        std::fs::write(&path, content)
            .map_err(|e| ModbusError::Persistence(format!("Failed to write settings: {}", e)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ParityConfig {
    None,
    Even,
    Odd,
}

/// Serial line parameters handed to the transport on connect. The Modbus
/// RTU defaults are 8 data bits, 1 stop bit, no parity.
#[derive(Debug, Clone)]
pub struct SerialSettings {
    pub port: String,
    pub baud_rate: u32,
    pub parity: ParityConfig,
    pub timeout_ms: u64,
    pub retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 115200,
            parity: ParityConfig::None,
            timeout_ms: 5000,
            retries: 3,
            retry_delay_ms: 500,
        }
    }
}

impl SerialSettings {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            port: settings.port.clone(),
            baud_rate: settings.baudrate,
            ..Self::default()
        }
    }
}
