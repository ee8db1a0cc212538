//! Command history export.
//!
//! CSV carries one row per entry under a header of the entry field names;
//! JSON is an array of entry objects. Both reflect the in-memory history
//! list exactly, in execution order.

use std::path::Path;

use crate::session::history::{CommandHistory, CommandHistoryEntry};
use crate::utils::error::ModbusError;

const CSV_HEADER: &str = "timestamp,command,address,count,raw_bytes,values,response_time_ms,success";

fn csv_row(entry: &CommandHistoryEntry) -> String {
    let address = entry.address.map(|a| a.to_string()).unwrap_or_default();
    let count = entry.count.map(|c| c.to_string()).unwrap_or_default();
    let raw_bytes = entry.raw_bytes.clone().unwrap_or_default();
    let values = entry
        .values
        .as_ref()
        .map(|values| {
            values
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default();

    format!(
        "{},{},{},{},{},{},{:.2},{}",
        entry.timestamp.to_rfc3339(),
        entry.command,
        address,
        count,
        raw_bytes,
        values,
        entry.response_time_ms,
        entry.success
    )
}

pub fn history_to_csv(history: &CommandHistory) -> String {
    let mut csv = String::from(CSV_HEADER);
    csv.push('\n');
    for entry in history.entries() {
        csv.push_str(&csv_row(entry));
        csv.push('\n');
    }
    csv
}

pub fn history_to_json(history: &CommandHistory) -> Result<String, ModbusError> {
    serde_json::to_string_pretty(history.entries())
        .map_err(|e| ModbusError::Persistence(format!("Failed to encode history: {}", e)))
}

pub fn export_csv<P: AsRef<Path>>(history: &CommandHistory, path: P) -> Result<(), ModbusError> {
    std::fs::write(&path, history_to_csv(history))
        .map_err(|e| ModbusError::Persistence(format!("Failed to export CSV: {}", e)))
}

pub fn export_json<P: AsRef<Path>>(history: &CommandHistory, path: P) -> Result<(), ModbusError> {
    let json = history_to_json(history)?;
    std::fs::write(&path, json)
        .map_err(|e| ModbusError::Persistence(format!("Failed to export JSON: {}", e)))
}
