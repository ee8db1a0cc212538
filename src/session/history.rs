use chrono::{DateTime, Utc};
use serde::Serialize;

/// One executed command. Register and raw commands share the record shape;
/// fields that do not apply stay `None` and are omitted from JSON export.
#[derive(Debug, Clone, Serialize)]
pub struct CommandHistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_bytes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<u16>>,
    pub response_time_ms: f64,
    pub success: bool,
}

/// Append-only execution record. Entries are only added for commands that
/// completed successfully and only removed by an explicit clear.
#[derive(Debug, Default)]
pub struct CommandHistory {
    entries: Vec<CommandHistoryEntry>,
}

impl CommandHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: CommandHistoryEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[CommandHistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
