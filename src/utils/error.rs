use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModbusError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid hex byte: {0}. Each byte must be 2 hex digits (e.g., 01, FF)")]
    MalformedByte(String),

    #[error("Command too short. Minimum 2 bytes required (slave_id + function_code)")]
    TooShort,

    #[error("Out of range: {0}")]
    OutOfRange(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Communication error: {0}")]
    CommunicationError(String),

    #[error("CRC checksum mismatch")]
    CrcError,

    #[error("Invalid response from device")]
    InvalidResponse,

    #[error("Device exception: function 0x{function:02X}, exception code 0x{code:02X}")]
    ExceptionResponse { function: u8, code: u8 },

    #[error("Lock acquisition failed")]
    LockError,

    #[error("Timeout occurred")]
    Timeout,

    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl From<serde_json::Error> for ModbusError {
    fn from(err: serde_json::Error) -> Self {
        ModbusError::Persistence(format!("JSON error: {}", err))
    }
}

impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        ModbusError::CommunicationError(format!("IO error: {}", err))
    }
}

impl From<tokio::time::error::Elapsed> for ModbusError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        ModbusError::Timeout
    }
}
