pub mod crc;
pub mod frame;
pub mod raw;
pub mod transport;

pub use crc::crc16_modbus;
pub use frame::{describe_frame, format_frame, pack_coils, FunctionKind, Request, Values};
pub use raw::{compose_raw, normalize_raw_input};
pub use transport::{available_ports, ModbusTransport, SerialTransport};
