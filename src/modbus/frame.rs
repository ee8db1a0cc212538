//! Modbus RTU request frame construction.
//!
//! A [`Request`] describes one of the six supported commands; `encode`
//! produces the pre-CRC byte layout and `to_frame` appends the CRC16 in
//! wire order (low byte first). Addresses and quantities are big-endian
//! 16-bit fields per the Modbus RTU PDU layout.

use std::fmt;
use std::str::FromStr;

use crate::bank::BANK_SIZE;
use crate::modbus::crc::crc16_modbus;
use crate::utils::error::ModbusError;

pub const MIN_SLAVE_ID: u8 = 1;
pub const MAX_SLAVE_ID: u8 = 247;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    ReadCoils,
    ReadHoldingRegisters,
    ReadInputRegisters,
    WriteSingleRegister,
    WriteMultipleCoils,
    WriteMultipleRegisters,
}

impl FunctionKind {
    pub const ALL: &'static [FunctionKind] = &[
        FunctionKind::ReadCoils,
        FunctionKind::ReadHoldingRegisters,
        FunctionKind::ReadInputRegisters,
        FunctionKind::WriteSingleRegister,
        FunctionKind::WriteMultipleCoils,
        FunctionKind::WriteMultipleRegisters,
    ];

    pub fn code(self) -> u8 {
        match self {
            FunctionKind::ReadCoils => 0x01,
            FunctionKind::ReadHoldingRegisters => 0x03,
            FunctionKind::ReadInputRegisters => 0x04,
            FunctionKind::WriteSingleRegister => 0x06,
            FunctionKind::WriteMultipleCoils => 0x0F,
            FunctionKind::WriteMultipleRegisters => 0x10,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            FunctionKind::ReadCoils => "Read Coils",
            FunctionKind::ReadHoldingRegisters => "Read Holding Registers",
            FunctionKind::ReadInputRegisters => "Read Input Registers",
            FunctionKind::WriteSingleRegister => "Write Single Register",
            FunctionKind::WriteMultipleCoils => "Write Coils",
            FunctionKind::WriteMultipleRegisters => "Write Holding Registers",
        }
    }

    pub fn is_write(self) -> bool {
        matches!(
            self,
            FunctionKind::WriteSingleRegister
                | FunctionKind::WriteMultipleCoils
                | FunctionKind::WriteMultipleRegisters
        )
    }

    pub fn is_coil(self) -> bool {
        matches!(self, FunctionKind::ReadCoils | FunctionKind::WriteMultipleCoils)
    }
}

impl fmt::Display for FunctionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for FunctionKind {
    type Err = ModbusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FunctionKind::ALL
            .iter()
            .copied()
            .find(|k| k.label().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                ModbusError::InvalidInput(format!("Unknown command type: {}", s.trim()))
            })
    }
}

/// Payload of a write request; read requests carry `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Values {
    None,
    Registers(Vec<u16>),
    Coils(Vec<bool>),
}

/// One Modbus RTU request, constructed fresh per command invocation.
#[derive(Debug, Clone)]
pub struct Request {
    pub kind: FunctionKind,
    pub slave_id: u8,
    pub address: u16,
    pub count: u16,
    pub values: Values,
}

impl Request {
    pub fn read(kind: FunctionKind, slave_id: u8, address: u16, count: u16) -> Self {
        Self {
            kind,
            slave_id,
            address,
            count,
            values: Values::None,
        }
    }

    pub fn write_registers(
        kind: FunctionKind,
        slave_id: u8,
        address: u16,
        values: Vec<u16>,
    ) -> Self {
        Self {
            kind,
            slave_id,
            address,
            count: values.len() as u16,
            values: Values::Registers(values),
        }
    }

    pub fn write_coils(slave_id: u8, address: u16, values: Vec<bool>) -> Self {
        Self {
            kind: FunctionKind::WriteMultipleCoils,
            slave_id,
            address,
            count: values.len() as u16,
            values: Values::Coils(values),
        }
    }

    fn validate(&self) -> Result<(), ModbusError> {
        if self.slave_id < MIN_SLAVE_ID || self.slave_id > MAX_SLAVE_ID {
            return Err(ModbusError::OutOfRange(format!(
                "Invalid slave ID: {}. Must be {}-{}",
                self.slave_id, MIN_SLAVE_ID, MAX_SLAVE_ID
            )));
        }
        if self.address >= BANK_SIZE {
            return Err(ModbusError::InvalidInput(format!(
                "Start index must be between 0 and {}",
                BANK_SIZE - 1
            )));
        }
        if self.count < 1
            || self.count > BANK_SIZE
            || self.address as u32 + self.count as u32 > BANK_SIZE as u32
        {
            return Err(ModbusError::InvalidInput(
                "Invalid length or range exceeds register limit".to_string(),
            ));
        }

        match (self.kind, &self.values) {
            (FunctionKind::ReadCoils, Values::None)
            | (FunctionKind::ReadHoldingRegisters, Values::None)
            | (FunctionKind::ReadInputRegisters, Values::None) => Ok(()),
            (FunctionKind::WriteSingleRegister, Values::Registers(values)) => {
                if self.count != 1 || values.len() != 1 {
                    return Err(ModbusError::InvalidInput(format!(
                        "Register {}: Write Single Register takes exactly one value",
                        self.address
                    )));
                }
                Ok(())
            }
            (FunctionKind::WriteMultipleRegisters, Values::Registers(values)) => {
                if values.len() != self.count as usize {
                    return Err(ModbusError::InvalidInput(format!(
                        "Register {}: expected {} values, got {}",
                        self.address,
                        self.count,
                        values.len()
                    )));
                }
                Ok(())
            }
            (FunctionKind::WriteMultipleCoils, Values::Coils(values)) => {
                if values.len() != self.count as usize {
                    return Err(ModbusError::InvalidInput(format!(
                        "Register {}: expected {} coil values, got {}",
                        self.address,
                        self.count,
                        values.len()
                    )));
                }
                Ok(())
            }
            _ => Err(ModbusError::InvalidInput(format!(
                "{} does not take this payload",
                self.kind
            ))),
        }
    }

    /// Encode the request into its pre-CRC byte layout.
    pub fn encode(&self) -> Result<Vec<u8>, ModbusError> {
        self.validate()?;

        let mut frame = vec![self.slave_id, self.kind.code()];
        frame.extend_from_slice(&self.address.to_be_bytes());

        match (self.kind, &self.values) {
            (
                FunctionKind::ReadCoils
                | FunctionKind::ReadHoldingRegisters
                | FunctionKind::ReadInputRegisters,
                _,
            ) => {
                frame.extend_from_slice(&self.count.to_be_bytes());
            }
            // no quantity field: address is followed directly by the value
            (FunctionKind::WriteSingleRegister, Values::Registers(values)) => {
                frame.extend_from_slice(&values[0].to_be_bytes());
            }
            (FunctionKind::WriteMultipleRegisters, Values::Registers(values)) => {
                frame.extend_from_slice(&self.count.to_be_bytes());
                frame.push((self.count * 2) as u8);
                for value in values {
                    frame.extend_from_slice(&value.to_be_bytes());
                }
            }
            (FunctionKind::WriteMultipleCoils, Values::Coils(values)) => {
                frame.extend_from_slice(&self.count.to_be_bytes());
                let packed = pack_coils(values);
                frame.push(packed.len() as u8);
                frame.extend_from_slice(&packed);
            }
            _ => unreachable!("payload shape checked by validate()"),
        }

        Ok(frame)
    }

    /// Encode and append the CRC16 in wire order (low byte first).
    pub fn to_frame(&self) -> Result<Vec<u8>, ModbusError> {
        let mut frame = self.encode()?;
        let crc = crc16_modbus(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        Ok(frame)
    }
}

/// Pack coil states LSB-first into bytes; unused high bits of the final
/// byte stay zero.
pub fn pack_coils(values: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; (values.len() + 7) / 8];
    for (i, &on) in values.iter().enumerate() {
        if on {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    bytes
}

/// Space-separated uppercase hex dump, e.g. `01 03 00 00 00 01 84 0A`.
pub fn format_frame(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Human-readable frame description for the log, CRC bytes called out in
/// transmission order.
pub fn describe_frame(frame: &[u8]) -> String {
    if frame.len() < 2 {
        return format!("Modbus Frame: {}", format_frame(frame));
    }
    let crc_lo = frame[frame.len() - 2];
    let crc_hi = frame[frame.len() - 1];
    format!(
        "Modbus Frame: {} (CRC: {:02X} {:02X})",
        format_frame(frame),
        crc_lo,
        crc_hi
    )
}
