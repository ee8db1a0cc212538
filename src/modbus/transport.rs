use async_trait::async_trait;
use log::{debug, error, info};
use serialport::SerialPort;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::settings::{ParityConfig, SerialSettings};
use crate::modbus::crc::crc16_modbus;
use crate::modbus::frame::{format_frame, FunctionKind, Request};
use crate::utils::error::ModbusError;

/// Serial transport capability consumed by the command dispatcher.
///
/// Exactly one transaction is in flight at a time; implementations guard
/// the underlying connection accordingly.
#[async_trait]
pub trait ModbusTransport: Send + Sync {
    async fn read_holding_registers(
        &self,
        address: u16,
        count: u16,
        unit_id: u8,
    ) -> Result<Vec<u16>, ModbusError>;

    async fn read_input_registers(
        &self,
        address: u16,
        count: u16,
        unit_id: u8,
    ) -> Result<Vec<u16>, ModbusError>;

    async fn read_coils(
        &self,
        address: u16,
        count: u16,
        unit_id: u8,
    ) -> Result<Vec<bool>, ModbusError>;

    async fn write_register(
        &self,
        address: u16,
        value: u16,
        unit_id: u8,
    ) -> Result<(), ModbusError>;

    async fn write_registers(
        &self,
        address: u16,
        values: &[u16],
        unit_id: u8,
    ) -> Result<(), ModbusError>;

    async fn write_coils(
        &self,
        address: u16,
        values: &[bool],
        unit_id: u8,
    ) -> Result<(), ModbusError>;

    /// Hand a pre-built frame (CRC included) to the line. No response is
    /// read or parsed.
    async fn send_raw(&self, frame: &[u8]) -> Result<(), ModbusError>;

    fn close(&self);
}

/// Modbus RTU master over a serial port.
pub struct SerialTransport {
    port: Arc<Mutex<Option<Box<dyn SerialPort>>>>,
    timeout_ms: u64,
    retries: u32,
    retry_delay_ms: u64,
}

impl SerialTransport {
    pub fn connect(settings: &SerialSettings) -> Result<Self, ModbusError> {
        info!("🔌 Connecting to Modbus RTU port: {}", settings.port);
        info!(
            "⚙️  Configuration: {} baud, 8 data bits, 1 stop bit, parity {:?}",
            settings.baud_rate, settings.parity
        );

        let parity = match settings.parity {
            ParityConfig::None => serialport::Parity::None,
            ParityConfig::Even => serialport::Parity::Even,
            ParityConfig::Odd => serialport::Parity::Odd,
        };

        let port = serialport::new(&settings.port, settings.baud_rate)
            .timeout(Duration::from_millis(settings.timeout_ms))
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(parity)
            .open()
            .map_err(|e| {
                error!("❌ Failed to open serial port {}: {}", settings.port, e);
                ModbusError::ConnectionError(format!("Failed to open port: {}", e))
            })?;

        info!("✅ Modbus RTU connection established");
        Ok(Self {
            port: Arc::new(Mutex::new(Some(port))),
            timeout_ms: settings.timeout_ms,
            retries: settings.retries,
            retry_delay_ms: settings.retry_delay_ms,
        })
    }

    /// One request/response round trip with the transport-level retry
    /// policy applied to timeouts and I/O failures.
    fn transact(&self, request: &[u8], expected_len: usize) -> Result<Vec<u8>, ModbusError> {
        let mut attempt = 0;
        loop {
            match self.transact_once(request, expected_len) {
                Ok(response) => return Ok(response),
                Err(err @ (ModbusError::Timeout | ModbusError::CommunicationError(_)))
                    if attempt < self.retries =>
                {
                    attempt += 1;
                    debug!(
                        "Retry {}/{} after transport error: {}",
                        attempt, self.retries, err
                    );
                    thread::sleep(Duration::from_millis(self.retry_delay_ms));
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn transact_once(
        &self,
        request: &[u8],
        expected_len: usize,
    ) -> Result<Vec<u8>, ModbusError> {
        let mut guard = self.port.lock().map_err(|_| ModbusError::LockError)?;
        let port = guard
            .as_mut()
            .ok_or_else(|| ModbusError::ConnectionError("Not connected".to_string()))?;

        let _ = port.clear(serialport::ClearBuffer::Input);
        port.write_all(request)
            .map_err(|e| ModbusError::CommunicationError(format!("Write failed: {}", e)))?;
        port.flush()
            .map_err(|e| ModbusError::CommunicationError(format!("Flush failed: {}", e)))?;

        debug!("TX {}", format_frame(request));

        // Give the slave time to turn the line around.
        thread::sleep(Duration::from_millis(50));

        let response = Self::read_response(port.as_mut(), expected_len, self.timeout_ms)?;
        debug!("RX {}", format_frame(&response));
        Ok(response)
    }

    /// Accumulate response bytes until the expected length arrives, an
    /// exception frame completes, or the deadline passes.
    fn read_response(
        port: &mut dyn SerialPort,
        expected_len: usize,
        timeout_ms: u64,
    ) -> Result<Vec<u8>, ModbusError> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        let mut response: Vec<u8> = Vec::with_capacity(expected_len);
        let mut buffer = [0u8; 256];

        loop {
            if response.len() >= expected_len {
                break;
            }
            // Exception replies are 5 bytes: slave, fc|0x80, code, CRC.
            if response.len() >= 5 && response[1] & 0x80 != 0 {
                break;
            }
            if Instant::now() >= deadline {
                if response.is_empty() {
                    return Err(ModbusError::Timeout);
                }
                break;
            }

            match port.read(&mut buffer) {
                Ok(n) if n > 0 => response.extend_from_slice(&buffer[..n]),
                Ok(_) => thread::sleep(Duration::from_millis(10)),
                Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {
                    thread::sleep(Duration::from_millis(10));
                }
                Err(e) => {
                    return Err(ModbusError::CommunicationError(format!(
                        "Read failed: {}",
                        e
                    )))
                }
            }
        }

        Ok(response)
    }

    /// CRC, addressing and exception checks shared by every response.
    fn check_response(
        response: &[u8],
        unit_id: u8,
        function_code: u8,
    ) -> Result<(), ModbusError> {
        if response.len() < 5 {
            return Err(ModbusError::InvalidResponse);
        }

        let data_len = response.len() - 2;
        let received_crc = u16::from_le_bytes([response[data_len], response[data_len + 1]]);
        let calculated_crc = crc16_modbus(&response[..data_len]);
        if received_crc != calculated_crc {
            return Err(ModbusError::CrcError);
        }

        if response[0] != unit_id {
            return Err(ModbusError::InvalidResponse);
        }
        if response[1] == function_code | 0x80 {
            return Err(ModbusError::ExceptionResponse {
                function: function_code,
                code: response[2],
            });
        }
        if response[1] != function_code {
            return Err(ModbusError::InvalidResponse);
        }
        Ok(())
    }

    fn read_data(
        &self,
        request: &Request,
        expected_data_len: usize,
    ) -> Result<Vec<u8>, ModbusError> {
        let frame = request.to_frame()?;
        // slave + fc + byte count + data + CRC
        let response = self.transact(&frame, 5 + expected_data_len)?;
        Self::check_response(&response, request.slave_id, request.kind.code())?;

        let byte_count = response[2] as usize;
        if response.len() < 5 + byte_count || byte_count != expected_data_len {
            return Err(ModbusError::InvalidResponse);
        }
        Ok(response[3..3 + byte_count].to_vec())
    }

    fn write_echo(&self, request: &Request) -> Result<(), ModbusError> {
        let frame = request.to_frame()?;
        // Echo replies are always 8 bytes: slave, fc, addr, qty/value, CRC.
        let response = self.transact(&frame, 8)?;
        Self::check_response(&response, request.slave_id, request.kind.code())
    }
}

fn registers_from_be(data: &[u8]) -> Vec<u16> {
    data.chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect()
}

fn unpack_coils(data: &[u8], count: u16) -> Vec<bool> {
    (0..count as usize)
        .map(|i| data.get(i / 8).map(|byte| byte >> (i % 8) & 1 == 1).unwrap_or(false))
        .collect()
}

#[async_trait]
impl ModbusTransport for SerialTransport {
    async fn read_holding_registers(
        &self,
        address: u16,
        count: u16,
        unit_id: u8,
    ) -> Result<Vec<u16>, ModbusError> {
        let request = Request::read(FunctionKind::ReadHoldingRegisters, unit_id, address, count);
        let data = self.read_data(&request, count as usize * 2)?;
        Ok(registers_from_be(&data))
    }

    async fn read_input_registers(
        &self,
        address: u16,
        count: u16,
        unit_id: u8,
    ) -> Result<Vec<u16>, ModbusError> {
        let request = Request::read(FunctionKind::ReadInputRegisters, unit_id, address, count);
        let data = self.read_data(&request, count as usize * 2)?;
        Ok(registers_from_be(&data))
    }

    async fn read_coils(
        &self,
        address: u16,
        count: u16,
        unit_id: u8,
    ) -> Result<Vec<bool>, ModbusError> {
        let request = Request::read(FunctionKind::ReadCoils, unit_id, address, count);
        let data = self.read_data(&request, (count as usize + 7) / 8)?;
        Ok(unpack_coils(&data, count))
    }

    async fn write_register(
        &self,
        address: u16,
        value: u16,
        unit_id: u8,
    ) -> Result<(), ModbusError> {
        let request = Request::write_registers(
            FunctionKind::WriteSingleRegister,
            unit_id,
            address,
            vec![value],
        );
        self.write_echo(&request)
    }

    async fn write_registers(
        &self,
        address: u16,
        values: &[u16],
        unit_id: u8,
    ) -> Result<(), ModbusError> {
        let request = Request::write_registers(
            FunctionKind::WriteMultipleRegisters,
            unit_id,
            address,
            values.to_vec(),
        );
        self.write_echo(&request)
    }

    async fn write_coils(
        &self,
        address: u16,
        values: &[bool],
        unit_id: u8,
    ) -> Result<(), ModbusError> {
        let request = Request::write_coils(unit_id, address, values.to_vec());
        self.write_echo(&request)
    }

    async fn send_raw(&self, frame: &[u8]) -> Result<(), ModbusError> {
        let mut guard = self.port.lock().map_err(|_| ModbusError::LockError)?;
        let port = guard
            .as_mut()
            .ok_or_else(|| ModbusError::ConnectionError("Not connected".to_string()))?;

        port.write_all(frame)
            .map_err(|e| ModbusError::CommunicationError(format!("Write failed: {}", e)))?;
        port.flush()
            .map_err(|e| ModbusError::CommunicationError(format!("Flush failed: {}", e)))?;
        Ok(())
    }

    fn close(&self) {
        if let Ok(mut guard) = self.port.lock() {
            if guard.take().is_some() {
                info!("✅ Modbus RTU connection closed");
            }
        }
    }
}

/// List serial ports known to the operating system.
pub fn available_ports() -> Result<Vec<String>, ModbusError> {
    let ports = serialport::available_ports()
        .map_err(|e| ModbusError::ConnectionError(format!("Port enumeration failed: {}", e)))?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registers_from_be() {
        assert_eq!(registers_from_be(&[0x00, 0xFF, 0x12, 0x34]), vec![0x00FF, 0x1234]);
        assert_eq!(registers_from_be(&[]), Vec::<u16>::new());
    }

    #[test]
    fn test_unpack_coils() {
        assert_eq!(
            unpack_coils(&[0x0D], 8),
            vec![true, false, true, true, false, false, false, false]
        );
        assert_eq!(unpack_coils(&[0xFF, 0x01], 9), vec![true; 9]);
        assert_eq!(unpack_coils(&[0x01], 2), vec![true, false]);
    }

    #[test]
    fn test_check_response_crc_and_addressing() {
        // valid echo for write single register: 01 06 00 05 00 FF + CRC
        let mut frame = vec![0x01, 0x06, 0x00, 0x05, 0x00, 0xFF];
        let crc = crc16_modbus(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        assert!(SerialTransport::check_response(&frame, 1, 0x06).is_ok());

        // wrong unit id
        assert!(matches!(
            SerialTransport::check_response(&frame, 2, 0x06),
            Err(ModbusError::InvalidResponse)
        ));

        // corrupted byte fails the CRC check
        let mut corrupted = frame.clone();
        corrupted[4] ^= 0xFF;
        assert!(matches!(
            SerialTransport::check_response(&corrupted, 1, 0x06),
            Err(ModbusError::CrcError)
        ));
    }

    #[test]
    fn test_check_response_exception() {
        // exception reply: slave 1, fc 0x83, code 0x02 (illegal data address)
        let mut frame = vec![0x01, 0x83, 0x02];
        let crc = crc16_modbus(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        match SerialTransport::check_response(&frame, 1, 0x03) {
            Err(ModbusError::ExceptionResponse { function, code }) => {
                assert_eq!(function, 0x03);
                assert_eq!(code, 0x02);
            }
            other => panic!("expected ExceptionResponse, got {:?}", other),
        }
    }
}
