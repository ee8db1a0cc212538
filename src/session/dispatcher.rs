//! Command orchestration.
//!
//! Each invocation runs the same state machine:
//! `Idle -> Validating -> (Rejected | Sending) -> (Succeeded | Failed)`.
//! Rejected commands never touch the transport, the register bank or the
//! history. Failed commands are logged but not recorded in history.

use chrono::Utc;
use std::time::Instant;

use crate::bank::RegisterBank;
use crate::logging::Logger;
use crate::modbus::frame::{describe_frame, format_frame, FunctionKind, Request, Values};
use crate::modbus::raw::compose_raw;
use crate::modbus::transport::ModbusTransport;
use crate::session::history::{CommandHistory, CommandHistoryEntry};
use crate::utils::error::ModbusError;

/// Process-wide session state: the transport handle and register bank are
/// owned here and borrowed by the dispatcher per call.
pub struct SessionContext {
    pub transport: Box<dyn ModbusTransport>,
    pub bank: RegisterBank,
    pub history: CommandHistory,
    pub logger: Logger,
}

impl SessionContext {
    pub fn new(transport: Box<dyn ModbusTransport>, logger: Logger) -> Self {
        Self {
            transport,
            bank: RegisterBank::new(),
            history: CommandHistory::new(),
            logger,
        }
    }
}

/// One register-range command. Write values are not carried here: they are
/// staged in the register bank beforehand, exactly as the operator edits
/// slots before pressing Execute.
#[derive(Debug, Clone, Copy)]
pub struct CommandRequest {
    pub kind: FunctionKind,
    pub slave_id: u8,
    pub address: u16,
    pub count: u16,
}

/// Terminal state of a command that made it past validation. Validation
/// failures (the `Rejected` state) are returned as `Err` instead.
#[derive(Debug)]
pub enum CommandOutcome {
    Succeeded {
        values: Vec<u16>,
        response_time_ms: f64,
    },
    Failed {
        error: ModbusError,
    },
}

impl CommandOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CommandOutcome::Succeeded { .. })
    }
}

/// Collect staged coil values, enforcing that every staged slot holds 0
/// or 1.
fn staged_coils(
    bank: &RegisterBank,
    address: u16,
    count: u16,
) -> Result<Vec<bool>, ModbusError> {
    let raw = bank.read(address, count)?;
    let mut coils = Vec::with_capacity(raw.len());
    for (i, &value) in raw.iter().enumerate() {
        if value > 1 {
            return Err(ModbusError::InvalidInput(format!(
                "Coil value in register {} must be 0 or 1",
                address + i as u16
            )));
        }
        coils.push(value == 1);
    }
    Ok(coils)
}

/// Validate and build the wire request, pulling staged write values out of
/// the bank.
fn validate(ctx: &SessionContext, req: &CommandRequest) -> Result<Request, ModbusError> {
    let request = match req.kind {
        FunctionKind::ReadCoils
        | FunctionKind::ReadHoldingRegisters
        | FunctionKind::ReadInputRegisters => {
            Request::read(req.kind, req.slave_id, req.address, req.count)
        }
        FunctionKind::WriteSingleRegister => {
            let values = ctx.bank.read(req.address, 1)?;
            Request::write_registers(req.kind, req.slave_id, req.address, values)
        }
        FunctionKind::WriteMultipleRegisters => {
            let values = ctx.bank.read(req.address, req.count)?;
            Request::write_registers(req.kind, req.slave_id, req.address, values)
        }
        FunctionKind::WriteMultipleCoils => {
            let values = staged_coils(&ctx.bank, req.address, req.count)?;
            Request::write_coils(req.slave_id, req.address, values)
        }
    };
    // surfaces range, slave id and payload violations before any send
    request.encode()?;
    Ok(request)
}

fn log_sending(logger: &Logger, request: &Request, req: &CommandRequest) {
    let label = req.kind.label();
    match &request.values {
        Values::Registers(values) => {
            let hex: Vec<String> = values.iter().map(|v| format!("{:04X}", v)).collect();
            logger.info(format!(
                "Sending {}: Start={}, Values={:?}, Device ID={}",
                label, req.address, hex, req.slave_id
            ));
        }
        Values::Coils(values) => {
            let bits: Vec<u8> = values.iter().map(|&b| u8::from(b)).collect();
            logger.info(format!(
                "Sending {}: Start={}, Values={:?}, Device ID={}",
                label, req.address, bits, req.slave_id
            ));
        }
        Values::None => {
            logger.info(format!(
                "Sending {}: Start={}, Count={}, Device ID={}",
                label, req.address, req.count, req.slave_id
            ));
        }
    }
}

/// Execute one register-range command against the session's transport.
///
/// Returns `Err` for rejected (never-sent) commands; otherwise reports the
/// terminal `Succeeded`/`Failed` state.
pub async fn execute(
    ctx: &mut SessionContext,
    req: &CommandRequest,
) -> Result<CommandOutcome, ModbusError> {
    // Validating
    let request = validate(ctx, req)?;
    let count = request.count;

    log_sending(&ctx.logger, &request, req);
    let frame = request.to_frame()?;
    ctx.logger.info(describe_frame(&frame));

    // Sending
    let timestamp = Utc::now();
    let started = Instant::now();
    let result: Result<Vec<u16>, ModbusError> = match req.kind {
        FunctionKind::ReadHoldingRegisters => {
            ctx.transport
                .read_holding_registers(req.address, count, req.slave_id)
                .await
        }
        FunctionKind::ReadInputRegisters => {
            ctx.transport
                .read_input_registers(req.address, count, req.slave_id)
                .await
        }
        FunctionKind::ReadCoils => ctx
            .transport
            .read_coils(req.address, count, req.slave_id)
            .await
            .map(|bits| bits.into_iter().map(u16::from).collect()),
        FunctionKind::WriteSingleRegister => {
            let value = match &request.values {
                Values::Registers(values) => values[0],
                _ => unreachable!("validated as a register write"),
            };
            ctx.transport
                .write_register(req.address, value, req.slave_id)
                .await
                .map(|_| vec![value])
        }
        FunctionKind::WriteMultipleRegisters => {
            let values = match &request.values {
                Values::Registers(values) => values.clone(),
                _ => unreachable!("validated as a register write"),
            };
            ctx.transport
                .write_registers(req.address, &values, req.slave_id)
                .await
                .map(|_| values)
        }
        FunctionKind::WriteMultipleCoils => {
            let values = match &request.values {
                Values::Coils(values) => values.clone(),
                _ => unreachable!("validated as a coil write"),
            };
            ctx.transport
                .write_coils(req.address, &values, req.slave_id)
                .await
                .map(|_| values.iter().map(|&b| u16::from(b)).collect())
        }
    };
    let response_time_ms = started.elapsed().as_secs_f64() * 1000.0;

    let label = req.kind.label();
    let range = format!("{}-{}", req.address, req.address + count - 1);

    match result {
        Ok(values) => {
            // Succeeded
            if req.kind.is_write() {
                ctx.logger.success(format!(
                    "{} {}: {:?}, Response Time: {:.2}ms",
                    label, range, values, response_time_ms
                ));
                ctx.logger.info(format!(
                    "Write Response: Echo back values {:?} (Write operation confirmed)",
                    values
                ));
            } else {
                if req.kind.is_coil() {
                    let bits: Vec<bool> = values.iter().map(|&v| v != 0).collect();
                    ctx.bank.write_coils(req.address, &bits)?;
                } else {
                    ctx.bank.write(req.address, &values)?;
                }
                ctx.logger.success(format!(
                    "{} {}: {:?}, Response Time: {:.2}ms",
                    label, range, values, response_time_ms
                ));
                ctx.logger
                    .info(format!("Response Data: {:?}", values));
            }

            ctx.history.push(CommandHistoryEntry {
                timestamp,
                command: format!("{} {}", label, range),
                address: Some(req.address),
                count: Some(count),
                raw_bytes: None,
                values: Some(values.clone()),
                response_time_ms,
                success: true,
            });
            Ok(CommandOutcome::Succeeded {
                values,
                response_time_ms,
            })
        }
        Err(error) => {
            // Failed: no bank mutation, no history entry
            ctx.logger
                .error(format!("Error executing {}: {}", label, error));
            ctx.logger
                .info("Expected Response: Device should echo back the same frame");
            ctx.logger
                .error("Actual Response: No response received (timeout or communication error)");
            Ok(CommandOutcome::Failed { error })
        }
    }
}

/// Execute a raw operator-supplied frame. Success only confirms the bytes
/// were handed to the transport; no response is parsed and the register
/// bank is never updated.
pub async fn execute_raw(
    ctx: &mut SessionContext,
    text: &str,
) -> Result<CommandOutcome, ModbusError> {
    // Validating
    let frame = compose_raw(text)?;
    let hex_frame = format_frame(&frame);
    let crc_lo = frame[frame.len() - 2];
    let crc_hi = frame[frame.len() - 1];
    ctx.logger.info(format!(
        "Sending Raw Command: {} (CRC: {:02X} {:02X})",
        hex_frame, crc_lo, crc_hi
    ));

    // Sending
    let timestamp = Utc::now();
    let started = Instant::now();
    let result = ctx.transport.send_raw(&frame).await;
    let response_time_ms = started.elapsed().as_secs_f64() * 1000.0;

    match result {
        Ok(()) => {
            ctx.logger.success(format!(
                "Raw Command Sent: {}, Response Time: {:.2}ms",
                hex_frame, response_time_ms
            ));
            ctx.logger.info(
                "Note: Raw command sent successfully. Response parsing not implemented for raw commands.",
            );
            ctx.history.push(CommandHistoryEntry {
                timestamp,
                command: format!("Raw Command: {}", hex_frame),
                address: None,
                count: None,
                raw_bytes: Some(hex_frame),
                values: None,
                response_time_ms,
                success: true,
            });
            Ok(CommandOutcome::Succeeded {
                values: Vec::new(),
                response_time_ms,
            })
        }
        Err(error) => {
            ctx.logger.error(format!("Raw Command Error: {}", error));
            Ok(CommandOutcome::Failed { error })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct StubState {
        calls: u32,
        last_raw_frame: Option<Vec<u8>>,
        last_written_registers: Option<Vec<u16>>,
        last_written_coils: Option<Vec<bool>>,
    }

    /// Transport stub: records invocations, echoes success, serves canned
    /// read data.
    struct StubTransport {
        state: Arc<Mutex<StubState>>,
        registers: Vec<u16>,
        coils: Vec<bool>,
        fail: bool,
    }

    impl StubTransport {
        fn new(state: Arc<Mutex<StubState>>) -> Self {
            Self {
                state,
                registers: Vec::new(),
                coils: Vec::new(),
                fail: false,
            }
        }

        fn check(&self) -> Result<(), ModbusError> {
            self.state.lock().unwrap().calls += 1;
            if self.fail {
                Err(ModbusError::Timeout)
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl ModbusTransport for StubTransport {
        async fn read_holding_registers(
            &self,
            _address: u16,
            count: u16,
            _unit_id: u8,
        ) -> Result<Vec<u16>, ModbusError> {
            self.check()?;
            Ok(self.registers[..count as usize].to_vec())
        }

        async fn read_input_registers(
            &self,
            address: u16,
            count: u16,
            unit_id: u8,
        ) -> Result<Vec<u16>, ModbusError> {
            self.read_holding_registers(address, count, unit_id).await
        }

        async fn read_coils(
            &self,
            _address: u16,
            count: u16,
            _unit_id: u8,
        ) -> Result<Vec<bool>, ModbusError> {
            self.check()?;
            Ok(self.coils[..count as usize].to_vec())
        }

        async fn write_register(
            &self,
            _address: u16,
            value: u16,
            _unit_id: u8,
        ) -> Result<(), ModbusError> {
            self.check()?;
            self.state.lock().unwrap().last_written_registers = Some(vec![value]);
            Ok(())
        }

        async fn write_registers(
            &self,
            _address: u16,
            values: &[u16],
            _unit_id: u8,
        ) -> Result<(), ModbusError> {
            self.check()?;
            self.state.lock().unwrap().last_written_registers = Some(values.to_vec());
            Ok(())
        }

        async fn write_coils(
            &self,
            _address: u16,
            values: &[bool],
            _unit_id: u8,
        ) -> Result<(), ModbusError> {
            self.check()?;
            self.state.lock().unwrap().last_written_coils = Some(values.to_vec());
            Ok(())
        }

        async fn send_raw(&self, frame: &[u8]) -> Result<(), ModbusError> {
            self.check()?;
            self.state.lock().unwrap().last_raw_frame = Some(frame.to_vec());
            Ok(())
        }

        fn close(&self) {}
    }

    fn context_with(stub: StubTransport) -> SessionContext {
        let (logger, _rx) = Logger::channel();
        SessionContext::new(Box::new(stub), logger)
    }

    #[tokio::test]
    async fn test_write_single_register_end_to_end() {
        let state = Arc::new(Mutex::new(StubState::default()));
        let mut ctx = context_with(StubTransport::new(state.clone()));

        // operator stages 0x00FF into slot 5 before pressing Execute
        ctx.bank.write(5, &[0x00FF]).unwrap();
        let outcome = execute(
            &mut ctx,
            &CommandRequest {
                kind: FunctionKind::WriteSingleRegister,
                slave_id: 1,
                address: 5,
                count: 1,
            },
        )
        .await
        .unwrap();

        assert!(outcome.is_success());
        assert_eq!(ctx.history.len(), 1);
        let entry = &ctx.history.entries()[0];
        assert_eq!(entry.address, Some(5));
        assert_eq!(entry.values, Some(vec![255]));
        assert!(entry.success);
        // the write is self-confirming: slot 5 still reads back 0x00FF
        assert_eq!(ctx.bank.text(5).unwrap(), "0x00FF");
        assert_eq!(
            state.lock().unwrap().last_written_registers,
            Some(vec![0x00FF])
        );
    }

    #[tokio::test]
    async fn test_read_updates_bank_and_history() {
        let state = Arc::new(Mutex::new(StubState::default()));
        let mut stub = StubTransport::new(state.clone());
        stub.registers = vec![0x1111, 0x2222, 0x3333];
        let mut ctx = context_with(stub);

        let outcome = execute(
            &mut ctx,
            &CommandRequest {
                kind: FunctionKind::ReadHoldingRegisters,
                slave_id: 1,
                address: 10,
                count: 3,
            },
        )
        .await
        .unwrap();

        assert!(outcome.is_success());
        assert_eq!(ctx.bank.read(10, 3).unwrap(), vec![0x1111, 0x2222, 0x3333]);
        let entry = &ctx.history.entries()[0];
        assert_eq!(entry.command, "Read Holding Registers 10-12");
        assert_eq!(entry.count, Some(3));
        assert_eq!(state.lock().unwrap().calls, 1);
    }

    #[tokio::test]
    async fn test_read_coils_updates_bank() {
        let state = Arc::new(Mutex::new(StubState::default()));
        let mut stub = StubTransport::new(state);
        stub.coils = vec![true, false, true];
        let mut ctx = context_with(stub);

        execute(
            &mut ctx,
            &CommandRequest {
                kind: FunctionKind::ReadCoils,
                slave_id: 1,
                address: 0,
                count: 3,
            },
        )
        .await
        .unwrap();

        assert_eq!(ctx.bank.read(0, 3).unwrap(), vec![1, 0, 1]);
    }

    #[tokio::test]
    async fn test_rejected_command_never_reaches_transport() {
        let state = Arc::new(Mutex::new(StubState::default()));
        let mut ctx = context_with(StubTransport::new(state.clone()));

        let err = execute(
            &mut ctx,
            &CommandRequest {
                kind: FunctionKind::ReadHoldingRegisters,
                slave_id: 1,
                address: 60,
                count: 5,
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ModbusError::InvalidInput(_)));
        assert_eq!(state.lock().unwrap().calls, 0);
        assert!(ctx.history.is_empty());
    }

    #[tokio::test]
    async fn test_failed_command_logs_but_records_no_history() {
        let state = Arc::new(Mutex::new(StubState::default()));
        let mut stub = StubTransport::new(state.clone());
        stub.fail = true;
        let (logger, rx) = Logger::channel();
        let mut ctx = SessionContext::new(Box::new(stub), logger);
        ctx.bank.write(0, &[42]).unwrap();

        let outcome = execute(
            &mut ctx,
            &CommandRequest {
                kind: FunctionKind::ReadHoldingRegisters,
                slave_id: 1,
                address: 1,
                count: 1,
            },
        )
        .await
        .unwrap();

        assert!(matches!(outcome, CommandOutcome::Failed { .. }));
        assert!(ctx.history.is_empty());
        // failure leaves the bank untouched
        assert_eq!(ctx.bank.read(0, 1).unwrap(), vec![42]);

        let entries: Vec<_> = rx.try_iter().collect();
        assert!(entries
            .iter()
            .any(|e| e.level == crate::logging::LogLevel::Error
                && e.message.starts_with("Error executing Read Holding Registers")));
        assert!(entries
            .iter()
            .any(|e| e.level == crate::logging::LogLevel::Info
                && e.message.starts_with("Expected Response")));
    }

    #[tokio::test]
    async fn test_write_coils_pulls_staged_bits() {
        let state = Arc::new(Mutex::new(StubState::default()));
        let mut ctx = context_with(StubTransport::new(state.clone()));
        ctx.bank.write(0, &[1, 0, 1, 1]).unwrap();

        let outcome = execute(
            &mut ctx,
            &CommandRequest {
                kind: FunctionKind::WriteMultipleCoils,
                slave_id: 1,
                address: 0,
                count: 4,
            },
        )
        .await
        .unwrap();

        assert!(outcome.is_success());
        assert_eq!(
            state.lock().unwrap().last_written_coils,
            Some(vec![true, false, true, true])
        );
        assert_eq!(ctx.history.entries()[0].values, Some(vec![1, 0, 1, 1]));
    }

    #[tokio::test]
    async fn test_staged_coil_values_must_be_binary() {
        let state = Arc::new(Mutex::new(StubState::default()));
        let mut ctx = context_with(StubTransport::new(state.clone()));
        ctx.bank.write(0, &[1, 2]).unwrap();

        let err = execute(
            &mut ctx,
            &CommandRequest {
                kind: FunctionKind::WriteMultipleCoils,
                slave_id: 1,
                address: 0,
                count: 2,
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ModbusError::InvalidInput(_)));
        assert_eq!(state.lock().unwrap().calls, 0);
    }

    #[tokio::test]
    async fn test_raw_command_path() {
        let state = Arc::new(Mutex::new(StubState::default()));
        let mut ctx = context_with(StubTransport::new(state.clone()));

        let outcome = execute_raw(&mut ctx, "01 03 00 00 00 06").await.unwrap();
        assert!(outcome.is_success());

        let sent = state.lock().unwrap().last_raw_frame.clone().unwrap();
        assert_eq!(sent, compose_raw("01 03 00 00 00 06").unwrap());

        let entry = &ctx.history.entries()[0];
        assert_eq!(entry.raw_bytes.as_deref(), Some(format_frame(&sent).as_str()));
        assert!(entry.address.is_none());
        assert!(entry.values.is_none());
        // raw success never touches the bank
        assert_eq!(ctx.bank.read(0, 64).unwrap(), vec![0u16; 64]);
    }

    #[tokio::test]
    async fn test_raw_rejection_never_reaches_transport() {
        let state = Arc::new(Mutex::new(StubState::default()));
        let mut ctx = context_with(StubTransport::new(state.clone()));

        assert!(matches!(
            execute_raw(&mut ctx, "1").await.unwrap_err(),
            ModbusError::TooShort
        ));
        assert!(matches!(
            execute_raw(&mut ctx, "GG 03").await.unwrap_err(),
            ModbusError::MalformedByte(_)
        ));
        assert_eq!(state.lock().unwrap().calls, 0);
        assert!(ctx.history.is_empty());
    }
}
