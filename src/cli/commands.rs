use clap::{Arg, ArgAction, ArgMatches, Command};

use crate::bank::{normalize_hex_text, parse_hex_text};
use crate::config::{Settings, DEFAULT_SETTINGS_FILE};
use crate::modbus::frame::FunctionKind;
use crate::session::dispatcher::{self, CommandOutcome, CommandRequest, SessionContext};
use crate::utils::error::ModbusError;

pub fn build_cli() -> Command {
    let address_arg = Arg::new("address")
        .long("address")
        .short('a')
        .default_value("0")
        .help("Start register index (0-63)");

    Command::new("modbus_rtu_probe")
        .about("Exercise Modbus RTU slave devices over a serial line")
        .version(crate::VERSION)
        .arg(
            Arg::new("port")
                .long("port")
                .short('p')
                .help("Serial port, e.g. /dev/ttyUSB0 or COM3"),
        )
        .arg(Arg::new("baud").long("baud").short('b').help("Baud rate"))
        .arg(
            Arg::new("slave")
                .long("slave")
                .short('s')
                .help("Slave ID (1-247)"),
        )
        .arg(
            Arg::new("settings")
                .long("settings")
                .value_name("FILE")
                .default_value(DEFAULT_SETTINGS_FILE)
                .help("Settings file read at startup"),
        )
        .arg(
            Arg::new("save-settings")
                .long("save-settings")
                .action(ArgAction::SetTrue)
                .help("Persist the effective settings after the command"),
        )
        .arg(
            Arg::new("export-csv")
                .long("export-csv")
                .value_name("FILE")
                .help("Export this session's command history to CSV"),
        )
        .arg(
            Arg::new("export-json")
                .long("export-json")
                .value_name("FILE")
                .help("Export this session's command history to JSON"),
        )
        .subcommand(Command::new("ports").about("List available serial ports"))
        .subcommand(
            Command::new("read")
                .about("Read registers or coils into the register bank")
                .arg(
                    Arg::new("type")
                        .long("type")
                        .short('t')
                        .default_value("holding")
                        .help("Register type: holding, input or coils"),
                )
                .arg(address_arg.clone())
                .arg(
                    Arg::new("count")
                        .long("count")
                        .short('c')
                        .default_value("1")
                        .help("Number of registers/coils (1-64)"),
                ),
        )
        .subcommand(
            Command::new("write")
                .about("Write register values (a single value uses Write Single Register)")
                .arg(address_arg.clone())
                .arg(
                    Arg::new("values")
                        .required(true)
                        .num_args(1..)
                        .help("Register values as hex, e.g. 0x00FF 1234 1a"),
                ),
        )
        .subcommand(
            Command::new("write-coils")
                .about("Write coil states")
                .arg(address_arg.clone())
                .arg(
                    Arg::new("values")
                        .required(true)
                        .num_args(1..)
                        .help("Coil states, 0 or 1"),
                ),
        )
        .subcommand(
            Command::new("raw")
                .about("Send a raw Modbus command (CRC is appended automatically - do not include CRC)")
                .arg(
                    Arg::new("bytes")
                        .required(true)
                        .num_args(1..)
                        .help("Hex bytes, e.g. 01 03 00 00 00 06"),
                ),
        )
}

fn parse_number<T: std::str::FromStr>(matches: &ArgMatches, name: &str) -> Result<T, ModbusError> {
    let text = matches
        .get_one::<String>(name)
        .ok_or_else(|| ModbusError::InvalidInput(format!("Missing argument: {}", name)))?;
    text.parse::<T>()
        .map_err(|_| ModbusError::InvalidInput(format!("Invalid {}: {}", name, text)))
}

fn report_outcome(outcome: &CommandOutcome) {
    match outcome {
        CommandOutcome::Succeeded {
            response_time_ms, ..
        } => {
            println!("✅ Command completed in {:.2}ms", response_time_ms);
        }
        CommandOutcome::Failed { error } => {
            println!("❌ Command failed: {}", error);
        }
    }
}

fn print_bank_range(ctx: &SessionContext, address: u16, count: u16) {
    for offset in 0..count {
        let slot = address + offset;
        if let Some(text) = ctx.bank.text(slot) {
            println!("  {:02}: {}", slot, text);
        }
    }
}

/// Dispatch the matched subcommand against the session. Returns `false`
/// when no subcommand was given. The effective settings are updated with
/// the executed command so `--save-settings` persists what actually ran.
pub async fn handle_subcommands(
    matches: &ArgMatches,
    ctx: &mut SessionContext,
    settings: &mut Settings,
) -> Result<bool, ModbusError> {
    if let Some(matches) = matches.subcommand_matches("read") {
        let type_name = matches
            .get_one::<String>("type")
            .map(String::as_str)
            .unwrap_or("holding");
        let kind = match type_name {
            "holding" => FunctionKind::ReadHoldingRegisters,
            "input" => FunctionKind::ReadInputRegisters,
            "coils" => FunctionKind::ReadCoils,
            other => {
                return Err(ModbusError::InvalidInput(format!(
                    "Unknown register type: {}. Use holding, input or coils",
                    other
                )))
            }
        };
        let address: u16 = parse_number(matches, "address")?;
        let count: u16 = parse_number(matches, "count")?;

        let outcome = dispatcher::execute(
            ctx,
            &CommandRequest {
                kind,
                slave_id: settings.slave_id,
                address,
                count,
            },
        )
        .await?;
        report_outcome(&outcome);
        if outcome.is_success() {
            print_bank_range(ctx, address, count);
        }

        settings.command_type = kind.label().to_string();
        settings.address = address;
        settings.count = count;
        return Ok(true);
    }

    if let Some(matches) = matches.subcommand_matches("write") {
        let address: u16 = parse_number(matches, "address")?;
        let mut values = Vec::new();
        for text in matches.get_many::<String>("values").into_iter().flatten() {
            values.push(parse_hex_text(&normalize_hex_text(text))?);
        }

        let kind = if values.len() == 1 {
            FunctionKind::WriteSingleRegister
        } else {
            FunctionKind::WriteMultipleRegisters
        };
        let count = values.len() as u16;

        // stage the values the way the operator edits slots before Execute
        ctx.bank.write(address, &values)?;
        let outcome = dispatcher::execute(
            ctx,
            &CommandRequest {
                kind,
                slave_id: settings.slave_id,
                address,
                count,
            },
        )
        .await?;
        report_outcome(&outcome);

        settings.command_type = kind.label().to_string();
        settings.address = address;
        settings.count = count;
        return Ok(true);
    }

    if let Some(matches) = matches.subcommand_matches("write-coils") {
        let address: u16 = parse_number(matches, "address")?;
        let mut values = Vec::new();
        for text in matches.get_many::<String>("values").into_iter().flatten() {
            match text.as_str() {
                "0" => values.push(0u16),
                "1" => values.push(1u16),
                other => {
                    return Err(ModbusError::InvalidInput(format!(
                        "Coil value must be 0 or 1, got {}",
                        other
                    )))
                }
            }
        }
        let count = values.len() as u16;

        ctx.bank.write(address, &values)?;
        let outcome = dispatcher::execute(
            ctx,
            &CommandRequest {
                kind: FunctionKind::WriteMultipleCoils,
                slave_id: settings.slave_id,
                address,
                count,
            },
        )
        .await?;
        report_outcome(&outcome);

        settings.command_type = FunctionKind::WriteMultipleCoils.label().to_string();
        settings.address = address;
        settings.count = count;
        return Ok(true);
    }

    if let Some(matches) = matches.subcommand_matches("raw") {
        let bytes: Vec<String> = matches
            .get_many::<String>("bytes")
            .into_iter()
            .flatten()
            .cloned()
            .collect();
        let outcome = dispatcher::execute_raw(ctx, &bytes.join(" ")).await?;
        report_outcome(&outcome);
        return Ok(true);
    }

    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_read() {
        let matches = build_cli().get_matches_from([
            "modbus_rtu_probe",
            "--port",
            "/dev/ttyUSB0",
            "read",
            "--type",
            "input",
            "-a",
            "10",
            "-c",
            "4",
        ]);
        assert_eq!(
            matches.get_one::<String>("port").map(String::as_str),
            Some("/dev/ttyUSB0")
        );
        let sub = matches.subcommand_matches("read").unwrap();
        assert_eq!(sub.get_one::<String>("type").unwrap(), "input");
        assert_eq!(sub.get_one::<String>("address").unwrap(), "10");
        assert_eq!(sub.get_one::<String>("count").unwrap(), "4");
    }

    #[test]
    fn test_cli_parses_raw_bytes() {
        let matches =
            build_cli().get_matches_from(["modbus_rtu_probe", "raw", "01", "03", "00", "00"]);
        let sub = matches.subcommand_matches("raw").unwrap();
        let bytes: Vec<&String> = sub.get_many::<String>("bytes").unwrap().collect();
        assert_eq!(bytes.len(), 4);
    }

    #[test]
    fn test_cli_defaults() {
        let matches = build_cli().get_matches_from(["modbus_rtu_probe", "read"]);
        let sub = matches.subcommand_matches("read").unwrap();
        assert_eq!(sub.get_one::<String>("type").unwrap(), "holding");
        assert_eq!(sub.get_one::<String>("address").unwrap(), "0");
        assert_eq!(
            matches.get_one::<String>("settings").unwrap(),
            DEFAULT_SETTINGS_FILE
        );
    }
}
