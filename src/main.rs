use anyhow::{bail, Context, Result};
use log::{info, warn};

use modbus_rtu_probe::cli;
use modbus_rtu_probe::config::{SerialSettings, Settings};
use modbus_rtu_probe::logging::{start_drain, ConsoleSink, Logger};
use modbus_rtu_probe::modbus::transport::{available_ports, SerialTransport};
use modbus_rtu_probe::output;
use modbus_rtu_probe::session::SessionContext;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let matches = cli::build_cli().get_matches();

    // Port enumeration needs no connection or settings.
    if matches.subcommand_matches("ports").is_some() {
        let ports = available_ports().context("Failed to enumerate serial ports")?;
        if ports.is_empty() {
            println!("No serial ports found");
        } else {
            println!("Available serial ports:");
            for port in ports {
                println!("  {}", port);
            }
        }
        return Ok(());
    }

    let settings_path = matches
        .get_one::<String>("settings")
        .cloned()
        .unwrap_or_default();
    let mut settings = Settings::load_or_default(&settings_path);

    if let Some(port) = matches.get_one::<String>("port") {
        settings.port = port.clone();
    }
    if let Some(baud) = matches.get_one::<String>("baud") {
        settings.baudrate = baud.parse().context("Invalid baud rate")?;
    }
    if let Some(slave) = matches.get_one::<String>("slave") {
        settings.slave_id = slave.parse().context("Invalid slave ID")?;
    }

    if settings.port.is_empty() {
        bail!("No serial port configured. Pass --port or run `ports` to list candidates");
    }

    let (logger, log_rx) = Logger::channel();
    let drain = start_drain(log_rx, Box::new(ConsoleSink));

    let serial = SerialSettings::from_settings(&settings);
    let transport = SerialTransport::connect(&serial).context("Connection failed")?;
    let mut ctx = SessionContext::new(Box::new(transport), logger);
    ctx.logger.info("Connected to Modbus device");

    let handled = cli::handle_subcommands(&matches, &mut ctx, &mut settings).await;
    match &handled {
        Ok(true) => {}
        Ok(false) => info!("No command given; see --help for usage"),
        Err(e) => println!("❌ {}", e),
    }

    // Persistence failures are warnings, never fatal.
    if let Some(path) = matches.get_one::<String>("export-csv") {
        match output::export_csv(&ctx.history, path) {
            Ok(()) => ctx.logger.success(format!("Command history exported to {}", path)),
            Err(e) => ctx.logger.warning(format!("Failed to export CSV: {}", e)),
        }
    }
    if let Some(path) = matches.get_one::<String>("export-json") {
        match output::export_json(&ctx.history, path) {
            Ok(()) => ctx.logger.success(format!("Command history exported to {}", path)),
            Err(e) => ctx.logger.warning(format!("Failed to export JSON: {}", e)),
        }
    }
    if matches.get_flag("save-settings") {
        match settings.save(&settings_path) {
            Ok(()) => ctx.logger.success(format!("Settings saved to {}", settings_path)),
            Err(e) => warn!("Failed to save settings: {}", e),
        }
    }

    // Close the connection before terminating, then let the log drain
    // finish once the last producer is gone.
    ctx.transport.close();
    ctx.logger.info("Disconnected from Modbus device");
    drop(ctx);
    let _ = drain.join();

    Ok(())
}
