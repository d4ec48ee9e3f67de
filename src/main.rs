use clap::Parser;
use homewizard_p1_bridge::{config, logging, service, Config, MeterClient, MeterService};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "homewizard_p1_bridge")]
#[command(about = "Publishes HomeWizard P1 meter readings onto the energy system data bus")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Development mode: relaxed configuration, one reading, then exit
    #[arg(short, long)]
    dev: bool,

    /// Use mock data instead of connecting to a real meter
    #[arg(short, long)]
    mock: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(&cli.config, cli.dev) {
        Ok(config) => config,
        Err(e) => {
            logging::init("info", None);
            error!("Invalid configuration: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let level = if cli.verbose {
        "debug"
    } else {
        config.log_level.as_str()
    };
    let log_file = cli
        .config
        .parent()
        .map(|dir| dir.join("current.log"))
        .unwrap_or_else(|| PathBuf::from("current.log"));
    logging::init(level, Some(&log_file));

    let client = match service::build_client(&config, cli.mock) {
        Ok(client) => client,
        Err(e) => {
            error!("Cannot create meter client: {e}");
            return ExitCode::FAILURE;
        }
    };

    if cli.dev {
        return development_mode(client).await;
    }

    info!("Starting Home Wizard Energy P1 bus service");
    let meter_service = MeterService::start(&config, client).await;

    wait_for_shutdown().await;
    meter_service.stop().await;
    ExitCode::SUCCESS
}

/// One reading, logged, without publishing anything.
async fn development_mode(mut client: MeterClient) -> ExitCode {
    info!("Starting in development mode (no bus integration)");

    let reading = match client.fetch_reading().await {
        Ok(reading) => reading,
        Err(e) => {
            error!("Failed to retrieve meter data: {e}");
            return ExitCode::FAILURE;
        }
    };

    let show = |value: Option<f64>| value.map_or_else(|| "N/A".to_string(), |v| v.to_string());
    info!("Successfully retrieved meter data:");
    info!("Serial: {}", client.meter_serial().await);
    info!("Three-phase meter: {}", MeterClient::is_three_phase(&reading));
    info!("Power: {} W", show(reading.active_power_w));
    info!("Total import: {} kWh", show(reading.total_power_import_kwh));
    info!("Total export: {} kWh", show(reading.total_power_export_kwh));
    ExitCode::SUCCESS
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT, shutting down"),
                    _ = terminate.recv() => info!("Received SIGTERM, shutting down"),
                }
                return;
            }
            Err(e) => warn!("Cannot listen for SIGTERM: {e}"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Cannot listen for shutdown signal: {e}");
    }
    info!("Shutting down");
}
