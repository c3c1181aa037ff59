//! Zenoh bridge for EXO multi-parameter sondes.
//!
//! Polls the sonde over Modbus RTU and publishes decoded readings to Zenoh.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use zenoh_bridge_exosonde::acquisition::Acquisition;
use zenoh_bridge_exosonde::config::SondeBridgeConfig;
use zenoh_bridge_exosonde::decoder::RegisterDecoder;
use zenoh_bridge_exosonde::lookup::LookupTable;
use zenoh_bridge_exosonde::publisher::ZenohPublisher;
use zenoh_bridge_exosonde::transport::RtuConnector;

/// Zenoh bridge for EXO sondes (Modbus RTU).
#[derive(Parser, Debug)]
#[command(name = "zenoh-bridge-exosonde")]
#[command(about = "Polls an EXO sonde and publishes decoded readings to Zenoh")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format). Defaults apply without one.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial port name.
    #[arg(long)]
    port: Option<String>,

    /// Baud rate.
    #[arg(long)]
    rate: Option<u32>,

    /// Sleep time between data readings, in seconds.
    #[arg(long)]
    sleep: Option<u64>,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    fn apply(&self, config: &mut SondeBridgeConfig) {
        if let Some(port) = &self.port {
            config.sonde.serial.port = port.clone();
        }
        if let Some(rate) = self.rate {
            config.sonde.serial.baud_rate = rate;
        }
        if let Some(sleep) = self.sleep {
            config.sonde.sleep_secs = sleep;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => SondeBridgeConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => SondeBridgeConfig::default(),
    };
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    // Initialize logging
    sondesight_common::init_tracing(&config.logging)
        .map_err(|e| anyhow::anyhow!("Failed to init tracing: {}", e))?;

    info!("Starting zenoh-bridge-exosonde");
    if let Some(path) = &args.config {
        info!("Loaded configuration from {:?}", path);
    }

    let sonde = &config.sonde;
    let table = LookupTable::from_csv_path(&sonde.lookup_table)
        .with_context(|| format!("Failed to load lookup table {:?}", sonde.lookup_table))?;
    info!(codes = table.len(), "Loaded lookup table from {:?}", sonde.lookup_table);

    // Connect to Zenoh
    let session = sondesight_common::connect(&config.zenoh)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to Zenoh: {}", e))?;

    let publisher = ZenohPublisher::new(
        session.clone(),
        &sonde.key_prefix,
        sonde.name.clone(),
        config.serialization,
    );
    info!("Publishing to '{}'", publisher.key());

    // Publish bridge status
    let status_key = format!("{}/@/status", sonde.key_prefix);
    let status = serde_json::json!({
        "bridge": "exosonde",
        "version": env!("CARGO_PKG_VERSION"),
        "instrument": sonde.name,
        "status": "running"
    });
    if let Err(e) = session.put(&status_key, status.to_string()).await {
        error!("Failed to publish bridge status: {}", e);
    }

    info!("Connecting to {}", sonde.serial.port);
    let acquisition = Acquisition::new(
        sonde.name.clone(),
        RtuConnector::from_config(sonde),
        RegisterDecoder::new(Arc::new(table)),
        publisher,
        sonde.timing(),
    );

    let stopped = tokio::select! {
        e = acquisition.run() => Some(e),
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            None
        }
    };

    // Publish offline status
    let status = serde_json::json!({
        "bridge": "exosonde",
        "instrument": sonde.name,
        "status": "offline"
    });
    let _ = session.put(&status_key, status.to_string()).await;

    session
        .close()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to close Zenoh session: {}", e))?;
    info!("Exosonde bridge stopped");

    match stopped {
        Some(e) => Err(anyhow::Error::new(e).context("Acquisition stopped")),
        None => Ok(()),
    }
}
