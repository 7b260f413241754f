//! rust_labdaq server
//!
//! Discovers the devices on the bus and serves one endpoint per device.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;

use rust_labdaq::config::Settings;
use rust_labdaq::hardware::mock::{SimBus, SimDirectory};
use rust_labdaq::{logging, Application};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser, Debug)]
#[command(name = "rust_labdaq", version, about = "Bus-attached lab devices as services")]
struct Args {
    /// Settings file
    #[arg(short, long, default_value = Settings::DEFAULT_PATH)]
    config: PathBuf,

    /// Port of the first endpoint
    #[arg(long)]
    base_port: Option<u16>,

    /// Use simulated hardware for every declared device
    #[arg(long)]
    simulate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut settings = Settings::load_from(&args.config)
        .with_context(|| format!("Failed to load settings from {}", args.config.display()))?;
    if let Some(port) = args.base_port {
        settings.server.base_port = port;
        settings.validate().context("Invalid base port")?;
    }
    logging::init(&settings.application);
    info!("Starting {}", settings.application.name);

    if !args.simulate {
        bail!("No hardware bus driver is linked into this build; run with --simulate");
    }
    let bus = Arc::new(SimBus::new());
    let directory = SimDirectory::for_devices(&settings.devices);

    let app = Application::new(settings, bus, &directory).context("Startup failed")?;
    app.run_until(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Cannot listen for Ctrl-C: {}", e);
        }
    })
    .await
    .context("Shutdown failed")?;
    Ok(())
}
