mod config;
mod engine;
mod logging;
mod registry;
mod shell;
mod signals;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use nix::unistd::Uid;

use crate::{logging::Logger, registry::Registry, shell::Shell, signals::SignalRouter};

#[derive(Parser, Debug)]
#[command(name = "warden", version, about = "Keeps a declared fleet of programs alive")]
struct Cli {
    /// Path to the program declarations
    #[arg(long, short, default_value = "warden.toml")]
    config: PathBuf,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_tracing();
    let cli = Cli::parse();

    let config = config::load_from_path(&cli.config)
        .with_context(|| format!("loading configuration from {:?}", cli.config.as_os_str()))?;

    if cli.check {
        println!("configuration OK: {} program(s)", config.programs.len());
        return Ok(());
    }

    if !Uid::effective().is_root() {
        bail!("warden must be run as the super-user");
    }

    let logger =
        Logger::new(config.logging_enabled, &config.log_file).context("opening the event log")?;
    logger.info(&format!(
        "supervising {} program(s) from {:?}",
        config.programs.len(),
        cli.config.as_os_str()
    ));

    let mut registry = Registry::new(cli.config.clone(), logger.clone());
    registry.initialize(&config).await?;

    let signals = SignalRouter::install().context("installing signal handlers")?;
    Shell::new(registry, signals).run().await
}
