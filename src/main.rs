use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use regwatch::config::Config;

#[derive(Parser)]
#[command(
    name = "regwatch",
    version,
    about = "Reconciles KV-declared service registrations onto the local Consul agent",
    long_about = None
)]
struct Cli {
    /// Path to TOML config file - optional
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// KV prefix to watch for service registrations
    #[arg(short, long)]
    prefix: Option<String>,

    /// Orphan mode: adopt registrations stranded on other nodes
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    orphan: Option<bool>,

    /// Base URL of the local agent
    #[arg(long)]
    consul_addr: Option<String>,

    /// TCP port for remote agent connections
    #[arg(long)]
    consul_port: Option<u16>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long)]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;

    // CLI flags win over file and environment
    if let Some(prefix) = cli.prefix {
        config.watch.prefix = prefix;
    }
    if let Some(orphan) = cli.orphan {
        config.watch.orphanage = orphan;
    }
    if let Some(addr) = cli.consul_addr {
        config.agent.address = addr;
    }
    if let Some(port) = cli.consul_port {
        config.agent.remote_port = port;
    }
    if cli.verbose {
        config.logging.level = String::from("debug");
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }

    config.validate()?;
    setup_tracing(&config.logging.format, &config.logging.level)?;

    tracing::info!(
        prefix = %config.watch.prefix,
        orphanage = %config.watch.orphanage,
        "regwatch starting"
    );

    regwatch::daemon::run(config).await?;

    tracing::info!("regwatch stopped");
    Ok(())
}

fn setup_tracing(format: &str, level: &str) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::new(format!("regwatch={level},warn"));

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
