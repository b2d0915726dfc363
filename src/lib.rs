// Neonvoice - speech clip player
// Module declarations
pub mod audio;
pub mod commands;
pub mod error;
pub mod settings;
pub mod visualizer;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use commands::Cli;

/// Library and binary log targets, used when RUST_LOG is unset
const DEFAULT_LOG_FILTER: &str = "neonvoice_lib=info,neonvoice=info";

pub fn run() -> anyhow::Result<()> {
    // Logs go to stderr so they stay off the progress line
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    // The cpal stream is not Send, so everything stays on one thread
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(commands::execute(cli))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_log_filter_names_both_targets() {
        let filter = tracing_subscriber::EnvFilter::try_new(DEFAULT_LOG_FILTER).unwrap();
        let text = filter.to_string();
        assert!(text.contains("neonvoice_lib=info"));
        assert!(text.contains("neonvoice=info"));
    }
}
