pub mod check;
pub mod config;
pub mod serve;

use std::path::PathBuf;

use anyhow::Context;
use clap::ArgMatches;
use studio_runtime::config::LogFormat;
use studio_runtime::Config;

/// Layered configuration for a subcommand that takes `--config`
pub fn load_config(matches: &ArgMatches) -> anyhow::Result<Config> {
    let path = matches.get_one::<String>("config").map(PathBuf::from);
    Config::load(path.as_deref()).with_context(|| match &path {
        Some(path) => format!("Failed to load configuration from {}", path.display()),
        None => "Failed to load configuration".to_string(),
    })
}

/// Install the global subscriber; `RUST_LOG` wins over the configured level
pub fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match config.logging.format {
        LogFormat::Full => builder.init(),
        LogFormat::Compact => builder.compact().init(),
    }
}
