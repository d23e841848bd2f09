use clap::Parser;
use tracing_subscriber::EnvFilter;

use ks_cli::cli::{self, Cli, Command, ConfigCommand, SessionsCommand};
use ks_domain::config::LoggingConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let load = || cli::load_config(cli.config.as_deref());

    match cli.command {
        Command::Sessions(SessionsCommand::List {
            kind,
            include_expired,
            json,
        }) => {
            let loaded = load()?;
            init_tracing(&loaded.config.logging);
            cli::sessions::list(&loaded.config, kind, include_expired, json).await
        }
        Command::Sessions(SessionsCommand::Prune) => {
            let loaded = load()?;
            init_tracing(&loaded.config.logging);
            cli::sessions::prune(&loaded.config).await
        }
        Command::Config(ConfigCommand::Validate) => {
            if !cli::config::validate(&load()?) {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Config(ConfigCommand::Show) => cli::config::show(&load()?.config),
        Command::Version => {
            println!("keystone {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Log to stderr so command output on stdout stays clean.  `RUST_LOG`
/// overrides the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    if logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .compact()
            .init();
    }
}
