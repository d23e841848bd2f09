pub mod config;
pub mod sessions;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};

use ks_domain::config::Config;
use ks_domain::trace::SessionKind;

/// Keystone: inspect and maintain persisted session state.
#[derive(Debug, Parser)]
#[command(name = "keystone", version, about)]
pub struct Cli {
    /// Config file (default: `$KS_CONFIG`, then `keystone.toml`).
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Persisted session utilities.
    #[command(subcommand)]
    Sessions(SessionsCommand),
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum SessionsCommand {
    /// List persisted sessions.  Tokens are redacted.
    List {
        /// Only show one kind of session.
        #[arg(long, value_enum)]
        kind: Option<KindFilter>,
        /// Also show rows that have already expired.
        #[arg(long)]
        include_expired: bool,
        /// Print rows as JSON lines.
        #[arg(long)]
        json: bool,
    },
    /// Remove expired rows from the state file.
    Prune,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

/// Session kinds that have persisted rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindFilter {
    Account,
    Messaging,
    Remote,
    Web,
}

impl KindFilter {
    pub fn matches(self, kind: SessionKind) -> bool {
        matches!(
            (self, kind),
            (KindFilter::Account, SessionKind::Account)
                | (KindFilter::Messaging, SessionKind::Messaging)
                | (KindFilter::Remote, SessionKind::Remote)
                | (KindFilter::Web, SessionKind::Web)
        )
    }
}

// ── Config loading ────────────────────────────────────────────────

/// Environment variable naming the config file when `--config` is absent.
pub const CONFIG_ENV: &str = "KS_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "keystone.toml";

/// A parsed config and where it came from.
#[derive(Debug)]
pub struct LoadedConfig {
    pub config: Config,
    pub path: PathBuf,
    /// `false` when the file was missing and defaults were used.
    pub from_file: bool,
}

impl LoadedConfig {
    pub fn describe_source(&self) -> String {
        if self.from_file {
            format!("Config: {}", self.path.display())
        } else {
            format!("Config: {} not found, using defaults", self.path.display())
        }
    }
}

/// Resolve the config path (`--config`, then `KS_CONFIG`, then
/// `keystone.toml`) and load it.
pub fn load_config(explicit: Option<&Path>) -> anyhow::Result<LoadedConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH)),
    };
    read_config(&path)
}

/// A missing file yields the defaults; an unreadable or malformed one is
/// an error.
pub fn read_config(path: &Path) -> anyhow::Result<LoadedConfig> {
    if !path.exists() {
        return Ok(LoadedConfig {
            config: Config::default(),
            path: path.to_path_buf(),
            from_file: false,
        });
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let config: Config =
        toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    Ok(LoadedConfig {
        config,
        path: path.to_path_buf(),
        from_file: true,
    })
}
