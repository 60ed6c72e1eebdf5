//! Settings resolved from the command line.

use std::path::PathBuf;
use std::time::Duration;

use sk_io::{Layout, NetConfig, ProfileStore};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
    Trace,
}

impl Verbosity {
    /// `--trace` wins over `--verbose`, which wins over `--quiet`.
    pub fn from_flags(quiet: bool, verbose: bool, trace: bool) -> Self {
        if trace {
            Verbosity::Trace
        } else if verbose {
            Verbosity::Verbose
        } else if quiet {
            Verbosity::Quiet
        } else {
            Verbosity::Normal
        }
    }

    pub fn directive(self) -> &'static str {
        match self {
            Verbosity::Quiet => "warn",
            Verbosity::Normal => "info",
            Verbosity::Verbose => "debug",
            Verbosity::Trace => "trace",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub root: PathBuf,
    pub profile: PathBuf,
    pub net: NetConfig,
    pub force: bool,
    pub force_delete: bool,
    pub verbosity: Verbosity,
}

impl Settings {
    pub fn layout(&self) -> Layout {
        Layout::new(&self.root)
    }

    pub fn profiles(&self) -> ProfileStore {
        ProfileStore::new(&self.profile)
    }

    pub fn quiet(&self) -> bool {
        self.verbosity == Verbosity::Quiet
    }
}

/// Network settings from the global flags. `--insecure` only affects TLS
/// verification; it has no bearing on log verbosity.
pub fn net_config(user_agent: Option<String>, insecure: bool, https_proxy: Option<String>) -> NetConfig {
    let defaults = NetConfig::default();
    NetConfig {
        user_agent: user_agent.unwrap_or(defaults.user_agent),
        insecure,
        https_proxy: https_proxy.filter(|p| !p.trim().is_empty()),
        timeout: Some(Duration::from_secs(300)),
    }
}

/// Install the global subscriber. `RUST_LOG` takes precedence over flags.
pub fn init_tracing(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("sk_cli={0},sk_io={0},sk_core={0}", verbosity.directive())));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbosity == Verbosity::Trace)
        .try_init();
}
