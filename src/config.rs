//! Daemon configuration: a `serde_yaml` file merged with `clap` overrides
//! from the command line, into a single struct covering everything the
//! reactor pool, control surface, and NVMe-oF publishing need at startup.

use clap::Parser;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use std::path::PathBuf;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub enum ConfigError {
    #[snafu(display("failed to read config file '{}': {}", path.display(), source))]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to parse config file '{}': {}", path.display(), source))]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

pub type Result<T, E = ConfigError> = std::result::Result<T, E>;

/// Command-line flags for the `mirrorvold` daemon.
#[derive(Debug, Parser)]
#[command(name = "mirrorvold", about = "Mirrored-volume data-path engine")]
pub struct Cli {
    /// Path to a YAML config file; overridden field-by-field by any flag
    /// below that is also given.
    #[arg(short, long, env = "MIRRORVOL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address the JSON-RPC control surface binds to.
    #[arg(long, env = "MIRRORVOL_RPC_ADDRESS")]
    pub rpc_address: Option<String>,

    /// Number of reactor threads; defaults to the number of available cores.
    #[arg(long, env = "MIRRORVOL_CORES")]
    pub cores: Option<usize>,

    /// Default address advertised for NVMe-oF publication.
    #[arg(long, env = "MIRRORVOL_NVMF_ADDRESS")]
    pub nvmf_address: Option<String>,

    /// Log level used when `RUST_LOG` is not set.
    #[arg(short, long, default_value = "info")]
    pub log_level: String,
}

/// The merged, effective configuration threaded through daemon startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub rpc_address: String,
    pub cores: usize,
    pub nvmf_address: String,
    pub org: String,
    pub date: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc_address: "127.0.0.1:10124".to_string(),
            cores: num_cpus(),
            nvmf_address: crate::nvmf::DEFAULT_NVMF_ADDRESS.to_string(),
            org: "mirrorvol".to_string(),
            date: "2024-01".to_string(),
        }
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl Config {
    /// Loads `path` if given, then applies any CLI/env overrides.
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut config = match &cli.config {
            Some(path) => {
                let text = std::fs::read_to_string(path).context(Read { path: path.clone() })?;
                serde_yaml::from_str(&text).context(Parse { path: path.clone() })?
            }
            None => Config::default(),
        };

        if let Some(addr) = &cli.rpc_address {
            config.rpc_address = addr.clone();
        }
        if let Some(cores) = cli.cores {
            config.cores = cores;
        }
        if let Some(addr) = &cli.nvmf_address {
            config.nvmf_address = addr.clone();
        }

        Ok(config)
    }
}
