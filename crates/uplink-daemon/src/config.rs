use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_api_host")]
    pub api_host: String,
    #[serde(default = "default_ws_host")]
    pub ws_host: String,
    #[serde(default = "default_handler_concurrency")]
    pub handler_concurrency: usize,
    /// Local ports reachable through control-plane tunnel forwarding.
    #[serde(default = "default_port_allowlist")]
    pub local_port_allowlist: Vec<u16>,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    #[serde(default = "default_params_dir")]
    pub params_dir: PathBuf,
    #[serde(default = "default_persist_dir")]
    pub persist_dir: PathBuf,
    #[serde(default = "default_bus_socket")]
    pub bus_socket: PathBuf,
}

fn default_api_host() -> String {
    "https://api.retropilot.org".to_string()
}

fn default_ws_host() -> String {
    "wss://api.retropilot.org:4040".to_string()
}

fn default_handler_concurrency() -> usize {
    4
}

fn default_port_allowlist() -> Vec<u16> {
    vec![8022]
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/data/log")
}

fn default_params_dir() -> PathBuf {
    PathBuf::from("/data/params")
}

fn default_persist_dir() -> PathBuf {
    PathBuf::from("/persist/comma")
}

fn default_bus_socket() -> PathBuf {
    PathBuf::from("/data/telemetry.sock")
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            api_host: default_api_host(),
            ws_host: default_ws_host(),
            handler_concurrency: default_handler_concurrency(),
            local_port_allowlist: default_port_allowlist(),
            log_dir: default_log_dir(),
            params_dir: default_params_dir(),
            persist_dir: default_persist_dir(),
            bus_socket: default_bus_socket(),
        }
    }
}

impl DaemonConfig {
    pub fn from_toml(input: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(input)
    }

    /// No path or a missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> io::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        match fs::read_to_string(path) {
            Ok(input) => {
                Self::from_toml(&input).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err),
        }
    }
}
