use crate::error::ConfigFileError;
use crate::policy::{BackendPolicy, PolicyTable};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// What to launch: backend id, optional executable override and the
/// ordered argument list passed to the miner.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub backend: String,
    #[serde(default)]
    pub exe: Option<PathBuf>,
    #[serde(default)]
    pub args: Vec<String>,
}

fn default_miners_dir() -> PathBuf { PathBuf::from("miners") }
fn default_logs_dir() -> PathBuf { PathBuf::from("logs") }
fn default_log_level() -> String { String::from("info") }
fn default_stop_grace_secs() -> u64 { 5 }

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct Paths {
    /// Root for backend default executables.
    #[serde(default = "default_miners_dir")]
    pub miners: PathBuf,
    /// Per-run miner logs and the supervisor's own log.
    #[serde(default = "default_logs_dir")]
    pub logs: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            miners: default_miners_dir(),
            logs: default_logs_dir(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub miner: LaunchSpec,
    #[serde(default)]
    pub paths: Paths,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,
    /// Extra or replacement backend rows.
    #[serde(default)]
    pub policies: Vec<BackendPolicy>,
}

impl Config {
    /// Builtin backend rows merged with the configured ones.
    pub fn policy_table(&self) -> PolicyTable {
        let mut table = PolicyTable::builtin();
        table.extend(self.policies.iter().cloned());
        table
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }
}



/*
    @@@
    @parser();
    . Reads the content of config.yml into a String; I/O errors come back as ConfigFileError::Read.
    . Hands the raw YAML text to serde_yaml; malformed YAML comes back as ConfigFileError::Parse.
*/
pub fn parser(path: impl AsRef<Path>) -> Result<Config, ConfigFileError> {
    let path = path.as_ref();
    let yaml_file = fs::read_to_string(path).map_err(|source| ConfigFileError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&yaml_file).map_err(|source| ConfigFileError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
