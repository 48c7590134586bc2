//! Error taxonomy for the miner supervisor.
//!
//! Caller-facing operations return [`SupervisorError`]; faults inside the
//! ingestion task are [`IngestError`] and only ever get logged.

use std::path::PathBuf;
use thiserror::Error;

/// A launch specification rejected by the backend policy table.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// No policy row for this backend; launches are refused rather than
    /// passed through unchecked.
    #[error("no launch policy registered for backend `{backend}`")]
    UnknownBackend { backend: String },

    #[error("required flag {flag} is missing from the argument list")]
    MissingFlag { flag: String },

    #[error("flag {flag} is present but has no value")]
    MissingValue { flag: String },

    #[error("algorithm `{algo}` is not allowed (expected one of: {allowed})")]
    DisallowedAlgorithm { algo: String, allowed: String },

    #[error("pool `{pool}` does not contain any of: {expected}")]
    PoolNotAllowed { pool: String, expected: String },

    #[error("wallet `{wallet}` must start with `{prefix}`")]
    WalletPrefix { wallet: String, prefix: String },
}

/// Errors returned by [`crate::runtime::Supervisor`] operations.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("miner executable not found at {}. Please run the installer.", path.display())]
    ExecutableNotFound { path: PathBuf },

    #[error("miner is already running")]
    AlreadyRunning,

    #[error("miner is not running")]
    NotRunning,

    #[error("failed to spawn {}: {source}", path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Faults inside the ingestion task. Never propagated to callers.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("reading miner output failed: {0}")]
    StreamRead(#[source] std::io::Error),

    #[error("writing miner log file failed: {0}")]
    LogWrite(#[source] std::io::Error),
}

/// Errors while loading the YAML configuration file.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    #[error("cannot read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}
