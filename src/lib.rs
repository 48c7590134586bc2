/* src/lib.rs */

// Re-export modules for both binary and tests
pub mod control;
pub mod error;
pub mod ingest;
pub mod logger;
pub mod parse;
pub mod policy;
pub mod runtime;
pub mod shell;
pub mod sink;
pub mod stats;
pub mod telemetry;

pub use error::{ConfigError, SupervisorError};
pub use parse::{Config, LaunchSpec};
pub use runtime::{Phase, Supervisor, SupervisorOptions};
pub use stats::StatusReport;
