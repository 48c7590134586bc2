use crate::parse::LaunchSpec;
use crate::runtime::Supervisor;
use serde::Serialize;
use tracing::{info, warn};

/// Flattened result of a control operation, as handed to the API layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlReply {
    pub ok: bool,
    pub message: String,
}

impl ControlReply {
    fn ok(message: impl Into<String>) -> Self {
        Self { ok: true, message: message.into() }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self { ok: false, message: message.into() }
    }
}

pub async fn start_miner(supervisor: &Supervisor, spec: &LaunchSpec) -> ControlReply {
    match supervisor.start(spec).await {
        Ok(pid) => ControlReply::ok(format!("Started with PID {pid}")),
        Err(e) => {
            warn!(backend = %spec.backend, error = %e, "start rejected");
            ControlReply::failed(e.to_string())
        }
    }
}

pub async fn stop_miner(supervisor: &Supervisor) -> ControlReply {
    match supervisor.stop().await {
        Ok(pid) => {
            info!(pid, "stop completed");
            ControlReply::ok("Stopped")
        }
        Err(e) => ControlReply::failed(e.to_string()),
    }
}

/// `{running, pid, stats: {...}, logs: [...]}` as pretty JSON.
pub fn status_json(supervisor: &Supervisor) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&supervisor.status())
}

/// One-line human summary for the shell.
pub fn status_line(supervisor: &Supervisor) -> String {
    let report = supervisor.status();
    let stats = &report.stats;
    match report.pid {
        Some(pid) if report.running => format!(
            "running (pid {pid}, up {}s) | {} | A/R {}/{} | algo {} | pool {}",
            stats.uptime, stats.hashrate, stats.accepted, stats.rejected, stats.algo, stats.pool
        ),
        _ => format!(
            "stopped | last: {} | A/R {}/{}",
            stats.hashrate, stats.accepted, stats.rejected
        ),
    }
}
