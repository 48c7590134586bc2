use anyhow::Context;
use futures::StreamExt;
use rigwatch::control::{start_miner, status_json, status_line, stop_miner};
use rigwatch::logger::logs_tracing;
use rigwatch::parse::{parser, Config};
use rigwatch::shell::{run_shell, ShellCommand};
use rigwatch::{Supervisor, SupervisorError, SupervisorOptions};
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
use signal_hook_tokio::Signals;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

const DEFAULT_CONFIG: &str = "config/config.yml";

type SharedConfig = Arc<RwLock<Config>>;

async fn reload(path: &Path, config: &SharedConfig, supervisor: &Supervisor) {
    match parser(path) {
        Ok(cfg) => {
            supervisor.replace_policies(cfg.policy_table());
            info!(path = %path.display(), backend = %cfg.miner.backend, "config reloaded");
            println!("Reloaded {} (applies at next start)", path.display());
            *config.write().await = cfg;
        }
        Err(e) => {
            warn!(error = %e, "config reload failed");
            println!("Reload failed: {e}");
        }
    }
}

fn warn_if_not_installed(supervisor: &Supervisor, cfg: &Config) {
    if let Err(e @ SupervisorError::ExecutableNotFound { .. }) = supervisor.executable_for(&cfg.miner) {
        warn!(error = %e, "miner executable missing");
        println!("WARNING: {e}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = PathBuf::from(std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG.into()));
    let cfg = parser(&config_path).context("loading configuration")?;
    let log_guard = logs_tracing(&cfg.paths.logs, &cfg.log_level).context("installing tracing subscriber")?;

    let supervisor = Arc::new(Supervisor::new(SupervisorOptions::from_config(&cfg)));
    warn_if_not_installed(&supervisor, &cfg);
    let history = cfg.paths.logs.join("history.txt");
    let config: SharedConfig = Arc::new(RwLock::new(cfg));

    // SIGHUP reloads, SIGINT/SIGTERM stop the miner and exit.
    let mut signals = Signals::new([SIGHUP, SIGINT, SIGTERM]).context("registering signal handlers")?;
    let signal_handle = signals.handle();
    {
        let supervisor = supervisor.clone();
        let config = config.clone();
        let path = config_path.clone();
        let log_guard = log_guard.clone();
        tokio::spawn(async move {
            while let Some(signal) = signals.next().await {
                if signal == SIGHUP {
                    info!("SIGHUP received, reloading");
                    reload(&path, &config, &supervisor).await;
                    continue;
                }
                info!(signal, "shutdown signal received");
                if let Err(e) = supervisor.stop().await {
                    info!(error = %e, "nothing to stop");
                }
                // The shell may be blocked in readline; flush the log before leaving.
                info!("exiting");
                log_guard.release();
                std::process::exit(0);
            }
        });
    }

    run_shell(&history, |cmd| {
        let supervisor = supervisor.clone();
        let config = config.clone();
        let path = config_path.clone();
        async move {
            match cmd {
                ShellCommand::Status => println!("{}", status_line(&supervisor)),
                ShellCommand::Json => match status_json(&supervisor) {
                    Ok(json) => println!("{json}"),
                    Err(e) => println!("Error: {e}"),
                },
                ShellCommand::Logs(n) => {
                    let logs = supervisor.status().logs;
                    for line in &logs[logs.len().saturating_sub(n)..] {
                        println!("{line}");
                    }
                }
                ShellCommand::Start => {
                    let spec = config.read().await.miner.clone();
                    println!("{}", start_miner(&supervisor, &spec).await.message);
                }
                ShellCommand::Stop => println!("{}", stop_miner(&supervisor).await.message),
                ShellCommand::Reload => reload(&path, &config, &supervisor).await,
                ShellCommand::Exit | ShellCommand::Empty | ShellCommand::Unknown => {}
            }
        }
    })
    .await
    .context("interactive shell")?;

    signal_handle.close();
    if supervisor.stop().await.is_ok() {
        info!("miner stopped on exit");
    }
    log_guard.release();
    Ok(())
}
