use crate::error::{ConfigError, SupervisorError};
use crate::ingest::{self, IngestContext, DRAIN_WINDOW};
use crate::parse::{Config, LaunchSpec};
use crate::policy::{BackendPolicy, PolicyTable, ValidatedLaunch};
use crate::stats::{StatsStore, StatusReport};
use chrono::Local;
use nix::fcntl::OFlag;
use nix::unistd::pipe2;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::{Duration, Instant};
use tokio::net::unix::pipe::Receiver;
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, warn};

/// Slack on top of the grace period before `stop` gives up on the
/// ingestion task and aborts it.
const STOP_MARGIN: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Starting,
    Running,
    Stopping,
}

#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub log_dir: PathBuf,
    pub miners_dir: PathBuf,
    pub policies: PolicyTable,
    pub stop_grace: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            miners_dir: PathBuf::from("miners"),
            policies: PolicyTable::builtin(),
            stop_grace: Duration::from_secs(5),
        }
    }
}

impl SupervisorOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            log_dir: cfg.paths.logs.clone(),
            miners_dir: cfg.paths.miners.clone(),
            policies: cfg.policy_table(),
            stop_grace: cfg.stop_grace(),
        }
    }
}

// Taken by the first `stop` call.
struct RunControl {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<Option<ExitStatus>>,
}

// The live process. Present while the phase is Running or Stopping.
struct ProcessHandle {
    run_id: u64,
    pid: u32,
    control: Option<RunControl>,
}

struct Slot {
    phase: Phase,
    current: Option<ProcessHandle>,
    next_run: u64,
}

// Shared between the supervisor and its ingestion task. The task only holds
// a Weak reference so dropping the supervisor tears the run down.
struct Shared {
    slot: Mutex<Slot>,
    stats: Arc<StatsStore>,
}

impl Shared {
    fn lock_slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves run `run_id` to Idle. Called by its ingestion task once the
    /// process is gone, and by `stop` after waiting on that task. Whichever
    /// comes first performs the transition; later calls are no-ops.
    fn finish_run(&self, run_id: u64) {
        let mut slot = self.lock_slot();
        if !slot.current.as_ref().is_some_and(|h| h.run_id == run_id) {
            return;
        }
        if let Some(handle) = slot.current.take() {
            if slot.phase == Phase::Running {
                warn!(pid = handle.pid, "miner exited without a stop request");
            } else {
                info!(pid = handle.pid, "miner run finished");
            }
        }
        slot.phase = Phase::Idle;
        self.stats.mark_stopped();
    }
}

/// Owns at most one miner process and its ingestion task.
///
/// Dropping the supervisor terminates a live miner the same way `stop` does.
pub struct Supervisor {
    shared: Arc<Shared>,
    policies: RwLock<PolicyTable>,
    log_dir: PathBuf,
    miners_dir: PathBuf,
    stop_grace: Duration,
}

impl Supervisor {
    pub fn new(options: SupervisorOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                slot: Mutex::new(Slot {
                    phase: Phase::Idle,
                    current: None,
                    next_run: 0,
                }),
                stats: Arc::new(StatsStore::new()),
            }),
            policies: RwLock::new(options.policies),
            log_dir: options.log_dir,
            miners_dir: options.miners_dir,
            stop_grace: options.stop_grace,
        }
    }

    pub fn phase(&self) -> Phase {
        self.shared.lock_slot().phase
    }

    /// Current telemetry and recent output. Never blocks on the process.
    pub fn status(&self) -> StatusReport {
        self.shared.stats.snapshot()
    }

    /// Swaps the backend table; applies from the next `start`.
    pub fn replace_policies(&self, table: PolicyTable) {
        *self.policies.write().unwrap_or_else(PoisonError::into_inner) = table;
    }

    fn validate(&self, spec: &LaunchSpec) -> Result<ValidatedLaunch, ConfigError> {
        self.policies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .validate(spec)
    }

    /// Resolves the executable `spec` would launch, without validating its
    /// arguments.
    pub fn executable_for(&self, spec: &LaunchSpec) -> Result<PathBuf, SupervisorError> {
        let policies = self.policies.read().unwrap_or_else(PoisonError::into_inner);
        let policy = policies.get(&spec.backend).ok_or_else(|| ConfigError::UnknownBackend {
            backend: spec.backend.clone(),
        })?;
        self.locate(spec, policy)
    }

    /// Explicit override first, else the first existing default candidate.
    fn locate(&self, spec: &LaunchSpec, policy: &BackendPolicy) -> Result<PathBuf, SupervisorError> {
        let path = match &spec.exe {
            Some(path) => path.clone(),
            None => {
                let candidates: Vec<PathBuf> = policy
                    .default_exe
                    .iter()
                    .map(|p| self.miners_dir.join(p))
                    .collect();
                candidates
                    .iter()
                    .find(|p| p.is_file())
                    .or(candidates.first())
                    .cloned()
                    .unwrap_or_else(|| self.miners_dir.join(&policy.id))
            }
        };
        if !path.is_file() {
            return Err(SupervisorError::ExecutableNotFound { path });
        }
        std::path::absolute(&path).map_err(|_| SupervisorError::ExecutableNotFound { path })
    }

    /// Validates and launches `spec`. Returns the new process id.
    ///
    /// Never suspends, so the call cannot be cancelled half way through.
    pub async fn start(&self, spec: &LaunchSpec) -> Result<u32, SupervisorError> {
        {
            let mut slot = self.shared.lock_slot();
            if slot.phase != Phase::Idle {
                return Err(SupervisorError::AlreadyRunning);
            }
            slot.phase = Phase::Starting;
        }

        let result = self.launch(spec);
        if result.is_err() {
            self.shared.lock_slot().phase = Phase::Idle;
        }
        result
    }

    fn launch(&self, spec: &LaunchSpec) -> Result<u32, SupervisorError> {
        let launch = self.validate(spec)?;
        let exe = self.locate(spec, launch.policy())?;
        let workdir = exe.parent().unwrap_or_else(|| Path::new("."));
        let spawn_error = |source: io::Error| SupervisorError::Spawn {
            path: exe.clone(),
            source,
        };

        // stdout and stderr share one pipe, like `2>&1`.
        let (read_end, write_end) = pipe2(OFlag::O_CLOEXEC).map_err(|e| spawn_error(e.into()))?;
        let stderr_end = write_end.try_clone().map_err(spawn_error)?;
        let output = Receiver::from_file(File::from(read_end)).map_err(spawn_error)?;

        info!(
            backend = %launch.policy().id,
            exe = %exe.display(),
            args = %spec.args.join(" "),
            "starting miner"
        );
        // The parent's copies of the write end close with the Command.
        let child = Command::new(&exe)
            .args(&spec.args)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(write_end))
            .stderr(Stdio::from(stderr_end))
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;
        let pid = child
            .id()
            .ok_or_else(|| spawn_error(io::Error::other("process exited before reporting a pid")))?;

        let mut slot = self.shared.lock_slot();
        let run_id = slot.next_run;
        slot.next_run += 1;

        let stats = self.shared.stats.clone();
        stats.reset_for_start(pid, Instant::now(), Some(launch.algo()), Some(launch.pool()));

        let (stop_tx, stop_rx) = oneshot::channel();
        let ctx = IngestContext {
            pid,
            stats,
            parser: launch.policy().parser.build(),
            log_dir: self.log_dir.clone(),
            started_at: Local::now(),
            grace: self.stop_grace,
        };
        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        let task = tokio::spawn(async move {
            let status = ingest::run(child, output, stop_rx, ctx).await;
            if let Some(shared) = shared.upgrade() {
                shared.finish_run(run_id);
            }
            status
        });

        slot.current = Some(ProcessHandle {
            run_id,
            pid,
            control: Some(RunControl { stop_tx, task }),
        });
        slot.phase = Phase::Running;
        info!(pid, backend = %launch.policy().id, "miner running");
        Ok(pid)
    }

    /// Terminates the running miner, escalating to SIGKILL after the grace
    /// period. Returns the pid that was stopped.
    ///
    /// If the returned future is dropped early the ingestion task still
    /// finishes the shutdown and moves the supervisor to Idle.
    pub async fn stop(&self) -> Result<u32, SupervisorError> {
        let (run_id, pid, control) = {
            let mut slot = self.shared.lock_slot();
            if slot.phase != Phase::Running {
                return Err(SupervisorError::NotRunning);
            }
            let Some(handle) = slot.current.as_mut() else {
                return Err(SupervisorError::NotRunning);
            };
            let Some(control) = handle.control.take() else {
                return Err(SupervisorError::NotRunning);
            };
            let taken = (handle.run_id, handle.pid, control);
            slot.phase = Phase::Stopping;
            taken
        };

        let RunControl { stop_tx, mut task } = control;
        info!(pid, "stopping miner");
        // The task may already be past its read loop; that is fine.
        let _ = stop_tx.send(());

        let budget = self.stop_grace + DRAIN_WINDOW + STOP_MARGIN;
        match timeout(budget, &mut task).await {
            Ok(Ok(status)) => info!(pid, status = ?status.map(|s| s.to_string()), "miner stopped"),
            Ok(Err(e)) => warn!(pid, error = %e, "ingestion task failed"),
            Err(_) => {
                warn!(pid, "ingestion task did not finish in time, aborting it");
                task.abort();
            }
        }

        self.shared.finish_run(run_id);
        Ok(pid)
    }
}
