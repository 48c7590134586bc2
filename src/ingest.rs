//! Ingestion task: one per running miner.
//!
//! Reads the miner's combined stdout and stderr pipe line by line, persists raw
//! lines to the run's [`LogSink`], and feeds cleaned lines through the
//! backend parser into the [`StatsStore`]. The task also owns the child
//! process: it handles the stop request (SIGTERM, grace period, SIGKILL) and
//! reaps the process before returning.

use crate::error::IngestError;
use crate::sink::LogSink;
use crate::stats::StatsStore;
use crate::telemetry::{strip_ansi, LineParser};
use chrono::{DateTime, Local};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::oneshot;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

/// How long output is still read after the process has exited. Bounds the
/// wait when a grandchild inherited the pipes.
pub const DRAIN_WINDOW: Duration = Duration::from_secs(2);

/// Byte-oriented line reader with lossy UTF-8 decoding. Miner binaries
/// print non-UTF-8 bytes often enough that `lines()` would end the stream.
pub struct LineReader<R> {
    reader: Option<BufReader<R>>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(stream: Option<R>) -> Self {
        Self {
            reader: stream.map(BufReader::new),
            buf: Vec::with_capacity(1024),
        }
    }

    pub fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    /// Next line without its terminator, `None` at end of stream.
    ///
    /// Cancel safe: bytes of an interrupted read stay buffered for the next call.
    pub async fn next_line(&mut self) -> Result<Option<String>, IngestError> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };
        match reader.read_until(b'\n', &mut self.buf).await {
            Ok(0) => {
                self.reader = None;
                if self.buf.is_empty() {
                    return Ok(None);
                }
            }
            Ok(_) => {}
            Err(e) => {
                self.reader = None;
                return Err(IngestError::StreamRead(e));
            }
        }
        if self.buf.last() == Some(&b'\n') {
            self.buf.pop();
            if self.buf.last() == Some(&b'\r') {
                self.buf.pop();
            }
        }
        let line = String::from_utf8_lossy(&self.buf).into_owned();
        self.buf.clear();
        Ok(Some(line))
    }
}

/// Per-line processing shared by both output streams.
pub struct LineHandler {
    stats: Arc<StatsStore>,
    parser: Box<dyn LineParser>,
    sink: Option<LogSink>,
}

impl LineHandler {
    pub fn new(stats: Arc<StatsStore>, parser: Box<dyn LineParser>, sink: Option<LogSink>) -> Self {
        Self { stats, parser, sink }
    }

    pub async fn handle(&mut self, raw: &str) {
        let raw = raw.trim_end();
        if raw.is_empty() {
            return;
        }

        if let Some(sink) = self.sink.as_mut() {
            if let Err(e) = sink.write_line(raw).await {
                warn!(path = %sink.path().display(), error = %e, "disabling miner log file");
                self.sink = None;
            }
        }

        let clean = strip_ansi(raw);
        let clean = clean.trim();
        if clean.is_empty() {
            return;
        }
        let update = self.parser.parse(clean);
        self.stats.record_line(clean.to_string(), &update);
    }
}

/// Everything the task needs besides the child itself.
pub struct IngestContext {
    pub pid: u32,
    pub stats: Arc<StatsStore>,
    pub parser: Box<dyn LineParser>,
    pub log_dir: PathBuf,
    pub started_at: DateTime<Local>,
    pub grace: Duration,
}

fn send_signal(pid: u32, signal: Signal) {
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    match kill(Pid::from_raw(raw), signal) {
        Ok(()) => debug!(pid, signal = ?signal, "signal sent"),
        // Already gone; the wait branch will pick up the exit.
        Err(Errno::ESRCH) => {}
        Err(e) => warn!(pid, signal = ?signal, error = %e, "failed to signal miner"),
    }
}

/// Runs until the output stream is closed and the child has been reaped.
///
/// `output` is the read end of the pipe the child writes both stdout and
/// stderr to.
pub async fn run<R: AsyncRead + Unpin>(
    mut child: Child,
    output: R,
    mut stop_rx: oneshot::Receiver<()>,
    ctx: IngestContext,
) -> Option<ExitStatus> {
    let IngestContext { pid, stats, parser, log_dir, started_at, grace } = ctx;

    let sink = match LogSink::open(&log_dir, &started_at).await {
        Ok(sink) => {
            info!(pid, path = %sink.path().display(), "logging miner output");
            Some(sink)
        }
        Err(e) => {
            warn!(pid, dir = %log_dir.display(), error = %e, "miner output will not be persisted");
            None
        }
    };
    let mut handler = LineHandler::new(stats, parser, sink);
    let mut out = LineReader::new(Some(output));

    let mut exit: Option<ExitStatus> = None;
    let mut stop_requested = false;
    let mut kill_at: Option<Instant> = None;
    let mut drain_until: Option<Instant> = None;

    while out.is_open() {
        let now = Instant::now();
        tokio::select! {
            line = out.next_line() => match line {
                Ok(Some(line)) => handler.handle(&line).await,
                Ok(None) => {}
                Err(e) => {
                    warn!(pid, error = %e, "output read failed, treating miner as ended");
                    break;
                }
            },
            status = child.wait(), if exit.is_none() => match status {
                Ok(status) => {
                    debug!(pid, status = %status, "miner process exited");
                    exit = Some(status);
                    kill_at = None;
                    drain_until = Some(Instant::now() + DRAIN_WINDOW);
                }
                Err(e) => {
                    warn!(pid, error = %e, "waiting on miner failed");
                    break;
                }
            },
            request = &mut stop_rx, if !stop_requested => {
                stop_requested = true;
                if request.is_err() {
                    info!(pid, "supervisor dropped, terminating miner");
                }
                // A reaped pid may already belong to someone else.
                if exit.is_none() {
                    send_signal(pid, Signal::SIGTERM);
                    kill_at = Some(Instant::now() + grace);
                }
            },
            _ = sleep_until(kill_at.unwrap_or(now)), if exit.is_none() && kill_at.is_some() => {
                warn!(pid, grace_secs = grace.as_secs(), "miner ignored SIGTERM, sending SIGKILL");
                send_signal(pid, Signal::SIGKILL);
                kill_at = None;
            },
            _ = sleep_until(drain_until.unwrap_or(now)), if drain_until.is_some() => {
                debug!(pid, "output still open after exit, closing stream");
                break;
            },
        }
    }

    if exit.is_none() {
        exit = reap(&mut child, pid, kill_at, grace).await;
    }
    info!(pid, status = ?exit.map(|s| s.to_string()), "ingestion finished");
    exit
}

/// Waits for a child whose output has already closed, killing it if it
/// does not exit in time.
async fn reap(
    child: &mut Child,
    pid: u32,
    kill_at: Option<Instant>,
    grace: Duration,
) -> Option<ExitStatus> {
    let budget = kill_at
        .map(|at| at.saturating_duration_since(Instant::now()))
        .unwrap_or(grace);
    match timeout(budget, child.wait()).await {
        Ok(Ok(status)) => return Some(status),
        Ok(Err(e)) => {
            warn!(pid, error = %e, "waiting on miner failed");
            return None;
        }
        Err(_) => warn!(pid, "miner closed its output but kept running, killing it"),
    }
    if let Err(e) = child.kill().await {
        warn!(pid, error = %e, "failed to kill miner");
    }
    child.try_wait().ok().flatten()
}
