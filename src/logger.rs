use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::subscriber::SetGlobalDefaultError;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::SubscriberBuilder;
use tracing_subscriber::EnvFilter;



/*
    @@@
    @logs_tracing();
    . Creates a daily-rotating log file (<dir>/rigwatch.log) and wraps it in a non-blocking writer.
    . Configures a tracing subscriber filtered by `level` (an EnvFilter directive, INFO if invalid) with timestamps, levels and targets.
    . keeps the appender alive by returning the guard, wrapped so any task can release it.
*/
pub fn logs_tracing(dir: &Path, level: &str) -> Result<LogGuard, SetGlobalDefaultError> {
    let file_appender = RollingFileAppender::new(Rotation::DAILY, dir, "rigwatch.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = SubscriberBuilder::default()
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_writer(non_blocking)
        .with_env_filter(filter)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(LogGuard::new(guard))
}

/// Shared handle on the appender's worker guard.
#[derive(Clone)]
pub struct LogGuard(Arc<Mutex<Option<WorkerGuard>>>);

impl LogGuard {
    pub fn new(guard: WorkerGuard) -> Self {
        Self(Arc::new(Mutex::new(Some(guard))))
    }

    /// Flushes buffered lines and stops the writer. Later calls do nothing.
    pub fn release(&self) {
        drop(self.0.lock().unwrap_or_else(PoisonError::into_inner).take());
    }
}
