//! Console plus daily JSONL logging. Each process kind writes its own files,
//! `herald.<process>.<YYYY-MM-DD>.jsonl`, under `<state_dir>/logs`.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{Builder, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::event::ProcessKind;

pub const DEFAULT_RETENTION_DAYS: u64 = 14;

/// The log directory for a state directory.
pub fn logs_dir(state_dir: &Path) -> PathBuf {
    state_dir.join("logs")
}

/// Where and how the current process is logging.
#[derive(Debug, Clone)]
pub struct LogFiles {
    pub process: ProcessKind,
    pub dir: PathBuf,
    pub retention_days: u64,
    /// Expired files removed during initialization.
    pub pruned: usize,
    pub initialized_at: DateTime<Utc>,
}

impl LogFiles {
    pub fn prefix(&self) -> String {
        file_prefix(self.process)
    }
}

fn file_prefix(process: ProcessKind) -> String {
    format!("herald.{}", process.as_str())
}

/// Install the global subscriber. The returned guard flushes the file writer
/// on drop, so hold it until the process exits.
///
/// A subscriber that is already installed is left in place.
pub fn init_process_logging(
    process: ProcessKind,
    dir: &Path,
    retention_days: u64,
) -> anyhow::Result<(WorkerGuard, LogFiles)> {
    fs::create_dir_all(dir)?;
    let pruned = prune_expired(dir, process, retention_days, Utc::now().date_naive())?;

    let appender = Builder::new()
        .rotation(Rotation::DAILY)
        .filename_prefix(file_prefix(process))
        .filename_suffix("jsonl")
        .build(dir)?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = tracing_subscriber::fmt::layer().compact().with_target(true);
    let jsonl = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(writer)
        .with_ansi(false)
        .with_current_span(false)
        .with_span_list(false);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(jsonl)
        .try_init();

    Ok((
        guard,
        LogFiles {
            process,
            dir: dir.to_path_buf(),
            retention_days,
            pruned,
            initialized_at: Utc::now(),
        },
    ))
}

/// Date stamp of one of `process`'s log files, if `name` is one.
fn log_file_date(name: &str, process: ProcessKind) -> Option<NaiveDate> {
    let prefix = format!("{}.", file_prefix(process));
    let stamp = name.strip_prefix(&prefix)?.strip_suffix(".jsonl")?;
    NaiveDate::parse_from_str(stamp, "%Y-%m-%d").ok()
}

/// Delete `process`'s log files dated more than `retention_days` before
/// `today`. Other files are never touched.
fn prune_expired(
    dir: &Path,
    process: ProcessKind,
    retention_days: u64,
    today: NaiveDate,
) -> std::io::Result<usize> {
    let Some(cutoff) = today.checked_sub_days(chrono::Days::new(retention_days)) else {
        return Ok(0);
    };

    let mut pruned = 0;
    for entry in fs::read_dir(dir)?.flatten() {
        let path = entry.path();
        let expired = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| log_file_date(n, process))
            .is_some_and(|date| date < cutoff);
        if expired && path.is_file() && fs::remove_file(&path).is_ok() {
            pruned += 1;
        }
    }
    Ok(pruned)
}
