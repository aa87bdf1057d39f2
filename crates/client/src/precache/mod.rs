//! Background cache warming.
//!
//! A precache run is coordinated purely through files in the work directory:
//!
//! - `fullpage-precache-<site>.urls`: URL list; its existence means "running"
//! - `fullpage-precache-<site>.log`: per-URL timing rows written by the worker
//! - `fullpage-precache-<site>.pid`: process id of the detached worker
//!
//! The worker records its own pid on startup and deletes the `.urls` and
//! `.pid` files when it finishes. A pid is only trusted while the `.urls`
//! file it belongs to still exists.

pub mod crawler;
pub mod log;
pub mod process;
pub mod worker;

use std::io;
use std::path::{Path, PathBuf};

pub use crawler::{PrecacheCrawler, StartOutcome};
pub use log::{LOG_HEADER, LogRecord, parse_log};
pub use worker::{PageFetcher, WorkerSummary, run_worker};

const FILE_STEM: &str = "fullpage-precache";

/// Paths of one site's run-scoped files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrecacheFiles {
    pub work: PathBuf,
    pub log: PathBuf,
    pub pid: PathBuf,
}

impl PrecacheFiles {
    pub fn for_site(dir: &Path, site_id: u64) -> Self {
        Self::for_work_file(&dir.join(format!("{FILE_STEM}-{site_id}.urls")))
    }

    /// Sibling log and pid paths of an existing work file.
    pub fn for_work_file(work: &Path) -> Self {
        Self { work: work.to_path_buf(), log: work.with_extension("log"), pid: work.with_extension("pid") }
    }

    pub async fn remove_work_file(&self) -> io::Result<()> {
        remove_if_exists(&self.work).await
    }

    pub async fn remove_pid_file(&self) -> io::Result<()> {
        remove_if_exists(&self.pid).await
    }

    pub async fn write_pid(&self, pid: u32) -> io::Result<()> {
        tokio::fs::write(&self.pid, pid.to_string()).await
    }

    pub async fn has_work_file(&self) -> bool {
        tokio::fs::try_exists(&self.work).await.unwrap_or(false)
    }

    /// Process id recorded for the current run, if any.
    pub async fn read_pid(&self) -> Option<u32> {
        let raw = tokio::fs::read_to_string(&self.pid).await.ok()?;
        raw.trim().parse().ok()
    }
}

async fn remove_if_exists(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
