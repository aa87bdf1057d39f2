//! Precache orchestration: enumerate, guard, hand off, stop.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use fullpage_core::site::{self, UNLISTED_KINDS};
use fullpage_core::{Error, LinkSet, PrecacheConfig, SiteDirectory};

use super::log::{LogRecord, parse_log};
use super::{PrecacheFiles, process};
use crate::fetch::absolutize;

const WORKER_BINARY: &str = "fullpage-precache";

/// Result of a start request that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOutcome {
    pub pid: u32,
    pub urls: usize,
    pub files: PrecacheFiles,
}

/// Starts, observes and stops detached precache runs for one site.
pub struct PrecacheCrawler {
    config: PrecacheConfig,
    directory: Arc<dyn SiteDirectory>,
    /// Crawl every active site instead of only `config.site_id`.
    network: bool,
}

impl PrecacheCrawler {
    pub fn new(config: PrecacheConfig, directory: Arc<dyn SiteDirectory>, network: bool) -> Self {
        Self { config, directory, network }
    }

    pub fn files(&self) -> PrecacheFiles {
        PrecacheFiles::for_site(&self.config.work_dir, self.config.site_id)
    }

    /// Every URL worth warming: site roots, published content, taxonomy and date archives.
    pub async fn enumerate(&self) -> Result<LinkSet, Error> {
        let sites = self.directory.sites().await?;
        let mut links = LinkSet::new();

        for site in sites.iter().filter(|s| s.is_active()) {
            if !self.network && site.id != self.config.site_id {
                continue;
            }

            let base = site.base_url();
            links.insert(base.clone());

            for item in self.directory.published_content(site.id).await? {
                if UNLISTED_KINDS.contains(&item.kind.as_str()) {
                    continue;
                }
                links.insert(absolutize(&base, &item.permalink));
            }

            site::taxonomy_links(self.directory.as_ref(), site.id, &mut links).await?;
        }

        tracing::debug!(urls = links.len(), network = self.network, "precache enumeration complete");
        Ok(links)
    }

    /// Best-effort running check, keyed to the work file.
    ///
    /// Without a work file nothing is running, whatever the pid file says. With
    /// one, the recorded worker must still be alive; a work file whose worker
    /// has not recorded its pid yet counts as running.
    pub async fn is_running(&self) -> bool {
        let files = self.files();
        if !files.has_work_file().await {
            return false;
        }
        files.read_pid().await.is_none_or(process::is_alive)
    }

    /// Enumerate, write the work file and spawn the detached worker.
    pub async fn start(&self) -> Result<StartOutcome, Error> {
        if self.is_running().await {
            return Err(Error::PrecacheRunning);
        }

        let links = self.enumerate().await?;
        if links.is_empty() {
            return Err(Error::NoContent("no content to precache".into()));
        }

        let files = self.files();
        let urls = links.len();
        let mut body = links.into_vec().join("\n");
        body.push('\n');

        tokio::fs::create_dir_all(&self.config.work_dir).await?;
        files.remove_pid_file().await?;
        tokio::fs::write(&files.work, body).await?;

        let program = self.worker_program()?;
        let pid = match process::spawn_detached(&program, &files.work, &files.log) {
            Ok(pid) => pid,
            Err(e) => {
                files.remove_work_file().await?;
                return Err(e);
            }
        };

        tracing::info!(pid, urls, work_file = %files.work.display(), "precache worker started");
        Ok(StartOutcome { pid, urls, files })
    }

    /// Terminate the worker and remove its work file. Returns whether a process was signalled.
    ///
    /// The pid is only signalled while its work file exists; a pid file left
    /// without one is stale and is removed untouched.
    pub async fn stop(&self) -> Result<bool, Error> {
        let files = self.files();
        if !files.has_work_file().await {
            files.remove_pid_file().await?;
            tracing::info!("no precache run in progress");
            return Ok(false);
        }

        let signalled = match files.read_pid().await {
            Some(pid) => process::terminate(pid)?,
            None => false,
        };

        files.remove_work_file().await?;
        files.remove_pid_file().await?;

        tracing::info!(signalled, "precache stopped");
        Ok(signalled)
    }

    /// Parsed rows of the current (or last) run's log; empty when there is none.
    pub async fn read_log(&self) -> Result<Vec<LogRecord>, Error> {
        match tokio::fs::read_to_string(self.files().log).await {
            Ok(text) => Ok(parse_log(&text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Start a run every `every`, skipping ticks while one is still in progress. Never returns.
    pub async fn run_schedule(&self, every: Duration) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            match self.start().await {
                Ok(outcome) => tracing::info!(pid = outcome.pid, urls = outcome.urls, "scheduled precache started"),
                Err(Error::PrecacheRunning) => tracing::debug!("scheduled precache skipped, run in progress"),
                Err(e) => tracing::warn!(error = %e, "scheduled precache failed"),
            }
        }
    }

    fn worker_program(&self) -> Result<PathBuf, Error> {
        if let Some(program) = &self.config.worker_program {
            return Ok(program.clone());
        }
        let current = std::env::current_exe()
            .map_err(|e| Error::WorkerSpawn(format!("cannot locate current executable: {e}")))?;
        Ok(current.with_file_name(WORKER_BINARY))
    }
}
