//! Detached precache worker loop.
//!
//! Records its own pid next to the work file, reads the newline-delimited URL
//! list, fetches each URL in turn and writes one log row per fetch, then
//! removes the work file (and its pid sidecar) to signal completion.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use fullpage_core::Error;

use super::PrecacheFiles;
use super::log::{LOG_HEADER, LogRecord};
use crate::fetch::{FetchClient, parse_target};

/// Something that can request a page and report its size.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch `url`, returning the body length in bytes.
    async fn fetch_page(&self, url: &str) -> Result<usize, Error>;
}

#[async_trait]
impl PageFetcher for FetchClient {
    async fn fetch_page(&self, url: &str) -> Result<usize, Error> {
        Ok(self.warm(url).await?.size)
    }
}

/// Outcome counts of one worker run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    pub fetched: usize,
    pub failed: usize,
    /// URLs refused by the scheme gate.
    pub rejected: usize,
}

/// Read the URL list, skipping blank lines.
pub async fn read_work_file(path: &Path) -> Result<Vec<String>, Error> {
    let raw = tokio::fs::read_to_string(path).await?;
    Ok(raw.lines().map(str::trim).filter(|l| !l.is_empty()).map(String::from).collect())
}

/// Process every URL in `work_file`, writing the log to `out`.
///
/// `interval` is slept between two consecutive fetches. The work file is
/// deleted once all URLs have been processed.
pub async fn run_worker<W>(
    work_file: &Path, out: &mut W, fetcher: &dyn PageFetcher, interval: Duration,
) -> Result<WorkerSummary, Error>
where
    W: AsyncWrite + Unpin + Send,
{
    let urls = read_work_file(work_file).await?;
    let files = PrecacheFiles::for_work_file(work_file);
    files.write_pid(std::process::id()).await?;
    tracing::info!(work_file = %work_file.display(), urls = urls.len(), "precache run starting");

    out.write_all(format!("{LOG_HEADER}\n").as_bytes()).await?;
    out.flush().await?;

    let mut summary = WorkerSummary::default();
    let mut first = true;

    for url in &urls {
        let url = match parse_target(url) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "skipping precache target");
                summary.rejected += 1;
                continue;
            }
        };

        if !first && !interval.is_zero() {
            tokio::time::sleep(interval).await;
        }
        first = false;

        let started = Instant::now();
        let record = match fetcher.fetch_page(url.as_str()).await {
            Ok(size) => {
                summary.fetched += 1;
                LogRecord::new(url.as_str(), started.elapsed().as_secs_f64(), size)
            }
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "precache fetch failed");
                summary.failed += 1;
                LogRecord::failed(url.as_str())
            }
        };

        out.write_all(format!("{}\n", record.to_line()).as_bytes()).await?;
        out.flush().await?;
    }

    files.remove_work_file().await?;
    files.remove_pid_file().await?;

    tracing::info!(
        fetched = summary.fetched,
        failed = summary.failed,
        rejected = summary.rejected,
        "precache run finished"
    );
    Ok(summary)
}
