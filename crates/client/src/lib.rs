//! Client code for fullpage.
//!
//! This crate provides the cache-warming HTTP client and the precache machinery:
//! URL enumeration, the detached worker and its run log.

pub mod fetch;
pub mod precache;

pub use fetch::{FetchClient, FetchConfig, WarmResponse};
pub use precache::{LogRecord, PageFetcher, PrecacheCrawler, PrecacheFiles, StartOutcome, WorkerSummary, run_worker};
