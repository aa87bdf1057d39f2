//! Unified error types for fullpage.
//!
//! Every variant displays with a stable upper-case code prefix so that
//! administrative callers can match on `code()` without parsing messages.

use tokio_rusqlite::rusqlite;

/// Every failure the page cache can report.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No configuration resolves for the request host.
    #[error("CONFIG_MISSING: {0}")]
    ConfigMissing(String),

    /// The storage engine could not be initialised or reached.
    #[error("BACKEND_UNREACHABLE: {0}")]
    BackendUnreachable(String),

    /// Reading from the storage engine failed.
    #[error("STORAGE_READ: {0}")]
    StorageRead(String),

    /// Writing to the storage engine failed.
    #[error("STORAGE_WRITE: {0}")]
    StorageWrite(String),

    /// The content has no retrievable canonical URL.
    #[error("PERMALINK_UNRESOLVABLE: content {0}")]
    PermalinkUnresolvable(u64),

    /// The detached precache worker could not be started or stopped.
    #[error("WORKER_SPAWN: {0}")]
    WorkerSpawn(String),

    /// A precache run for this site is already in progress.
    #[error("PRECACHE_RUNNING")]
    PrecacheRunning,

    /// Enumeration produced nothing to precache.
    #[error("NO_CONTENT: {0}")]
    NoContent(String),

    /// The SQLite engine reported a failure.
    #[error("SQLITE: {0}")]
    Database(tokio_rusqlite::Error),

    /// A schema upgrade could not be applied.
    #[error("SQLITE: schema upgrade failed: {0}")]
    MigrationFailed(String),

    /// A precache target or permalink is not a usable URL.
    #[error("INVALID_URL: {0}")]
    InvalidUrl(String),

    /// A warm request ran past its deadline.
    #[error("FETCH_TIMEOUT: {0}")]
    FetchTimeout(String),

    /// A warmed page exceeded the body limit.
    #[error("FETCH_TOO_LARGE: {0}")]
    FetchTooLarge(String),

    /// Transport failure or non-success status while warming.
    #[error("HTTP_ERROR: {0}")]
    HttpError(String),

    /// Filesystem or socket failure.
    #[error("IO_ERROR: {0}")]
    Io(#[from] std::io::Error),

    /// A record could not be encoded or decoded.
    #[error("SERIALIZATION: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// The bare error code, without the message.
    pub fn code(&self) -> &'static str {
        match self {
            Error::ConfigMissing(_) => "CONFIG_MISSING",
            Error::BackendUnreachable(_) => "BACKEND_UNREACHABLE",
            Error::StorageRead(_) => "STORAGE_READ",
            Error::StorageWrite(_) => "STORAGE_WRITE",
            Error::PermalinkUnresolvable(_) => "PERMALINK_UNRESOLVABLE",
            Error::WorkerSpawn(_) => "WORKER_SPAWN",
            Error::PrecacheRunning => "PRECACHE_RUNNING",
            Error::NoContent(_) => "NO_CONTENT",
            Error::Database(_) | Error::MigrationFailed(_) => "SQLITE",
            Error::InvalidUrl(_) => "INVALID_URL",
            Error::FetchTimeout(_) => "FETCH_TIMEOUT",
            Error::FetchTooLarge(_) => "FETCH_TOO_LARGE",
            Error::HttpError(_) => "HTTP_ERROR",
            Error::Io(_) => "IO_ERROR",
            Error::Serialization(_) => "SERIALIZATION",
        }
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}
