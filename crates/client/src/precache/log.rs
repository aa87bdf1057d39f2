//! Precache run log.
//!
//! One tab-separated row per URL after a fixed header line:
//!
//! ```text
//! permalink	generation time (s)	size (kbyte)
//! https://example.com/	0.42	18.31
//! ```

use serde::Serialize;

pub const LOG_HEADER: &str = "permalink\tgeneration time (s)\tsize (kbyte)";

/// One fetched URL.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    pub url: String,
    pub elapsed_secs: f64,
    pub size_kb: f64,
}

impl LogRecord {
    /// Record for a fetch of `bytes` bytes taking `elapsed_secs`.
    pub fn new(url: impl Into<String>, elapsed_secs: f64, bytes: usize) -> Self {
        Self { url: url.into(), elapsed_secs, size_kb: bytes as f64 / 1024.0 }
    }

    /// Record for a URL whose fetch failed.
    pub fn failed(url: impl Into<String>) -> Self {
        Self { url: url.into(), elapsed_secs: 0.0, size_kb: 0.0 }
    }

    pub fn to_line(&self) -> String {
        format!("{}\t{:.2}\t{:.2}", self.url, self.elapsed_secs, self.size_kb)
    }

    /// Parse one row; the header and malformed rows yield `None`.
    pub fn parse_line(line: &str) -> Option<Self> {
        let mut fields = line.trim_end_matches(['\r', '\n']).split('\t');
        let url = fields.next()?.trim();
        let elapsed_secs = fields.next()?.trim().parse().ok()?;
        let size_kb = fields.next()?.trim().parse().ok()?;

        if url.is_empty() || fields.next().is_some() {
            return None;
        }
        Some(Self { url: url.to_string(), elapsed_secs, size_kb })
    }
}

/// Parse a complete log, skipping the header and anything unparseable.
pub fn parse_log(text: &str) -> Vec<LogRecord> {
    text.lines().filter(|line| *line != LOG_HEADER).filter_map(LogRecord::parse_line).collect()
}
