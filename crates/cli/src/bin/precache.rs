//! `fullpage-precache <urls-file> [log-file]`: the detached precache worker.
//!
//! Exits 0 when every URL was processed, 1 on missing input or I/O failure.
//! Without a log file the log is written to stdout.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use fullpage_cli::init_tracing;
use fullpage_client::{FetchClient, FetchConfig, run_worker};
use fullpage_core::{AppConfig, PrecacheConfig};

#[derive(Debug, Parser)]
#[command(name = "fullpage-precache", version, about = "Fetch every URL of a precache work file")]
struct WorkerArgs {
    /// Newline-delimited URL list; deleted when the run completes.
    work_file: PathBuf,

    /// Log destination; stdout when omitted.
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let args = match WorkerArgs::try_parse() {
        Ok(args) => args,
        Err(e) => return if report_usage(&e) { ExitCode::FAILURE } else { ExitCode::SUCCESS },
    };

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "precache worker failed");
            ExitCode::FAILURE
        }
    }
}

/// Print a parse error, or the help/version text clap reports the same way.
/// Returns whether it was an actual usage error.
fn report_usage(e: &clap::Error) -> bool {
    if let Err(io) = e.print() {
        tracing::error!(error = %io, "failed to print usage");
    }
    e.use_stderr()
}

async fn run(args: WorkerArgs) -> Result<()> {
    let precache = match AppConfig::load() {
        Ok(config) => config.precache,
        Err(e) => {
            tracing::warn!(error = %e, "configuration unavailable, using precache defaults");
            PrecacheConfig::default()
        }
    };

    let client = FetchClient::new(FetchConfig::from(&precache))?;

    match &args.log_file {
        Some(path) => {
            let mut log = tokio::fs::File::create(path).await?;
            run_worker(&args.work_file, &mut log, &client, precache.interval()).await?;
        }
        None => {
            let mut stdout = tokio::io::stdout();
            run_worker(&args.work_file, &mut stdout, &client, precache.interval()).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_work_file_is_required() {
        let err = WorkerArgs::try_parse_from(["fullpage-precache"]).unwrap_err();
        assert!(report_usage(&err));
    }

    #[test]
    fn test_help_is_not_a_failure() {
        let err = WorkerArgs::try_parse_from(["fullpage-precache", "--help"]).unwrap_err();
        assert!(!report_usage(&err));
    }

    #[test]
    fn test_log_file_is_optional() {
        let args = WorkerArgs::try_parse_from(["fullpage-precache", "run.urls"]).unwrap();
        assert_eq!(args.work_file, PathBuf::from("run.urls"));
        assert!(args.log_file.is_none());

        let args = WorkerArgs::try_parse_from(["fullpage-precache", "run.urls", "run.log"]).unwrap();
        assert_eq!(args.log_file, Some(PathBuf::from("run.log")));
    }
}
