//! Detached worker process management.

use std::path::Path;
use std::process::Stdio;

use fullpage_core::Error;

/// Spawn the worker detached from the caller, returning its pid.
///
/// The child gets its own process group so that terminal signals aimed at
/// the caller do not reach it; tokio reaps it once it exits.
pub fn spawn_detached(program: &Path, work_file: &Path, log_file: &Path) -> Result<u32, Error> {
    let mut command = tokio::process::Command::new(program);
    command.arg(work_file).arg(log_file).stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null());

    #[cfg(unix)]
    command.process_group(0);

    let child = command
        .spawn()
        .map_err(|e| Error::WorkerSpawn(format!("{}: {e}", program.display())))?;

    child.id().ok_or_else(|| Error::WorkerSpawn("worker exited before reporting a pid".into()))
}

/// Whether a process with `pid` currently exists.
#[cfg(unix)]
pub fn is_alive(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }

    // Signal 0 performs the permission and existence checks only.
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn is_alive(_pid: u32) -> bool {
    false
}

/// Send SIGTERM to `pid`. Returns false if no such process exists.
#[cfg(unix)]
pub fn terminate(pid: u32) -> Result<bool, Error> {
    let pid = i32::try_from(pid).map_err(|_| Error::WorkerSpawn(format!("invalid pid {pid}")))?;
    if pid <= 0 {
        return Err(Error::WorkerSpawn(format!("invalid pid {pid}")));
    }

    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc == 0 {
        return Ok(true);
    }

    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(false)
    } else {
        Err(Error::WorkerSpawn(format!("failed to signal worker {pid}: {err}")))
    }
}

#[cfg(not(unix))]
pub fn terminate(pid: u32) -> Result<bool, Error> {
    Err(Error::WorkerSpawn(format!("cannot signal worker {pid} on this platform")))
}
