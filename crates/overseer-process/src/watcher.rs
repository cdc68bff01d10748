//! Wait for a running process, killing it once its run is cancelled
//!
//! The kill goes through the child handle while the process is still
//! unreaped, so a cancelled run can never signal a recycled PID. The only
//! raw-PID signal is the termination request sent before the grace period,
//! and it is sent while the wait is suspended.

use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::Child;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Wait for `child` to exit
///
/// Once `job` is cancelled the process is killed, optionally after asking it
/// to terminate and waiting up to `grace`. An exit that is already pending
/// wins over a cancellation.
pub(crate) async fn watch(
    child: &mut Child,
    job: &CancellationToken,
    grace: Option<Duration>,
) -> io::Result<ExitStatus> {
    tokio::select! {
        biased;
        status = child.wait() => return status,
        _ = job.cancelled() => {}
    }

    if let (Some(grace), Some(pid)) = (grace, child.id()) {
        debug!(pid = %pid, grace_ms = %grace.as_millis(), "Requesting process termination");
        if let Err(e) = terminate(pid).await {
            warn!(pid = %pid, error = %e, "Failed to request termination");
        }

        tokio::select! {
            biased;
            status = child.wait() => return status,
            _ = sleep(grace) => {}
        }
    }

    debug!(pid = ?child.id(), "Killing process");
    if let Err(e) = child.start_kill() {
        warn!(pid = ?child.id(), error = %e, "Failed to kill process");
    }
    child.wait().await
}

/// Ask `pid` to exit
#[cfg(unix)]
pub(crate) async fn terminate(pid: u32) -> io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    if raw <= 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "pid must be positive",
        ));
    }

    match kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(errno) => Err(io::Error::from(errno)),
    }
}

/// Ask `pid` to exit
#[cfg(windows)]
pub(crate) async fn terminate(pid: u32) -> io::Result<()> {
    use std::process::Stdio;
    use tokio::process::Command;

    let pid = pid.to_string();
    let status = Command::new("taskkill")
        .args(["/PID", pid.as_str()])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;

    if !status.success() {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            format!("taskkill failed for pid {} (exit {:?})", pid, status.code()),
        ));
    }
    Ok(())
}
