//! Remote job dispatch.

use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use color_eyre::eyre::{bail, Result, WrapErr};
use tracing::{debug, warn};

/// Grace period past the job timeout before the process is killed, giving
/// a job that finished its work time to flush and exit.
pub const EXTRA_POLL_ALLOWANCE: Duration = Duration::from_secs(30);

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Dispatches a remote job command and blocks until it completes.
pub trait JobRunner: Send + Sync {
    /// Run `command` to completion within `timeout`.
    ///
    /// # Errors
    /// Returns an error if the job cannot be started, exits non-zero, or
    /// outlives the timeout plus the polling allowance.
    fn submit(&self, command: &str, timeout: Duration) -> Result<()>;
}

/// Runs jobs as local child processes through `sh -c`.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    extra_poll_allowance: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self {
            extra_poll_allowance: EXTRA_POLL_ALLOWANCE,
        }
    }
}

impl ProcessRunner {
    /// Create a runner with a custom grace period.
    #[must_use]
    pub fn with_allowance(extra_poll_allowance: Duration) -> Self {
        Self {
            extra_poll_allowance,
        }
    }
}

impl JobRunner for ProcessRunner {
    fn submit(&self, command: &str, timeout: Duration) -> Result<()> {
        debug!(command, "dispatching job");
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .spawn()
            .wrap_err_with(|| format!("spawning job: {command}"))?;

        let deadline = Instant::now() + timeout + self.extra_poll_allowance;
        loop {
            match child.try_wait().wrap_err("polling job")? {
                Some(status) if status.success() => return Ok(()),
                Some(status) => bail!("job failed with {status}: {command}"),
                None => {}
            }
            if Instant::now() >= deadline {
                if let Err(e) = child.kill() {
                    warn!("could not kill timed-out job: {e}");
                }
                let _ = child.wait();
                bail!("job timed out after {timeout:?}: {command}");
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successful_command_returns_ok() {
        let runner = ProcessRunner::default();
        runner.submit("true", Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn failing_command_is_error() {
        let runner = ProcessRunner::default();
        let err = runner.submit("false", Duration::from_secs(5)).unwrap_err();
        assert!(err.to_string().contains("job failed"));
    }

    #[test]
    fn timeout_kills_long_job() {
        let runner = ProcessRunner::with_allowance(Duration::from_millis(50));
        let start = Instant::now();
        let err = runner
            .submit("sleep 30", Duration::from_millis(100))
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert!(start.elapsed() < Duration::from_secs(10));
    }
}
