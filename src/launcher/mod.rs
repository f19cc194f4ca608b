//! Tracee launching
//!
//! Spawns the target free-running, so attaching works the same for programs
//! we start and programs that were already alive:
//! - stdin is detached so the tracee cannot steal the terminal
//! - a short grace period lets exec complete before anyone attaches
//! - liveness checks use the zero-signal probe

use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use nix::sys::signal;
use nix::unistd::Pid;

use crate::error::LaunchError;

/// How long to let the child run before callers may attach to it
const LAUNCH_GRACE: Duration = Duration::from_millis(100);

/// A spawned tracee process
#[derive(Debug)]
pub struct TraceeProcess {
    child: Child,
    program: String,
}

impl TraceeProcess {
    /// Spawn `program` with `args` and wait out the launch grace period
    ///
    /// Programs that exit within the grace period are reported as
    /// [`LaunchError::ExitedEarly`]; there is nothing left to trace.
    pub fn launch(program: &str, args: &[String]) -> Result<Self, LaunchError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                program: program.to_string(),
                source,
            })?;

        tracing::debug!(pid = child.id(), program, "tracee spawned");
        thread::sleep(LAUNCH_GRACE);

        match child.try_wait() {
            Ok(Some(status)) => Err(LaunchError::ExitedEarly {
                program: program.to_string(),
                status,
            }),
            Ok(None) => Ok(Self {
                child,
                program: program.to_string(),
            }),
            Err(source) => {
                tracing::warn!(%source, "liveness probe failed after spawn");
                Ok(Self {
                    child,
                    program: program.to_string(),
                })
            }
        }
    }

    /// Pid of the tracee
    #[inline]
    #[must_use]
    pub fn pid(&self) -> Pid {
        Pid::from_raw(self.child.id() as i32)
    }

    /// Program name the tracee was launched from
    #[inline]
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Check whether the tracee is still alive
    #[must_use]
    pub fn is_running(&self) -> bool {
        signal::kill(self.pid(), None).is_ok()
    }

    /// Kill and reap the tracee
    ///
    /// Errors are ignored: they mean the process is already gone, possibly
    /// reaped by a tracer that watched it exit.
    pub fn kill(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }

    /// Wait for the tracee to exit on its own
    pub fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_program_fails_to_spawn() {
        let err = TraceeProcess::launch("/definitely/not/a/real/program", &[])
            .expect_err("spawn must fail");
        assert!(matches!(err, LaunchError::Spawn { .. }));
    }

    #[test]
    fn short_lived_program_reports_early_exit() {
        let err = TraceeProcess::launch("true", &[]).expect_err("true exits within the grace");
        assert!(matches!(err, LaunchError::ExitedEarly { .. }));
    }

    #[test]
    fn liveness_probe_tracks_kill() {
        let mut tracee = TraceeProcess::launch("sleep", &["30".to_string()])
            .expect("sleep should outlive the grace period");
        assert!(tracee.is_running());
        assert_eq!(tracee.program(), "sleep");

        tracee.kill();
        assert!(!tracee.is_running());
    }
}
