//! Atomic spawn of a child process as the leader of a brand-new process
//! group, with three captured pipe streams.
//!
//! A `pre_exec` hook calls `setpgid(0, 0)` so the child becomes the leader
//! of its own group before its program image loads. Everything downstream
//! signals the group, not the pid, so a shell's entire descendant tree is
//! reachable with one signal.

use std::collections::HashMap;
use std::path::Path;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::time::{sleep, Duration, Instant};

use crate::error::CoreError;

/// A freshly spawned child: its identity plus the three pipe endpoints the
/// caller now owns exclusively.
pub struct Launched {
    pub pid: u32,
    pub pgid: u32,
    pub child: Child,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

#[derive(Default, Clone)]
pub struct Launcher;

impl Launcher {
    pub fn new() -> Self {
        Self
    }

    /// Spawn `program` with `args` in a new process group.
    ///
    /// `cwd`, if given, must already exist and be a directory — the check
    /// happens before any fork so a bad path never leaves a half-open pipe
    /// behind. `env` is merged into (not replacing) the inherited
    /// environment.
    pub fn spawn(
        &self,
        program: &str,
        args: &[String],
        cwd: Option<&str>,
        env: Option<&HashMap<String, String>>,
    ) -> Result<Launched, CoreError> {
        if let Some(dir) = cwd {
            let path = Path::new(dir);
            if !path.is_dir() {
                return Err(CoreError::InvalidWorkingDirectory);
            }
        }

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        if let Some(vars) = env {
            cmd.envs(vars);
        }
        // SAFETY: setpgid(0, 0) is async-signal-safe per POSIX and touches
        // only the calling (child) process's own state.
        unsafe {
            cmd.pre_exec(|| {
                if libc::setpgid(0, 0) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let mut child = cmd.spawn().map_err(|e| CoreError::SpawnFailed(e.to_string()))?;
        let pid = child.id().ok_or_else(|| CoreError::SpawnFailed("child exited before pid was observed".into()))?;
        let stdin = child.stdin.take().ok_or(CoreError::PipeCreationFailed)?;
        let stdout = child.stdout.take().ok_or(CoreError::PipeCreationFailed)?;
        let stderr = child.stderr.take().ok_or(CoreError::PipeCreationFailed)?;

        Ok(Launched {
            pid,
            pgid: pid, // group leader: pgid == pid by construction
            child,
            stdin,
            stdout,
            stderr,
        })
    }

    /// Convenience wrapper: `spawn_shell("npm run dev")` becomes
    /// `spawn("/bin/sh", ["-l", "-c", command], ...)`.
    pub fn spawn_shell(
        &self,
        command: &str,
        cwd: Option<&str>,
        env: Option<&HashMap<String, String>>,
    ) -> Result<Launched, CoreError> {
        let shell = default_shell();
        self.spawn(&shell, &["-l".into(), "-c".into(), command.into()], cwd, env)
    }

    /// Best-effort signal to a single process. Returns whether the OS
    /// accepted the request.
    pub fn signal_process(&self, pid: u32, signal: Signal) -> bool {
        kill(Pid::from_raw(pid as i32), signal).is_ok()
    }

    /// Best-effort signal to an entire process group (`kill(-pgid, signal)`).
    pub fn signal_group(&self, pgid: u32, signal: Signal) -> bool {
        kill(Pid::from_raw(-(pgid as i32)), signal).is_ok()
    }

    /// Probe whether any member of `pgid` is still alive via signal 0.
    pub fn group_is_alive(&self, pgid: u32) -> bool {
        kill(Pid::from_raw(-(pgid as i32)), None).is_ok()
    }

    /// Send SIGTERM to the group, poll every 100ms for up to `grace` seconds,
    /// and escalate to SIGKILL if a member is still alive.
    pub async fn terminate_group(&self, pgid: u32, grace: Duration) {
        self.signal_group(pgid, Signal::SIGTERM);
        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if !self.group_is_alive(pgid) {
                return;
            }
            sleep(Duration::from_millis(100)).await;
        }
        if self.group_is_alive(pgid) {
            self.signal_group(pgid, Signal::SIGKILL);
        }
    }
}

fn default_shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_rejects_missing_cwd() {
        let launcher = Launcher::new();
        let err = launcher
            .spawn("/bin/echo", &["hi".into()], Some("/no/such/dir"), None)
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidWorkingDirectory));
    }

    #[tokio::test]
    async fn spawn_shell_becomes_group_leader() {
        let launcher = Launcher::new();
        let launched = launcher.spawn_shell("sleep 0.2", None, None).unwrap();
        assert_eq!(launched.pid, launched.pgid);
    }
}
