//! Event-driven, at-most-once exit notification for watched child processes.
//!
//! Every watched pid here is a child this process itself spawned via
//! [`crate::launcher::Launcher`]. Rust's runtime already maintains exactly
//! one kernel-level subscription for child exit (a single `SIGCHLD` handler
//! shared across the process, wired up by tokio's process reaper); `Child`'s
//! `wait()` future is the zero-polling notification this needs, so the
//! monitor's single background task simply multiplexes many such
//! futures in one `FuturesUnordered` rather than re-inventing a kqueue/pidfd
//! queue by hand.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Duration;

use crate::error::CoreError;

/// Outcome delivered to a watcher's callback.
#[derive(Debug, Clone, Copy)]
pub enum ExitOutcome {
    /// The process exited with this code.
    Exited(i32),
    /// Registration raced with an already-reaped process; no exit code is
    /// known. Carries a sentinel code of -1.
    Missed,
}

impl ExitOutcome {
    pub fn code(self) -> i32 {
        match self {
            ExitOutcome::Exited(c) => c,
            ExitOutcome::Missed => -1,
        }
    }
}

pub type ExitCallback = Box<dyn FnOnce(ExitOutcome) + Send + 'static>;

enum Command {
    Watch {
        pid: u32,
        child: Box<Child>,
        callback: ExitCallback,
    },
    Unwatch {
        pid: u32,
    },
}

pub struct ExitMonitor {
    tx: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    watched: Arc<Mutex<HashSet<u32>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Default for ExitMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ExitMonitor {
    pub fn new() -> Self {
        Self {
            tx: Mutex::new(None),
            watched: Arc::new(Mutex::new(HashSet::new())),
            task: Mutex::new(None),
        }
    }

    /// Start the background watcher loop. Idempotent.
    pub fn start(&self) -> Result<(), CoreError> {
        let mut tx_guard = self.tx.lock().unwrap();
        if tx_guard.is_some() {
            return Ok(());
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let watched = self.watched.clone();
        let handle = tokio::spawn(run_loop(rx, watched));
        *tx_guard = Some(tx);
        *self.task.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Tear down the kernel subscription. Callbacks already dispatched run
    /// to completion; nothing new is accepted afterward.
    pub fn stop(&self) {
        self.tx.lock().unwrap().take();
        if let Some(handle) = self.task.lock().unwrap().take() {
            handle.abort();
        }
        self.watched.lock().unwrap().clear();
    }

    pub fn is_watching(&self, pid: u32) -> bool {
        self.watched.lock().unwrap().contains(&pid)
    }

    /// Register a one-shot watch. If `child` has already exited by the time
    /// this call runs, the callback fires immediately (synchronously) with
    /// the real exit code rather than waiting for the background task.
    pub fn watch(&self, pid: u32, mut child: Child, callback: ExitCallback) -> Result<(), CoreError> {
        if pid == 0 {
            return Err(CoreError::InvalidPid(0));
        }
        if let Ok(Some(status)) = child.try_wait() {
            callback(ExitOutcome::Exited(status.code().unwrap_or(-1)));
            return Ok(());
        }
        let tx = self.tx.lock().unwrap().clone();
        let Some(tx) = tx else {
            return Err(CoreError::KernelSubscriptionFailed("monitor not started".into()));
        };
        self.watched.lock().unwrap().insert(pid);
        tx.send(Command::Watch {
            pid,
            child: Box::new(child),
            callback,
        })
        .map_err(|_| CoreError::WatchFailed(pid, "monitor task not running".into()))
    }

    pub fn unwatch(&self, pid: u32) {
        self.watched.lock().unwrap().remove(&pid);
        if let Some(tx) = self.tx.lock().unwrap().clone() {
            let _ = tx.send(Command::Unwatch { pid });
        }
    }

    /// Await exit, resolving with the exit code (or -1 if missed).
    pub async fn wait_for_exit(&self, pid: u32, child: Child) -> Result<i32, CoreError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.watch(
            pid,
            child,
            Box::new(move |outcome| {
                let _ = done_tx.send(outcome.code());
            }),
        )?;
        done_rx
            .await
            .map_err(|_| CoreError::WatchFailed(pid, "watcher dropped".into()))
    }

    /// Like [`Self::wait_for_exit`] but resolves to `None` if `timeout`
    /// elapses first. The registration is not cancelled on timeout — the
    /// callback still fires into the void once the process actually exits.
    pub async fn wait_for_exit_with_timeout(
        &self,
        pid: u32,
        child: Child,
        timeout: Duration,
    ) -> Result<Option<i32>, CoreError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.watch(
            pid,
            child,
            Box::new(move |outcome| {
                let _ = done_tx.send(outcome.code());
            }),
        )?;
        match tokio::time::timeout(timeout, done_rx).await {
            Ok(Ok(code)) => Ok(Some(code)),
            Ok(Err(_)) => Err(CoreError::WatchFailed(pid, "watcher dropped".into())),
            Err(_) => Ok(None),
        }
    }
}

async fn run_loop(mut rx: mpsc::UnboundedReceiver<Command>, watched: Arc<Mutex<HashSet<u32>>>) {
    let mut pending: FuturesUnordered<std::pin::Pin<Box<dyn std::future::Future<Output = (u32, ExitOutcome)> + Send>>> =
        FuturesUnordered::new();
    let mut callbacks: std::collections::HashMap<u32, ExitCallback> = std::collections::HashMap::new();

    loop {
        tokio::select! {
            cmd = rx.recv() => {
                match cmd {
                    None => break,
                    Some(Command::Watch { pid, mut child, callback }) => {
                        callbacks.insert(pid, callback);
                        pending.push(Box::pin(async move {
                            let outcome = match child.wait().await {
                                Ok(status) => ExitOutcome::Exited(status.code().unwrap_or(-1)),
                                Err(_) => ExitOutcome::Missed,
                            };
                            (pid, outcome)
                        }));
                    }
                    Some(Command::Unwatch { pid }) => {
                        callbacks.remove(&pid);
                        watched.lock().unwrap().remove(&pid);
                    }
                }
            }
            Some((pid, outcome)) = pending.next(), if !pending.is_empty() => {
                watched.lock().unwrap().remove(&pid);
                if let Some(cb) = callbacks.remove(&pid) {
                    // Detached: the monitor loop must never block on user code.
                    tokio::spawn(async move { cb(outcome); });
                }
            }
            _ = tokio::time::sleep(Duration::from_secs(1)), if pending.is_empty() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::process::Command;

    #[tokio::test]
    async fn watch_rejects_pid_zero() {
        let monitor = ExitMonitor::new();
        monitor.start().unwrap();
        let child = Command::new("/bin/true").spawn().unwrap();
        let err = monitor.watch(0, child, Box::new(|_| {})).unwrap_err();
        assert!(matches!(err, CoreError::InvalidPid(0)));
    }

    #[tokio::test]
    async fn exit_delivers_at_most_once() {
        let monitor = ExitMonitor::new();
        monitor.start().unwrap();
        let mut cmd = Command::new("/bin/sh");
        cmd.args(["-c", "exit 3"]);
        let child = cmd.spawn().unwrap();
        let pid = child.id().unwrap();
        let code = monitor.wait_for_exit(pid, child).await.unwrap();
        assert_eq!(code, 3);
        assert!(!monitor.is_watching(pid));
    }
}
