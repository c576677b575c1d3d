//! Concurrency-safe index of every child the core has spawned.
//!
//! `cleanup_session`/`cleanup_all` remove the bookkeeping entry *before*
//! signaling, so a concurrent lookup never observes a half-torn-down
//! process.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use nix::sys::signal::Signal;
use tokio::time::Duration;

use crate::launcher::Launcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Terminal,
    DevServer,
    Background,
    System,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RegisteredProcess {
    pub pid: u32,
    pub pgid: Option<u32>,
    pub session: i64,
    pub source: Source,
    pub command: String,
    pub cwd: Option<String>,
    pub registered_at_ms: u64,
}

type RegisterHook = Arc<dyn Fn(&RegisteredProcess) + Send + Sync>;
type UnregisterHook = Arc<dyn Fn(u32) + Send + Sync>;

struct Inner {
    by_pid: HashMap<u32, RegisteredProcess>,
    groups: HashMap<u32, HashSet<u32>>, // pgid -> pids carrying it
}

pub struct Registry {
    inner: Mutex<Inner>,
    launcher: Launcher,
    on_register: Mutex<Option<RegisterHook>>,
    on_unregister: Mutex<Option<UnregisterHook>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                by_pid: HashMap::new(),
                groups: HashMap::new(),
            }),
            launcher: Launcher::new(),
            on_register: Mutex::new(None),
            on_unregister: Mutex::new(None),
        }
    }

    pub fn set_on_register(&self, f: RegisterHook) {
        *self.on_register.lock().unwrap() = Some(f);
    }

    pub fn set_on_unregister(&self, f: UnregisterHook) {
        *self.on_unregister.lock().unwrap() = Some(f);
    }

    pub fn register(
        &self,
        pid: u32,
        pgid: Option<u32>,
        session: i64,
        source: Source,
        command: String,
        cwd: Option<String>,
    ) -> RegisteredProcess {
        let entry = RegisteredProcess {
            pid,
            pgid,
            session,
            source,
            command,
            cwd,
            registered_at_ms: now_ms(),
        };
        {
            let mut inner = self.inner.lock().unwrap();
            if let Some(pgid) = pgid {
                inner.groups.entry(pgid).or_default().insert(pid);
            }
            inner.by_pid.insert(pid, entry.clone());
        }
        if let Some(hook) = self.on_register.lock().unwrap().clone() {
            hook(&entry);
        }
        entry
    }

    pub fn unregister(&self, pid: u32) -> Option<RegisteredProcess> {
        let removed = {
            let mut inner = self.inner.lock().unwrap();
            let removed = inner.by_pid.remove(&pid);
            if let Some(ref entry) = removed {
                if let Some(pgid) = entry.pgid {
                    if let Some(set) = inner.groups.get_mut(&pgid) {
                        set.remove(&pid);
                        if set.is_empty() {
                            inner.groups.remove(&pgid);
                        }
                    }
                }
            }
            removed
        };
        if removed.is_some() {
            if let Some(hook) = self.on_unregister.lock().unwrap().clone() {
                hook(pid);
            }
        }
        removed
    }

    pub fn is_registered(&self, pid: u32) -> bool {
        self.inner.lock().unwrap().by_pid.contains_key(&pid)
    }

    pub fn is_managed_group(&self, pgid: u32) -> bool {
        self.inner.lock().unwrap().groups.contains_key(&pgid)
    }

    pub fn by_pid(&self, pid: u32) -> Option<RegisteredProcess> {
        self.inner.lock().unwrap().by_pid.get(&pid).cloned()
    }

    pub fn by_session(&self, session: i64) -> Vec<RegisteredProcess> {
        self.inner
            .lock()
            .unwrap()
            .by_pid
            .values()
            .filter(|p| p.session == session)
            .cloned()
            .collect()
    }

    pub fn by_source(&self, source: Source) -> Vec<RegisteredProcess> {
        self.inner
            .lock()
            .unwrap()
            .by_pid
            .values()
            .filter(|p| p.source == source)
            .cloned()
            .collect()
    }

    /// Entries whose process the OS no longer reports as alive.
    pub fn find_orphans(&self) -> Vec<RegisteredProcess> {
        self.inner
            .lock()
            .unwrap()
            .by_pid
            .values()
            .filter(|p| nix::sys::signal::kill(nix::unistd::Pid::from_raw(p.pid as i32), None).is_err())
            .cloned()
            .collect()
    }

    pub fn cleanup_orphans(&self) -> Vec<RegisteredProcess> {
        let orphans = self.find_orphans();
        for orphan in &orphans {
            self.unregister(orphan.pid);
        }
        orphans
    }

    /// Remove every entry for `session`, then signal the distinct process
    /// groups that were removed. With `kill=false`, only the bookkeeping is
    /// detached — used when the caller already reaped the processes.
    ///
    /// The graceful signal is sent before this call returns; the follow-up
    /// SIGKILL pass after `grace` runs on a detached task so a caller
    /// tearing down many sessions never blocks on any one group's grace
    /// window.
    pub fn cleanup_session(&self, session: i64, kill: bool, grace: Duration) {
        let pgids: HashSet<u32> = {
            let mut inner = self.inner.lock().unwrap();
            let pids: Vec<u32> = inner
                .by_pid
                .values()
                .filter(|p| p.session == session)
                .map(|p| p.pid)
                .collect();
            let mut pgids = HashSet::new();
            for pid in pids {
                if let Some(entry) = inner.by_pid.remove(&pid) {
                    if let Some(pgid) = entry.pgid {
                        pgids.insert(pgid);
                        if let Some(set) = inner.groups.get_mut(&pgid) {
                            set.remove(&pid);
                            if set.is_empty() {
                                inner.groups.remove(&pgid);
                            }
                        }
                    }
                }
            }
            pgids
        };

        if !kill || pgids.is_empty() {
            return;
        }
        for pgid in &pgids {
            self.launcher.signal_group(*pgid, Signal::SIGTERM);
        }
        let launcher = self.launcher.clone();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            for pgid in pgids {
                if launcher.group_is_alive(pgid) {
                    launcher.signal_group(pgid, Signal::SIGKILL);
                }
            }
        });
    }

    pub fn cleanup_all(&self, kill: bool, grace: Duration) {
        let sessions: HashSet<i64> = self.inner.lock().unwrap().by_pid.values().map(|p| p.session).collect();
        for session in sessions {
            self.cleanup_session(session, kill, grace);
        }
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_retained_iff_entry_remains() {
        let reg = Registry::new();
        reg.register(100, Some(100), 1, Source::DevServer, "sleep 1".into(), None);
        assert!(reg.is_managed_group(100));
        reg.unregister(100);
        assert!(!reg.is_managed_group(100));
    }

    #[test]
    fn by_session_filters_correctly() {
        let reg = Registry::new();
        reg.register(1, Some(1), 1, Source::DevServer, "a".into(), None);
        reg.register(2, Some(2), 2, Source::DevServer, "b".into(), None);
        assert_eq!(reg.by_session(1).len(), 1);
        assert_eq!(reg.by_session(2).len(), 1);
    }
}
