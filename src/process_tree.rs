//! Read-only enumeration of host processes and parent/child relationships.
//!
//! Every call re-reads from the OS via `sysinfo` — there is no cache, and
//! no snapshot outlives the call that produced it. Process-group membership
//! isn't exposed by `sysinfo`, so it's filled in per-pid via `getpgid`
//! rather than assuming it equals the pid.

use std::collections::HashMap;

use nix::unistd::{getpgid, Pid as NixPid};
use serde::Serialize;
use sysinfo::{Pid, System};

use crate::error::CoreError;

#[derive(Debug, Clone, Serialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub ppid: Option<u32>,
    pub pgid: Option<u32>,
    pub uid: Option<u32>,
    pub name: String,
    pub exe: Option<String>,
    pub start_time: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessNode {
    pub info: ProcessInfo,
    pub children: Vec<ProcessNode>,
}

#[derive(Default, Clone)]
pub struct ProcessTree;

impl ProcessTree {
    pub fn new() -> Self {
        Self
    }

    fn snapshot(&self) -> System {
        let mut sys = System::new_all();
        sys.refresh_all();
        sys
    }

    fn to_info(pid: Pid, sys: &System) -> ProcessInfo {
        let process = sys.process(pid);
        let pgid = getpgid(Some(NixPid::from_raw(pid.as_u32() as i32)))
            .ok()
            .map(|p| p.as_raw() as u32);
        ProcessInfo {
            pid: pid.as_u32(),
            ppid: process.and_then(|p| p.parent()).map(|p| p.as_u32()),
            pgid,
            uid: process.and_then(|p| p.user_id()).map(|u| **u),
            name: process.map(|p| p.name().to_string_lossy().into_owned()).unwrap_or_default(),
            exe: process.and_then(|p| p.exe()).map(|p| p.to_string_lossy().into_owned()),
            start_time: process.map(|p| p.start_time()).unwrap_or(0),
        }
    }

    /// All processes on the host. `include_system` is currently advisory —
    /// callers wanting to exclude kernel threads/pid 0..2 should filter the
    /// result themselves; `sysinfo` never reports those on Linux anyway.
    pub fn all(&self, _include_system: bool) -> Vec<ProcessInfo> {
        let sys = self.snapshot();
        sys.processes().keys().map(|pid| Self::to_info(*pid, &sys)).collect()
    }

    pub fn info(&self, pid: u32) -> Result<ProcessInfo, CoreError> {
        let sys = self.snapshot();
        let nix_pid = Pid::from_u32(pid);
        if sys.process(nix_pid).is_none() {
            return Err(CoreError::ProcessInfoRetrievalFailed(pid));
        }
        Ok(Self::to_info(nix_pid, &sys))
    }

    pub fn children(&self, pid: u32) -> Vec<ProcessInfo> {
        let sys = self.snapshot();
        sys.processes()
            .keys()
            .filter(|p| sys.process(**p).and_then(|proc| proc.parent()).map(|pp| pp.as_u32()) == Some(pid))
            .map(|p| Self::to_info(*p, &sys))
            .collect()
    }

    /// Breadth-first traversal from `pid` over a parent→children multimap
    /// built from a single snapshot.
    pub fn descendants(&self, pid: u32) -> Vec<ProcessInfo> {
        let sys = self.snapshot();
        let mut by_parent: HashMap<u32, Vec<Pid>> = HashMap::new();
        for p in sys.processes().keys() {
            if let Some(parent) = sys.process(*p).and_then(|proc| proc.parent()) {
                by_parent.entry(parent.as_u32()).or_default().push(*p);
            }
        }

        let mut out = Vec::new();
        let mut queue = std::collections::VecDeque::new();
        queue.push_back(pid);
        while let Some(current) = queue.pop_front() {
            if let Some(kids) = by_parent.get(&current) {
                for kid in kids {
                    out.push(Self::to_info(*kid, &sys));
                    queue.push_back(kid.as_u32());
                }
            }
        }
        out
    }

    /// All processes sharing `pgid`.
    pub fn group(&self, pgid: u32) -> Vec<ProcessInfo> {
        let sys = self.snapshot();
        sys.processes()
            .keys()
            .filter_map(|p| {
                let info = Self::to_info(*p, &sys);
                (info.pgid == Some(pgid)).then_some(info)
            })
            .collect()
    }

    /// Build a recursive tree. When `root` is `None`, roots are processes
    /// whose parent isn't present in the current snapshot.
    pub fn build_tree(&self, root: Option<u32>) -> Vec<ProcessNode> {
        let sys = self.snapshot();
        let mut by_parent: HashMap<u32, Vec<Pid>> = HashMap::new();
        let known: std::collections::HashSet<u32> = sys.processes().keys().map(|p| p.as_u32()).collect();
        for p in sys.processes().keys() {
            if let Some(parent) = sys.process(*p).and_then(|proc| proc.parent()) {
                by_parent.entry(parent.as_u32()).or_default().push(*p);
            }
        }

        fn build(pid: u32, sys: &System, by_parent: &HashMap<u32, Vec<Pid>>) -> ProcessNode {
            let info = ProcessTree::to_info(Pid::from_u32(pid), sys);
            let children = by_parent
                .get(&pid)
                .into_iter()
                .flatten()
                .map(|child| build(child.as_u32(), sys, by_parent))
                .collect();
            ProcessNode { info, children }
        }

        match root {
            Some(pid) => vec![build(pid, &sys, &by_parent)],
            None => sys
                .processes()
                .keys()
                .filter(|p| {
                    let ppid = sys.process(**p).and_then(|proc| proc.parent()).map(|pp| pp.as_u32());
                    ppid.map_or(true, |pp| !known.contains(&pp))
                })
                .map(|p| build(p.as_u32(), &sys, &by_parent))
                .collect(),
        }
    }

    pub fn is_alive(&self, pid: u32) -> bool {
        nix::sys::signal::kill(NixPid::from_raw(pid as i32), None).is_ok()
    }

    pub fn group_leader(&self, pid: u32) -> Option<u32> {
        getpgid(Some(NixPid::from_raw(pid as i32))).ok().map(|p| p.as_raw() as u32)
    }

    pub fn find_by_name(&self, substr: &str) -> Vec<ProcessInfo> {
        let needle = substr.to_lowercase();
        self.all(false)
            .into_iter()
            .filter(|p| p.name.to_lowercase().contains(&needle))
            .collect()
    }

    pub fn find_by_path(&self, substr: &str) -> Vec<ProcessInfo> {
        let needle = substr.to_lowercase();
        self.all(false)
            .into_iter()
            .filter(|p| p.exe.as_deref().is_some_and(|e| e.to_lowercase().contains(&needle)))
            .collect()
    }
}
