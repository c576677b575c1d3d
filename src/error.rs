//! Error taxonomy shared by every component.
//!
//! Each variant maps to one of the failure modes named in the component
//! contracts (Launcher, ExitMonitor, ProcessTree, Coordinator). All carry a
//! human-readable message so callers at the RPC boundary can surface them
//! verbatim.

use std::fmt;

#[derive(Debug, Clone)]
pub enum CoreError {
    ProcessNotFound(i64),
    AlreadyRunning(i64),
    LaunchFailed(String),
    InvalidWorkingDirectory,
    PipeCreationFailed,
    SpawnFailed(String),
    KernelSubscriptionFailed(String),
    WatchFailed(u32, String),
    InvalidPid(i64),
    ListProcessesFailed(String),
    ProcessInfoRetrievalFailed(u32),
    PortExhausted,
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProcessNotFound(id) => write!(f, "no active session {id}"),
            Self::AlreadyRunning(id) => write!(f, "session {id} is already running"),
            Self::LaunchFailed(reason) => write!(f, "launch failed: {reason}"),
            Self::InvalidWorkingDirectory => write!(f, "working directory does not exist or is not a directory"),
            Self::PipeCreationFailed => write!(f, "failed to create pipes for child process"),
            Self::SpawnFailed(errno) => write!(f, "spawn failed: {errno}"),
            Self::KernelSubscriptionFailed(reason) => write!(f, "exit monitor subscription failed: {reason}"),
            Self::WatchFailed(pid, errno) => write!(f, "failed to watch pid {pid}: {errno}"),
            Self::InvalidPid(pid) => write!(f, "invalid pid: {pid}"),
            Self::ListProcessesFailed(reason) => write!(f, "failed to list processes: {reason}"),
            Self::ProcessInfoRetrievalFailed(pid) => write!(f, "failed to retrieve info for pid {pid}"),
            Self::PortExhausted => write!(f, "no available port in the configured range"),
        }
    }
}

impl std::error::Error for CoreError {}

pub type CoreResult<T> = Result<T, CoreError>;
