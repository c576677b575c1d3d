//! Exclusive, revocable session↔port mapping in a developer port range,
//! backed by an authoritative bind-probe.
//!
//! Internal bookkeeping is advisory only — `is_available` is the ground
//! truth, checked at allocation time via a real `bind()` with
//! `SO_REUSEADDR` set. Bookkeeping exists purely to avoid handing the same
//! port to two sessions in the window before the probe would catch up.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Mutex;

use socket2::{Domain, Socket, Type};

use crate::process_tree::ProcessTree;

#[derive(Debug, Clone, serde::Serialize)]
pub struct PortAllocation {
    pub port: u16,
    pub session: i64,
    pub allocated_at_ms: u64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ListeningPort {
    pub port: u16,
    pub address: String,
    pub pid: Option<u32>,
    pub process_name: Option<String>,
    pub managed: bool,
}

struct Inner {
    session_to_port: HashMap<i64, u16>,
    port_to_session: HashMap<u16, i64>,
}

pub struct PortAllocator {
    range_start: u16,
    range_end: u16,
    scan_extra: Vec<u16>,
    inner: Mutex<Inner>,
}

impl PortAllocator {
    pub fn new(range_start: u16, range_end: u16, scan_extra: Vec<u16>) -> Self {
        Self {
            range_start,
            range_end,
            scan_extra,
            inner: Mutex::new(Inner {
                session_to_port: HashMap::new(),
                port_to_session: HashMap::new(),
            }),
        }
    }

    /// Authoritative liveness probe: attempt to bind a fresh socket to the
    /// wildcard address on `port` with `SO_REUSEADDR`. Closed regardless of
    /// outcome.
    pub fn is_available(&self, port: u16) -> bool {
        let socket = match Socket::new(Domain::IPV4, Type::STREAM, None) {
            Ok(s) => s,
            Err(_) => return false,
        };
        if socket.set_reuse_address(true).is_err() {
            return false;
        }
        let addr: SocketAddr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into();
        socket.bind(&addr.into()).is_ok()
    }

    fn range(&self) -> impl Iterator<Item = u16> {
        self.range_start..=self.range_end
    }

    fn in_range(&self, port: u16) -> bool {
        port >= self.range_start && port <= self.range_end
    }

    pub fn find_available(&self, preferred: Option<u16>) -> Option<u16> {
        let inner = self.inner.lock().unwrap();
        if let Some(p) = preferred {
            if self.in_range(p) && !inner.port_to_session.contains_key(&p) && self.is_available(p) {
                return Some(p);
            }
        }
        self.range()
            .find(|p| !inner.port_to_session.contains_key(p) && self.is_available(*p))
    }

    pub fn find_n_available(&self, n: usize) -> Vec<u16> {
        let inner = self.inner.lock().unwrap();
        self.range()
            .filter(|p| !inner.port_to_session.contains_key(p) && self.is_available(*p))
            .take(n)
            .collect()
    }

    /// Idempotent in `session`: returns the existing port if any, else
    /// finds and records one.
    pub fn allocate(&self, session: i64, preferred: Option<u16>) -> Option<u16> {
        if let Some(existing) = self.inner.lock().unwrap().session_to_port.get(&session).copied() {
            return Some(existing);
        }
        let port = self.find_available(preferred)?;
        let mut inner = self.inner.lock().unwrap();
        inner.session_to_port.insert(session, port);
        inner.port_to_session.insert(port, session);
        Some(port)
    }

    pub fn release(&self, port: u16) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(session) = inner.port_to_session.remove(&port) {
            inner.session_to_port.remove(&session);
        }
    }

    pub fn release_for_session(&self, session: i64) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(port) = inner.session_to_port.remove(&session) {
            inner.port_to_session.remove(&port);
        }
    }

    pub fn get_port(&self, session: i64) -> Option<u16> {
        self.inner.lock().unwrap().session_to_port.get(&session).copied()
    }

    pub fn is_managed(&self, port: u16) -> bool {
        self.inner.lock().unwrap().port_to_session.contains_key(&port)
    }

    pub fn session_of(&self, port: u16) -> Option<i64> {
        self.inner.lock().unwrap().port_to_session.get(&port).copied()
    }

    pub fn all_allocations(&self) -> Vec<PortAllocation> {
        let now = now_ms();
        self.inner
            .lock()
            .unwrap()
            .session_to_port
            .iter()
            .map(|(&session, &port)| PortAllocation {
                port,
                session,
                allocated_at_ms: now,
            })
            .collect()
    }

    /// Scan the dev range plus the known-common set; emit a record for
    /// every port that is *not* available (i.e. something is listening).
    /// Process identity is best-effort since there's no portable
    /// port-to-pid mapping; `pid`/`process_name` may be `None`.
    pub fn scan_listening(&self, tree: &ProcessTree) -> Vec<ListeningPort> {
        let mut ports: Vec<u16> = self.range().collect();
        ports.extend(self.scan_extra.iter().copied());
        ports.sort_unstable();
        ports.dedup();

        ports
            .into_iter()
            .filter(|p| !self.is_available(*p))
            .map(|port| {
                let managed = self.is_managed(port);
                let owner = owning_process(port, tree);
                ListeningPort {
                    port,
                    address: format!("0.0.0.0:{port}"),
                    pid: owner.as_ref().map(|p| p.pid),
                    process_name: owner.map(|p| p.name),
                    managed,
                }
            })
            .collect()
    }
}

/// Best-effort port→pid resolution. No portable API exists for this; we
/// fall back to `None` rather than shelling out to platform tools.
fn owning_process(_port: u16, _tree: &ProcessTree) -> Option<crate::process_tree::ProcessInfo> {
    None
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
    fn allocate_is_idempotent_per_session() {
        let alloc = PortAllocator::new(3000, 3099, vec![]);
        let p1 = alloc.allocate(1, None).unwrap();
        let p2 = alloc.allocate(1, None).unwrap();
        assert_eq!(p1, p2);
    }

    #[test]
    fn release_clears_both_directions() {
        let alloc = PortAllocator::new(3000, 3099, vec![]);
        let port = alloc.allocate(1, None).unwrap();
        alloc.release_for_session(1);
        assert_eq!(alloc.get_port(1), None);
        assert_eq!(alloc.session_of(port), None);
    }

    #[test]
    fn preferred_out_of_range_is_ignored() {
        let alloc = PortAllocator::new(3000, 3099, vec![]);
        let port = alloc.allocate(1, Some(9999)).unwrap();
        assert!((3000..=3099).contains(&port));
    }
}
