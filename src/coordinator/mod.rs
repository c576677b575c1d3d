//! Composition layer: turns the leaf components into the session lifecycle.
//!
//! A single authority owns a map of live sessions and drives each one
//! through spawn → register → pump → watch. Sessions are keyed by a
//! caller-assigned `i64` rather than a generated id, and the exit handler
//! drives a Stopped/Error split depending on the child's exit code rather
//! than a flat Running/Exited enum.

pub mod project_type;
pub mod service_url;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio::time::Duration;
use tracing::{info, warn};

use crate::error::{CoreError, CoreResult};
use crate::exit_monitor::{ExitMonitor, ExitOutcome};
use crate::launcher::Launcher;
use crate::log_store::{LogStore, Stream as LogStream};
use crate::port_allocator::PortAllocator;
use crate::process_tree::{ProcessInfo, ProcessTree};
use crate::registry::{Registry, Source};

pub use project_type::ProjectType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct Session {
    pub id: i64,
    pub pid: u32,
    pub pgid: u32,
    pub command: String,
    pub cwd: String,
    pub port: Option<u16>,
    pub created_at_ms: u64,
    pub status: SessionStatus,
    pub server_url: Option<String>,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
}

pub type SessionMap = HashMap<i64, Session>;

struct Inner {
    sessions: SessionMap,
    pumps: HashMap<i64, crate::stream_pump::StreamPump>,
}

/// Composes Launcher, ExitMonitor, ProcessTree, Registry, PortAllocator and
/// LogStore into the session lifecycle. Cloneable — all clones share the
/// same inner state.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Mutex<Inner>>,
    launcher: Launcher,
    exit_monitor: Arc<ExitMonitor>,
    process_tree: ProcessTree,
    registry: Arc<Registry>,
    ports: Arc<PortAllocator>,
    logs: Arc<LogStore>,
    graceful_grace: Duration,
    registry_cleanup_grace: Duration,
    publish: watch::Sender<SessionMap>,
}

impl Coordinator {
    pub fn new(
        data_dir: impl Into<std::path::PathBuf>,
        log_buffer_capacity: usize,
        port_range_start: u16,
        port_range_end: u16,
        port_scan_extra: Vec<u16>,
        graceful_grace: Duration,
        registry_cleanup_grace: Duration,
    ) -> Self {
        let (publish, _) = watch::channel(HashMap::new());
        Self {
            inner: Arc::new(Mutex::new(Inner {
                sessions: HashMap::new(),
                pumps: HashMap::new(),
            })),
            launcher: Launcher::new(),
            exit_monitor: Arc::new(ExitMonitor::new()),
            process_tree: ProcessTree::new(),
            registry: Arc::new(Registry::new()),
            ports: Arc::new(PortAllocator::new(port_range_start, port_range_end, port_scan_extra)),
            logs: Arc::new(LogStore::new(data_dir, log_buffer_capacity)),
            graceful_grace,
            registry_cleanup_grace,
            publish,
        }
    }

    /// Start the ExitMonitor. Must be called before any session is started.
    pub fn start(&self) -> CoreResult<()> {
        self.exit_monitor.start()
    }

    /// Subscribe to the published session-mapping snapshot. Receivers get
    /// the complete new map after every mutation, never a partial diff.
    pub fn subscribe(&self) -> watch::Receiver<SessionMap> {
        self.publish.subscribe()
    }

    async fn publish_snapshot(&self) {
        let sessions = self.inner.lock().await.sessions.clone();
        let _ = self.publish.send(sessions);
    }

    // ---- 4.8.1 start_dev_server ------------------------------------------

    pub async fn start_dev_server(
        &self,
        session: i64,
        command: String,
        cwd: String,
        preferred_port: Option<u16>,
    ) -> CoreResult<Session> {
        if self.inner.lock().await.sessions.contains_key(&session) {
            self.stop_dev_server(session).await?;
        }

        let port = self.ports.allocate(session, preferred_port);

        let mut env = std::env::vars().collect::<HashMap<_, _>>();
        if let Some(p) = port {
            env.insert("PORT".to_string(), p.to_string());
        }

        let launched = self
            .launcher
            .spawn_shell(&command, Some(&cwd), Some(&env))
            .map_err(|e| {
                self.ports.release_for_session(session);
                e
            })?;

        let now = now_ms();
        let record = Session {
            id: session,
            pid: launched.pid,
            pgid: launched.pgid,
            command: command.clone(),
            cwd: cwd.clone(),
            port,
            created_at_ms: now,
            status: SessionStatus::Starting,
            server_url: None,
            exit_code: None,
            error: None,
        };

        self.registry.register(
            launched.pid,
            Some(launched.pgid),
            session,
            Source::DevServer,
            command.clone(),
            Some(cwd.clone()),
        );

        // Appended before the pump starts draining output so the Started
        // line always precedes any Out/Err line the child emits.
        self.logs.append(session, LogStream::Sys, &format!("Started: {command}")).await;

        let logs = self.logs.clone();
        let coordinator = self.clone();
        let pump = crate::stream_pump::StreamPump::start(
            session,
            launched.stdout,
            launched.stderr,
            logs,
            Some(Arc::new(move |_stream: LogStream, line: &str| {
                let coordinator = coordinator.clone();
                let line = line.to_string();
                tokio::spawn(async move {
                    coordinator.on_output_line(session, &line).await;
                });
            })),
        );

        {
            let mut inner = self.inner.lock().await;
            inner.sessions.insert(session, record);
            inner.pumps.insert(session, pump);
        }

        let exit_coordinator = self.clone();
        let pid = launched.pid;
        self.exit_monitor.watch(
            pid,
            launched.child,
            Box::new(move |outcome: ExitOutcome| {
                let coordinator = exit_coordinator;
                tokio::spawn(async move {
                    coordinator.handle_exit(session, outcome).await;
                });
            }),
        )?;

        {
            let mut inner = self.inner.lock().await;
            if let Some(s) = inner.sessions.get_mut(&session) {
                s.status = SessionStatus::Running;
            }
        }
        self.publish_snapshot().await;
        info!("session {session} started (pid {}, port {port:?})", launched.pid);

        self.inner
            .lock()
            .await
            .sessions
            .get(&session)
            .cloned()
            .ok_or(CoreError::ProcessNotFound(session))
    }

    // ---- 4.8.2 stop_dev_server ---------------------------------------

    pub async fn stop_dev_server(&self, session: i64) -> CoreResult<()> {
        let (pid, pgid, port) = {
            let mut inner = self.inner.lock().await;
            let Some(s) = inner.sessions.get_mut(&session) else {
                return Err(CoreError::ProcessNotFound(session));
            };
            s.status = SessionStatus::Stopping;
            (s.pid, s.pgid, s.port)
        };
        self.publish_snapshot().await;

        if let Some(pump) = self.inner.lock().await.pumps.remove(&session) {
            pump.stop();
            pump.join().await;
        }

        self.exit_monitor.unwatch(pid);
        self.launcher.terminate_group(pgid, self.graceful_grace).await;
        self.registry.unregister(pid);
        if let Some(p) = port {
            self.ports.release(p);
        }

        self.inner.lock().await.sessions.remove(&session);
        self.publish_snapshot().await;
        self.logs.append(session, LogStream::Sys, "Stopped").await;
        Ok(())
    }

    // ---- 4.8.3 restart_dev_server --------------------------------------

    pub async fn restart_dev_server(&self, session: i64) -> CoreResult<Session> {
        let (command, cwd, preferred_port) = {
            let inner = self.inner.lock().await;
            let s = inner.sessions.get(&session).ok_or(CoreError::ProcessNotFound(session))?;
            (s.command.clone(), s.cwd.clone(), s.port)
        };
        self.logs.clear(session).await;
        self.stop_dev_server(session).await?;
        self.start_dev_server(session, command, cwd, preferred_port).await
    }

    // ---- 4.8.4 exit handler ---------------------------------------------

    async fn handle_exit(&self, session: i64, outcome: ExitOutcome) {
        if let Some(pump) = self.inner.lock().await.pumps.remove(&session) {
            pump.stop();
            pump.join().await;
        }

        let (pid, port) = {
            let mut inner = self.inner.lock().await;
            let Some(s) = inner.sessions.get_mut(&session) else {
                return;
            };
            let code = outcome.code();
            s.exit_code = Some(code);
            if code == 0 {
                s.status = SessionStatus::Stopped;
            } else {
                s.status = SessionStatus::Error;
                s.error = Some(format!("Process exited with code {code}"));
                warn!("session {session} exited with code {code}");
            }
            (s.pid, s.port)
        };
        self.publish_snapshot().await;

        self.logs.append(session, LogStream::Sys, &format!("Exited with code {}", outcome.code())).await;

        let registry = self.registry.clone();
        let ports = self.ports.clone();
        tokio::spawn(async move {
            registry.unregister(pid);
            if let Some(p) = port {
                ports.release(p);
            }
        });

        let mut inner = self.inner.lock().await;
        inner.sessions.remove(&session);
        drop(inner);
        self.publish_snapshot().await;
    }

    // ---- 4.8.5 service URL detection -------------------------------------

    async fn on_output_line(&self, session: i64, line: &str) {
        let Some(url) = service_url::detect(line) else {
            return;
        };
        let mut inner = self.inner.lock().await;
        if let Some(s) = inner.sessions.get_mut(&session) {
            if s.server_url.is_none() {
                s.server_url = Some(url);
                if s.status == SessionStatus::Starting {
                    s.status = SessionStatus::Running;
                }
            } else {
                return;
            }
        } else {
            return;
        }
        drop(inner);
        self.publish_snapshot().await;
    }

    // ---- 4.8.6 introspection ----------------------------------------------

    pub async fn status(&self, session: i64) -> Option<Session> {
        self.inner.lock().await.sessions.get(&session).cloned()
    }

    pub async fn all_statuses(&self) -> SessionMap {
        self.inner.lock().await.sessions.clone()
    }

    pub async fn is_running(&self, session: i64) -> bool {
        matches!(
            self.inner.lock().await.sessions.get(&session).map(|s| s.status),
            Some(SessionStatus::Starting) | Some(SessionStatus::Running)
        )
    }

    pub async fn process_tree(&self, session: i64) -> CoreResult<Vec<crate::process_tree::ProcessNode>> {
        let pid = self
            .inner
            .lock()
            .await
            .sessions
            .get(&session)
            .map(|s| s.pid)
            .ok_or(CoreError::ProcessNotFound(session))?;
        Ok(self.process_tree.build_tree(Some(pid)))
    }

    pub async fn all_session_processes(&self, session: i64) -> CoreResult<Vec<ProcessInfo>> {
        let pid = self
            .inner
            .lock()
            .await
            .sessions
            .get(&session)
            .map(|s| s.pid)
            .ok_or(CoreError::ProcessNotFound(session))?;
        let mut out = vec![self.process_tree.info(pid)?];
        out.extend(self.process_tree.descendants(pid));
        Ok(out)
    }

    pub async fn logs(&self, session: i64, count: usize, stream: Option<LogStream>) -> Vec<crate::log_store::LogEntry> {
        self.logs.get(session, count, stream).await
    }

    pub async fn logs_as_string(&self, session: i64, count: usize) -> String {
        self.logs.get_as_string(session, count).await
    }

    pub fn available_ports(&self, n: usize) -> Vec<u16> {
        self.ports.find_n_available(n)
    }

    pub fn port_of(&self, session: i64) -> Option<u16> {
        self.ports.get_port(session)
    }

    pub async fn cleanup_session(&self, session: i64) -> CoreResult<()> {
        let was_running = self.is_running(session).await;
        if was_running {
            self.stop_dev_server(session).await?;
        }
        self.logs.clear(session).await;
        self.ports.release_for_session(session);
        Ok(())
    }

    pub async fn cleanup_all(&self) {
        let sessions: Vec<i64> = self.inner.lock().await.sessions.keys().copied().collect();
        let teardowns = sessions.into_iter().map(|session| {
            let coordinator = self.clone();
            async move { coordinator.cleanup_session(session).await }
        });
        futures::future::join_all(teardowns).await;
        self.registry.cleanup_all(true, self.registry_cleanup_grace);
        self.logs.clear_all().await;
    }

    pub fn scan_system_processes(&self) -> Vec<crate::port_allocator::ListeningPort> {
        self.ports.scan_listening(&self.process_tree)
    }

    pub fn managed_pids(&self) -> Vec<u32> {
        self.registry.by_source(Source::DevServer).into_iter().map(|p| p.pid).collect()
    }

    pub fn is_managed(&self, pid: u32) -> bool {
        self.registry.is_registered(pid)
    }

    // ---- 4.8.7 project-type heuristic ------------------------------------

    pub fn detect_project_type(&self, directory: &str) -> ProjectType {
        project_type::detect(directory)
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

    fn coordinator() -> Coordinator {
        let dir = std::env::temp_dir().join(format!("procd-coord-test-{}-{}", std::process::id(), rand_suffix()));
        let c = Coordinator::new(dir, 1000, 3000, 3099, vec![], Duration::from_secs(5), Duration::from_secs(3));
        c.start().unwrap();
        c
    }

    fn rand_suffix() -> u64 {
        std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().subsec_nanos() as u64
    }

    #[tokio::test]
    async fn basic_lifecycle_reaches_running_and_stops() {
        let c = coordinator();
        let cwd = std::env::temp_dir();
        let session = c
            .start_dev_server(1, "echo hello; sleep 2".into(), cwd.to_string_lossy().into_owned(), None)
            .await
            .unwrap();
        assert_eq!(session.status, SessionStatus::Running);
        assert!(session.pid > 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        let text = c.logs_as_string(1, 10).await;
        assert!(text.contains("hello"));
        assert!(c.is_running(1).await);

        c.stop_dev_server(1).await.unwrap();
        assert!(!c.is_running(1).await);
    }

    #[tokio::test]
    async fn exit_detection_transitions_to_error() {
        let c = coordinator();
        let cwd = std::env::temp_dir();
        c.start_dev_server(4, "exit 2".into(), cwd.to_string_lossy().into_owned(), None)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(c.status(4).await.is_none());
    }

    #[tokio::test]
    async fn service_url_detected_from_output() {
        let c = coordinator();
        let cwd = std::env::temp_dir();
        c.start_dev_server(
            5,
            "echo 'Local: http://localhost:4173/'; sleep 2".into(),
            cwd.to_string_lossy().into_owned(),
            None,
        )
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;
        let status = c.status(5).await.unwrap();
        assert_eq!(status.server_url.as_deref(), Some("http://localhost:4173/"));
        c.stop_dev_server(5).await.unwrap();
    }

    #[tokio::test]
    async fn bulk_teardown_clears_everything() {
        let c = coordinator();
        let cwd = std::env::temp_dir();
        for id in 7..=9 {
            c.start_dev_server(id, "sleep 5".into(), cwd.to_string_lossy().into_owned(), None)
                .await
                .unwrap();
        }
        c.cleanup_all().await;
        assert!(c.all_statuses().await.is_empty());
        for id in 7..=9 {
            assert_eq!(c.port_of(id), None);
        }
    }
}
