//! Per-session ring buffer plus append-only disk log.
//!
//! A bounded `VecDeque` with FIFO eviction backs the in-memory ring buffer,
//! and `Notify` wakes subscribers on append. There is no binary journal or
//! crash-recovery replay — formatted text lines are simply appended to a
//! per-session file, lazily opened and cached.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use chrono_free_clock::now_hms_millis;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, Notify};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stream {
    Out,
    Err,
    Sys,
}

impl Stream {
    fn tag(self) -> &'static str {
        match self {
            Stream::Out => "OUT",
            Stream::Err => "ERR",
            Stream::Sys => "SYS",
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct LogEntry {
    pub id: u64,
    pub timestamp_ms: u64,
    pub stream: Stream,
    pub content: String,
}

struct SessionLog {
    entries: VecDeque<LogEntry>,
    next_id: u64,
    file: Option<File>,
    notify: Arc<Notify>,
}

pub struct LogStore {
    capacity: usize,
    data_dir: PathBuf,
    sessions: Mutex<HashMap<i64, SessionLog>>,
}

impl LogStore {
    pub fn new(data_dir: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            capacity,
            data_dir: data_dir.into(),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn file_path_for(&self, session: i64) -> PathBuf {
        self.data_dir.join("logs").join(format!("session-{session}.log"))
    }

    pub async fn append(&self, session: i64, stream: Stream, content: &str) {
        let mut sessions = self.sessions.lock().await;
        let log = sessions.entry(session).or_insert_with(|| SessionLog {
            entries: VecDeque::new(),
            next_id: 0,
            file: None,
            notify: Arc::new(Notify::new()),
        });

        let entry = LogEntry {
            id: log.next_id,
            timestamp_ms: now_ms(),
            stream,
            content: content.to_string(),
        };
        log.next_id += 1;

        if log.entries.len() >= self.capacity {
            log.entries.pop_front();
        }
        log.entries.push_back(entry.clone());
        log.notify.notify_waiters();

        if log.file.is_none() {
            if let Ok(file) = self.open_file(session).await {
                log.file = Some(file);
            }
        }
        if let Some(file) = log.file.as_mut() {
            let line = format_line(&entry);
            let _ = file.write_all(line.as_bytes()).await;
        }
    }

    async fn open_file(&self, session: i64) -> std::io::Result<File> {
        let path = self.file_path_for(session);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        OpenOptions::new().create(true).append(true).open(path).await
    }

    pub async fn get(&self, session: i64, count: usize, stream: Option<Stream>) -> Vec<LogEntry> {
        let sessions = self.sessions.lock().await;
        let Some(log) = sessions.get(&session) else {
            return Vec::new();
        };
        let filtered: Vec<LogEntry> = log
            .entries
            .iter()
            .filter(|e| stream.is_none_or(|s| s == e.stream))
            .cloned()
            .collect();
        let skip = filtered.len().saturating_sub(count);
        filtered[skip..].to_vec()
    }

    pub async fn get_all(&self, session: i64) -> Vec<LogEntry> {
        self.get(session, usize::MAX, None).await
    }

    pub async fn get_as_string(&self, session: i64, count: usize) -> String {
        self.get(session, count, None)
            .await
            .iter()
            .map(format_line)
            .collect::<Vec<_>>()
            .join("")
    }

    pub async fn search(&self, session: i64, needle: &str) -> Vec<LogEntry> {
        let needle = needle.to_lowercase();
        self.get_all(session)
            .await
            .into_iter()
            .filter(|e| e.content.to_lowercase().contains(&needle))
            .collect()
    }

    pub async fn clear(&self, session: i64) {
        let mut sessions = self.sessions.lock().await;
        sessions.remove(&session);
    }

    pub async fn clear_all(&self) {
        self.sessions.lock().await.clear();
    }

    pub async fn read_from_disk(&self, session: i64) -> std::io::Result<String> {
        fs::read_to_string(self.file_path_for(session)).await
    }

    pub async fn active_sessions(&self) -> Vec<i64> {
        self.sessions.lock().await.keys().copied().collect()
    }

    /// Notifier that fires whenever a new entry is appended for `session`.
    /// Absent until the session has logged at least once.
    pub async fn notifier(&self, session: i64) -> Option<Arc<Notify>> {
        self.sessions.lock().await.get(&session).map(|log| log.notify.clone())
    }
}

fn format_line(entry: &LogEntry) -> String {
    format!("[{}] [{}] {}\n", now_hms_millis(entry.timestamp_ms), entry.stream.tag(), entry.content)
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Format a millisecond epoch timestamp as `HH:MM:SS.mmm` (UTC, no calendar
/// dependency needed since only time-of-day is displayed).
mod chrono_free_clock {
    pub fn now_hms_millis(epoch_ms: u64) -> String {
        let secs_total = epoch_ms / 1000;
        let millis = epoch_ms % 1000;
        let secs_of_day = secs_total % 86400;
        let h = secs_of_day / 3600;
        let m = (secs_of_day % 3600) / 60;
        let s = secs_of_day % 60;
        format!("{h:02}:{m:02}:{s:02}.{millis:03}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_then_get_returns_last_entry() {
        let dir = std::env::temp_dir().join(format!("logstore-test-{}", std::process::id()));
        let store = LogStore::new(&dir, 1000);
        store.append(1, Stream::Out, "hello").await;
        let entries = store.get(1, 1, Some(Stream::Out)).await;
        assert_eq!(entries.last().unwrap().content, "hello");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn overflow_evicts_oldest_in_memory_only() {
        let dir = std::env::temp_dir().join(format!("logstore-test-overflow-{}", std::process::id()));
        let store = LogStore::new(&dir, 2);
        store.append(1, Stream::Sys, "one").await;
        store.append(1, Stream::Sys, "two").await;
        store.append(1, Stream::Sys, "three").await;
        let entries = store.get_all(1).await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].content, "two");
        let _ = std::fs::remove_dir_all(&dir);
    }
}
