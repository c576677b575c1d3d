//! Concurrent line-by-line draining of a child's stdout/stderr into
//! [`LogStore`], cancellable via a [`tokio_util::sync::CancellationToken`].
//!
//! One task per stream, each a `BufReader::lines()` loop. Cancellation
//! respects end-of-stream first — a line already read and handed to
//! LogStore is never dropped.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::log_store::{LogStore, Stream as LogStream};

pub type LineCallback = Arc<dyn Fn(LogStream, &str) + Send + Sync>;

pub struct StreamPump {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl StreamPump {
    pub fn start<R1, R2>(
        session: i64,
        stdout: R1,
        stderr: R2,
        log_store: Arc<LogStore>,
        callback: Option<LineCallback>,
    ) -> Self
    where
        R1: AsyncRead + Unpin + Send + 'static,
        R2: AsyncRead + Unpin + Send + 'static,
    {
        let token = CancellationToken::new();

        let out_task = spawn_reader(session, stdout, LogStream::Out, log_store.clone(), callback.clone(), token.clone());
        let err_task = spawn_reader(session, stderr, LogStream::Err, log_store, callback, token.clone());

        Self {
            token,
            tasks: vec![out_task, err_task],
        }
    }

    /// Signal cancellation. In-flight reads stop at end-of-stream or the
    /// next cancellation check point, whichever comes first.
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub async fn join(self) {
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

fn spawn_reader<R>(
    session: i64,
    reader: R,
    stream: LogStream,
    log_store: Arc<LogStore>,
    callback: Option<LineCallback>,
    token: CancellationToken,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            let next = tokio::select! {
                biased;
                line = lines.next_line() => line,
                _ = token.cancelled() => break,
            };
            match next {
                Ok(Some(line)) => {
                    log_store.append(session, stream, &line).await;
                    if let Some(cb) = &callback {
                        cb(stream, &line);
                    }
                }
                Ok(None) | Err(_) => break,
            }
        }
    })
}
