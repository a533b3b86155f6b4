//! Output sink shared by concurrent writers.

use std::{io, sync::Arc};

use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::Mutex,
};
use tracing::debug;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Error carried by writes issued after the sink was closed.
#[derive(thiserror::Error, Debug)]
#[error("output sink closed")]
pub struct SinkClosed;

/// Output sink shared by every log copy of a run.
///
/// Each `write_all` call is written and flushed under the sink lock, so bytes
/// of a single call are never interleaved with another writer's bytes.
/// Ordering between different writers is unspecified.
#[derive(Clone)]
pub struct SharedSink {
    inner: Arc<Mutex<Option<BoxedWriter>>>,
}

impl SharedSink {
    /// Wrap a writer so it can be shared between tasks.
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            inner: Arc::new(Mutex::new(Some(Box::new(writer)))),
        }
    }

    /// Write and flush a chunk.
    ///
    /// Fails with a [`SinkClosed`] error once [`SharedSink::close`] was called.
    pub async fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        let mut guard = self.inner.lock().await;
        match guard.as_mut() {
            Some(writer) => {
                writer.write_all(buf).await?;
                writer.flush().await
            }
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, SinkClosed)),
        }
    }

    /// Shut the underlying writer down. Closing twice is a no-op.
    pub async fn close(&self) -> io::Result<()> {
        let writer = self.inner.lock().await.take();
        match writer {
            Some(mut writer) => {
                debug!("Closing output sink");
                writer.shutdown().await
            }
            None => Ok(()),
        }
    }

    /// Whether [`SharedSink::close`] was already called.
    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.is_none()
    }
}

/// Whether `err` was produced by writing to a closed [`SharedSink`].
pub fn is_sink_closed_error(err: &io::Error) -> bool {
    err.get_ref().is_some_and(|inner| inner.is::<SinkClosed>())
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, duplex};

    use super::*;

    #[tokio::test]
    async fn concurrent_writers_keep_chunks_whole() {
        let (tx, mut rx) = duplex(64 * 1024);
        let sink = SharedSink::new(tx);

        let mut handles = Vec::new();
        for id in 0..4u8 {
            let sink = sink.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    let chunk = [b'a' + id; 8];
                    sink.write_all(&chunk).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        sink.close().await.unwrap();

        let mut out = Vec::new();
        rx.read_to_end(&mut out).await.unwrap();
        assert_eq!(out.len(), 4 * 50 * 8);
        for chunk in out.chunks(8) {
            assert!(chunk.iter().all(|b| *b == chunk[0]));
        }
    }

    #[tokio::test]
    async fn write_after_close_reports_sink_closed() {
        let sink = SharedSink::new(tokio::io::sink());
        sink.close().await.unwrap();
        assert!(sink.is_closed().await);

        let err = sink.write_all(b"late").await.unwrap_err();
        assert!(is_sink_closed_error(&err));
        // closing again is harmless
        sink.close().await.unwrap();
    }

    #[test]
    fn other_errors_are_not_sink_closed() {
        let err = io::Error::new(io::ErrorKind::BrokenPipe, "pipe");
        assert!(!is_sink_closed_error(&err));
    }
}
