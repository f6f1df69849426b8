mod http;
mod local;
mod memory;

pub use http::HttpRangeReader;
pub use local::LocalFileReader;
pub use memory::MemoryReader;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

/// Chunk size used by the default range pump.
pub const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Number of chunks a range pump may run ahead of its consumer.
pub(crate) const STREAM_DEPTH: usize = 4;

/// Trait for random access reading from a data source
#[async_trait]
pub trait ReadAt: Send + Sync {
    /// Read data at the specified offset into the buffer
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Get the total size of the data source
    fn size(&self) -> u64;

    /// Open a push-delivered byte range starting at `offset`.
    ///
    /// With `length` set the range stops after that many bytes (or at the end
    /// of the source, whichever comes first); otherwise it runs to the end.
    /// The default implementation pumps chunks through [`ReadAt::read_at`] on
    /// a spawned task. Dropping the returned stream releases the request.
    fn stream(self: Arc<Self>, offset: u64, length: Option<u64>) -> RangeStream
    where
        Self: Sized + 'static,
    {
        let (tx, rx) = mpsc::channel(STREAM_DEPTH);
        let task = tokio::spawn(async move {
            let size = self.size();
            let end = match length {
                Some(len) => offset.saturating_add(len).min(size),
                None => size,
            };

            let mut pos = offset;
            while pos < end {
                let want = ((end - pos) as usize).min(STREAM_CHUNK_SIZE);
                let mut buf = vec![0u8; want];
                match self.read_at(pos, &mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        buf.truncate(n);
                        pos += n as u64;
                        trace!(offset = pos, len = n, "range chunk");
                        if tx.send(Ok(buf)).await.is_err() {
                            // consumer went away
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                }
            }
        });

        RangeStream::new(rx, task)
    }
}

/// An open byte-range request.
///
/// Chunks arrive in order through a bounded channel fed by a background task.
/// The task is aborted when the stream is closed or dropped.
pub struct RangeStream {
    rx: mpsc::Receiver<Result<Vec<u8>>>,
    task: Option<JoinHandle<()>>,
}

impl RangeStream {
    pub fn new(rx: mpsc::Receiver<Result<Vec<u8>>>, task: JoinHandle<()>) -> Self {
        Self {
            rx,
            task: Some(task),
        }
    }

    /// Wait for the next chunk. `None` means the range is exhausted.
    pub async fn next_chunk(&mut self) -> Option<Result<Vec<u8>>> {
        self.rx.recv().await
    }

    /// Release the underlying request.
    pub fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.rx.close();
    }

    pub fn is_closed(&self) -> bool {
        self.task.is_none()
    }
}

impl Drop for RangeStream {
    fn drop(&mut self) {
        self.close();
    }
}
