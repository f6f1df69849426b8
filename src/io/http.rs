use async_trait::async_trait;
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, HeaderMap, RANGE};
use reqwest::{Client, Response, StatusCode};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{RangeStream, ReadAt, STREAM_DEPTH};
use anyhow::{Result, anyhow, bail};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_CONNECT_RETRIES: u32 = 10;

/// Byte source backed by HTTP Range requests
pub struct HttpRangeReader {
    client: Client,
    url: String,
    size: u64,
    transferred_bytes: AtomicU64,
}

impl HttpRangeReader {
    /// Probe `url` with a HEAD request for its length and Range support.
    pub async fn new(url: String) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        let resp = client.head(&url).send().await?;
        if !resp.status().is_success() {
            bail!("HEAD {} failed with status {}", url, resp.status());
        }
        let size = probe_size(resp.headers())?;

        debug!(%url, size, "remote archive");
        Ok(Self {
            client,
            url,
            size,
            transferred_bytes: AtomicU64::new(0),
        })
    }

    /// Body bytes received so far, across all requests.
    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes.load(Ordering::Relaxed)
    }

    /// Clamp `offset..offset+length` to the resource. `None` when empty.
    fn span(&self, offset: u64, length: Option<u64>) -> Option<(u64, u64)> {
        let end = match length {
            Some(len) => offset.saturating_add(len).min(self.size),
            None => self.size,
        };
        (offset < end).then_some((offset, end - 1))
    }

    /// Issue a ranged GET for `first..=last`, retrying timeouts and
    /// connection failures with a linear backoff.
    async fn get_range(&self, first: u64, last: u64) -> Result<Response> {
        let range = format!("bytes={}-{}", first, last);
        let mut attempt = 0;

        loop {
            match self.client.get(&self.url).header(RANGE, &range).send().await {
                Ok(resp) if resp.status() == StatusCode::PARTIAL_CONTENT => return Ok(resp),
                Ok(resp) => bail!("GET {} ({}) failed with status {}", self.url, range, resp.status()),
                Err(e) if e.is_timeout() || e.is_connect() => {
                    attempt += 1;
                    if attempt >= MAX_CONNECT_RETRIES {
                        return Err(anyhow!(e).context(format!("giving up on {}", range)));
                    }
                    warn!(attempt, max = MAX_CONNECT_RETRIES, error = %e, "range request failed, retrying");
                    tokio::time::sleep(Duration::from_millis(500 * attempt as u64)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Forward the body of one ranged GET into `tx`, chunk by chunk.
    async fn pump(
        &self,
        offset: u64,
        length: Option<u64>,
        tx: &mpsc::Sender<Result<Vec<u8>>>,
    ) -> Result<()> {
        let Some((first, last)) = self.span(offset, length) else {
            return Ok(());
        };

        let mut resp = self.get_range(first, last).await?;
        while let Some(chunk) = resp.chunk().await? {
            self.transferred_bytes
                .fetch_add(chunk.len() as u64, Ordering::Relaxed);
            if tx.send(Ok(chunk.to_vec())).await.is_err() {
                // receiver closed, drop the connection
                break;
            }
        }
        Ok(())
    }
}

fn probe_size(headers: &HeaderMap) -> Result<u64> {
    let accepts_bytes = headers
        .get(ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("bytes"));
    if !accepts_bytes {
        bail!("server does not support Range requests");
    }

    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| anyhow!("server did not report Content-Length"))
}

#[async_trait]
impl ReadAt for HttpRangeReader {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let Some((first, last)) = self.span(offset, Some(buf.len() as u64)) else {
            return Ok(0);
        };

        let mut resp = self.get_range(first, last).await?;
        let mut filled = 0;
        while let Some(chunk) = resp.chunk().await? {
            let n = chunk.len().min(buf.len() - filled);
            buf[filled..filled + n].copy_from_slice(&chunk[..n]);
            filled += n;
            self.transferred_bytes.fetch_add(n as u64, Ordering::Relaxed);
            if filled == buf.len() {
                break;
            }
        }
        Ok(filled)
    }

    fn size(&self) -> u64 {
        self.size
    }

    /// One ranged GET per stream, forwarding body chunks as they arrive.
    fn stream(self: Arc<Self>, offset: u64, length: Option<u64>) -> RangeStream {
        let (tx, rx) = mpsc::channel(STREAM_DEPTH);
        let task = tokio::spawn(async move {
            if let Err(e) = self.pump(offset, length, &tx).await {
                let _ = tx.send(Err(e)).await;
            }
        });
        RangeStream::new(rx, task)
    }
}
