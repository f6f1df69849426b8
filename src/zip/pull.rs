//! Pull-based reads over a push-delivered byte range.
//!
//! A [`RangeStream`] hands out chunks as the source produces them. The
//! [`PullStream`] buffers those chunks and lets the parser ask for exactly
//! what it needs next: a fixed number of bytes, everything up to a marker, or
//! a bounded payload that is consumed incrementally.

use anyhow::Result;
use memchr::memmem;

use crate::error::ZipError;
use crate::io::RangeStream;

/// Where a payload read stops.
#[derive(Debug, Clone, Copy)]
pub enum Eof<'m> {
    /// After this many bytes.
    Length(u64),
    /// Right before the first occurrence of this marker.
    Marker(&'m [u8]),
}

/// Sequential reader with a single cursor. Calls must not interleave.
pub struct PullStream {
    source: RangeStream,
    buffer: Vec<u8>,
    finished: bool,
    consumed: u64,
    last_match: Option<u64>,
}

impl PullStream {
    pub fn new(source: RangeStream) -> Self {
        Self {
            source,
            buffer: Vec::new(),
            finished: false,
            consumed: 0,
            last_match: None,
        }
    }

    /// Bytes handed out so far.
    pub fn position(&self) -> u64 {
        self.consumed
    }

    /// Stream offset of the most recent marker match.
    pub fn last_match(&self) -> Option<u64> {
        self.last_match
    }

    /// Wait for the next chunk. Returns false once the source is exhausted.
    async fn fill(&mut self) -> Result<bool> {
        if self.finished {
            return Ok(false);
        }
        match self.source.next_chunk().await {
            Some(Ok(chunk)) => {
                self.buffer.extend_from_slice(&chunk);
                Ok(true)
            }
            Some(Err(e)) => {
                self.finished = true;
                Err(e)
            }
            None => {
                self.finished = true;
                Ok(false)
            }
        }
    }

    fn take(&mut self, n: usize) -> Vec<u8> {
        let rest = self.buffer.split_off(n);
        self.consumed += n as u64;
        std::mem::replace(&mut self.buffer, rest)
    }

    /// Read exactly `n` bytes.
    pub async fn pull(&mut self, n: usize) -> Result<Vec<u8>> {
        while self.buffer.len() < n {
            if !self.fill().await? {
                return Err(ZipError::UnexpectedEnd {
                    wanted: n,
                    available: self.buffer.len(),
                }
                .into());
            }
        }
        Ok(self.take(n))
    }

    /// Scan forward for `marker` and return the bytes before it, plus the
    /// marker itself when `include` is set. Without `include` the marker
    /// stays buffered for the next read.
    ///
    /// Returns `None` if the source ends without a match.
    pub async fn pull_until(&mut self, marker: &[u8], include: bool) -> Result<Option<Vec<u8>>> {
        let finder = memmem::Finder::new(marker);
        let overlap = marker.len().saturating_sub(1);
        let mut searched = 0;

        loop {
            if let Some(pos) = finder.find(&self.buffer[searched..]) {
                let idx = searched + pos;
                self.last_match = Some(self.consumed + idx as u64);
                let end = if include { idx + marker.len() } else { idx };
                return Ok(Some(self.take(end)));
            }
            searched = self.buffer.len().saturating_sub(overlap);
            if !self.fill().await? {
                return Ok(None);
            }
        }
    }

    /// Expose the remaining bytes up to `eof` as a lazy chunk sequence.
    pub fn stream<'s, 'm>(&'s mut self, eof: Eof<'m>) -> Payload<'s, 'm> {
        Payload {
            inner: self,
            eof,
            done: false,
        }
    }

    /// Release the underlying range request.
    pub fn close(&mut self) {
        self.source.close();
        self.finished = true;
    }
}

/// Bounded view over a [`PullStream`].
pub struct Payload<'s, 'm> {
    inner: &'s mut PullStream,
    eof: Eof<'m>,
    done: bool,
}

impl Payload<'_, '_> {
    /// Next piece of the payload, `None` once the bound is reached.
    pub async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        if self.done {
            return Ok(None);
        }

        match self.eof {
            Eof::Length(remaining) => {
                if remaining == 0 {
                    self.done = true;
                    return Ok(None);
                }
                if self.inner.buffer.is_empty() && !self.inner.fill().await? {
                    return Err(ZipError::UnexpectedEnd {
                        wanted: remaining as usize,
                        available: 0,
                    }
                    .into());
                }
                let n = (self.inner.buffer.len() as u64).min(remaining) as usize;
                self.eof = Eof::Length(remaining - n as u64);
                Ok(Some(self.inner.take(n)))
            }
            Eof::Marker(marker) => {
                let overlap = marker.len().saturating_sub(1);
                loop {
                    if let Some(idx) = memmem::find(&self.inner.buffer, marker) {
                        self.inner.last_match = Some(self.inner.consumed + idx as u64);
                        self.done = true;
                        if idx == 0 {
                            return Ok(None);
                        }
                        return Ok(Some(self.inner.take(idx)));
                    }

                    // Everything except a possible marker prefix at the tail is payload.
                    let safe = self.inner.buffer.len().saturating_sub(overlap);
                    if safe > 0 {
                        return Ok(Some(self.inner.take(safe)));
                    }
                    if !self.inner.fill().await? {
                        return Err(ZipError::UnexpectedEnd {
                            wanted: marker.len(),
                            available: self.inner.buffer.len(),
                        }
                        .into());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn chunked(chunks: &[&str]) -> PullStream {
        let chunks: Vec<Vec<u8>> = chunks.iter().map(|c| c.as_bytes().to_vec()).collect();
        let (tx, rx) = mpsc::channel(chunks.len().max(1));
        let task = tokio::spawn(async move {
            for chunk in chunks {
                if tx.send(Ok(chunk)).await.is_err() {
                    return;
                }
            }
        });
        PullStream::new(RangeStream::new(rx, task))
    }

    async fn drain(payload: &mut Payload<'_, '_>) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = payload.next_chunk().await? {
            out.extend(chunk);
        }
        Ok(out)
    }

    #[tokio::test]
    async fn pull_spans_chunks() {
        let mut stream = chunked(&["ab", "cde", "f"]);
        assert_eq!(stream.pull(4).await.unwrap(), b"abcd");
        assert_eq!(stream.pull(2).await.unwrap(), b"ef");
        assert_eq!(stream.position(), 6);
    }

    #[tokio::test]
    async fn pull_past_end_fails() {
        let mut stream = chunked(&["abc"]);
        let err = stream.pull(5).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ZipError>(),
            Some(ZipError::UnexpectedEnd {
                wanted: 5,
                available: 3
            })
        ));
    }

    #[tokio::test]
    async fn marker_split_across_chunks() {
        let mut stream = chunked(&["xxxxPK", "\x05\x06rest"]);
        let before = stream.pull_until(b"PK\x05\x06", false).await.unwrap();
        assert_eq!(before.as_deref(), Some(&b"xxxx"[..]));
        assert_eq!(stream.last_match(), Some(4));
        assert_eq!(stream.pull(8).await.unwrap(), b"PK\x05\x06rest");
    }

    #[tokio::test]
    async fn marker_included() {
        let mut stream = chunked(&["12MARK34"]);
        let got = stream.pull_until(b"MARK", true).await.unwrap().unwrap();
        assert_eq!(got, b"12MARK");
        assert_eq!(stream.pull(2).await.unwrap(), b"34");
    }

    #[tokio::test]
    async fn missing_marker_is_none() {
        let mut stream = chunked(&["abc", "def"]);
        assert!(stream.pull_until(b"zz", false).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn payload_bounded_by_length() {
        let mut stream = chunked(&["hello", " world", "!!"]);
        let mut payload = stream.stream(Eof::Length(8));
        assert_eq!(drain(&mut payload).await.unwrap(), b"hello wo");
        assert_eq!(stream.pull(3).await.unwrap(), b"rld");
    }

    #[tokio::test]
    async fn payload_bounded_by_marker() {
        let sig = 0x0807_4b50u32.to_le_bytes();
        let mut stream = chunked(&["data-da", "taPK\x07", "\x08tail"]);
        let mut payload = stream.stream(Eof::Marker(&sig));
        assert_eq!(drain(&mut payload).await.unwrap(), b"data-data");
        assert_eq!(stream.pull(4).await.unwrap(), sig);
    }

    #[tokio::test]
    async fn truncated_payload_fails() {
        let mut stream = chunked(&["abc"]);
        let mut payload = stream.stream(Eof::Length(10));
        assert!(drain(&mut payload).await.is_err());
    }
}
