//! Per-entry decoding: local header reconciliation, decryption and
//! decompression.
//!
//! [`LocalEntryDecoder::open`] returns an [`EntryStream`] immediately and
//! does the work on a spawned task. Header problems, bad passwords and
//! corrupt data arrive as errors on that stream only; other entries of the
//! same archive are unaffected.

use std::ops::Deref;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use anyhow::Result;
use flate2::{Decompress, FlushDecompress, Status};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::ZipError;
use crate::io::ReadAt;

use super::crypto::{ENCRYPTION_HEADER_LEN, StreamCipher, check_byte};
use super::extra::{self, ExtraFields, Saturated};
use super::parser::OpenOptions;
use super::pull::{Eof, PullStream};
use super::structures::*;

/// Headroom the local header re-check adds on top of the sizes it reads.
const LOCAL_LOOKAHEAD: u64 = 100;

/// Decoded chunks buffered ahead of the consumer.
const ENTRY_STREAM_DEPTH: usize = 8;

const DESCRIPTOR_MARKER: [u8; 4] = DATA_DESCRIPTOR_SIGNATURE.to_le_bytes();

/// Notifications emitted while an entry stream is being decoded.
#[derive(Debug, Clone)]
pub enum EntryEvent {
    /// The local header needs a larger read window; decoding restarts with
    /// `length` bytes.
    Retry { length: u64 },
    /// The reconciled header, sent before any payload bytes.
    Header(LocalEntryState),
}

/// Header values a stream decodes with: the local header, superseded by the
/// central directory record whenever that reports a nonzero compressed size.
#[derive(Debug, Clone)]
pub struct LocalEntryState {
    pub path: String,
    pub flags: u16,
    pub compression_method: CompressionMethod,
    pub crc32: u32,
    /// Payload bytes still to read, excluding any encryption header.
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub last_modified: DosDateTime,
    pub extra: ExtraFields,
    pub from_central_directory: bool,
}

impl LocalEntryState {
    fn from_local(header: &LocalFileHeader, raw_name: &[u8], extra: ExtraFields) -> Self {
        let mut compressed_size = header.compressed_size as u64;
        let mut uncompressed_size = header.uncompressed_size as u64;
        if let Some(zip64) = extra::zip64(&extra) {
            compressed_size = zip64.compressed_size.unwrap_or(compressed_size);
            uncompressed_size = zip64.uncompressed_size.unwrap_or(uncompressed_size);
        }

        Self {
            path: super::cp437::decode_text(raw_name, header.flags & FLAG_UTF8 != 0),
            flags: header.flags,
            compression_method: CompressionMethod::from_u16(header.compression_method),
            crc32: header.crc32,
            compressed_size,
            uncompressed_size,
            last_mod_time: header.last_mod_time,
            last_mod_date: header.last_mod_date,
            last_modified: DosDateTime::from_dos(header.last_mod_date, header.last_mod_time),
            extra,
            from_central_directory: false,
        }
    }

    fn from_central(entry: &ZipFileEntry) -> Self {
        Self {
            path: entry.path.clone(),
            flags: entry.flags,
            compression_method: entry.compression_method,
            crc32: entry.crc32,
            compressed_size: entry.compressed_size,
            uncompressed_size: entry.uncompressed_size,
            last_mod_time: entry.last_mod_time,
            last_mod_date: entry.last_mod_date,
            last_modified: entry.last_modified,
            extra: entry.extra.clone(),
            from_central_directory: true,
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }

    /// Whether the payload length is known up front. Otherwise the payload
    /// runs until the data descriptor signature.
    pub fn size_known(&self) -> bool {
        self.flags & FLAG_DATA_DESCRIPTOR == 0 || self.compressed_size > 0
    }

    /// Expected decoded length, when the header can vouch for it.
    pub fn expected_size(&self) -> Option<u64> {
        self.size_known().then_some(self.uncompressed_size)
    }
}

/// Output room reserved per inflate call.
const INFLATE_CHUNK: usize = 32 * 1024;

/// Raw deflate that remembers whether the final block was seen, so a
/// payload cut short is an error rather than a short entry.
struct Inflater {
    raw: Decompress,
    done: bool,
}

impl Inflater {
    fn new() -> Self {
        Self {
            raw: Decompress::new(false),
            done: false,
        }
    }

    fn run(&mut self, mut input: &[u8], flush: FlushDecompress) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        while !self.done {
            out.reserve(INFLATE_CHUNK);
            let (total_in, total_out) = (self.raw.total_in(), self.raw.total_out());
            let status = self
                .raw
                .decompress_vec(input, &mut out, flush)
                .map_err(|e| ZipError::Decompress(e.to_string()))?;
            let consumed = (self.raw.total_in() - total_in) as usize;
            let produced = self.raw.total_out() - total_out;
            input = &input[consumed..];

            if status == Status::StreamEnd {
                // anything after the final block is ignored
                self.done = true;
            } else if (consumed == 0 && produced == 0)
                || (input.is_empty() && out.len() < out.capacity())
            {
                break;
            }
        }
        Ok(out)
    }

    fn finish(mut self) -> Result<Vec<u8>> {
        let tail = self.run(&[], FlushDecompress::Finish)?;
        if !self.done {
            return Err(ZipError::Decompress(format!(
                "deflate stream ended early after {} bytes",
                self.raw.total_out()
            ))
            .into());
        }
        Ok(tail)
    }
}

enum Decoder {
    Stored,
    Deflate(Inflater),
}

/// Decrypt then decompress. Built fresh for every attempt.
struct Pipeline {
    cipher: Option<StreamCipher>,
    decoder: Decoder,
}

impl Pipeline {
    fn new(method: CompressionMethod, cipher: Option<StreamCipher>) -> Result<Self> {
        let decoder = match method {
            CompressionMethod::Stored => Decoder::Stored,
            CompressionMethod::Deflate => Decoder::Deflate(Inflater::new()),
            CompressionMethod::Unknown(m) => return Err(ZipError::UnsupportedCompression(m).into()),
        };
        Ok(Self { cipher, decoder })
    }

    fn push(&mut self, mut chunk: Vec<u8>) -> Result<Vec<u8>> {
        if let Some(cipher) = self.cipher.as_mut() {
            cipher.decrypt(&mut chunk);
        }

        match &mut self.decoder {
            Decoder::Stored => Ok(chunk),
            Decoder::Deflate(inflater) => inflater.run(&chunk, FlushDecompress::None),
        }
    }

    fn finish(self) -> Result<Vec<u8>> {
        match self.decoder {
            Decoder::Stored => Ok(Vec::new()),
            Decoder::Deflate(inflater) => inflater.finish(),
        }
    }
}

enum Attempt {
    Finished,
    Retry(u64),
}

/// Opens a decode stream for the entry whose local header sits at `offset`.
pub struct LocalEntryDecoder<R: ReadAt> {
    source: Arc<R>,
    offset: u64,
    password: Option<Vec<u8>>,
    central: Option<Arc<ZipFileEntry>>,
    initial_length: u64,
    max_retries: u32,
}

impl<R: ReadAt + 'static> LocalEntryDecoder<R> {
    pub fn new(source: Arc<R>, offset: u64) -> Self {
        Self {
            source,
            offset,
            password: None,
            central: None,
            initial_length: LocalFileHeader::SIZE as u64 + OpenOptions::default().padding,
            max_retries: OpenOptions::default().max_header_retries,
        }
    }

    pub fn password(mut self, password: Option<&str>) -> Self {
        self.password = password.map(|p| p.as_bytes().to_vec());
        self
    }

    /// Authoritative sizes from the central directory.
    pub fn central(mut self, entry: Arc<ZipFileEntry>) -> Self {
        self.central = Some(entry);
        self
    }

    /// First guess at how many bytes the header and payload span.
    pub fn initial_length(mut self, length: u64) -> Self {
        self.initial_length = length;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Start decoding. The stream is returned before the header is parsed.
    pub fn open(self) -> EntryStream {
        let (data_tx, data_rx) = mpsc::channel(ENTRY_STREAM_DEPTH);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            if let Err(e) = self.run(&data_tx, &event_tx).await {
                let _ = data_tx.send(Err(e)).await;
            }
        });

        EntryStream {
            data: data_rx,
            events: event_rx,
            task,
            pending: Vec::new(),
            pending_pos: 0,
        }
    }

    async fn run(
        &self,
        data: &mpsc::Sender<Result<Vec<u8>>>,
        events: &mpsc::UnboundedSender<EntryEvent>,
    ) -> Result<()> {
        let mut length = self.initial_length;
        let mut retries = 0;

        loop {
            match self.attempt(length, data, events).await? {
                Attempt::Finished => return Ok(()),
                Attempt::Retry(corrected) => {
                    if retries >= self.max_retries {
                        return Err(ZipError::RetryLimit {
                            attempts: retries + 1,
                        }
                        .into());
                    }
                    retries += 1;
                    debug!(
                        offset = self.offset,
                        window = length,
                        corrected,
                        "local header exceeds read window, retrying"
                    );
                    let _ = events.send(EntryEvent::Retry { length: corrected });
                    length = corrected;
                }
            }
        }
    }

    /// One pass over a `length`-byte window. Every attempt gets its own
    /// range request, cipher and decompressor.
    async fn attempt(
        &self,
        length: u64,
        data: &mpsc::Sender<Result<Vec<u8>>>,
        events: &mpsc::UnboundedSender<EntryEvent>,
    ) -> Result<Attempt> {
        let mut file = PullStream::new(self.source.clone().stream(self.offset, Some(length)));

        let header = LocalFileHeader::from_bytes(&file.pull(LocalFileHeader::SIZE).await?)?;

        let header_span = (LocalFileHeader::SIZE as u64)
            .saturating_add(LOCAL_LOOKAHEAD)
            .saturating_add(header.extra_field_length as u64)
            .saturating_add(header.file_name_length as u64);

        // Local sizes are zero under a data descriptor; the central record
        // knows better whenever it has a size.
        let central = self.central.as_ref().filter(|c| c.compressed_size > 0);
        let declared = match (central, header.compressed_size) {
            (Some(central), _) => central.compressed_size,
            (None, 0xFFFF_FFFF) => 0,
            (None, size) => size as u64,
        };
        let required = header_span.saturating_add(declared);
        if required > length {
            return Ok(Attempt::Retry(required));
        }

        let raw_name = file.pull(header.file_name_length as usize).await?;
        let raw_extra = file.pull(header.extra_field_length as usize).await?;
        let extra = extra::parse(
            &raw_extra,
            Saturated::new(header.uncompressed_size, header.compressed_size, 0, 0),
        );

        let mut state = match central {
            Some(central) => LocalEntryState::from_central(central),
            None => {
                let state = LocalEntryState::from_local(&header, &raw_name, extra);
                // a saturated local size resolves only through the ZIP64 extra
                let required = header_span.saturating_add(state.compressed_size);
                if required > length {
                    return Ok(Attempt::Retry(required));
                }
                state
            }
        };

        let mut cipher = None;
        if state.is_encrypted() {
            let encryption_header = file.pull(ENCRYPTION_HEADER_LEN).await?;
            let password = self.password.as_deref().ok_or(ZipError::MissingPassword)?;

            let mut keys = StreamCipher::with_password(password);
            keys.verify_header(
                &encryption_header,
                check_byte(state.flags, state.crc32, state.last_mod_time),
            )?;
            state.compressed_size = state
                .compressed_size
                .saturating_sub(ENCRYPTION_HEADER_LEN as u64);
            cipher = Some(keys);
        }

        let mut pipeline = Pipeline::new(state.compression_method, cipher)?;

        let eof = if state.size_known() {
            Eof::Length(state.compressed_size)
        } else {
            Eof::Marker(&DESCRIPTOR_MARKER)
        };
        let _ = events.send(EntryEvent::Header(state));

        let mut payload = file.stream(eof);
        while let Some(chunk) = payload.next_chunk().await? {
            let out = pipeline.push(chunk)?;
            if !out.is_empty() && data.send(Ok(out)).await.is_err() {
                // consumer dropped the stream
                return Ok(Attempt::Finished);
            }
        }

        let tail = pipeline.finish()?;
        if !tail.is_empty() {
            let _ = data.send(Ok(tail)).await;
        }

        file.close();
        Ok(Attempt::Finished)
    }
}

/// Decoded bytes of one entry.
///
/// Read it chunk by chunk with [`next_chunk`](Self::next_chunk), or through
/// [`AsyncRead`]. Dropping the stream stops decoding and releases the range
/// request.
pub struct EntryStream {
    data: mpsc::Receiver<Result<Vec<u8>>>,
    events: mpsc::UnboundedReceiver<EntryEvent>,
    task: JoinHandle<()>,
    pending: Vec<u8>,
    pending_pos: usize,
}

impl EntryStream {
    /// Next decoded chunk; `None` at the end of the entry.
    pub async fn next_chunk(&mut self) -> Option<Result<Vec<u8>>> {
        self.data.recv().await
    }

    /// Wait for the next event. `None` once decoding has finished and all
    /// events were taken.
    pub async fn next_event(&mut self) -> Option<EntryEvent> {
        self.events.recv().await
    }

    /// Collect the remaining bytes, failing on the first stream error.
    pub async fn read_to_vec(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = self.next_chunk().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }
}

impl Drop for EntryStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl AsyncRead for EntryStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        loop {
            if this.pending_pos < this.pending.len() {
                let n = buf.remaining().min(this.pending.len() - this.pending_pos);
                buf.put_slice(&this.pending[this.pending_pos..this.pending_pos + n]);
                this.pending_pos += n;
                return Poll::Ready(Ok(()));
            }

            match ready!(this.data.poll_recv(cx)) {
                Some(Ok(chunk)) => {
                    this.pending = chunk;
                    this.pending_pos = 0;
                }
                Some(Err(e)) => return Poll::Ready(Err(std::io::Error::other(e))),
                None => return Poll::Ready(Ok(())),
            }
        }
    }
}

/// A central directory entry bound to its archive source.
pub struct Entry<R: ReadAt> {
    source: Arc<R>,
    meta: Arc<ZipFileEntry>,
    padding: u64,
    max_retries: u32,
}

impl<R: ReadAt> Clone for Entry<R> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            meta: self.meta.clone(),
            padding: self.padding,
            max_retries: self.max_retries,
        }
    }
}

impl<R: ReadAt> Deref for Entry<R> {
    type Target = ZipFileEntry;

    fn deref(&self) -> &ZipFileEntry {
        &self.meta
    }
}

impl<R: ReadAt + 'static> Entry<R> {
    pub fn new(source: Arc<R>, meta: ZipFileEntry, options: &OpenOptions) -> Self {
        Self {
            source,
            meta: Arc::new(meta),
            padding: options.padding,
            max_retries: options.max_header_retries,
        }
    }

    /// Initial read window: fixed header, padding, the central directory's
    /// name and extra lengths, and the compressed payload.
    pub fn initial_window(&self) -> u64 {
        (LocalFileHeader::SIZE as u64)
            .saturating_add(self.padding)
            .saturating_add(self.meta.extra_field_length as u64)
            .saturating_add(self.meta.file_name_length as u64)
            .saturating_add(self.meta.compressed_size)
    }

    /// Open a decode stream for this entry.
    pub fn stream(&self, password: Option<&str>) -> EntryStream {
        LocalEntryDecoder::new(self.source.clone(), self.meta.lfh_offset)
            .password(password)
            .central(self.meta.clone())
            .initial_length(self.initial_window())
            .max_retries(self.max_retries)
            .open()
    }

    /// Decode the whole entry into memory.
    pub async fn buffer(&self, password: Option<&str>) -> Result<Vec<u8>> {
        self.stream(password).read_to_vec().await
    }
}
