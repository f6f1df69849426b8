//! Central directory parsing.
//!
//! Opening an archive runs a fixed sequence of stages, each reading only the
//! bytes it needs from the source:
//! 1. Detect an optional CRX prefix at offset 0.
//! 2. Scan the last `tail_size` bytes for the EOCD signature.
//! 3. Decode the EOCD, following the ZIP64 locator when counts or offsets
//!    are saturated.
//! 4. Read the archive comment.
//! 5. Walk the central directory one record at a time.
//!
//! Any failure aborts the open; there is no partially usable directory.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use crate::error::ZipError;
use crate::io::ReadAt;

use super::cp437;
use super::extra::{self, Saturated};
use super::pull::PullStream;
use super::structures::*;

/// Settings applied when opening an archive
#[derive(Debug, Clone)]
pub struct OpenOptions {
    /// Bytes at the end of the source scanned for the EOCD signature.
    /// Archives with long comments need a larger window.
    pub tail_size: u64,
    /// Slack added to every entry's initial read window.
    pub padding: u64,
    /// Look for a CRX prefix before the archive.
    pub crx: bool,
    /// Bound on local header retries per entry stream.
    pub max_header_retries: u32,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            tail_size: 80,
            padding: 1000,
            crx: true,
            max_header_retries: 3,
        }
    }
}

impl OpenOptions {
    pub fn tail_size(mut self, tail_size: u64) -> Self {
        self.tail_size = tail_size;
        self
    }

    pub fn padding(mut self, padding: u64) -> Self {
        self.padding = padding;
        self
    }

    pub fn crx(mut self, crx: bool) -> Self {
        self.crx = crx;
        self
    }

    pub fn max_header_retries(mut self, retries: u32) -> Self {
        self.max_header_retries = retries;
        self
    }
}

/// Archive-level facts gathered while opening
#[derive(Debug, Clone)]
pub struct ArchiveInfo {
    pub source_size: u64,
    pub eocd_offset: u64,
    /// Already shifted by any CRX prefix.
    pub cd_offset: u64,
    pub cd_size: u64,
    pub record_count: u64,
    pub comment: String,
    pub crx: Option<CrxHeader>,
    pub zip64: bool,
}

impl ArchiveInfo {
    /// Length of the CRX prefix, zero for plain archives.
    pub fn prefix_len(&self) -> u64 {
        self.crx.as_ref().map_or(0, |crx| crx.size)
    }
}

/// Location and contents of the End of Central Directory record.
struct EocdLocation {
    record: EndOfCentralDirectory,
    offset: u64,
    comment: String,
}

/// Low-level ZIP file parser.
///
/// Generic over the reader type to support local files, buffers and HTTP
/// sources. Typically used through [`ZipArchive`](super::ZipArchive).
pub struct ZipParser<R: ReadAt> {
    reader: Arc<R>,
    size: u64,
    options: OpenOptions,
}

impl<R: ReadAt + 'static> ZipParser<R> {
    pub fn new(reader: Arc<R>, options: OpenOptions) -> Self {
        let size = reader.size();
        Self {
            reader,
            size,
            options,
        }
    }

    fn pull_stream(&self, offset: u64, length: Option<u64>) -> PullStream {
        PullStream::new(self.reader.clone().stream(offset, length))
    }

    /// Parse the CRX prefix if the source starts with the `Cr24` magic.
    pub async fn read_crx_header(&self) -> Result<Option<CrxHeader>> {
        if self.size < 4 + CrxPrelude::SIZE as u64 {
            return Ok(None);
        }

        let mut head = self.pull_stream(0, Some(4 + CrxPrelude::SIZE as u64));
        let magic = head.pull(4).await?;
        if u32::from_le_bytes([magic[0], magic[1], magic[2], magic[3]]) != CRX_MAGIC {
            return Ok(None);
        }

        let prelude = CrxPrelude::from_bytes(&head.pull(CrxPrelude::SIZE).await?)?;
        let body_len = prelude.public_key_len as u64 + prelude.signature_len as u64;
        let mut body = self.pull_stream(4 + CrxPrelude::SIZE as u64, Some(body_len));
        let bytes = body.pull(body_len as usize).await.context("truncated CRX header")?;
        let header = prelude.into_header(&bytes)?;

        debug!(version = header.version, prefix = header.size, "CRX prefix");
        Ok(Some(header))
    }

    /// Find and parse the End of Central Directory record in the tail
    /// window, plus the archive comment that follows it.
    async fn find_eocd(&self) -> Result<EocdLocation> {
        let tail_len = self.options.tail_size.min(self.size);
        let tail_start = self.size - tail_len;
        let mut tail = self.pull_stream(tail_start, None);

        if tail
            .pull_until(EndOfCentralDirectory::SIGNATURE, false)
            .await?
            .is_none()
        {
            return Err(ZipError::SignatureNotFound.into());
        }
        let offset = tail_start + tail.last_match().unwrap_or_default();

        let record = EndOfCentralDirectory::from_bytes(&tail.pull(EndOfCentralDirectory::SIZE).await?)?;

        let comment = if record.comment_len > 0 {
            let raw = tail.pull(record.comment_len as usize).await?;
            String::from_utf8_lossy(&raw).into_owned()
        } else {
            String::new()
        };

        debug!(offset, records = record.total_entries, "end of central directory");
        Ok(EocdLocation {
            record,
            offset,
            comment,
        })
    }

    /// Follow the ZIP64 locator that sits right before the EOCD.
    pub async fn read_zip64_eocd(&self, eocd_offset: u64, prefix: u64) -> Result<Zip64EOCD> {
        let size = Zip64EOCDLocator::SIZE as u64;
        let Some(locator_offset) = eocd_offset.checked_sub(size) else {
            return Err(ZipError::Zip64SignatureMismatch {
                record: "zip64 end of central directory locator",
                expected: ZIP64_LOCATOR_SIGNATURE,
                found: 0,
            }
            .into());
        };

        let mut stream = self.pull_stream(locator_offset, Some(size));
        let locator = Zip64EOCDLocator::from_bytes(&stream.pull(Zip64EOCDLocator::SIZE).await?)?;

        let record_offset = shifted(
            locator.eocd64_offset,
            prefix,
            "zip64 end of central directory",
        )?;
        let mut stream = self.pull_stream(record_offset, Some(Zip64EOCD::MIN_SIZE as u64));
        let record = Zip64EOCD::from_bytes(&stream.pull(Zip64EOCD::MIN_SIZE).await?)?;

        debug!(
            offset = record_offset,
            records = record.total_entries,
            "zip64 end of central directory"
        );
        Ok(record)
    }

    /// Run the archive-level stages: CRX prefix, EOCD, ZIP64, comment.
    pub async fn read_archive_info(&self) -> Result<ArchiveInfo> {
        let crx = if self.options.crx {
            self.read_crx_header().await?
        } else {
            None
        };
        let prefix = crx.as_ref().map_or(0, |c| c.size);

        let eocd = self.find_eocd().await?;

        let (cd_offset, cd_size, record_count, zip64) = if eocd.record.is_zip64() {
            let eocd64 = self.read_zip64_eocd(eocd.offset, prefix).await?;
            (
                shifted(eocd64.cd_offset, prefix, "central directory")?,
                eocd64.cd_size,
                eocd64.total_entries,
                true,
            )
        } else {
            (
                shifted(eocd.record.cd_offset as u64, prefix, "central directory")?,
                eocd.record.cd_size as u64,
                eocd.record.total_entries as u64,
                false,
            )
        };

        Ok(ArchiveInfo {
            source_size: self.size,
            eocd_offset: eocd.offset,
            cd_offset,
            cd_size,
            record_count,
            comment: eocd.comment,
            crx,
            zip64,
        })
    }

    /// Sequential reader over the central directory records.
    pub fn records(&self, info: &ArchiveInfo) -> CentralDirectoryRecords {
        CentralDirectoryRecords {
            stream: self.pull_stream(info.cd_offset, None),
            remaining: info.record_count,
            prefix: info.prefix_len(),
        }
    }
}

/// Move an archive-relative offset past the CRX prefix.
fn shifted(offset: u64, prefix: u64, record: &'static str) -> Result<u64> {
    offset
        .checked_add(prefix)
        .ok_or_else(|| ZipError::OffsetOverflow { record }.into())
}

/// Yields central directory records in directory order.
pub struct CentralDirectoryRecords {
    stream: PullStream,
    remaining: u64,
    prefix: u64,
}

impl CentralDirectoryRecords {
    /// Parse the next record: the fixed 46 bytes, then name, extra field
    /// and comment.
    pub async fn next_record(&mut self) -> Result<Option<ZipFileEntry>> {
        if self.remaining == 0 {
            self.stream.close();
            return Ok(None);
        }

        let fixed = self.stream.pull(CentralDirectoryHeader::SIZE).await?;
        let header = CentralDirectoryHeader::from_bytes(&fixed)?;
        let raw_name = self.stream.pull(header.file_name_length as usize).await?;
        let raw_extra = self.stream.pull(header.extra_field_length as usize).await?;
        let raw_comment = self.stream.pull(header.file_comment_length as usize).await?;

        self.remaining -= 1;
        build_entry(header, raw_name, &raw_extra, &raw_comment, self.prefix).map(Some)
    }
}

fn build_entry(
    header: CentralDirectoryHeader,
    raw_name: Vec<u8>,
    raw_extra: &[u8],
    raw_comment: &[u8],
    prefix: u64,
) -> Result<ZipFileEntry> {
    let utf8 = header.flags & FLAG_UTF8 != 0;

    let extra = extra::parse(
        raw_extra,
        Saturated::new(
            header.uncompressed_size,
            header.compressed_size,
            header.lfh_offset,
            header.disk_number_start,
        ),
    );

    let mut compressed_size = header.compressed_size as u64;
    let mut uncompressed_size = header.uncompressed_size as u64;
    let mut lfh_offset = header.lfh_offset as u64;
    if let Some(zip64) = extra::zip64(&extra) {
        uncompressed_size = zip64.uncompressed_size.unwrap_or(uncompressed_size);
        compressed_size = zip64.compressed_size.unwrap_or(compressed_size);
        lfh_offset = zip64.lfh_offset.unwrap_or(lfh_offset);
    }

    let path = match extra::unicode_path(&extra, &raw_name) {
        Some(name) => name.to_string(),
        None => cp437::decode_text(&raw_name, utf8),
    };

    let entry_type = if uncompressed_size == 0 && (path.ends_with('/') || path.ends_with('\\')) {
        EntryType::Directory
    } else {
        EntryType::File
    };

    Ok(ZipFileEntry {
        path,
        raw_path: raw_name,
        entry_type,
        version_made_by: header.version_made_by,
        version_needed: header.version_needed,
        flags: header.flags,
        compression_method: CompressionMethod::from_u16(header.compression_method),
        compressed_size,
        uncompressed_size,
        crc32: header.crc32,
        last_mod_time: header.last_mod_time,
        last_mod_date: header.last_mod_date,
        last_modified: DosDateTime::from_dos(header.last_mod_date, header.last_mod_time),
        lfh_offset: shifted(lfh_offset, prefix, "local file header")?,
        file_name_length: header.file_name_length,
        extra_field_length: header.extra_field_length,
        internal_attrs: header.internal_attrs,
        external_attrs: header.external_attrs,
        extra,
        comment: cp437::decode_text(raw_comment, utf8),
    })
}
