use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use crate::io::ReadAt;

use super::entry::Entry;
use super::extractor::{self, ExtractOptions, ExtractSummary};
use super::parser::{ArchiveInfo, OpenOptions, ZipParser};

/// Upper bound on entries preallocated from the (untrusted) record count.
const MAX_PREALLOCATED_ENTRIES: u64 = 1 << 16;

/// An opened archive: archive-level facts plus every central directory
/// entry, in directory order.
pub struct ZipArchive<R: ReadAt> {
    info: ArchiveInfo,
    entries: Vec<Entry<R>>,
}

impl<R: ReadAt + 'static> ZipArchive<R> {
    pub async fn open(reader: Arc<R>) -> Result<Self> {
        Self::open_with(reader, OpenOptions::default()).await
    }

    pub async fn open_with(reader: Arc<R>, options: OpenOptions) -> Result<Self> {
        let parser = ZipParser::new(reader.clone(), options.clone());
        let info = parser.read_archive_info().await?;

        let mut records = parser.records(&info);
        let mut entries =
            Vec::with_capacity(info.record_count.min(MAX_PREALLOCATED_ENTRIES) as usize);
        while let Some(meta) = records.next_record().await? {
            entries.push(Entry::new(reader.clone(), meta, &options));
        }

        debug!(
            entries = entries.len(),
            zip64 = info.zip64,
            cd_offset = info.cd_offset,
            "central directory parsed"
        );
        Ok(Self { info, entries })
    }

    pub fn info(&self) -> &ArchiveInfo {
        &self.info
    }

    pub fn record_count(&self) -> u64 {
        self.info.record_count
    }

    pub fn comment(&self) -> &str {
        &self.info.comment
    }

    pub fn entries(&self) -> &[Entry<R>] {
        &self.entries
    }

    /// Entry with exactly this path.
    pub fn find(&self, path: &str) -> Option<&Entry<R>> {
        self.entries.iter().find(|e| e.path == path)
    }

    /// Write every file entry under the destination.
    pub async fn extract(&self, options: &ExtractOptions) -> Result<ExtractSummary> {
        extractor::extract_entries(&self.entries, options).await
    }
}
