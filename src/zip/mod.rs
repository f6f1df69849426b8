//! ZIP archive reading.
//!
//! This module reads ZIP archives from any [`ReadAt`](crate::io::ReadAt)
//! source without loading the whole archive, including ZIP64 archives and
//! archives behind a CRX prefix.
//!
//! ## Architecture
//!
//! - [`structures`]: fixed-layout records (EOCD, ZIP64 records, central and
//!   local headers, CRX prefix) and entry metadata
//! - [`pull`]: pull-based reads over a push-delivered byte range
//! - [`parser`]: archive open stages and the central directory walk
//! - [`entry`]: per-entry local header reconciliation, decryption and
//!   decompression
//! - [`extractor`]: writing entries below a destination directory
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and compressed data for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end
//!
//! The EOCD is read first, from the end of the source, then the Central
//! Directory. Entry data is only fetched when an entry stream is opened,
//! which keeps HTTP sources down to a handful of Range requests.
//!
//! ## Supported Features
//!
//! - ZIP64 end records and extra fields
//! - STORED and DEFLATE entries
//! - Traditional PKWARE encryption
//! - Entries whose sizes trail the data in a data descriptor
//!
//! ## Limitations
//!
//! - No AES encryption
//! - No multi-disk archive support
//! - No BZIP2, LZMA, or other compression methods

mod archive;
pub mod cp437;
pub mod crypto;
pub mod entry;
pub mod extra;
pub mod extractor;
pub mod parser;
pub mod pull;
pub mod structures;

pub use archive::ZipArchive;
pub use entry::{Entry, EntryEvent, EntryStream, LocalEntryDecoder, LocalEntryState};
pub use extractor::{
    ExtractOptions, ExtractSummary, FsWriterFactory, UnsafePathPolicy, WriterFactory,
    extract_entries, safe_join,
};
pub use parser::{ArchiveInfo, CentralDirectoryRecords, OpenOptions, ZipParser};
pub use structures::*;
