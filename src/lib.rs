//! # streamzip
//!
//! A streaming ZIP reader for local files, in-memory buffers and HTTP
//! servers that honor Range requests.
//!
//! The archive is never materialized: opening reads the End of Central
//! Directory from the tail of the source and walks the central directory
//! record by record. Each entry is decoded on demand through its own byte
//! range request, so many entries can be read concurrently.
//!
//! ## Features
//!
//! - ZIP64 archives and CRX-prefixed (Chrome extension) archives
//! - STORED and DEFLATE entries, decoded incrementally
//! - Traditional PKWARE encryption
//! - Entries with unknown sizes, read up to their data descriptor
//! - Extraction with path containment checks and bounded concurrency
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use streamzip::{HttpRangeReader, ZipArchive};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let reader = Arc::new(HttpRangeReader::new("https://example.com/archive.zip".to_string()).await?);
//!     let archive = ZipArchive::open(reader).await?;
//!
//!     for entry in archive.entries() {
//!         println!("{} ({} bytes)", entry.path, entry.uncompressed_size);
//!     }
//!
//!     if let Some(readme) = archive.find("README.md") {
//!         let bytes = readme.buffer(None).await?;
//!         println!("{}", String::from_utf8_lossy(&bytes));
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod error;
pub mod io;
pub mod logging;
pub mod zip;

pub use cli::Cli;
pub use error::ZipError;
pub use io::{HttpRangeReader, LocalFileReader, MemoryReader, RangeStream, ReadAt};
pub use zip::{
    Entry, EntryEvent, EntryStream, ExtractOptions, ExtractSummary, OpenOptions,
    UnsafePathPolicy, ZipArchive, ZipFileEntry,
};
