//! Error kinds raised while reading archives.
//!
//! Operations return [`anyhow::Result`]; the kinds below travel inside the
//! `anyhow::Error` and can be recovered with `downcast_ref::<ZipError>()`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ZipError {
    /// No End of Central Directory record in the scanned tail.
    #[error("end of central directory signature not found")]
    SignatureNotFound,

    #[error("invalid {record} signature: expected {expected:#010x}, found {found:#010x}")]
    Zip64SignatureMismatch {
        record: &'static str,
        expected: u32,
        found: u32,
    },

    #[error("invalid {record} signature: {found:#010x}")]
    InvalidSignature { record: &'static str, found: u32 },

    #[error("entry is encrypted and no password was given")]
    MissingPassword,

    #[error("bad password")]
    BadPassword,

    /// The byte source ended before the requested bytes arrived.
    #[error("unexpected end of data: wanted {wanted} bytes, {available} available")]
    UnexpectedEnd { wanted: usize, available: usize },

    /// An offset plus the CRX prefix no longer fits in 64 bits.
    #[error("{record} offset overflows")]
    OffsetOverflow { record: &'static str },

    #[error("decompression failed: {0}")]
    Decompress(String),

    #[error("unsupported compression method: {0}")]
    UnsupportedCompression(u16),

    #[error("local header still larger than read window after {attempts} attempts")]
    RetryLimit { attempts: u32 },

    #[error("extraction requires a destination path")]
    PathMissing,

    #[error("entry path escapes the destination: {0}")]
    UnsafePath(String),
}

impl ZipError {
    /// Look for a `ZipError` anywhere in an `anyhow` error chain.
    pub fn find(err: &anyhow::Error) -> Option<&ZipError> {
        err.chain().find_map(|e| e.downcast_ref::<ZipError>())
    }
}
