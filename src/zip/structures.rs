use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

use anyhow::Result;

use crate::error::ZipError;

use super::extra::ExtraFields;

pub const EOCD_SIGNATURE: u32 = 0x0605_4b50;
pub const ZIP64_LOCATOR_SIGNATURE: u32 = 0x0706_4b50;
pub const ZIP64_EOCD_SIGNATURE: u32 = 0x0606_4b50;
pub const CDFH_SIGNATURE: u32 = 0x0201_4b50;
pub const LFH_SIGNATURE: u32 = 0x0403_4b50;
pub const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x0807_4b50;
/// "Cr24" read as a little-endian u32.
pub const CRX_MAGIC: u32 = 0x3432_7243;

/// General purpose flag: entry is encrypted.
pub const FLAG_ENCRYPTED: u16 = 0x0001;
/// General purpose flag: sizes and crc follow the data in a descriptor.
pub const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;
/// General purpose flag: name and comment are UTF-8.
pub const FLAG_UTF8: u16 = 0x0800;

fn ensure_len(data: &[u8], size: usize) -> Result<()> {
    if data.len() < size {
        return Err(ZipError::UnexpectedEnd {
            wanted: size,
            available: data.len(),
        }
        .into());
    }
    Ok(())
}

/// ZIP compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            _ => CompressionMethod::Unknown(value),
        }
    }
}

/// MS-DOS timestamp as stored in ZIP headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DosDateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl DosDateTime {
    pub fn from_dos(date: u16, time: u16) -> Self {
        Self {
            year: ((date >> 9) & 0x7F) + 1980,
            month: ((date >> 5) & 0x0F) as u8,
            day: (date & 0x1F) as u8,
            hour: ((time >> 11) & 0x1F) as u8,
            minute: ((time >> 5) & 0x3F) as u8,
            second: ((time & 0x1F) * 2) as u8,
        }
    }
}

/// End of Central Directory (EOCD) - 22 bytes minimum
#[derive(Debug, Clone)]
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment_len: u16,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    pub const SIZE: usize = 22;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        ensure_len(data, Self::SIZE)?;
        let mut cursor = Cursor::new(data);

        let signature = cursor.read_u32::<LittleEndian>()?;
        if signature != EOCD_SIGNATURE {
            return Err(ZipError::InvalidSignature {
                record: "end of central directory",
                found: signature,
            }
            .into());
        }

        Ok(Self {
            disk_number: cursor.read_u16::<LittleEndian>()?,
            disk_with_cd: cursor.read_u16::<LittleEndian>()?,
            disk_entries: cursor.read_u16::<LittleEndian>()?,
            total_entries: cursor.read_u16::<LittleEndian>()?,
            cd_size: cursor.read_u32::<LittleEndian>()?,
            cd_offset: cursor.read_u32::<LittleEndian>()?,
            comment_len: cursor.read_u16::<LittleEndian>()?,
        })
    }

    /// Record count or directory offset hold the ZIP64 sentinel.
    pub fn is_zip64(&self) -> bool {
        self.total_entries == 0xFFFF || self.cd_offset == 0xFFFF_FFFF
    }
}

/// ZIP64 End of Central Directory Locator - 20 bytes
#[derive(Debug, Clone)]
pub struct Zip64EOCDLocator {
    pub disk_with_eocd64: u32,
    pub eocd64_offset: u64,
    pub total_disks: u32,
}

impl Zip64EOCDLocator {
    pub const SIZE: usize = 20;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        ensure_len(data, Self::SIZE)?;
        let mut cursor = Cursor::new(data);

        let signature = cursor.read_u32::<LittleEndian>()?;
        if signature != ZIP64_LOCATOR_SIGNATURE {
            return Err(ZipError::Zip64SignatureMismatch {
                record: "zip64 end of central directory locator",
                expected: ZIP64_LOCATOR_SIGNATURE,
                found: signature,
            }
            .into());
        }

        Ok(Self {
            disk_with_eocd64: cursor.read_u32::<LittleEndian>()?,
            eocd64_offset: cursor.read_u64::<LittleEndian>()?,
            total_disks: cursor.read_u32::<LittleEndian>()?,
        })
    }
}

/// ZIP64 End of Central Directory - 56 bytes minimum
#[derive(Debug, Clone)]
pub struct Zip64EOCD {
    pub eocd64_size: u64,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub disk_number: u32,
    pub disk_with_cd: u32,
    pub disk_entries: u64,
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EOCD {
    pub const MIN_SIZE: usize = 56;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        ensure_len(data, Self::MIN_SIZE)?;
        let mut cursor = Cursor::new(data);

        let signature = cursor.read_u32::<LittleEndian>()?;
        if signature != ZIP64_EOCD_SIGNATURE {
            return Err(ZipError::Zip64SignatureMismatch {
                record: "zip64 end of central directory record",
                expected: ZIP64_EOCD_SIGNATURE,
                found: signature,
            }
            .into());
        }

        Ok(Self {
            eocd64_size: cursor.read_u64::<LittleEndian>()?,
            version_made_by: cursor.read_u16::<LittleEndian>()?,
            version_needed: cursor.read_u16::<LittleEndian>()?,
            disk_number: cursor.read_u32::<LittleEndian>()?,
            disk_with_cd: cursor.read_u32::<LittleEndian>()?,
            disk_entries: cursor.read_u64::<LittleEndian>()?,
            total_entries: cursor.read_u64::<LittleEndian>()?,
            cd_size: cursor.read_u64::<LittleEndian>()?,
            cd_offset: cursor.read_u64::<LittleEndian>()?,
        })
    }
}

/// Central Directory File Header (CDFH), fixed 46-byte part
#[derive(Debug, Clone)]
pub struct CentralDirectoryHeader {
    pub version_made_by: u16,
    pub version_needed: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub file_name_length: u16,
    pub extra_field_length: u16,
    pub file_comment_length: u16,
    pub disk_number_start: u16,
    pub internal_attrs: u16,
    pub external_attrs: u32,
    pub lfh_offset: u32,
}

impl CentralDirectoryHeader {
    pub const SIZE: usize = 46;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        ensure_len(data, Self::SIZE)?;
        let mut cursor = Cursor::new(data);

        let signature = cursor.read_u32::<LittleEndian>()?;
        if signature != CDFH_SIGNATURE {
            return Err(ZipError::InvalidSignature {
                record: "central directory file header",
                found: signature,
            }
            .into());
        }

        Ok(Self {
            version_made_by: cursor.read_u16::<LittleEndian>()?,
            version_needed: cursor.read_u16::<LittleEndian>()?,
            flags: cursor.read_u16::<LittleEndian>()?,
            compression_method: cursor.read_u16::<LittleEndian>()?,
            last_mod_time: cursor.read_u16::<LittleEndian>()?,
            last_mod_date: cursor.read_u16::<LittleEndian>()?,
            crc32: cursor.read_u32::<LittleEndian>()?,
            compressed_size: cursor.read_u32::<LittleEndian>()?,
            uncompressed_size: cursor.read_u32::<LittleEndian>()?,
            file_name_length: cursor.read_u16::<LittleEndian>()?,
            extra_field_length: cursor.read_u16::<LittleEndian>()?,
            file_comment_length: cursor.read_u16::<LittleEndian>()?,
            disk_number_start: cursor.read_u16::<LittleEndian>()?,
            internal_attrs: cursor.read_u16::<LittleEndian>()?,
            external_attrs: cursor.read_u32::<LittleEndian>()?,
            lfh_offset: cursor.read_u32::<LittleEndian>()?,
        })
    }
}

/// Local File Header (LFH), fixed 30-byte part
#[derive(Debug, Clone)]
pub struct LocalFileHeader {
    pub version_needed: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub file_name_length: u16,
    pub extra_field_length: u16,
}

impl LocalFileHeader {
    pub const SIZE: usize = 30;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        ensure_len(data, Self::SIZE)?;
        let mut cursor = Cursor::new(data);

        let signature = cursor.read_u32::<LittleEndian>()?;
        if signature != LFH_SIGNATURE {
            return Err(ZipError::InvalidSignature {
                record: "local file header",
                found: signature,
            }
            .into());
        }

        Ok(Self {
            version_needed: cursor.read_u16::<LittleEndian>()?,
            flags: cursor.read_u16::<LittleEndian>()?,
            compression_method: cursor.read_u16::<LittleEndian>()?,
            last_mod_time: cursor.read_u16::<LittleEndian>()?,
            last_mod_date: cursor.read_u16::<LittleEndian>()?,
            crc32: cursor.read_u32::<LittleEndian>()?,
            compressed_size: cursor.read_u32::<LittleEndian>()?,
            uncompressed_size: cursor.read_u32::<LittleEndian>()?,
            file_name_length: cursor.read_u16::<LittleEndian>()?,
            extra_field_length: cursor.read_u16::<LittleEndian>()?,
        })
    }
}

/// Chrome extension (CRX) prefix in front of the embedded archive
#[derive(Debug, Clone)]
pub struct CrxHeader {
    pub version: u32,
    pub public_key: Vec<u8>,
    pub signature: Vec<u8>,
    /// Total prefix length; every archive offset is shifted by this much.
    pub size: u64,
}

/// The 12 bytes following the CRX magic.
#[derive(Debug, Clone, Copy)]
pub struct CrxPrelude {
    pub version: u32,
    pub public_key_len: u32,
    pub signature_len: u32,
}

impl CrxPrelude {
    pub const SIZE: usize = 12;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        ensure_len(data, Self::SIZE)?;
        let mut cursor = Cursor::new(data);
        Ok(Self {
            version: cursor.read_u32::<LittleEndian>()?,
            public_key_len: cursor.read_u32::<LittleEndian>()?,
            signature_len: cursor.read_u32::<LittleEndian>()?,
        })
    }

    /// Split the key and signature bytes that follow the prelude.
    pub fn into_header(self, key_and_signature: &[u8]) -> Result<CrxHeader> {
        let key_len = self.public_key_len as usize;
        let total = key_len + self.signature_len as usize;
        ensure_len(key_and_signature, total)?;
        Ok(CrxHeader {
            version: self.version,
            public_key: key_and_signature[..key_len].to_vec(),
            signature: key_and_signature[key_len..total].to_vec(),
            size: 4 + Self::SIZE as u64 + total as u64,
        })
    }
}

/// Kind of a central directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    File,
    Directory,
}

/// Parsed central directory entry
#[derive(Debug, Clone)]
pub struct ZipFileEntry {
    /// Decoded path: UTF-8 when flagged, CP437 otherwise, or the Unicode
    /// Path extra field when it matches the raw name.
    pub path: String,
    pub raw_path: Vec<u8>,
    pub entry_type: EntryType,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub flags: u16,
    pub compression_method: CompressionMethod,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub crc32: u32,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub last_modified: DosDateTime,
    /// Already shifted by any CRX prefix.
    pub lfh_offset: u64,
    pub file_name_length: u16,
    pub extra_field_length: u16,
    pub internal_attrs: u16,
    pub external_attrs: u32,
    pub extra: ExtraFields,
    pub comment: String,
}

impl ZipFileEntry {
    pub fn is_directory(&self) -> bool {
        self.entry_type == EntryType::Directory
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }

    pub fn is_utf8(&self) -> bool {
        self.flags & FLAG_UTF8 != 0
    }
}
