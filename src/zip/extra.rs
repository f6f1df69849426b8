//! Extra field blocks attached to central and local headers.

use byteorder::{LittleEndian, ReadBytesExt};
use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use tracing::debug;

pub const ZIP64_EXTRA_ID: u16 = 0x0001;
pub const EXTENDED_TIMESTAMP_ID: u16 = 0x5455;
pub const UNICODE_PATH_ID: u16 = 0x7075;

/// Extra field blocks keyed by header ID.
pub type ExtraFields = BTreeMap<u16, ExtraField>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtraField {
    Zip64(Zip64Extra),
    /// Info-ZIP Unicode Path. `name_crc32` is the CRC of the raw header name
    /// this path was written for.
    UnicodePath {
        version: u8,
        name_crc32: u32,
        name: String,
    },
    ExtendedTimestamp {
        flags: u8,
        mod_time: Option<u32>,
        ac_time: Option<u32>,
        cr_time: Option<u32>,
    },
    Unknown {
        id: u16,
        data: Vec<u8>,
    },
}

/// 64-bit values for the header fields that hold the 0xFFFFFFFF sentinel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Zip64Extra {
    pub uncompressed_size: Option<u64>,
    pub compressed_size: Option<u64>,
    pub lfh_offset: Option<u64>,
    pub disk_start: Option<u32>,
}

/// Which header fields were saturated, and therefore appear in a ZIP64 block.
#[derive(Debug, Clone, Copy, Default)]
pub struct Saturated {
    pub uncompressed_size: bool,
    pub compressed_size: bool,
    pub lfh_offset: bool,
    pub disk_start: bool,
}

impl Saturated {
    pub fn new(uncompressed_size: u32, compressed_size: u32, lfh_offset: u32, disk_start: u16) -> Self {
        Self {
            uncompressed_size: uncompressed_size == 0xFFFF_FFFF,
            compressed_size: compressed_size == 0xFFFF_FFFF,
            lfh_offset: lfh_offset == 0xFFFF_FFFF,
            disk_start: disk_start == 0xFFFF,
        }
    }
}

fn parse_zip64(data: &[u8], saturated: Saturated) -> std::io::Result<Zip64Extra> {
    let mut cursor = Cursor::new(data);
    let mut extra = Zip64Extra::default();
    let remaining = |c: &Cursor<&[u8]>| data.len() as u64 - c.position();

    if saturated.uncompressed_size && remaining(&cursor) >= 8 {
        extra.uncompressed_size = Some(cursor.read_u64::<LittleEndian>()?);
    }
    if saturated.compressed_size && remaining(&cursor) >= 8 {
        extra.compressed_size = Some(cursor.read_u64::<LittleEndian>()?);
    }
    if saturated.lfh_offset && remaining(&cursor) >= 8 {
        extra.lfh_offset = Some(cursor.read_u64::<LittleEndian>()?);
    }
    if saturated.disk_start && remaining(&cursor) >= 4 {
        extra.disk_start = Some(cursor.read_u32::<LittleEndian>()?);
    }
    Ok(extra)
}

fn parse_unicode_path(data: &[u8]) -> std::io::Result<ExtraField> {
    let mut cursor = Cursor::new(data);
    let version = cursor.read_u8()?;
    let name_crc32 = cursor.read_u32::<LittleEndian>()?;
    let mut name = Vec::new();
    cursor.read_to_end(&mut name)?;
    Ok(ExtraField::UnicodePath {
        version,
        name_crc32,
        name: String::from_utf8_lossy(&name).into_owned(),
    })
}

fn parse_timestamp(data: &[u8]) -> std::io::Result<ExtraField> {
    let mut cursor = Cursor::new(data);
    let flags = cursor.read_u8()?;
    let mut next = |bit: u8| -> std::io::Result<Option<u32>> {
        // central directory copies carry at most the modification time
        if flags & bit != 0 && data.len() as u64 - cursor.position() >= 4 {
            Ok(Some(cursor.read_u32::<LittleEndian>()?))
        } else {
            Ok(None)
        }
    };
    let mod_time = next(0x01)?;
    let ac_time = next(0x02)?;
    let cr_time = next(0x04)?;
    Ok(ExtraField::ExtendedTimestamp {
        flags,
        mod_time,
        ac_time,
        cr_time,
    })
}

/// Split an extra field area into blocks.
///
/// Recognized blocks that fail to decode are kept as [`ExtraField::Unknown`].
/// A truncated trailing block ends the scan.
pub fn parse(data: &[u8], saturated: Saturated) -> ExtraFields {
    let mut fields = ExtraFields::new();
    let mut pos = 0;

    while pos + 4 <= data.len() {
        let id = u16::from_le_bytes([data[pos], data[pos + 1]]);
        let len = u16::from_le_bytes([data[pos + 2], data[pos + 3]]) as usize;
        let start = pos + 4;
        let Some(block) = data.get(start..start + len) else {
            debug!(id, len, "truncated extra field block");
            break;
        };

        let parsed = match id {
            ZIP64_EXTRA_ID => parse_zip64(block, saturated).map(ExtraField::Zip64),
            UNICODE_PATH_ID => parse_unicode_path(block),
            EXTENDED_TIMESTAMP_ID => parse_timestamp(block),
            _ => Ok(ExtraField::Unknown {
                id,
                data: block.to_vec(),
            }),
        };
        let field = parsed.unwrap_or_else(|_| ExtraField::Unknown {
            id,
            data: block.to_vec(),
        });
        fields.insert(id, field);

        pos = start + len;
    }

    fields
}

/// The ZIP64 block, if any.
pub fn zip64(fields: &ExtraFields) -> Option<&Zip64Extra> {
    match fields.get(&ZIP64_EXTRA_ID) {
        Some(ExtraField::Zip64(z)) => Some(z),
        _ => None,
    }
}

/// The Unicode path, if present and written for `raw_name`.
pub fn unicode_path<'a>(fields: &'a ExtraFields, raw_name: &[u8]) -> Option<&'a str> {
    match fields.get(&UNICODE_PATH_ID) {
        Some(ExtraField::UnicodePath {
            version: 1,
            name_crc32,
            name,
        }) if *name_crc32 == crc32fast::hash(raw_name) => Some(name),
        _ => None,
    }
}
