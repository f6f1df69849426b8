//! Archive fixtures built byte by byte.

#![allow(dead_code)]

use std::io::Write;
use std::sync::Arc;

use flate2::Compression;
use flate2::write::DeflateEncoder;
use streamzip::MemoryReader;
use streamzip::zip::crypto::StreamCipher;

/// 13:45:30
pub const MOD_TIME: u16 = (13 << 11) | (45 << 5) | 15;
/// 2021-06-15
pub const MOD_DATE: u16 = ((2021 - 1980) << 9) | (6 << 5) | 15;

pub struct TestEntry {
    pub name: Vec<u8>,
    pub data: Vec<u8>,
    pub method: u16,
    pub password: Option<String>,
    pub descriptor: bool,
    pub utf8: bool,
    /// `data` goes into the archive as is, whatever `method` says.
    pub raw: bool,
    pub central_extra: Vec<u8>,
    pub local_extra: Vec<u8>,
    pub comment: Vec<u8>,
    /// Compressed size written to the central record instead of the real one.
    pub central_compressed_size: Option<u32>,
}

impl TestEntry {
    pub fn stored(name: &str, data: &[u8]) -> Self {
        Self {
            name: name.as_bytes().to_vec(),
            data: data.to_vec(),
            method: 0,
            password: None,
            descriptor: false,
            utf8: false,
            raw: false,
            central_extra: Vec::new(),
            local_extra: Vec::new(),
            comment: Vec::new(),
            central_compressed_size: None,
        }
    }

    pub fn deflated(name: &str, data: &[u8]) -> Self {
        Self {
            method: 8,
            ..Self::stored(name, data)
        }
    }

    pub fn dir(name: &str) -> Self {
        Self::stored(name, b"")
    }

    pub fn raw_name(mut self, name: &[u8]) -> Self {
        self.name = name.to_vec();
        self
    }

    pub fn encrypted(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self
    }

    pub fn with_descriptor(mut self) -> Self {
        self.descriptor = true;
        self
    }

    pub fn utf8(mut self) -> Self {
        self.utf8 = true;
        self
    }

    /// Declare a method without changing how the data is stored.
    pub fn method(mut self, method: u16) -> Self {
        self.method = method;
        self.raw = true;
        self
    }

    pub fn central_extra(mut self, extra: Vec<u8>) -> Self {
        self.central_extra = extra;
        self
    }

    pub fn local_extra(mut self, extra: Vec<u8>) -> Self {
        self.local_extra = extra;
        self
    }

    pub fn central_compressed_size(mut self, size: u32) -> Self {
        self.central_compressed_size = Some(size);
        self
    }

    pub fn comment(mut self, comment: &str) -> Self {
        self.comment = comment.as_bytes().to_vec();
        self
    }

    fn flags(&self) -> u16 {
        let mut flags = 0;
        if self.password.is_some() {
            flags |= 0x0001;
        }
        if self.descriptor {
            flags |= 0x0008;
        }
        if self.utf8 {
            flags |= 0x0800;
        }
        flags
    }

    fn compressed(&self) -> Vec<u8> {
        if self.method == 8 && !self.raw {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&self.data).unwrap();
            encoder.finish().unwrap()
        } else {
            self.data.clone()
        }
    }
}

/// Plain 12-byte encryption header ending in `check`.
pub fn encryption_header(check: u8) -> [u8; 12] {
    let mut header = [0x5Au8; 12];
    header[11] = check;
    header
}

/// Whether `wrong` happens to pass the check byte of a header sealed with
/// `correct`. One password in 256 does.
pub fn passes_check(correct: &str, wrong: &str, check: u8) -> bool {
    let mut enc = StreamCipher::with_password(correct.as_bytes());
    let sealed: Vec<u8> = encryption_header(check)
        .iter()
        .map(|&b| enc.encrypt_byte(b))
        .collect();
    StreamCipher::with_password(wrong.as_bytes())
        .verify_header(&sealed, check)
        .is_ok()
}

pub fn extra_block(id: u16, body: &[u8]) -> Vec<u8> {
    let mut out = id.to_le_bytes().to_vec();
    out.extend_from_slice(&(body.len() as u16).to_le_bytes());
    out.extend_from_slice(body);
    out
}

#[derive(Default)]
pub struct ZipBuilder {
    entries: Vec<TestEntry>,
    comment: Vec<u8>,
    zip64: bool,
    crx: Option<(Vec<u8>, Vec<u8>)>,
}

/// Bytes of a built archive and where each local header landed.
pub struct Built {
    pub bytes: Vec<u8>,
    /// Relative to the start of the archive proper, before any CRX prefix.
    pub local_offsets: Vec<u64>,
}

impl ZipBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(mut self, entry: TestEntry) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn comment(mut self, comment: &str) -> Self {
        self.comment = comment.as_bytes().to_vec();
        self
    }

    /// Write ZIP64 end records and saturate the EOCD and local offsets.
    pub fn zip64(mut self) -> Self {
        self.zip64 = true;
        self
    }

    pub fn crx(mut self, public_key: &[u8], signature: &[u8]) -> Self {
        self.crx = Some((public_key.to_vec(), signature.to_vec()));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        self.build_with_layout().bytes
    }

    pub fn build_with_layout(&self) -> Built {
        let mut out = Vec::new();
        let mut central = Vec::new();
        let mut local_offsets = Vec::new();

        for entry in &self.entries {
            let crc = crc32fast::hash(&entry.data);
            let flags = entry.flags();
            let mut payload = entry.compressed();

            if let Some(password) = &entry.password {
                let check = if entry.descriptor {
                    (MOD_TIME >> 8) as u8
                } else {
                    (crc >> 24) as u8
                };
                let mut cipher = StreamCipher::with_password(password.as_bytes());
                let mut sealed: Vec<u8> = encryption_header(check)
                    .iter()
                    .map(|&b| cipher.encrypt_byte(b))
                    .collect();
                sealed.extend(payload.iter().map(|&b| cipher.encrypt_byte(b)));
                payload = sealed;
            }

            let offset = out.len() as u64;
            local_offsets.push(offset);

            let (local_crc, local_csize, local_usize) = if entry.descriptor {
                (0, 0, 0)
            } else {
                (crc, payload.len() as u32, entry.data.len() as u32)
            };

            out.extend_from_slice(&0x0403_4b50u32.to_le_bytes());
            out.extend_from_slice(&20u16.to_le_bytes());
            out.extend_from_slice(&flags.to_le_bytes());
            out.extend_from_slice(&entry.method.to_le_bytes());
            out.extend_from_slice(&MOD_TIME.to_le_bytes());
            out.extend_from_slice(&MOD_DATE.to_le_bytes());
            out.extend_from_slice(&local_crc.to_le_bytes());
            out.extend_from_slice(&local_csize.to_le_bytes());
            out.extend_from_slice(&local_usize.to_le_bytes());
            out.extend_from_slice(&(entry.name.len() as u16).to_le_bytes());
            out.extend_from_slice(&(entry.local_extra.len() as u16).to_le_bytes());
            out.extend_from_slice(&entry.name);
            out.extend_from_slice(&entry.local_extra);
            out.extend_from_slice(&payload);

            if entry.descriptor {
                out.extend_from_slice(&0x0807_4b50u32.to_le_bytes());
                out.extend_from_slice(&crc.to_le_bytes());
                out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
                out.extend_from_slice(&(entry.data.len() as u32).to_le_bytes());
            }

            let mut extra = entry.central_extra.clone();
            let offset_field = if self.zip64 {
                extra.extend(extra_block(0x0001, &offset.to_le_bytes()));
                0xFFFF_FFFF
            } else {
                offset as u32
            };

            central.extend_from_slice(&0x0201_4b50u32.to_le_bytes());
            central.extend_from_slice(&20u16.to_le_bytes());
            central.extend_from_slice(&20u16.to_le_bytes());
            central.extend_from_slice(&flags.to_le_bytes());
            central.extend_from_slice(&entry.method.to_le_bytes());
            central.extend_from_slice(&MOD_TIME.to_le_bytes());
            central.extend_from_slice(&MOD_DATE.to_le_bytes());
            central.extend_from_slice(&crc.to_le_bytes());
            let central_csize = entry
                .central_compressed_size
                .unwrap_or(payload.len() as u32);
            central.extend_from_slice(&central_csize.to_le_bytes());
            central.extend_from_slice(&(entry.data.len() as u32).to_le_bytes());
            central.extend_from_slice(&(entry.name.len() as u16).to_le_bytes());
            central.extend_from_slice(&(extra.len() as u16).to_le_bytes());
            central.extend_from_slice(&(entry.comment.len() as u16).to_le_bytes());
            central.extend_from_slice(&0u16.to_le_bytes());
            central.extend_from_slice(&0u16.to_le_bytes());
            central.extend_from_slice(&0u32.to_le_bytes());
            central.extend_from_slice(&offset_field.to_le_bytes());
            central.extend_from_slice(&entry.name);
            central.extend_from_slice(&extra);
            central.extend_from_slice(&entry.comment);
        }

        let cd_offset = out.len() as u64;
        let cd_size = central.len() as u64;
        let count = self.entries.len() as u64;
        out.extend_from_slice(&central);

        if self.zip64 {
            let record_offset = out.len() as u64;
            out.extend_from_slice(&0x0606_4b50u32.to_le_bytes());
            out.extend_from_slice(&44u64.to_le_bytes());
            out.extend_from_slice(&45u16.to_le_bytes());
            out.extend_from_slice(&45u16.to_le_bytes());
            out.extend_from_slice(&0u32.to_le_bytes());
            out.extend_from_slice(&0u32.to_le_bytes());
            out.extend_from_slice(&count.to_le_bytes());
            out.extend_from_slice(&count.to_le_bytes());
            out.extend_from_slice(&cd_size.to_le_bytes());
            out.extend_from_slice(&cd_offset.to_le_bytes());

            out.extend_from_slice(&0x0706_4b50u32.to_le_bytes());
            out.extend_from_slice(&0u32.to_le_bytes());
            out.extend_from_slice(&record_offset.to_le_bytes());
            out.extend_from_slice(&1u32.to_le_bytes());
        }

        let (eocd_count, eocd_size, eocd_offset) = if self.zip64 {
            (0xFFFFu16, 0xFFFF_FFFFu32, 0xFFFF_FFFFu32)
        } else {
            (count as u16, cd_size as u32, cd_offset as u32)
        };
        out.extend_from_slice(&0x0605_4b50u32.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&eocd_count.to_le_bytes());
        out.extend_from_slice(&eocd_count.to_le_bytes());
        out.extend_from_slice(&eocd_size.to_le_bytes());
        out.extend_from_slice(&eocd_offset.to_le_bytes());
        out.extend_from_slice(&(self.comment.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.comment);

        if let Some((key, signature)) = &self.crx {
            let mut prefixed = b"Cr24".to_vec();
            prefixed.extend_from_slice(&2u32.to_le_bytes());
            prefixed.extend_from_slice(&(key.len() as u32).to_le_bytes());
            prefixed.extend_from_slice(&(signature.len() as u32).to_le_bytes());
            prefixed.extend_from_slice(key);
            prefixed.extend_from_slice(signature);
            prefixed.extend_from_slice(&out);
            out = prefixed;
        }

        Built {
            bytes: out,
            local_offsets,
        }
    }
}

pub fn source(bytes: Vec<u8>) -> Arc<MemoryReader> {
    Arc::new(MemoryReader::new(bytes))
}

/// Compressible text of exactly `len` bytes.
pub fn lorem(len: usize) -> Vec<u8> {
    const TEXT: &[u8] = b"Lorem ipsum dolor sit amet, consectetur adipiscing elit. ";
    TEXT.iter().copied().cycle().take(len).collect()
}

/// Incompressible bytes from a fixed xorshift seed.
pub fn noise(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed.max(1);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 24) as u8
        })
        .collect()
}

/// The archive most tests start from.
pub fn sample_builder() -> ZipBuilder {
    ZipBuilder::new()
        .entry(TestEntry::stored("hello.txt", b"Hello, World!"))
        .entry(TestEntry::dir("docs/"))
        .entry(TestEntry::deflated("docs/lorem.txt", &lorem(20_000)))
        .entry(TestEntry::stored("docs/noise.bin", &noise(3_000, 7)))
        .entry(TestEntry::deflated("empty.txt", b""))
}
