//! Traditional PKWARE stream cipher ("ZipCrypto").

use crate::error::ZipError;

/// Length of the encryption header preceding encrypted entry data.
pub const ENCRYPTION_HEADER_LEN: usize = 12;

const INITIAL_KEYS: [u32; 3] = [0x1234_5678, 0x2345_6789, 0x3456_7890];

/// CRC-32 lookup table (polynomial 0xEDB88320).
const CRC32_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0u32;
    while i < 256 {
        let mut crc = i;
        let mut j = 0;
        while j < 8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xEDB8_8320;
            } else {
                crc >>= 1;
            }
            j += 1;
        }
        table[i as usize] = crc;
        i += 1;
    }
    table
};

/// One byte of the bare CRC-32 register update. The key schedule keeps the
/// register between bytes, so there is none of the initial and final
/// inversion `crc32fast::hash` applies.
fn crc32_step(crc: u32, b: u8) -> u32 {
    CRC32_TABLE[((crc ^ b as u32) & 0xff) as usize] ^ (crc >> 8)
}

#[derive(Debug, Clone)]
pub struct StreamCipher {
    keys: [u32; 3],
}

impl Default for StreamCipher {
    fn default() -> Self {
        Self { keys: INITIAL_KEYS }
    }
}

impl StreamCipher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys primed with every byte of `password`.
    pub fn with_password(password: &[u8]) -> Self {
        let mut cipher = Self::new();
        for &b in password {
            cipher.update(b);
        }
        cipher
    }

    pub fn update(&mut self, b: u8) {
        self.keys[0] = crc32_step(self.keys[0], b);
        self.keys[1] = self.keys[1]
            .wrapping_add(self.keys[0] & 0xff)
            .wrapping_mul(134_775_813)
            .wrapping_add(1);
        self.keys[2] = crc32_step(self.keys[2], (self.keys[1] >> 24) as u8);
    }

    fn keystream_byte(&self) -> u8 {
        let temp = (self.keys[2] | 2) as u16;
        (temp.wrapping_mul(temp ^ 1) >> 8) as u8
    }

    pub fn decrypt_byte(&mut self, b: u8) -> u8 {
        let plain = b ^ self.keystream_byte();
        self.update(plain);
        plain
    }

    pub fn encrypt_byte(&mut self, plain: u8) -> u8 {
        let cipher = plain ^ self.keystream_byte();
        self.update(plain);
        cipher
    }

    pub fn decrypt(&mut self, data: &mut [u8]) {
        for b in data.iter_mut() {
            *b = self.decrypt_byte(*b);
        }
    }

    /// Decrypt the 12-byte encryption header and compare its last byte with
    /// `check`.
    pub fn verify_header(&mut self, header: &[u8], check: u8) -> Result<(), ZipError> {
        let mut last = 0;
        for &b in header.iter().take(ENCRYPTION_HEADER_LEN) {
            last = self.decrypt_byte(b);
        }
        if last != check {
            return Err(ZipError::BadPassword);
        }
        Ok(())
    }
}

/// The password check byte: high byte of the DOS time when sizes live in a
/// data descriptor, high byte of the CRC otherwise.
pub fn check_byte(flags: u16, crc32: u32, last_mod_time: u16) -> u8 {
    if flags & super::structures::FLAG_DATA_DESCRIPTOR != 0 {
        (last_mod_time >> 8) as u8
    } else {
        (crc32 >> 24) as u8
    }
}
