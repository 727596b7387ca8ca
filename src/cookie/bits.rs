//! Bit-level writer and reader for the packed cookie layout.
//!
//! Values are written most significant bit first; the final byte is padded
//! with zero bits.

use crate::errors::CmpError;

#[derive(Debug, Default)]
pub struct BitWriter {
    bytes: Vec<u8>,
    len: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bool(&mut self, bit: bool) {
        if self.len % 8 == 0 {
            self.bytes.push(0);
        }
        if bit {
            let last = self.bytes.len() - 1;
            self.bytes[last] |= 0x80 >> (self.len % 8);
        }
        self.len += 1;
    }

    /// Append the low `width` bits of `value`.
    pub fn push_bits(&mut self, value: u64, width: u8) {
        debug_assert!(width <= 64);
        for shift in (0..width).rev() {
            self.push_bool((value >> shift) & 1 == 1);
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

#[derive(Debug)]
pub struct BitReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn read_bool(&mut self) -> Result<bool, CmpError> {
        let byte = self.bytes.get(self.pos / 8).ok_or_else(|| {
            CmpError::CookieDecode(format!("Unexpected end of cookie at bit {}", self.pos))
        })?;
        let bit = byte & (0x80 >> (self.pos % 8)) != 0;
        self.pos += 1;
        Ok(bit)
    }

    pub fn read_bits(&mut self, width: u8) -> Result<u64, CmpError> {
        let mut value = 0u64;
        for _ in 0..width {
            value = (value << 1) | u64::from(self.read_bool()?);
        }
        Ok(value)
    }

    /// Succeeds only if everything left is zero padding inside the last byte.
    pub fn finish(self) -> Result<(), CmpError> {
        let total = self.bytes.len() * 8;
        if total - self.pos >= 8 {
            return Err(CmpError::CookieDecode(format!(
                "{} trailing bits after consent data",
                total - self.pos
            )));
        }
        let mut reader = self;
        while reader.pos < total {
            if reader.read_bool()? {
                return Err(CmpError::CookieDecode(
                    "Non-zero padding after consent data".to_string(),
                ));
            }
        }
        Ok(())
    }
}
