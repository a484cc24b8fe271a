//! LEB128 variable-length integer decoding, as an extension trait over
//! [std::io::Read].
//!
//! All indices and counts in the binary format are unsigned LEB128; signed
//! immediates use the signed flavor. Encodings longer than the ceiling for
//! the requested width, or whose spare bits disagree with the sign, are
//! malformed.
//!
//! [Spec]: https://webassembly.github.io/spec/core/binary/values.html#integers

use std::io::Read;

#[derive(Debug, PartialEq, Eq)]
pub enum Leb128Error {
    Eof,
    /// More bytes than the width allows.
    Unterminated,
    /// Spare bits in the final byte are not a valid sign/zero extension.
    Overflow,
}

type Result<T> = std::result::Result<T, Leb128Error>;

fn read_unsigned(r: &mut impl Read, bits: u32) -> Result<u64> {
    let max_bytes = (bits + 6) / 7;
    let mut result = 0u64;
    let mut shift = 0u32;
    for i in 0..max_bytes {
        let mut buf = [0u8; 1];
        r.read_exact(&mut buf).map_err(|_| Leb128Error::Eof)?;
        let b = buf[0];
        result |= ((b & 0x7F) as u64) << shift;
        if b & 0x80 == 0 {
            // Spare high bits in the final byte must be zero.
            if i + 1 == max_bytes {
                let used = bits - 7 * (max_bytes - 1);
                if (b & 0x7F) >> used != 0 {
                    return Err(Leb128Error::Overflow);
                }
            }
            return Ok(result);
        }
        shift += 7;
    }
    Err(Leb128Error::Unterminated)
}

fn read_signed(r: &mut impl Read, bits: u32) -> Result<i64> {
    let max_bytes = (bits + 6) / 7;
    let mut result = 0i64;
    let mut shift = 0u32;
    for i in 0..max_bytes {
        let mut buf = [0u8; 1];
        r.read_exact(&mut buf).map_err(|_| Leb128Error::Eof)?;
        let b = buf[0];
        result |= (((b & 0x7F) as i64) << shift) as i64;
        shift += 7;
        if b & 0x80 == 0 {
            if i + 1 == max_bytes {
                // The spare bits must all equal the sign bit.
                let used = bits - 7 * (max_bytes - 1);
                let spare = (b & 0x7F) >> (used - 1);
                let all_ones = (1u8 << (8 - used)) - 1;
                if spare != 0 && spare != all_ones {
                    return Err(Leb128Error::Overflow);
                }
            }
            if shift < 64 && b & 0x40 != 0 {
                result |= -1i64 << shift;
            }
            return Ok(result);
        }
    }
    Err(Leb128Error::Unterminated)
}

/// LEB128 readers for the widths the binary format uses.
pub trait ReadLeb128: Read + Sized {
    fn read_u32_leb128(&mut self) -> Result<u32> {
        read_unsigned(self, 32).map(|v| v as u32)
    }

    fn read_u64_leb128(&mut self) -> Result<u64> {
        read_unsigned(self, 64)
    }

    fn read_i32_leb128(&mut self) -> Result<i32> {
        read_signed(self, 32).map(|v| v as i32)
    }

    fn read_i64_leb128(&mut self) -> Result<i64> {
        read_signed(self, 64)
    }

    /// The 33-bit signed read used for block types, where negative one-byte
    /// values are type constructors and non-negative values are type
    /// indices.
    ///
    /// [Spec]: https://webassembly.github.io/spec/core/binary/instructions.html#control-instructions
    fn read_i33_leb128(&mut self) -> Result<i64> {
        read_signed(self, 33)
    }
}

impl<R: Read + Sized> ReadLeb128 for R {}

#[cfg(test)]
mod test {
    use super::*;

    fn u32_of(bytes: &[u8]) -> Result<u32> {
        bytes.to_vec().as_slice().read_u32_leb128()
    }

    fn i32_of(bytes: &[u8]) -> Result<i32> {
        bytes.to_vec().as_slice().read_i32_leb128()
    }

    #[test]
    fn unsigned_values() {
        assert_eq!(u32_of(&[0x00]), Ok(0));
        assert_eq!(u32_of(&[0x80, 0x01]), Ok(128));
        assert_eq!(u32_of(&[0xFF, 0xFF, 0xFF, 0xFF, 0x0F]), Ok(u32::MAX));
    }

    #[test]
    fn unsigned_rejects_overlong_and_overflow() {
        assert_eq!(
            u32_of(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x01]),
            Err(Leb128Error::Unterminated)
        );
        assert_eq!(
            u32_of(&[0xFF, 0xFF, 0xFF, 0xFF, 0x1F]),
            Err(Leb128Error::Overflow)
        );
        assert_eq!(u32_of(&[0x80]), Err(Leb128Error::Eof));
    }

    #[test]
    fn signed_values() {
        assert_eq!(i32_of(&[0x00]), Ok(0));
        assert_eq!(i32_of(&[0x7F]), Ok(-1));
        assert_eq!(i32_of(&[0x3F]), Ok(63));
        assert_eq!(i32_of(&[0x40]), Ok(-64));
        assert_eq!(i32_of(&[0x80, 0x7F]), Ok(-128));
        assert_eq!(
            i32_of(&[0xFF, 0xFF, 0xFF, 0xFF, 0x07]),
            Ok(i32::MAX)
        );
        assert_eq!(
            i32_of(&[0x80, 0x80, 0x80, 0x80, 0x78]),
            Ok(i32::MIN)
        );
    }

    #[test]
    fn signed_rejects_bad_sign_extension() {
        // 32-bit signed: final byte spare bits must all match the sign.
        assert_eq!(
            i32_of(&[0xFF, 0xFF, 0xFF, 0xFF, 0x0F]),
            Err(Leb128Error::Overflow)
        );
    }
}
