//! Primitive read helpers shared by the section readers: magic and version,
//! bytes, names, vectors, and type bytes.

use {
    super::{
        error::{BinaryErrorKind, Result},
        leb128::ReadLeb128,
        BinaryParser,
    },
    std::io::Read,
    wasmite_runtime::module::types::{NumType, RefType, ValueType},
};

impl<R: Read> BinaryParser<R> {
    pub(crate) fn read_magic(&mut self) -> Result<()> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)
            .map_err(|_| self.err(BinaryErrorKind::UnexpectedEnd))?;
        if buf != [0x00, 0x61, 0x73, 0x6D] {
            return Err(self.err(BinaryErrorKind::BadMagic));
        }
        Ok(())
    }

    pub(crate) fn read_version(&mut self) -> Result<()> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)
            .map_err(|_| self.err(BinaryErrorKind::UnexpectedEnd))?;
        if buf != [0x01, 0x00, 0x00, 0x00] {
            return Err(self.err(BinaryErrorKind::BadVersion));
        }
        Ok(())
    }

    pub(crate) fn read_byte(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)
            .map_err(|_| self.err(BinaryErrorKind::UnexpectedEnd))?;
        Ok(buf[0])
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32> {
        self.read_u32_leb128().map_err(|e| self.leb_err(e))
    }

    pub(crate) fn read_i32(&mut self) -> Result<i32> {
        self.read_i32_leb128().map_err(|e| self.leb_err(e))
    }

    pub(crate) fn read_i64(&mut self) -> Result<i64> {
        self.read_i64_leb128().map_err(|e| self.leb_err(e))
    }

    /// Little-endian IEEE-754 immediates.
    pub(crate) fn read_f32_bits(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)
            .map_err(|_| self.err(BinaryErrorKind::UnexpectedEnd))?;
        Ok(u32::from_le_bytes(buf))
    }

    pub(crate) fn read_f64_bits(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)
            .map_err(|_| self.err(BinaryErrorKind::UnexpectedEnd))?;
        Ok(u64::from_le_bytes(buf))
    }

    /// A length-prefixed byte vector. Read through a limiting adapter so a
    /// corrupt length fails at end of input instead of sizing an allocation.
    pub(crate) fn read_bytes(&mut self) -> Result<Box<[u8]>> {
        let len = self.read_u32()?;
        let mut bytes = Vec::with_capacity(len.min(65536) as usize);
        let read = {
            let mut limited = self.by_ref().take(len as u64);
            limited.read_to_end(&mut bytes)
        };
        match read {
            Ok(n) if n as u64 == len as u64 => Ok(bytes.into_boxed_slice()),
            Ok(_) => Err(self.err(BinaryErrorKind::UnexpectedEnd)),
            Err(e) => Err(self.err(BinaryErrorKind::Io(e))),
        }
    }

    /// A name: a byte vector that must be valid UTF-8.
    pub(crate) fn read_name(&mut self) -> Result<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes.into_vec()).map_err(|_| self.err(BinaryErrorKind::InvalidUtf8))
    }

    /// A count-prefixed vector of items.
    pub(crate) fn read_vec<T>(
        &mut self,
        f: impl Fn(&mut Self) -> Result<T>,
    ) -> Result<Vec<T>> {
        let count = self.read_u32()?;
        (0..count).map(|_| f(self)).collect()
    }

    /// The reserved zero byte that trails `memory.size`, `memory.grow`, and
    /// the bulk memory opcodes.
    pub(crate) fn read_reserved_zero(&mut self) -> Result<()> {
        let b = self.read_byte()?;
        if b != 0 {
            return Err(self.err(BinaryErrorKind::NonZeroReservedByte(b)));
        }
        Ok(())
    }

    pub(crate) fn read_value_type(&mut self) -> Result<ValueType> {
        let b = self.read_byte()?;
        interpret_value_type(b).ok_or_else(|| self.err(BinaryErrorKind::InvalidValueType(b)))
    }

    pub(crate) fn read_ref_type(&mut self) -> Result<RefType> {
        let b = self.read_byte()?;
        interpret_ref_type(b).ok_or_else(|| self.err(BinaryErrorKind::InvalidRefType(b)))
    }
}

pub(crate) fn interpret_value_type(byte: u8) -> Option<ValueType> {
    Some(match byte {
        0x7F => NumType::I32.into(),
        0x7E => NumType::I64.into(),
        0x7D => NumType::F32.into(),
        0x7C => NumType::F64.into(),
        0x70 => RefType::Func.into(),
        0x6F => RefType::Extern.into(),
        _ => return None,
    })
}

pub(crate) fn interpret_ref_type(byte: u8) -> Option<RefType> {
    Some(match byte {
        0x70 => RefType::Func,
        0x6F => RefType::Extern,
        _ => return None,
    })
}
