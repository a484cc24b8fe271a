//! Type section and type-shaped immediates: function types, limits, table,
//! memory, and global types, and block types.

use {
    super::{
        error::{BinaryErrorKind, Result},
        leb128::ReadLeb128,
        BinaryParser,
    },
    std::io::Read,
    wasmite_runtime::{
        features,
        module::{
            instr::BlockType,
            types::{FunctionType, GlobalType, Limits, MemoryType, TableType},
        },
    },
};

const FUNC_TYPE_PREFIX: u8 = 0x60;

impl<R: Read> BinaryParser<R> {
    pub(crate) fn read_types_section(&mut self) -> Result<Vec<FunctionType>> {
        self.read_vec(|s| {
            let prefix = s.read_byte()?;
            if prefix != FUNC_TYPE_PREFIX {
                return Err(s.err(BinaryErrorKind::InvalidFuncTypePrefix(prefix)));
            }
            let params = s.read_vec(|s| s.read_value_type())?;
            let results = s.read_vec(|s| s.read_value_type())?;
            Ok(FunctionType::new(params, results))
        })
    }

    pub(crate) fn read_limits(&mut self) -> Result<Limits> {
        let flag = self.read_byte()?;
        Ok(match flag {
            0x00 => Limits {
                min: self.read_u32()?,
                max: None,
            },
            0x01 => Limits {
                min: self.read_u32()?,
                max: Some(self.read_u32()?),
            },
            other => return Err(self.err(BinaryErrorKind::InvalidLimitsFlag(other))),
        })
    }

    pub(crate) fn read_table_type(&mut self) -> Result<TableType> {
        Ok(TableType {
            ref_type: self.read_ref_type()?,
            limits:   self.read_limits()?,
        })
    }

    pub(crate) fn read_memory_type(&mut self) -> Result<MemoryType> {
        Ok(MemoryType {
            limits: self.read_limits()?,
        })
    }

    pub(crate) fn read_global_type(&mut self) -> Result<GlobalType> {
        let value_type = self.read_value_type()?;
        let mutable = match self.read_byte()? {
            0x00 => false,
            0x01 => true,
            other => return Err(self.err(BinaryErrorKind::InvalidMutabilityFlag(other))),
        };
        Ok(GlobalType {
            value_type,
            mutable,
        })
    }

    /// Block types are encoded as a 33-bit signed value so that the one-byte
    /// negative encodings of `empty` and the value types share space with
    /// non-negative type-section indices, which are multi-value only.
    pub(crate) fn read_block_type(&mut self) -> Result<BlockType> {
        let v = self.read_i33_leb128().map_err(|e| self.leb_err(e))?;
        Ok(match v {
            -0x40 => BlockType::Empty,
            v if v < 0 => {
                // The byte that encoded this value is its low 7 bits.
                let byte = (v & 0x7F) as u8;
                match super::values::interpret_value_type(byte) {
                    Some(vt) => BlockType::Value(vt),
                    None => return Err(self.err(BinaryErrorKind::InvalidBlockType(v))),
                }
            }
            v if v <= u32::MAX as i64 => {
                self.features()
                    .require(features::MULTI_VALUE, "multi-value block type")
                    .map_err(|e| self.err(e.into()))?;
                BlockType::FuncType(v as u32)
            }
            v => return Err(self.err(BinaryErrorKind::InvalidBlockType(v))),
        })
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        wasmite_runtime::{
            features::{FEATURES_CORE_1, FEATURES_CORE_2},
            module::types::{I32, I64},
        },
    };

    fn parser(bytes: &[u8]) -> BinaryParser<&[u8]> {
        BinaryParser::new(bytes, FEATURES_CORE_1)
    }

    #[test]
    fn function_type() {
        // One entry: (i32, i64) -> (i32).
        let mut p = parser(&[0x01, 0x60, 0x02, 0x7F, 0x7E, 0x01, 0x7F]);
        let types = p.read_types_section().unwrap();
        assert_eq!(types, vec![FunctionType::new(vec![I32, I64], vec![I32])]);
    }

    #[test]
    fn limits_flags() {
        let mut p = parser(&[0x00, 0x01]);
        assert_eq!(p.read_limits().unwrap(), Limits { min: 1, max: None });
        let mut p = parser(&[0x01, 0x01, 0x02]);
        assert_eq!(
            p.read_limits().unwrap(),
            Limits {
                min: 1,
                max: Some(2)
            }
        );
        let mut p = parser(&[0x02, 0x01]);
        assert!(p.read_limits().is_err());
    }

    #[test]
    fn block_types() {
        let mut p = parser(&[0x40]);
        assert_eq!(p.read_block_type().unwrap(), BlockType::Empty);
        let mut p = parser(&[0x7F]);
        assert_eq!(p.read_block_type().unwrap(), BlockType::Value(I32));

        // A type index requires multi-value.
        let mut p = parser(&[0x01]);
        let err = p.read_block_type().unwrap_err();
        assert!(err.to_string().contains("multi-value"));
        let mut p = BinaryParser::new(&[0x01u8][..], FEATURES_CORE_2);
        assert_eq!(p.read_block_type().unwrap(), BlockType::FuncType(1));
    }
}
