//! Constant expressions: exactly one producing opcode followed by `end`,
//! used for global, element, and data-segment initializers.

use {
    super::{
        error::{BinaryErrorKind, Result},
        BinaryParser,
    },
    std::io::Read,
    wasmite_runtime::{
        features,
        module::{instr::opcodes, ConstExpr},
    },
};

impl<R: Read> BinaryParser<R> {
    pub(crate) fn read_const_expr(&mut self) -> Result<ConstExpr> {
        let opcode = self.read_byte()?;
        let expr = match opcode {
            opcodes::I32_CONST => ConstExpr::I32(self.read_i32()?),
            opcodes::I64_CONST => ConstExpr::I64(self.read_i64()?),
            opcodes::F32_CONST => ConstExpr::F32(self.read_f32_bits()?),
            opcodes::F64_CONST => ConstExpr::F64(self.read_f64_bits()?),
            opcodes::GLOBAL_GET => ConstExpr::GlobalGet(self.read_u32()?),
            opcodes::REF_NULL => {
                self.features()
                    .require(features::REFERENCE_TYPES, "ref.null")
                    .map_err(|e| self.err(e.into()))?;
                ConstExpr::RefNull(self.read_ref_type()?)
            }
            opcodes::REF_FUNC => {
                self.features()
                    .require(features::REFERENCE_TYPES, "ref.func")
                    .map_err(|e| self.err(e.into()))?;
                ConstExpr::RefFunc(self.read_u32()?)
            }
            other => return Err(self.err(BinaryErrorKind::InvalidConstExprOpcode(other))),
        };
        if self.read_byte()? != opcodes::END {
            return Err(self.err(BinaryErrorKind::UnterminatedConstExpr));
        }
        Ok(expr)
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        wasmite_runtime::features::{FEATURES_CORE_1, FEATURES_CORE_2},
    };

    fn parse(bytes: &[u8]) -> Result<ConstExpr> {
        BinaryParser::new(bytes, FEATURES_CORE_2).read_const_expr()
    }

    #[test]
    fn accepts_one_producing_opcode_then_end() {
        assert_eq!(parse(&[0x41, 0x2A, 0x0B]).unwrap(), ConstExpr::I32(42));
        assert_eq!(parse(&[0x42, 0x7F, 0x0B]).unwrap(), ConstExpr::I64(-1));
        assert_eq!(
            parse(&[0x43, 0x00, 0x00, 0x80, 0x3F, 0x0B]).unwrap(),
            ConstExpr::F32(0x3F80_0000)
        );
        assert_eq!(parse(&[0x23, 0x00, 0x0B]).unwrap(), ConstExpr::GlobalGet(0));
        assert_eq!(
            parse(&[0xD0, 0x70, 0x0B]).unwrap(),
            ConstExpr::RefNull(wasmite_runtime::module::types::RefType::Func)
        );
    }

    #[test]
    fn rejects_missing_end_and_non_constant_opcodes() {
        assert!(matches!(
            parse(&[0x41, 0x2A, 0x41, 0x01, 0x0B]).unwrap_err().kind,
            BinaryErrorKind::UnterminatedConstExpr
        ));
        // i32.add is not a constant opcode.
        assert!(matches!(
            parse(&[0x6A, 0x0B]).unwrap_err().kind,
            BinaryErrorKind::InvalidConstExprOpcode(0x6A)
        ));
    }

    #[test]
    fn ref_constants_gate_on_reference_types() {
        let err = BinaryParser::new(&[0xD2u8, 0x00, 0x0B][..], FEATURES_CORE_1)
            .read_const_expr()
            .unwrap_err();
        assert_eq!(
            err.kind.to_string(),
            "ref.func is not supported as feature reference-types is disabled"
        );
    }
}
