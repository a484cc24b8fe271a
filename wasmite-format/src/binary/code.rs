//! Code section: local declarations and instruction sequences.
//!
//! Instructions decode into the runtime's flat [Instr] form, keeping the
//! structured-control markers as ordinary instructions. Gating for opcodes
//! that do not exist in 1.0 happens here, so a disabled feature fails with
//! the gate message rather than an unknown-opcode error.

use {
    super::{
        error::{BinaryErrorKind, Result},
        BinaryParser,
    },
    std::io::Read,
    wasmite_runtime::{
        features,
        module::{
            instr::{misc, opcodes, MemArg},
            types::ValueType,
            FuncBody, Instr, Opcode, Operands,
        },
    },
};

/// An engineering bound on declared locals, far above anything real modules
/// use, protecting the decoder from absurd allocation requests.
const MAX_LOCALS: u64 = 1 << 27;

impl<R: Read> BinaryParser<R> {
    pub(crate) fn read_code_section(&mut self) -> Result<Vec<FuncBody>> {
        self.read_vec(|s| s.read_func_body())
    }

    fn read_func_body(&mut self) -> Result<FuncBody> {
        let declared = self.read_u32()?;
        let start = self.position();
        let locals = self.read_locals()?;
        let body = self.read_expr()?;
        let consumed = self.position() - start;
        if consumed != declared as u64 {
            return Err(self.err(BinaryErrorKind::BodySizeMismatch { declared, consumed }));
        }
        Ok(FuncBody { locals, body })
    }

    /// Local declarations: runs of (count, type).
    fn read_locals(&mut self) -> Result<Vec<ValueType>> {
        let runs = self.read_vec(|s| {
            let count = s.read_u32()?;
            let ty = s.read_value_type()?;
            Ok((count, ty))
        })?;
        let total: u64 = runs.iter().map(|(count, _)| *count as u64).sum();
        if total > MAX_LOCALS {
            return Err(self.err(BinaryErrorKind::TooManyLocals));
        }
        let mut locals = Vec::with_capacity(total as usize);
        for (count, ty) in runs {
            locals.extend(std::iter::repeat(ty).take(count as usize));
        }
        Ok(locals)
    }

    /// An instruction sequence through its terminating `end`, which is kept
    /// in the output.
    fn read_expr(&mut self) -> Result<Vec<Instr>> {
        let mut instrs = Vec::new();
        let mut depth = 0usize;
        loop {
            let instr = self.read_instr()?;
            let terminal = match instr.opcode {
                Opcode::Normal(opcodes::BLOCK | opcodes::LOOP | opcodes::IF) => {
                    depth += 1;
                    false
                }
                Opcode::Normal(opcodes::END) => {
                    if depth == 0 {
                        true
                    } else {
                        depth -= 1;
                        false
                    }
                }
                _ => false,
            };
            instrs.push(instr);
            if terminal {
                return Ok(instrs);
            }
        }
    }

    fn read_instr(&mut self) -> Result<Instr> {
        let op = self.read_byte()?;
        if op == opcodes::MISC_PREFIX {
            let sub = self.read_u32()?;
            return self.read_misc_instr(sub);
        }
        self.gate_normal(op)?;
        let operands = self.read_operands(op)?;
        Ok(Instr {
            opcode: Opcode::Normal(op),
            operands,
        })
    }

    fn gate_normal(&self, op: u8) -> Result<()> {
        let (feature, name) = match op {
            opcodes::SELECT_T => (features::REFERENCE_TYPES, "select"),
            opcodes::TABLE_GET => (features::REFERENCE_TYPES, "table.get"),
            opcodes::TABLE_SET => (features::REFERENCE_TYPES, "table.set"),
            opcodes::REF_NULL => (features::REFERENCE_TYPES, "ref.null"),
            opcodes::REF_IS_NULL => (features::REFERENCE_TYPES, "ref.is_null"),
            opcodes::REF_FUNC => (features::REFERENCE_TYPES, "ref.func"),
            opcodes::I32_EXTEND8_S => (features::SIGN_EXTENSION_OPS, "i32.extend8_s"),
            opcodes::I32_EXTEND16_S => (features::SIGN_EXTENSION_OPS, "i32.extend16_s"),
            opcodes::I64_EXTEND8_S => (features::SIGN_EXTENSION_OPS, "i64.extend8_s"),
            opcodes::I64_EXTEND16_S => (features::SIGN_EXTENSION_OPS, "i64.extend16_s"),
            opcodes::I64_EXTEND32_S => (features::SIGN_EXTENSION_OPS, "i64.extend32_s"),
            _ => return Ok(()),
        };
        self.features()
            .require(feature, name)
            .map_err(|e| self.err(e.into()))
    }

    fn read_operands(&mut self, op: u8) -> Result<Operands> {
        Ok(match op {
            opcodes::UNREACHABLE
            | opcodes::NOP
            | opcodes::ELSE
            | opcodes::END
            | opcodes::RETURN
            | opcodes::DROP
            | opcodes::SELECT
            | opcodes::REF_IS_NULL => Operands::None,

            opcodes::BLOCK | opcodes::LOOP | opcodes::IF => {
                Operands::Block(self.read_block_type()?)
            }
            opcodes::BR | opcodes::BR_IF => Operands::LabelIndex(self.read_u32()?),
            opcodes::BR_TABLE => {
                let targets = self.read_vec(|s| s.read_u32())?;
                let default = self.read_u32()?;
                Operands::BrTable { targets, default }
            }
            opcodes::CALL | opcodes::REF_FUNC => Operands::FuncIndex(self.read_u32()?),
            opcodes::CALL_INDIRECT => {
                let type_index = self.read_u32()?;
                // One reserved zero byte in 1.0; a table index with
                // reference types.
                let table_index = self.read_u32()?;
                if table_index != 0 {
                    self.features()
                        .require(features::REFERENCE_TYPES, "call_indirect table index")
                        .map_err(|e| self.err(e.into()))?;
                }
                Operands::CallIndirect {
                    type_index,
                    table_index,
                }
            }

            opcodes::SELECT_T => {
                Operands::SelectTypes(self.read_vec(|s| s.read_value_type())?)
            }

            opcodes::LOCAL_GET | opcodes::LOCAL_SET | opcodes::LOCAL_TEE => {
                Operands::LocalIndex(self.read_u32()?)
            }
            opcodes::GLOBAL_GET | opcodes::GLOBAL_SET => {
                Operands::GlobalIndex(self.read_u32()?)
            }
            opcodes::TABLE_GET | opcodes::TABLE_SET => Operands::TableIndex(self.read_u32()?),

            opcodes::I32_LOAD..=opcodes::I64_STORE32 => {
                let align = self.read_u32()?;
                let offset = self.read_u32()?;
                Operands::Memargs(MemArg { align, offset })
            }
            opcodes::MEMORY_SIZE | opcodes::MEMORY_GROW => {
                self.read_reserved_zero()?;
                Operands::None
            }

            opcodes::I32_CONST => Operands::I32(self.read_i32()? as u32),
            opcodes::I64_CONST => Operands::I64(self.read_i64()? as u64),
            opcodes::F32_CONST => Operands::F32(self.read_f32_bits()?),
            opcodes::F64_CONST => Operands::F64(self.read_f64_bits()?),

            opcodes::I32_EQZ..=opcodes::I64_EXTEND32_S => Operands::None,

            opcodes::REF_NULL => Operands::HeapType(self.read_ref_type()?),

            other => return Err(self.err(BinaryErrorKind::InvalidOpcode(other))),
        })
    }

    fn read_misc_instr(&mut self, sub: u32) -> Result<Instr> {
        let (feature, name) = match sub {
            misc::I32_TRUNC_SAT_F32_S => (features::NON_TRAPPING_FLOAT_TO_INT, "i32.trunc_sat_f32_s"),
            misc::I32_TRUNC_SAT_F32_U => (features::NON_TRAPPING_FLOAT_TO_INT, "i32.trunc_sat_f32_u"),
            misc::I32_TRUNC_SAT_F64_S => (features::NON_TRAPPING_FLOAT_TO_INT, "i32.trunc_sat_f64_s"),
            misc::I32_TRUNC_SAT_F64_U => (features::NON_TRAPPING_FLOAT_TO_INT, "i32.trunc_sat_f64_u"),
            misc::I64_TRUNC_SAT_F32_S => (features::NON_TRAPPING_FLOAT_TO_INT, "i64.trunc_sat_f32_s"),
            misc::I64_TRUNC_SAT_F32_U => (features::NON_TRAPPING_FLOAT_TO_INT, "i64.trunc_sat_f32_u"),
            misc::I64_TRUNC_SAT_F64_S => (features::NON_TRAPPING_FLOAT_TO_INT, "i64.trunc_sat_f64_s"),
            misc::I64_TRUNC_SAT_F64_U => (features::NON_TRAPPING_FLOAT_TO_INT, "i64.trunc_sat_f64_u"),
            misc::MEMORY_INIT => (features::BULK_MEMORY_OPERATIONS, "memory.init"),
            misc::DATA_DROP => (features::BULK_MEMORY_OPERATIONS, "data.drop"),
            misc::MEMORY_COPY => (features::BULK_MEMORY_OPERATIONS, "memory.copy"),
            misc::MEMORY_FILL => (features::BULK_MEMORY_OPERATIONS, "memory.fill"),
            misc::TABLE_INIT => (features::BULK_MEMORY_OPERATIONS, "table.init"),
            misc::ELEM_DROP => (features::BULK_MEMORY_OPERATIONS, "elem.drop"),
            misc::TABLE_COPY => (features::BULK_MEMORY_OPERATIONS, "table.copy"),
            misc::TABLE_GROW => (features::REFERENCE_TYPES, "table.grow"),
            misc::TABLE_SIZE => (features::REFERENCE_TYPES, "table.size"),
            misc::TABLE_FILL => (features::REFERENCE_TYPES, "table.fill"),
            other => return Err(self.err(BinaryErrorKind::InvalidMiscOpcode(other))),
        };
        self.features()
            .require(feature, name)
            .map_err(|e| self.err(e.into()))?;

        let operands = match sub {
            misc::I32_TRUNC_SAT_F32_S..=misc::I64_TRUNC_SAT_F64_U => Operands::None,
            misc::MEMORY_INIT => {
                let data_index = self.read_u32()?;
                self.read_reserved_zero()?;
                Operands::DataIndex(data_index)
            }
            misc::DATA_DROP => Operands::DataIndex(self.read_u32()?),
            misc::MEMORY_COPY => {
                self.read_reserved_zero()?;
                self.read_reserved_zero()?;
                Operands::None
            }
            misc::MEMORY_FILL => {
                self.read_reserved_zero()?;
                Operands::None
            }
            misc::TABLE_INIT => {
                let elem_index = self.read_u32()?;
                let table_index = self.read_u32()?;
                Operands::TableInit {
                    elem_index,
                    table_index,
                }
            }
            misc::ELEM_DROP => Operands::ElemIndex(self.read_u32()?),
            misc::TABLE_COPY => {
                let dst_index = self.read_u32()?;
                let src_index = self.read_u32()?;
                Operands::TableCopy {
                    dst_index,
                    src_index,
                }
            }
            misc::TABLE_GROW | misc::TABLE_SIZE | misc::TABLE_FILL => {
                Operands::TableIndex(self.read_u32()?)
            }
            _ => Operands::None,
        };
        Ok(Instr {
            opcode: Opcode::Misc(sub),
            operands,
        })
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        wasmite_runtime::features::{FEATURES_CORE_1, FEATURES_CORE_2},
    };

    fn body(bytes: &[u8]) -> Result<FuncBody> {
        let mut framed = vec![bytes.len() as u8];
        framed.extend_from_slice(bytes);
        BinaryParser::new(framed.as_slice(), FEATURES_CORE_2).read_func_body()
    }

    #[test]
    fn decodes_locals_and_instructions() {
        // 1 run of 2 i32 locals; local.get 0; i32.const 1; i32.add; end
        let b = body(&[0x01, 0x02, 0x7F, 0x20, 0x00, 0x41, 0x01, 0x6A, 0x0B]).unwrap();
        assert_eq!(b.locals.len(), 2);
        assert_eq!(b.body.len(), 4);
        assert_eq!(b.body[0].opcode, Opcode::Normal(opcodes::LOCAL_GET));
        assert_eq!(b.body[3].opcode, Opcode::Normal(opcodes::END));
    }

    #[test]
    fn nested_blocks_keep_their_ends() {
        // no locals; block(empty) end; end
        let b = body(&[0x00, 0x02, 0x40, 0x0B, 0x0B]).unwrap();
        assert_eq!(b.body.len(), 3);
    }

    #[test]
    fn body_size_mismatch_is_a_hard_error() {
        // Declared size 3 but the body consumes 2 bytes.
        let bytes = [0x03, 0x00, 0x0B];
        let err = BinaryParser::new(&bytes[..], FEATURES_CORE_2)
            .read_func_body()
            .unwrap_err();
        assert!(matches!(
            err.kind,
            BinaryErrorKind::BodySizeMismatch { .. } | BinaryErrorKind::InvalidOpcode(_)
        ));
    }

    #[test]
    fn sign_extension_gates_at_decode() {
        let err = {
            let bytes = [0x03, 0x00, 0xC0, 0x0B];
            BinaryParser::new(&bytes[..], FEATURES_CORE_1)
                .read_func_body()
                .unwrap_err()
        };
        assert_eq!(
            err.kind.to_string(),
            "i32.extend8_s is not supported as feature sign-extension-ops is disabled"
        );
    }

    #[test]
    fn bulk_opcodes_gate_at_decode() {
        // memory.fill under core 1.
        let bytes = [0x04, 0x00, 0xFC, 0x0B, 0x00];
        let err = BinaryParser::new(&bytes[..], FEATURES_CORE_1)
            .read_func_body()
            .unwrap_err();
        assert_eq!(
            err.kind.to_string(),
            "memory.fill is not supported as feature bulk-memory-operations is disabled"
        );
    }
}
