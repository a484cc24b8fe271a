//! Function-body validation: abstract interpretation of a body as a
//! type-indexed stack machine with a control-frame stack.
//!
//! [Spec]: https://webassembly.github.io/spec/core/appendix/algorithm.html

use {
    super::{
        stacks::{FrameKind, Stacks},
        Result, ValidationError, ValidationType,
    },
    crate::module::{
        instr::{misc, opcodes, BlockType, MemArg},
        types::{RefType, ValueType, F32, F64, FUNCREF, I32, I64},
        FuncBody, Instr, Module, Opcode, Operands,
    },
    std::collections::HashSet,
};

pub struct FuncValidator<'m> {
    module:   &'m Module,
    locals:   Vec<ValueType>,
    stacks:   Stacks,
    declared: &'m HashSet<u32>,
    body:     &'m [Instr],
}

impl<'m> FuncValidator<'m> {
    pub fn new(
        module: &'m Module,
        func_index: u32,
        body: &'m FuncBody,
        declared: &'m HashSet<u32>,
    ) -> Result<FuncValidator<'m>> {
        let ty = module
            .function_type(func_index)
            .ok_or(ValidationError::UnknownFunc(func_index))?;
        let mut locals = ty.params.to_vec();
        locals.extend_from_slice(&body.locals);

        let mut stacks = Stacks::new();
        stacks.push_ctrl(FrameKind::Function, Vec::new(), ty.results.to_vec());
        Ok(FuncValidator {
            module,
            locals,
            stacks,
            declared,
            body: &body.body,
        })
    }

    pub fn validate(mut self) -> Result<()> {
        for instr in self.body {
            if self.stacks.ctrl_depth() == 0 {
                return Err(ValidationError::TrailingInstructions);
            }
            self.instr(instr)?;
        }
        if self.stacks.ctrl_depth() != 0 {
            return Err(ValidationError::UnterminatedBody);
        }
        Ok(())
    }

    fn instr(&mut self, instr: &Instr) -> Result<()> {
        match instr.opcode {
            Opcode::Normal(op) => self.normal_instr(op, instr),
            Opcode::Misc(op) => self.misc_instr(op, instr),
        }
    }

    // Conveniences shared by the opcode arms below.

    fn local_type(&self, idx: u32) -> Result<ValueType> {
        self.locals
            .get(idx as usize)
            .copied()
            .ok_or(ValidationError::UnknownLocal(idx))
    }

    fn global_type(&self, idx: u32) -> Result<&crate::module::types::GlobalType> {
        self.module
            .global_type(idx)
            .ok_or(ValidationError::UnknownGlobal(idx))
    }

    fn table_type(&self, idx: u32) -> Result<&crate::module::types::TableType> {
        self.module
            .table_type(idx)
            .ok_or(ValidationError::UnknownTable(idx))
    }

    fn require_memory(&self) -> Result<()> {
        self.module
            .memory_type()
            .map(|_| ())
            .ok_or(ValidationError::UnknownMemory)
    }

    fn require_data_segment(&self, idx: u32) -> Result<()> {
        let count = self
            .module
            .data_count
            .ok_or(ValidationError::DataCountRequired)?;
        if idx >= count {
            return Err(ValidationError::UnknownDataSegment(idx));
        }
        Ok(())
    }

    fn require_elem_segment(&self, idx: u32) -> Result<RefType> {
        self.module
            .elements
            .get(idx as usize)
            .map(|e| e.ref_type)
            .ok_or(ValidationError::UnknownElemSegment(idx))
    }

    fn block_types(&self, bt: BlockType) -> Result<(Vec<ValueType>, Vec<ValueType>)> {
        Ok(match bt {
            BlockType::Empty => (Vec::new(), Vec::new()),
            BlockType::Value(v) => (Vec::new(), vec![v]),
            BlockType::FuncType(idx) => {
                let ty = self
                    .module
                    .types
                    .get(idx as usize)
                    .ok_or(ValidationError::UnknownType(idx))?;
                (ty.params.to_vec(), ty.results.to_vec())
            }
        })
    }

    fn unop(&mut self, t: ValueType) -> Result<()> {
        self.stacks.pop_val(t)?;
        self.stacks.push_val(t);
        Ok(())
    }

    fn binop(&mut self, t: ValueType) -> Result<()> {
        self.stacks.pop_val(t)?;
        self.stacks.pop_val(t)?;
        self.stacks.push_val(t);
        Ok(())
    }

    fn testop(&mut self, t: ValueType) -> Result<()> {
        self.stacks.pop_val(t)?;
        self.stacks.push_val(I32);
        Ok(())
    }

    fn relop(&mut self, t: ValueType) -> Result<()> {
        self.stacks.pop_val(t)?;
        self.stacks.pop_val(t)?;
        self.stacks.push_val(I32);
        Ok(())
    }

    fn cvtop(&mut self, from: ValueType, to: ValueType) -> Result<()> {
        self.stacks.pop_val(from)?;
        self.stacks.push_val(to);
        Ok(())
    }

    fn loadop(&mut self, instr: &Instr, result: ValueType, natural_align: u32) -> Result<()> {
        let arg = memargs(instr)?;
        self.check_mem_access(arg, natural_align)?;
        self.stacks.pop_val(I32)?;
        self.stacks.push_val(result);
        Ok(())
    }

    fn storeop(&mut self, instr: &Instr, value: ValueType, natural_align: u32) -> Result<()> {
        let arg = memargs(instr)?;
        self.check_mem_access(arg, natural_align)?;
        self.stacks.pop_val(value)?;
        self.stacks.pop_val(I32)?;
        Ok(())
    }

    fn check_mem_access(&self, arg: MemArg, natural_align: u32) -> Result<()> {
        self.require_memory()?;
        if arg.align > natural_align {
            return Err(ValidationError::AlignmentTooLarge(arg.align));
        }
        Ok(())
    }

    fn normal_instr(&mut self, op: u8, instr: &Instr) -> Result<()> {
        match op {
            opcodes::UNREACHABLE => self.stacks.unreachable(),
            opcodes::NOP => Ok(()),

            opcodes::BLOCK | opcodes::LOOP => {
                let (params, results) = self.block_types(block_type(instr)?)?;
                self.stacks.pop_vals(&params)?;
                let kind = if op == opcodes::LOOP {
                    FrameKind::Loop
                } else {
                    FrameKind::Block
                };
                self.stacks.push_ctrl(kind, params, results);
                Ok(())
            }

            opcodes::IF => {
                let (params, results) = self.block_types(block_type(instr)?)?;
                self.stacks.pop_val(I32)?;
                self.stacks.pop_vals(&params)?;
                self.stacks.push_ctrl(FrameKind::If, params, results);
                Ok(())
            }

            opcodes::ELSE => {
                let frame = self.stacks.pop_ctrl()?;
                if frame.kind != FrameKind::If {
                    return Err(ValidationError::UnexpectedElse);
                }
                self.stacks
                    .push_ctrl(FrameKind::Else, frame.start_types, frame.end_types);
                Ok(())
            }

            opcodes::END => {
                let frame = self.stacks.pop_ctrl()?;
                // An if without an else must be able to produce its results
                // from its inputs alone.
                if frame.kind == FrameKind::If && frame.start_types != frame.end_types {
                    return Err(ValidationError::MissingElse);
                }
                self.stacks.push_vals(&frame.end_types);
                Ok(())
            }

            opcodes::BR => {
                let label = label_index(instr)?;
                let types = self.stacks.label_types(label)?;
                self.stacks.pop_vals(&types)?;
                self.stacks.unreachable()
            }

            opcodes::BR_IF => {
                let label = label_index(instr)?;
                self.stacks.pop_val(I32)?;
                let types = self.stacks.label_types(label)?;
                self.stacks.pop_vals(&types)?;
                self.stacks.push_vals(&types);
                Ok(())
            }

            opcodes::BR_TABLE => {
                let (targets, default) = match &instr.operands {
                    Operands::BrTable { targets, default } => (targets, *default),
                    _ => return Err(ValidationError::OperandsMismatch),
                };
                self.stacks.pop_val(I32)?;
                let default_types = self.stacks.label_types(default)?;
                for target in targets {
                    let types = self.stacks.label_types(*target)?;
                    if types.len() != default_types.len() {
                        return Err(ValidationError::BreakTypeMismatch);
                    }
                    self.stacks.pop_vals(&types)?;
                    self.stacks.push_vals(&types);
                }
                self.stacks.pop_vals(&default_types)?;
                self.stacks.unreachable()
            }

            opcodes::RETURN => {
                let types = self.stacks.return_types()?;
                self.stacks.pop_vals(&types)?;
                self.stacks.unreachable()
            }

            opcodes::CALL => {
                let idx = func_index(instr)?;
                let ty = self
                    .module
                    .function_type(idx)
                    .ok_or(ValidationError::UnknownFunc(idx))?
                    .clone();
                self.stacks.pop_vals(&ty.params)?;
                self.stacks.push_vals(&ty.results);
                Ok(())
            }

            opcodes::CALL_INDIRECT => {
                let (type_index, table_index) = match instr.operands {
                    Operands::CallIndirect {
                        type_index,
                        table_index,
                    } => (type_index, table_index),
                    _ => return Err(ValidationError::OperandsMismatch),
                };
                let tt = self.table_type(table_index)?;
                if tt.ref_type != RefType::Func {
                    return Err(ValidationError::WrongTableType);
                }
                let ty = self
                    .module
                    .types
                    .get(type_index as usize)
                    .ok_or(ValidationError::UnknownType(type_index))?
                    .clone();
                self.stacks.pop_val(I32)?;
                self.stacks.pop_vals(&ty.params)?;
                self.stacks.push_vals(&ty.results);
                Ok(())
            }

            opcodes::DROP => self.stacks.pop_any().map(|_| ()),

            opcodes::SELECT => {
                self.stacks.pop_val(I32)?;
                let v1 = self.stacks.pop_any()?;
                let v2 = self.stacks.pop_any()?;
                match (v1, v2) {
                    (ValidationType::Unknown, ValidationType::Unknown) => Ok(()),
                    (ValidationType::Value(t), ValidationType::Unknown)
                    | (ValidationType::Unknown, ValidationType::Value(t)) => {
                        self.untyped_selectable(t)?;
                        self.stacks.push_val(t);
                        Ok(())
                    }
                    (ValidationType::Value(a), ValidationType::Value(b)) => {
                        if a != b {
                            return Err(ValidationError::TypeMismatch {
                                actual: ValidationType::Value(a),
                                expect: ValidationType::Value(b),
                            });
                        }
                        self.untyped_selectable(a)?;
                        self.stacks.push_val(a);
                        Ok(())
                    }
                }
            }

            opcodes::SELECT_T => {
                let types = match &instr.operands {
                    Operands::SelectTypes(types) if types.len() == 1 => types.clone(),
                    Operands::SelectTypes(_) => return Err(ValidationError::OperandsMismatch),
                    _ => return Err(ValidationError::OperandsMismatch),
                };
                self.stacks.pop_val(I32)?;
                self.stacks.pop_val(types[0])?;
                self.stacks.pop_val(types[0])?;
                self.stacks.push_val(types[0]);
                Ok(())
            }

            opcodes::LOCAL_GET => {
                let t = self.local_type(local_index(instr)?)?;
                self.stacks.push_val(t);
                Ok(())
            }
            opcodes::LOCAL_SET => {
                let t = self.local_type(local_index(instr)?)?;
                self.stacks.pop_val(t).map(|_| ())
            }
            opcodes::LOCAL_TEE => {
                let t = self.local_type(local_index(instr)?)?;
                self.stacks.pop_val(t)?;
                self.stacks.push_val(t);
                Ok(())
            }

            opcodes::GLOBAL_GET => {
                let t = self.global_type(global_index(instr)?)?.value_type;
                self.stacks.push_val(t);
                Ok(())
            }
            opcodes::GLOBAL_SET => {
                let idx = global_index(instr)?;
                let gt = self.global_type(idx)?;
                if !gt.mutable {
                    return Err(ValidationError::ImmutableGlobal(idx));
                }
                let t = gt.value_type;
                self.stacks.pop_val(t).map(|_| ())
            }

            opcodes::TABLE_GET => {
                let t = self.table_type(table_index(instr)?)?.ref_type;
                self.stacks.pop_val(I32)?;
                self.stacks.push_val(ValueType::Ref(t));
                Ok(())
            }
            opcodes::TABLE_SET => {
                let t = self.table_type(table_index(instr)?)?.ref_type;
                self.stacks.pop_val(ValueType::Ref(t))?;
                self.stacks.pop_val(I32).map(|_| ())
            }

            opcodes::I32_LOAD => self.loadop(instr, I32, 2),
            opcodes::I64_LOAD => self.loadop(instr, I64, 3),
            opcodes::F32_LOAD => self.loadop(instr, F32, 2),
            opcodes::F64_LOAD => self.loadop(instr, F64, 3),
            opcodes::I32_LOAD8_S | opcodes::I32_LOAD8_U => self.loadop(instr, I32, 0),
            opcodes::I32_LOAD16_S | opcodes::I32_LOAD16_U => self.loadop(instr, I32, 1),
            opcodes::I64_LOAD8_S | opcodes::I64_LOAD8_U => self.loadop(instr, I64, 0),
            opcodes::I64_LOAD16_S | opcodes::I64_LOAD16_U => self.loadop(instr, I64, 1),
            opcodes::I64_LOAD32_S | opcodes::I64_LOAD32_U => self.loadop(instr, I64, 2),
            opcodes::I32_STORE => self.storeop(instr, I32, 2),
            opcodes::I64_STORE => self.storeop(instr, I64, 3),
            opcodes::F32_STORE => self.storeop(instr, F32, 2),
            opcodes::F64_STORE => self.storeop(instr, F64, 3),
            opcodes::I32_STORE8 => self.storeop(instr, I32, 0),
            opcodes::I32_STORE16 => self.storeop(instr, I32, 1),
            opcodes::I64_STORE8 => self.storeop(instr, I64, 0),
            opcodes::I64_STORE16 => self.storeop(instr, I64, 1),
            opcodes::I64_STORE32 => self.storeop(instr, I64, 2),

            opcodes::MEMORY_SIZE => {
                self.require_memory()?;
                self.stacks.push_val(I32);
                Ok(())
            }
            opcodes::MEMORY_GROW => {
                self.require_memory()?;
                self.stacks.pop_val(I32)?;
                self.stacks.push_val(I32);
                Ok(())
            }

            opcodes::I32_CONST => {
                self.stacks.push_val(I32);
                Ok(())
            }
            opcodes::I64_CONST => {
                self.stacks.push_val(I64);
                Ok(())
            }
            opcodes::F32_CONST => {
                self.stacks.push_val(F32);
                Ok(())
            }
            opcodes::F64_CONST => {
                self.stacks.push_val(F64);
                Ok(())
            }

            opcodes::I32_EQZ => self.testop(I32),
            opcodes::I32_EQ..=opcodes::I32_GE_U => self.relop(I32),
            opcodes::I64_EQZ => self.testop(I64),
            opcodes::I64_EQ..=opcodes::I64_GE_U => self.relop(I64),
            opcodes::F32_EQ..=opcodes::F32_GE => self.relop(F32),
            opcodes::F64_EQ..=opcodes::F64_GE => self.relop(F64),

            opcodes::I32_CLZ | opcodes::I32_CTZ | opcodes::I32_POPCNT => self.unop(I32),
            opcodes::I32_ADD..=opcodes::I32_ROTR => self.binop(I32),
            opcodes::I64_CLZ | opcodes::I64_CTZ | opcodes::I64_POPCNT => self.unop(I64),
            opcodes::I64_ADD..=opcodes::I64_ROTR => self.binop(I64),

            opcodes::F32_ABS..=opcodes::F32_SQRT => self.unop(F32),
            opcodes::F32_ADD..=opcodes::F32_COPYSIGN => self.binop(F32),
            opcodes::F64_ABS..=opcodes::F64_SQRT => self.unop(F64),
            opcodes::F64_ADD..=opcodes::F64_COPYSIGN => self.binop(F64),

            opcodes::I32_WRAP_I64 => self.cvtop(I64, I32),
            opcodes::I32_TRUNC_F32_S | opcodes::I32_TRUNC_F32_U => self.cvtop(F32, I32),
            opcodes::I32_TRUNC_F64_S | opcodes::I32_TRUNC_F64_U => self.cvtop(F64, I32),
            opcodes::I64_EXTEND_I32_S | opcodes::I64_EXTEND_I32_U => self.cvtop(I32, I64),
            opcodes::I64_TRUNC_F32_S | opcodes::I64_TRUNC_F32_U => self.cvtop(F32, I64),
            opcodes::I64_TRUNC_F64_S | opcodes::I64_TRUNC_F64_U => self.cvtop(F64, I64),
            opcodes::F32_CONVERT_I32_S | opcodes::F32_CONVERT_I32_U => self.cvtop(I32, F32),
            opcodes::F32_CONVERT_I64_S | opcodes::F32_CONVERT_I64_U => self.cvtop(I64, F32),
            opcodes::F32_DEMOTE_F64 => self.cvtop(F64, F32),
            opcodes::F64_CONVERT_I32_S | opcodes::F64_CONVERT_I32_U => self.cvtop(I32, F64),
            opcodes::F64_CONVERT_I64_S | opcodes::F64_CONVERT_I64_U => self.cvtop(I64, F64),
            opcodes::F64_PROMOTE_F32 => self.cvtop(F32, F64),
            opcodes::I32_REINTERPRET_F32 => self.cvtop(F32, I32),
            opcodes::I64_REINTERPRET_F64 => self.cvtop(F64, I64),
            opcodes::F32_REINTERPRET_I32 => self.cvtop(I32, F32),
            opcodes::F64_REINTERPRET_I64 => self.cvtop(I64, F64),

            opcodes::I32_EXTEND8_S | opcodes::I32_EXTEND16_S => self.unop(I32),
            opcodes::I64_EXTEND8_S | opcodes::I64_EXTEND16_S | opcodes::I64_EXTEND32_S => {
                self.unop(I64)
            }

            opcodes::REF_NULL => {
                let ht = match instr.operands {
                    Operands::HeapType(ht) => ht,
                    _ => return Err(ValidationError::OperandsMismatch),
                };
                self.stacks.push_val(ValueType::Ref(ht));
                Ok(())
            }
            opcodes::REF_IS_NULL => {
                self.stacks.pop_ref()?;
                self.stacks.push_val(I32);
                Ok(())
            }
            opcodes::REF_FUNC => {
                let idx = func_index(instr)?;
                if self.module.function_type(idx).is_none() {
                    return Err(ValidationError::UnknownFunc(idx));
                }
                if !self.declared.contains(&idx) {
                    return Err(ValidationError::UndeclaredFunctionRef(idx));
                }
                self.stacks.push_val(FUNCREF);
                Ok(())
            }

            other => Err(ValidationError::UnknownOpcode(other as u32)),
        }
    }

    fn misc_instr(&mut self, op: u32, instr: &Instr) -> Result<()> {
        match op {
            misc::I32_TRUNC_SAT_F32_S | misc::I32_TRUNC_SAT_F32_U => self.cvtop(F32, I32),
            misc::I32_TRUNC_SAT_F64_S | misc::I32_TRUNC_SAT_F64_U => self.cvtop(F64, I32),
            misc::I64_TRUNC_SAT_F32_S | misc::I64_TRUNC_SAT_F32_U => self.cvtop(F32, I64),
            misc::I64_TRUNC_SAT_F64_S | misc::I64_TRUNC_SAT_F64_U => self.cvtop(F64, I64),

            misc::MEMORY_INIT => {
                let idx = data_index(instr)?;
                self.require_memory()?;
                self.require_data_segment(idx)?;
                self.stacks.pop_val(I32)?;
                self.stacks.pop_val(I32)?;
                self.stacks.pop_val(I32).map(|_| ())
            }
            misc::DATA_DROP => {
                self.require_data_segment(data_index(instr)?).map(|_| ())
            }
            misc::MEMORY_COPY | misc::MEMORY_FILL => {
                self.require_memory()?;
                self.stacks.pop_val(I32)?;
                self.stacks.pop_val(I32)?;
                self.stacks.pop_val(I32).map(|_| ())
            }

            misc::TABLE_INIT => {
                let (elem_index, table_index) = match instr.operands {
                    Operands::TableInit {
                        elem_index,
                        table_index,
                    } => (elem_index, table_index),
                    _ => return Err(ValidationError::OperandsMismatch),
                };
                let elem_type = self.require_elem_segment(elem_index)?;
                let tt = self.table_type(table_index)?;
                if tt.ref_type != elem_type {
                    return Err(ValidationError::WrongTableType);
                }
                self.stacks.pop_val(I32)?;
                self.stacks.pop_val(I32)?;
                self.stacks.pop_val(I32).map(|_| ())
            }
            misc::ELEM_DROP => {
                self.require_elem_segment(elem_index(instr)?).map(|_| ())
            }
            misc::TABLE_COPY => {
                let (dst_index, src_index) = match instr.operands {
                    Operands::TableCopy {
                        dst_index,
                        src_index,
                    } => (dst_index, src_index),
                    _ => return Err(ValidationError::OperandsMismatch),
                };
                let dst = self.table_type(dst_index)?.ref_type;
                let src = self.table_type(src_index)?.ref_type;
                if dst != src {
                    return Err(ValidationError::WrongTableType);
                }
                self.stacks.pop_val(I32)?;
                self.stacks.pop_val(I32)?;
                self.stacks.pop_val(I32).map(|_| ())
            }

            misc::TABLE_GROW => {
                let t = self.table_type(table_index(instr)?)?.ref_type;
                self.stacks.pop_val(I32)?;
                self.stacks.pop_val(ValueType::Ref(t))?;
                self.stacks.push_val(I32);
                Ok(())
            }
            misc::TABLE_SIZE => {
                self.table_type(table_index(instr)?)?;
                self.stacks.push_val(I32);
                Ok(())
            }
            misc::TABLE_FILL => {
                let t = self.table_type(table_index(instr)?)?.ref_type;
                self.stacks.pop_val(I32)?;
                self.stacks.pop_val(ValueType::Ref(t))?;
                self.stacks.pop_val(I32).map(|_| ())
            }

            other => Err(ValidationError::UnknownOpcode(other)),
        }
    }

    fn untyped_selectable(&self, t: ValueType) -> Result<()> {
        // Untyped select is restricted to number types; reference values need
        // the typed form.
        if let ValueType::Ref(_) = t {
            return Err(ValidationError::ExpectedRef {
                actual: ValidationType::Value(t),
            });
        }
        Ok(())
    }
}

fn block_type(instr: &Instr) -> Result<BlockType> {
    match instr.operands {
        Operands::Block(bt) => Ok(bt),
        _ => Err(ValidationError::OperandsMismatch),
    }
}

fn label_index(instr: &Instr) -> Result<u32> {
    match instr.operands {
        Operands::LabelIndex(i) => Ok(i),
        _ => Err(ValidationError::OperandsMismatch),
    }
}

fn func_index(instr: &Instr) -> Result<u32> {
    match instr.operands {
        Operands::FuncIndex(i) => Ok(i),
        _ => Err(ValidationError::OperandsMismatch),
    }
}

fn local_index(instr: &Instr) -> Result<u32> {
    match instr.operands {
        Operands::LocalIndex(i) => Ok(i),
        _ => Err(ValidationError::OperandsMismatch),
    }
}

fn global_index(instr: &Instr) -> Result<u32> {
    match instr.operands {
        Operands::GlobalIndex(i) => Ok(i),
        _ => Err(ValidationError::OperandsMismatch),
    }
}

fn table_index(instr: &Instr) -> Result<u32> {
    match instr.operands {
        Operands::TableIndex(i) => Ok(i),
        _ => Err(ValidationError::OperandsMismatch),
    }
}

fn data_index(instr: &Instr) -> Result<u32> {
    match instr.operands {
        Operands::DataIndex(i) => Ok(i),
        _ => Err(ValidationError::OperandsMismatch),
    }
}

fn elem_index(instr: &Instr) -> Result<u32> {
    match instr.operands {
        Operands::ElemIndex(i) => Ok(i),
        _ => Err(ValidationError::OperandsMismatch),
    }
}

fn memargs(instr: &Instr) -> Result<MemArg> {
    match instr.operands {
        Operands::Memargs(arg) => Ok(arg),
        _ => Err(ValidationError::OperandsMismatch),
    }
}
