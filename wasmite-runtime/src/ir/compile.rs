//! Lowering of validated function bodies into the stack IR.
//!
//! The lowerer walks the flat instruction sequence with a shadow value stack
//! (tracking slot counts, with parameters and locals occupying the bottom
//! slots) and a frame stack mirroring the validator's. Branches out of a
//! `loop` target its header; branches out of any other frame target a
//! synthesized continuation label after the frame's `end`. Unreachable tail
//! code after a stack-polymorphic instruction is not emitted.

use {
    super::{
        BranchTarget, Float, InclusiveRange, Label, LabelCallers, LabelKind, Operation, SignedInt,
        SignedType, UnsignedInt, UnsignedType,
    },
    crate::{
        error::Result,
        impl_bug,
        module::{
            instr::{misc, opcodes, BlockType},
            FuncBody, Instr, Module, Opcode, Operands,
        },
    },
    tracing::trace,
};

/// The lowered form of one function body, ready for an engine to resolve and
/// execute.
#[derive(Debug, PartialEq)]
pub struct CompiledFunc {
    pub operations:    Vec<Operation>,
    pub label_callers: LabelCallers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Function,
    Block,
    Loop,
    If,
    Else,
}

#[derive(Debug)]
struct Frame {
    id:           u32,
    kind:         FrameKind,
    params:       usize,
    results:      usize,
    /// Stack height below this frame's parameters at entry.
    height_below: usize,
    /// Whether an `else` has been seen for an `if` frame.
    saw_else:     bool,
}

struct Compiler<'m> {
    module:            &'m Module,
    ops:               Vec<Operation>,
    label_callers:     LabelCallers,
    frames:            Vec<Frame>,
    height:            usize,
    next_frame_id:     u32,
    unreachable:       bool,
    unreachable_depth: usize,
}

/// Lower the validated body of the function at `func_index` into IR.
pub fn compile_function(
    module: &Module,
    func_index: u32,
    body: &FuncBody,
) -> Result<CompiledFunc> {
    let ty = module
        .function_type(func_index)
        .ok_or_else(|| impl_bug!("no type for function {}", func_index))?;
    trace!(
        target: "wasmite::compile",
        func_index,
        ops = body.body.len(),
        "lowering function body"
    );

    let mut compiler = Compiler {
        module,
        ops: Vec::with_capacity(body.body.len() + 8),
        label_callers: LabelCallers::new(),
        frames: Vec::new(),
        height: ty.params.len() + body.locals.len(),
        next_frame_id: 1,
        unreachable: false,
        unreachable_depth: 0,
    };
    compiler.frames.push(Frame {
        id:           1,
        kind:         FrameKind::Function,
        params:       ty.params.len(),
        results:      ty.results.len(),
        height_below: 0,
        saw_else:     false,
    });

    for instr in &body.body {
        compiler.instr(instr)?;
    }
    if !compiler.frames.is_empty() {
        return Err(impl_bug!("unbalanced frames after lowering"));
    }
    Ok(CompiledFunc {
        operations:    compiler.ops,
        label_callers: compiler.label_callers,
    })
}

impl<'m> Compiler<'m> {
    fn emit(&mut self, op: Operation) {
        self.ops.push(op);
    }

    fn label(&mut self, label: Label) {
        self.emit(Operation::Label(label));
    }

    /// Record a branch reference so the engine knows the label is live.
    fn target(&mut self, label: Option<Label>, drop: Option<InclusiveRange>) -> BranchTarget {
        if let Some(label) = label {
            *self.label_callers.entry(label).or_insert(0) += 1;
        }
        BranchTarget { label, drop }
    }

    fn block_types(&self, bt: BlockType) -> Result<(usize, usize)> {
        Ok(match bt {
            BlockType::Empty => (0, 0),
            BlockType::Value(_) => (0, 1),
            BlockType::FuncType(idx) => {
                let ty = self
                    .module
                    .types
                    .get(idx as usize)
                    .ok_or_else(|| impl_bug!("no block type {}", idx))?;
                (ty.params.len(), ty.results.len())
            }
        })
    }

    /// The slots to shed so that only `arity` values remain above
    /// `height_below`, or None when the stack is already in shape.
    fn drop_range(&self, arity: usize, height_below: usize) -> Option<InclusiveRange> {
        let live = self.height - height_below;
        if live > arity {
            Some(InclusiveRange {
                start: arity as u32,
                end:   (live - 1) as u32,
            })
        } else {
            None
        }
    }

    /// The target of a branch with relative depth `depth`: the loop header
    /// for loops, the function return for the outermost frame, and the
    /// continuation label otherwise.
    fn branch_target(&mut self, depth: u32) -> Result<BranchTarget> {
        let idx = self
            .frames
            .len()
            .checked_sub(1 + depth as usize)
            .ok_or_else(|| impl_bug!("branch depth {} out of range", depth))?;
        let frame = &self.frames[idx];
        let (label, arity) = match frame.kind {
            FrameKind::Function => (None, frame.results),
            FrameKind::Loop => (
                Some(Label {
                    frame_id: frame.id,
                    kind:     LabelKind::Header,
                }),
                frame.params,
            ),
            _ => (
                Some(Label {
                    frame_id: frame.id,
                    kind:     LabelKind::Continuation,
                }),
                frame.results,
            ),
        };
        let drop = self.drop_range(arity, frame.height_below);
        Ok(self.target(label, drop))
    }

    fn push_frame(&mut self, kind: FrameKind, params: usize, results: usize) -> u32 {
        self.next_frame_id += 1;
        let id = self.next_frame_id;
        self.frames.push(Frame {
            id,
            kind,
            params,
            results,
            height_below: self.height - params,
            saw_else: false,
        });
        id
    }

    fn instr(&mut self, instr: &Instr) -> Result<()> {
        if self.unreachable {
            return self.unreachable_instr(instr);
        }
        match instr.opcode {
            Opcode::Normal(op) => self.normal_instr(op, instr),
            Opcode::Misc(op) => self.misc_instr(op, instr),
        }
    }

    /// Inside unreachable code only the frame structure is tracked; nothing
    /// is emitted.
    fn unreachable_instr(&mut self, instr: &Instr) -> Result<()> {
        match instr.opcode {
            Opcode::Normal(opcodes::BLOCK | opcodes::LOOP | opcodes::IF) => {
                self.unreachable_depth += 1;
                Ok(())
            }
            Opcode::Normal(opcodes::ELSE) if self.unreachable_depth == 0 => {
                self.unreachable = false;
                self.else_instr(false)
            }
            Opcode::Normal(opcodes::END) => {
                if self.unreachable_depth > 0 {
                    self.unreachable_depth -= 1;
                    Ok(())
                } else {
                    self.unreachable = false;
                    self.end_instr(false)
                }
            }
            _ => Ok(()),
        }
    }

    fn mark_unreachable(&mut self) {
        self.unreachable = true;
        self.unreachable_depth = 0;
    }

    fn else_instr(&mut self, reachable: bool) -> Result<()> {
        let frame = self
            .frames
            .last_mut()
            .ok_or_else(|| impl_bug!("else outside a frame"))?;
        frame.saw_else = true;
        let id = frame.id;
        let params = frame.params;
        let height_below = frame.height_below;

        // Close the then-branch with a jump over the else code, then resume
        // lowering from the frame's entry state. A then-branch that already
        // branched away needs no closing jump.
        if reachable {
            let cont = self.target(
                Some(Label {
                    frame_id: id,
                    kind:     LabelKind::Continuation,
                }),
                None,
            );
            self.emit(Operation::Br(cont));
        }
        self.label(Label {
            frame_id: id,
            kind:     LabelKind::Else,
        });
        self.height = height_below + params;
        Ok(())
    }

    fn end_instr(&mut self, reachable: bool) -> Result<()> {
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| impl_bug!("end outside a frame"))?;
        match frame.kind {
            FrameKind::Function => {
                if reachable {
                    let drop = self.drop_range(frame.results, 0);
                    let target = self.target(None, drop);
                    self.emit(Operation::Br(target));
                }
            }
            FrameKind::If if !frame.saw_else => {
                // No else branch: the synthesized else label falls straight
                // through to the continuation. Validation guarantees the
                // frame's parameter and result types agree.
                self.label(Label {
                    frame_id: frame.id,
                    kind:     LabelKind::Else,
                });
                self.label(Label {
                    frame_id: frame.id,
                    kind:     LabelKind::Continuation,
                });
                self.height = frame.height_below + frame.results;
            }
            _ => {
                self.label(Label {
                    frame_id: frame.id,
                    kind:     LabelKind::Continuation,
                });
                self.height = frame.height_below + frame.results;
            }
        }
        Ok(())
    }

    fn normal_instr(&mut self, op: u8, instr: &Instr) -> Result<()> {
        match op {
            opcodes::UNREACHABLE => {
                self.emit(Operation::Unreachable);
                self.mark_unreachable();
            }
            opcodes::NOP => {}

            opcodes::BLOCK => {
                let (params, results) = self.block_types(block_type(instr)?)?;
                self.push_frame(FrameKind::Block, params, results);
            }
            opcodes::LOOP => {
                let (params, results) = self.block_types(block_type(instr)?)?;
                let id = self.push_frame(FrameKind::Loop, params, results);
                self.label(Label {
                    frame_id: id,
                    kind:     LabelKind::Header,
                });
            }
            opcodes::IF => {
                let (params, results) = self.block_types(block_type(instr)?)?;
                self.height -= 1; // condition
                let id = self.push_frame(FrameKind::If, params, results);
                let then = self.target(
                    Some(Label {
                        frame_id: id,
                        kind:     LabelKind::Header,
                    }),
                    None,
                );
                let els = self.target(
                    Some(Label {
                        frame_id: id,
                        kind:     LabelKind::Else,
                    }),
                    None,
                );
                self.emit(Operation::BrIf {
                    then,
                    els: Some(els),
                });
                self.label(Label {
                    frame_id: id,
                    kind:     LabelKind::Header,
                });
            }
            opcodes::ELSE => self.else_instr(true)?,
            opcodes::END => self.end_instr(true)?,

            opcodes::BR => {
                let target = self.branch_target(label_index(instr)?)?;
                self.emit(Operation::Br(target));
                self.mark_unreachable();
            }
            opcodes::BR_IF => {
                self.height -= 1; // condition
                let then = self.branch_target(label_index(instr)?)?;
                self.emit(Operation::BrIf { then, els: None });
            }
            opcodes::BR_TABLE => {
                let (indices, default) = match &instr.operands {
                    Operands::BrTable { targets, default } => (targets.clone(), *default),
                    _ => return Err(impl_bug!("br_table operands")),
                };
                self.height -= 1; // selector
                let targets = indices
                    .iter()
                    .map(|i| self.branch_target(*i))
                    .collect::<Result<Vec<_>>>()?;
                let default = self.branch_target(default)?;
                self.emit(Operation::BrTable { targets, default });
                self.mark_unreachable();
            }
            opcodes::RETURN => {
                let results = self.frames[0].results;
                let drop = self.drop_range(results, 0);
                let target = self.target(None, drop);
                self.emit(Operation::Br(target));
                self.mark_unreachable();
            }

            opcodes::CALL => {
                let idx = func_index(instr)?;
                let ty = self
                    .module
                    .function_type(idx)
                    .ok_or_else(|| impl_bug!("no type for function {}", idx))?;
                self.height -= ty.params.len();
                self.height += ty.results.len();
                self.emit(Operation::Call { func_index: idx });
            }
            opcodes::CALL_INDIRECT => {
                let (type_index, table_index) = match instr.operands {
                    Operands::CallIndirect {
                        type_index,
                        table_index,
                    } => (type_index, table_index),
                    _ => return Err(impl_bug!("call_indirect operands")),
                };
                let ty = self
                    .module
                    .types
                    .get(type_index as usize)
                    .ok_or_else(|| impl_bug!("no type {}", type_index))?;
                self.height -= 1 + ty.params.len();
                self.height += ty.results.len();
                self.emit(Operation::CallIndirect {
                    type_index,
                    table_index,
                });
            }

            opcodes::DROP => {
                self.height -= 1;
                self.emit(Operation::Drop(InclusiveRange { start: 0, end: 0 }));
            }
            opcodes::SELECT | opcodes::SELECT_T => {
                self.height -= 2;
                self.emit(Operation::Select);
            }

            opcodes::LOCAL_GET => {
                let depth = (self.height - 1 - local_index(instr)? as usize) as u32;
                self.height += 1;
                self.emit(Operation::Pick { depth });
            }
            opcodes::LOCAL_SET => {
                let depth = (self.height - 1 - local_index(instr)? as usize) as u32;
                self.emit(Operation::Swap { depth });
                self.emit(Operation::Drop(InclusiveRange { start: 0, end: 0 }));
                self.height -= 1;
            }
            opcodes::LOCAL_TEE => {
                self.emit(Operation::Pick { depth: 0 });
                self.height += 1;
                let depth = (self.height - 1 - local_index(instr)? as usize) as u32;
                self.emit(Operation::Swap { depth });
                self.emit(Operation::Drop(InclusiveRange { start: 0, end: 0 }));
                self.height -= 1;
            }

            opcodes::GLOBAL_GET => {
                self.height += 1;
                self.emit(Operation::GlobalGet {
                    index: global_index(instr)?,
                });
            }
            opcodes::GLOBAL_SET => {
                self.height -= 1;
                self.emit(Operation::GlobalSet {
                    index: global_index(instr)?,
                });
            }

            opcodes::TABLE_GET => {
                self.emit(Operation::TableGet {
                    table_index: table_index(instr)?,
                });
            }
            opcodes::TABLE_SET => {
                self.height -= 2;
                self.emit(Operation::TableSet {
                    table_index: table_index(instr)?,
                });
            }

            opcodes::I32_CONST => {
                self.height += 1;
                let v = match instr.operands {
                    Operands::I32(v) => v,
                    _ => return Err(impl_bug!("i32.const operands")),
                };
                self.emit(Operation::ConstI32(v));
            }
            opcodes::I64_CONST => {
                self.height += 1;
                let v = match instr.operands {
                    Operands::I64(v) => v,
                    _ => return Err(impl_bug!("i64.const operands")),
                };
                self.emit(Operation::ConstI64(v));
            }
            opcodes::F32_CONST => {
                self.height += 1;
                let v = match instr.operands {
                    Operands::F32(v) => v,
                    _ => return Err(impl_bug!("f32.const operands")),
                };
                self.emit(Operation::ConstF32(v));
            }
            opcodes::F64_CONST => {
                self.height += 1;
                let v = match instr.operands {
                    Operands::F64(v) => v,
                    _ => return Err(impl_bug!("f64.const operands")),
                };
                self.emit(Operation::ConstF64(v));
            }

            opcodes::REF_NULL => {
                let ty = match instr.operands {
                    Operands::HeapType(ht) => ht,
                    _ => return Err(impl_bug!("ref.null operands")),
                };
                self.height += 1;
                self.emit(Operation::RefNull { ty });
            }
            opcodes::REF_IS_NULL => {
                self.emit(Operation::RefIsNull);
            }
            opcodes::REF_FUNC => {
                self.height += 1;
                self.emit(Operation::RefFunc {
                    func_index: func_index(instr)?,
                });
            }

            opcodes::MEMORY_SIZE => {
                self.height += 1;
                self.emit(Operation::MemorySize);
            }
            opcodes::MEMORY_GROW => {
                self.emit(Operation::MemoryGrow);
            }

            _ => {
                let (operation, pops, pushes) = numeric_op(op, instr)?;
                self.height -= pops;
                self.height += pushes;
                self.emit(operation);
            }
        }
        Ok(())
    }

    fn misc_instr(&mut self, op: u32, instr: &Instr) -> Result<()> {
        let operation = match op {
            misc::I32_TRUNC_SAT_F32_S => trunc(Float::F32, SignedInt::Int32, true),
            misc::I32_TRUNC_SAT_F32_U => trunc(Float::F32, SignedInt::Uint32, true),
            misc::I32_TRUNC_SAT_F64_S => trunc(Float::F64, SignedInt::Int32, true),
            misc::I32_TRUNC_SAT_F64_U => trunc(Float::F64, SignedInt::Uint32, true),
            misc::I64_TRUNC_SAT_F32_S => trunc(Float::F32, SignedInt::Int64, true),
            misc::I64_TRUNC_SAT_F32_U => trunc(Float::F32, SignedInt::Uint64, true),
            misc::I64_TRUNC_SAT_F64_S => trunc(Float::F64, SignedInt::Int64, true),
            misc::I64_TRUNC_SAT_F64_U => trunc(Float::F64, SignedInt::Uint64, true),

            misc::MEMORY_INIT => {
                self.height -= 3;
                Operation::MemoryInit {
                    data_index: data_index(instr)?,
                }
            }
            misc::DATA_DROP => Operation::DataDrop {
                data_index: data_index(instr)?,
            },
            misc::MEMORY_COPY => {
                self.height -= 3;
                Operation::MemoryCopy
            }
            misc::MEMORY_FILL => {
                self.height -= 3;
                Operation::MemoryFill
            }
            misc::TABLE_INIT => match instr.operands {
                Operands::TableInit {
                    elem_index,
                    table_index,
                } => {
                    self.height -= 3;
                    Operation::TableInit {
                        elem_index,
                        table_index,
                    }
                }
                _ => return Err(impl_bug!("table.init operands")),
            },
            misc::ELEM_DROP => Operation::ElemDrop {
                elem_index: elem_index(instr)?,
            },
            misc::TABLE_COPY => match instr.operands {
                Operands::TableCopy {
                    dst_index,
                    src_index,
                } => {
                    self.height -= 3;
                    Operation::TableCopy {
                        dst_index,
                        src_index,
                    }
                }
                _ => return Err(impl_bug!("table.copy operands")),
            },
            misc::TABLE_GROW => {
                self.height -= 1;
                Operation::TableGrow {
                    table_index: table_index(instr)?,
                }
            }
            misc::TABLE_SIZE => {
                self.height += 1;
                Operation::TableSize {
                    table_index: table_index(instr)?,
                }
            }
            misc::TABLE_FILL => {
                self.height -= 3;
                Operation::TableFill {
                    table_index: table_index(instr)?,
                }
            }
            other => return Err(impl_bug!("unknown misc opcode {}", other)),
        };
        self.emit(operation);
        Ok(())
    }
}

fn trunc(input: Float, output: SignedInt, non_trapping: bool) -> Operation {
    Operation::ITruncFromF {
        input,
        output,
        non_trapping,
    }
}

/// Numeric, comparison, conversion, and memory-access operators: one IR
/// operation per opcode plus its stack effect (pops, pushes).
fn numeric_op(op: u8, instr: &Instr) -> Result<(Operation, usize, usize)> {
    use {
        Float::{F32, F64},
        SignedInt as SI, SignedType as ST, UnsignedInt as UI, UnsignedType as UT,
    };
    let arg = || memargs(instr);
    Ok(match op {
        opcodes::I32_LOAD => (load(UT::I32, arg()?), 1, 1),
        opcodes::I64_LOAD => (load(UT::I64, arg()?), 1, 1),
        opcodes::F32_LOAD => (load(UT::F32, arg()?), 1, 1),
        opcodes::F64_LOAD => (load(UT::F64, arg()?), 1, 1),
        opcodes::I32_LOAD8_S => (load8(SI::Int32, arg()?), 1, 1),
        opcodes::I32_LOAD8_U => (load8(SI::Uint32, arg()?), 1, 1),
        opcodes::I32_LOAD16_S => (load16(SI::Int32, arg()?), 1, 1),
        opcodes::I32_LOAD16_U => (load16(SI::Uint32, arg()?), 1, 1),
        opcodes::I64_LOAD8_S => (load8(SI::Int64, arg()?), 1, 1),
        opcodes::I64_LOAD8_U => (load8(SI::Uint64, arg()?), 1, 1),
        opcodes::I64_LOAD16_S => (load16(SI::Int64, arg()?), 1, 1),
        opcodes::I64_LOAD16_U => (load16(SI::Uint64, arg()?), 1, 1),
        opcodes::I64_LOAD32_S => (
            Operation::Load32 {
                signed: true,
                arg:    arg()?.into(),
            },
            1,
            1,
        ),
        opcodes::I64_LOAD32_U => (
            Operation::Load32 {
                signed: false,
                arg:    arg()?.into(),
            },
            1,
            1,
        ),
        opcodes::I32_STORE => (store(UT::I32, arg()?), 2, 0),
        opcodes::I64_STORE => (store(UT::I64, arg()?), 2, 0),
        opcodes::F32_STORE => (store(UT::F32, arg()?), 2, 0),
        opcodes::F64_STORE => (store(UT::F64, arg()?), 2, 0),
        opcodes::I32_STORE8 | opcodes::I64_STORE8 => {
            (Operation::Store8 { arg: arg()?.into() }, 2, 0)
        }
        opcodes::I32_STORE16 | opcodes::I64_STORE16 => {
            (Operation::Store16 { arg: arg()?.into() }, 2, 0)
        }
        opcodes::I64_STORE32 => (Operation::Store32 { arg: arg()?.into() }, 2, 0),

        opcodes::I32_EQZ => (Operation::Eqz(UI::I32), 1, 1),
        opcodes::I32_EQ => (Operation::Eq(UT::I32), 2, 1),
        opcodes::I32_NE => (Operation::Ne(UT::I32), 2, 1),
        opcodes::I32_LT_S => (Operation::Lt(ST::Int32), 2, 1),
        opcodes::I32_LT_U => (Operation::Lt(ST::Uint32), 2, 1),
        opcodes::I32_GT_S => (Operation::Gt(ST::Int32), 2, 1),
        opcodes::I32_GT_U => (Operation::Gt(ST::Uint32), 2, 1),
        opcodes::I32_LE_S => (Operation::Le(ST::Int32), 2, 1),
        opcodes::I32_LE_U => (Operation::Le(ST::Uint32), 2, 1),
        opcodes::I32_GE_S => (Operation::Ge(ST::Int32), 2, 1),
        opcodes::I32_GE_U => (Operation::Ge(ST::Uint32), 2, 1),
        opcodes::I64_EQZ => (Operation::Eqz(UI::I64), 1, 1),
        opcodes::I64_EQ => (Operation::Eq(UT::I64), 2, 1),
        opcodes::I64_NE => (Operation::Ne(UT::I64), 2, 1),
        opcodes::I64_LT_S => (Operation::Lt(ST::Int64), 2, 1),
        opcodes::I64_LT_U => (Operation::Lt(ST::Uint64), 2, 1),
        opcodes::I64_GT_S => (Operation::Gt(ST::Int64), 2, 1),
        opcodes::I64_GT_U => (Operation::Gt(ST::Uint64), 2, 1),
        opcodes::I64_LE_S => (Operation::Le(ST::Int64), 2, 1),
        opcodes::I64_LE_U => (Operation::Le(ST::Uint64), 2, 1),
        opcodes::I64_GE_S => (Operation::Ge(ST::Int64), 2, 1),
        opcodes::I64_GE_U => (Operation::Ge(ST::Uint64), 2, 1),
        opcodes::F32_EQ => (Operation::Eq(UT::F32), 2, 1),
        opcodes::F32_NE => (Operation::Ne(UT::F32), 2, 1),
        opcodes::F32_LT => (Operation::Lt(ST::Float32), 2, 1),
        opcodes::F32_GT => (Operation::Gt(ST::Float32), 2, 1),
        opcodes::F32_LE => (Operation::Le(ST::Float32), 2, 1),
        opcodes::F32_GE => (Operation::Ge(ST::Float32), 2, 1),
        opcodes::F64_EQ => (Operation::Eq(UT::F64), 2, 1),
        opcodes::F64_NE => (Operation::Ne(UT::F64), 2, 1),
        opcodes::F64_LT => (Operation::Lt(ST::Float64), 2, 1),
        opcodes::F64_GT => (Operation::Gt(ST::Float64), 2, 1),
        opcodes::F64_LE => (Operation::Le(ST::Float64), 2, 1),
        opcodes::F64_GE => (Operation::Ge(ST::Float64), 2, 1),

        opcodes::I32_CLZ => (Operation::Clz(UI::I32), 1, 1),
        opcodes::I32_CTZ => (Operation::Ctz(UI::I32), 1, 1),
        opcodes::I32_POPCNT => (Operation::Popcnt(UI::I32), 1, 1),
        opcodes::I32_ADD => (Operation::Add(UT::I32), 2, 1),
        opcodes::I32_SUB => (Operation::Sub(UT::I32), 2, 1),
        opcodes::I32_MUL => (Operation::Mul(UT::I32), 2, 1),
        opcodes::I32_DIV_S => (Operation::Div(ST::Int32), 2, 1),
        opcodes::I32_DIV_U => (Operation::Div(ST::Uint32), 2, 1),
        opcodes::I32_REM_S => (Operation::Rem(SI::Int32), 2, 1),
        opcodes::I32_REM_U => (Operation::Rem(SI::Uint32), 2, 1),
        opcodes::I32_AND => (Operation::And(UI::I32), 2, 1),
        opcodes::I32_OR => (Operation::Or(UI::I32), 2, 1),
        opcodes::I32_XOR => (Operation::Xor(UI::I32), 2, 1),
        opcodes::I32_SHL => (Operation::Shl(UI::I32), 2, 1),
        opcodes::I32_SHR_S => (Operation::Shr(SI::Int32), 2, 1),
        opcodes::I32_SHR_U => (Operation::Shr(SI::Uint32), 2, 1),
        opcodes::I32_ROTL => (Operation::Rotl(UI::I32), 2, 1),
        opcodes::I32_ROTR => (Operation::Rotr(UI::I32), 2, 1),
        opcodes::I64_CLZ => (Operation::Clz(UI::I64), 1, 1),
        opcodes::I64_CTZ => (Operation::Ctz(UI::I64), 1, 1),
        opcodes::I64_POPCNT => (Operation::Popcnt(UI::I64), 1, 1),
        opcodes::I64_ADD => (Operation::Add(UT::I64), 2, 1),
        opcodes::I64_SUB => (Operation::Sub(UT::I64), 2, 1),
        opcodes::I64_MUL => (Operation::Mul(UT::I64), 2, 1),
        opcodes::I64_DIV_S => (Operation::Div(ST::Int64), 2, 1),
        opcodes::I64_DIV_U => (Operation::Div(ST::Uint64), 2, 1),
        opcodes::I64_REM_S => (Operation::Rem(SI::Int64), 2, 1),
        opcodes::I64_REM_U => (Operation::Rem(SI::Uint64), 2, 1),
        opcodes::I64_AND => (Operation::And(UI::I64), 2, 1),
        opcodes::I64_OR => (Operation::Or(UI::I64), 2, 1),
        opcodes::I64_XOR => (Operation::Xor(UI::I64), 2, 1),
        opcodes::I64_SHL => (Operation::Shl(UI::I64), 2, 1),
        opcodes::I64_SHR_S => (Operation::Shr(SI::Int64), 2, 1),
        opcodes::I64_SHR_U => (Operation::Shr(SI::Uint64), 2, 1),
        opcodes::I64_ROTL => (Operation::Rotl(UI::I64), 2, 1),
        opcodes::I64_ROTR => (Operation::Rotr(UI::I64), 2, 1),

        opcodes::F32_ABS => (Operation::Abs(F32), 1, 1),
        opcodes::F32_NEG => (Operation::Neg(F32), 1, 1),
        opcodes::F32_CEIL => (Operation::Ceil(F32), 1, 1),
        opcodes::F32_FLOOR => (Operation::Floor(F32), 1, 1),
        opcodes::F32_TRUNC => (Operation::Trunc(F32), 1, 1),
        opcodes::F32_NEAREST => (Operation::Nearest(F32), 1, 1),
        opcodes::F32_SQRT => (Operation::Sqrt(F32), 1, 1),
        opcodes::F32_ADD => (Operation::Add(UT::F32), 2, 1),
        opcodes::F32_SUB => (Operation::Sub(UT::F32), 2, 1),
        opcodes::F32_MUL => (Operation::Mul(UT::F32), 2, 1),
        opcodes::F32_DIV => (Operation::Div(ST::Float32), 2, 1),
        opcodes::F32_MIN => (Operation::Min(F32), 2, 1),
        opcodes::F32_MAX => (Operation::Max(F32), 2, 1),
        opcodes::F32_COPYSIGN => (Operation::Copysign(F32), 2, 1),
        opcodes::F64_ABS => (Operation::Abs(F64), 1, 1),
        opcodes::F64_NEG => (Operation::Neg(F64), 1, 1),
        opcodes::F64_CEIL => (Operation::Ceil(F64), 1, 1),
        opcodes::F64_FLOOR => (Operation::Floor(F64), 1, 1),
        opcodes::F64_TRUNC => (Operation::Trunc(F64), 1, 1),
        opcodes::F64_NEAREST => (Operation::Nearest(F64), 1, 1),
        opcodes::F64_SQRT => (Operation::Sqrt(F64), 1, 1),
        opcodes::F64_ADD => (Operation::Add(UT::F64), 2, 1),
        opcodes::F64_SUB => (Operation::Sub(UT::F64), 2, 1),
        opcodes::F64_MUL => (Operation::Mul(UT::F64), 2, 1),
        opcodes::F64_DIV => (Operation::Div(ST::Float64), 2, 1),
        opcodes::F64_MIN => (Operation::Min(F64), 2, 1),
        opcodes::F64_MAX => (Operation::Max(F64), 2, 1),
        opcodes::F64_COPYSIGN => (Operation::Copysign(F64), 2, 1),

        opcodes::I32_WRAP_I64 => (Operation::I32WrapFromI64, 1, 1),
        opcodes::I32_TRUNC_F32_S => (trunc(F32, SI::Int32, false), 1, 1),
        opcodes::I32_TRUNC_F32_U => (trunc(F32, SI::Uint32, false), 1, 1),
        opcodes::I32_TRUNC_F64_S => (trunc(F64, SI::Int32, false), 1, 1),
        opcodes::I32_TRUNC_F64_U => (trunc(F64, SI::Uint32, false), 1, 1),
        opcodes::I64_EXTEND_I32_S => (Operation::ExtendI64FromI32 { signed: true }, 1, 1),
        opcodes::I64_EXTEND_I32_U => (Operation::ExtendI64FromI32 { signed: false }, 1, 1),
        opcodes::I64_TRUNC_F32_S => (trunc(F32, SI::Int64, false), 1, 1),
        opcodes::I64_TRUNC_F32_U => (trunc(F32, SI::Uint64, false), 1, 1),
        opcodes::I64_TRUNC_F64_S => (trunc(F64, SI::Int64, false), 1, 1),
        opcodes::I64_TRUNC_F64_U => (trunc(F64, SI::Uint64, false), 1, 1),
        opcodes::F32_CONVERT_I32_S => (convert(SI::Int32, F32), 1, 1),
        opcodes::F32_CONVERT_I32_U => (convert(SI::Uint32, F32), 1, 1),
        opcodes::F32_CONVERT_I64_S => (convert(SI::Int64, F32), 1, 1),
        opcodes::F32_CONVERT_I64_U => (convert(SI::Uint64, F32), 1, 1),
        opcodes::F32_DEMOTE_F64 => (Operation::F32DemoteFromF64, 1, 1),
        opcodes::F64_CONVERT_I32_S => (convert(SI::Int32, F64), 1, 1),
        opcodes::F64_CONVERT_I32_U => (convert(SI::Uint32, F64), 1, 1),
        opcodes::F64_CONVERT_I64_S => (convert(SI::Int64, F64), 1, 1),
        opcodes::F64_CONVERT_I64_U => (convert(SI::Uint64, F64), 1, 1),
        opcodes::F64_PROMOTE_F32 => (Operation::F64PromoteFromF32, 1, 1),
        opcodes::I32_REINTERPRET_F32 => (Operation::I32ReinterpretFromF32, 1, 1),
        opcodes::I64_REINTERPRET_F64 => (Operation::I64ReinterpretFromF64, 1, 1),
        opcodes::F32_REINTERPRET_I32 => (Operation::F32ReinterpretFromI32, 1, 1),
        opcodes::F64_REINTERPRET_I64 => (Operation::F64ReinterpretFromI64, 1, 1),

        opcodes::I32_EXTEND8_S => (Operation::SignExtend32From8, 1, 1),
        opcodes::I32_EXTEND16_S => (Operation::SignExtend32From16, 1, 1),
        opcodes::I64_EXTEND8_S => (Operation::SignExtend64From8, 1, 1),
        opcodes::I64_EXTEND16_S => (Operation::SignExtend64From16, 1, 1),
        opcodes::I64_EXTEND32_S => (Operation::SignExtend64From32, 1, 1),

        other => return Err(impl_bug!("unknown opcode {:#x}", other)),
    })
}

fn load(ty: UnsignedType, arg: crate::module::MemArg) -> Operation {
    Operation::Load {
        ty,
        arg: arg.into(),
    }
}

fn load8(ty: SignedInt, arg: crate::module::MemArg) -> Operation {
    Operation::Load8 {
        ty,
        arg: arg.into(),
    }
}

fn load16(ty: SignedInt, arg: crate::module::MemArg) -> Operation {
    Operation::Load16 {
        ty,
        arg: arg.into(),
    }
}

fn store(ty: UnsignedType, arg: crate::module::MemArg) -> Operation {
    Operation::Store {
        ty,
        arg: arg.into(),
    }
}

fn convert(input: SignedInt, output: Float) -> Operation {
    Operation::FConvertFromI { input, output }
}

fn block_type(instr: &Instr) -> Result<BlockType> {
    match instr.operands {
        Operands::Block(bt) => Ok(bt),
        _ => Err(impl_bug!("block operands")),
    }
}

fn label_index(instr: &Instr) -> Result<u32> {
    match instr.operands {
        Operands::LabelIndex(i) => Ok(i),
        _ => Err(impl_bug!("label operands")),
    }
}

fn func_index(instr: &Instr) -> Result<u32> {
    match instr.operands {
        Operands::FuncIndex(i) => Ok(i),
        _ => Err(impl_bug!("function index operands")),
    }
}

fn local_index(instr: &Instr) -> Result<u32> {
    match instr.operands {
        Operands::LocalIndex(i) => Ok(i),
        _ => Err(impl_bug!("local index operands")),
    }
}

fn global_index(instr: &Instr) -> Result<u32> {
    match instr.operands {
        Operands::GlobalIndex(i) => Ok(i),
        _ => Err(impl_bug!("global index operands")),
    }
}

fn table_index(instr: &Instr) -> Result<u32> {
    match instr.operands {
        Operands::TableIndex(i) => Ok(i),
        _ => Err(impl_bug!("table index operands")),
    }
}

fn data_index(instr: &Instr) -> Result<u32> {
    match instr.operands {
        Operands::DataIndex(i) => Ok(i),
        _ => Err(impl_bug!("data index operands")),
    }
}

fn elem_index(instr: &Instr) -> Result<u32> {
    match instr.operands {
        Operands::ElemIndex(i) => Ok(i),
        _ => Err(impl_bug!("element index operands")),
    }
}

fn memargs(instr: &Instr) -> Result<crate::module::MemArg> {
    match instr.operands {
        Operands::Memargs(arg) => Ok(arg),
        _ => Err(impl_bug!("memory access operands")),
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::module::{
            instr::MemArg as InstrMemArg,
            types::{FunctionType, MemoryType, F32 as VF32, I32 as VI32},
            DataMode, DataSegment, Module,
        },
    };

    fn instr(opcode: u8, operands: Operands) -> Instr {
        Instr {
            opcode: Opcode::Normal(opcode),
            operands,
        }
    }

    fn misc_instr(opcode: u32, operands: Operands) -> Instr {
        Instr {
            opcode: Opcode::Misc(opcode),
            operands,
        }
    }

    fn module_with_one_func(ty: FunctionType, body: Vec<Instr>) -> (Module, FuncBody) {
        let body = FuncBody {
            locals: Vec::new(),
            body,
        };
        let module = Module {
            types: vec![ty],
            functions: vec![0],
            code: vec![body.clone()],
            ..Module::default()
        };
        (module, body)
    }

    fn ret(drop: Option<InclusiveRange>) -> Operation {
        Operation::Br(BranchTarget { label: None, drop })
    }

    #[test]
    fn nullary_function_lowers_to_return() {
        let (module, body) =
            module_with_one_func(FunctionType::default(), vec![instr(opcodes::END, Operands::None)]);
        let compiled = compile_function(&module, 0, &body).unwrap();
        assert_eq!(compiled.operations, vec![ret(None)]);
        assert!(compiled.label_callers.is_empty());
    }

    #[test]
    fn identity_picks_param_and_drops_it_on_return() {
        let (module, body) = module_with_one_func(
            FunctionType::new(vec![VI32], vec![VI32]),
            vec![
                instr(opcodes::LOCAL_GET, Operands::LocalIndex(0)),
                instr(opcodes::END, Operands::None),
            ],
        );
        let compiled = compile_function(&module, 0, &body).unwrap();
        assert_eq!(
            compiled.operations,
            vec![
                Operation::Pick { depth: 0 },
                ret(Some(InclusiveRange { start: 1, end: 1 })),
            ]
        );
    }

    #[test]
    fn branch_out_of_block_targets_its_continuation() {
        // (func (block (drop (i32.add (br 0)))))
        let (module, body) = module_with_one_func(
            FunctionType::default(),
            vec![
                instr(opcodes::BLOCK, Operands::Block(BlockType::Empty)),
                instr(opcodes::BR, Operands::LabelIndex(0)),
                instr(opcodes::I32_ADD, Operands::None),
                instr(opcodes::DROP, Operands::None),
                instr(opcodes::END, Operands::None),
                instr(opcodes::END, Operands::None),
            ],
        );
        let compiled = compile_function(&module, 0, &body).unwrap();
        let cont = Label {
            frame_id: 2,
            kind:     LabelKind::Continuation,
        };
        // The i32.add and drop are unreachable tail code and are not emitted.
        assert_eq!(
            compiled.operations,
            vec![
                Operation::Br(BranchTarget {
                    label: Some(cont),
                    drop:  None,
                }),
                Operation::Label(cont),
                ret(None),
            ]
        );
        assert_eq!(compiled.label_callers.get(&cont), Some(&1));
    }

    #[test]
    fn if_with_else_synthesizes_three_labels() {
        // (func (param i32) (result i32)
        //   (i32.const 1)
        //   (if (param i32) (result i32) (local.get 0)
        //     (then (i32.const 2) (i32.add))
        //     (else (i32.const -2) (i32.add))))
        let block_ty = FunctionType::new(vec![VI32], vec![VI32]);
        let body = FuncBody {
            locals: Vec::new(),
            body:   vec![
                instr(opcodes::I32_CONST, Operands::I32(1)),
                instr(opcodes::LOCAL_GET, Operands::LocalIndex(0)),
                instr(opcodes::IF, Operands::Block(BlockType::FuncType(1))),
                instr(opcodes::I32_CONST, Operands::I32(2)),
                instr(opcodes::I32_ADD, Operands::None),
                instr(opcodes::ELSE, Operands::None),
                instr(opcodes::I32_CONST, Operands::I32(-2i32 as u32)),
                instr(opcodes::I32_ADD, Operands::None),
                instr(opcodes::END, Operands::None),
                instr(opcodes::END, Operands::None),
            ],
        };
        let module = Module {
            types: vec![FunctionType::new(vec![VI32], vec![VI32]), block_ty],
            functions: vec![0],
            code: vec![body.clone()],
            ..Module::default()
        };
        let compiled = compile_function(&module, 0, &body).unwrap();

        let header = Label {
            frame_id: 2,
            kind:     LabelKind::Header,
        };
        let els = Label {
            frame_id: 2,
            kind:     LabelKind::Else,
        };
        let cont = Label {
            frame_id: 2,
            kind:     LabelKind::Continuation,
        };
        let to = |label| BranchTarget {
            label: Some(label),
            drop:  None,
        };
        assert_eq!(
            compiled.operations,
            vec![
                Operation::ConstI32(1),
                Operation::Pick { depth: 1 },
                Operation::BrIf {
                    then: to(header),
                    els:  Some(to(els)),
                },
                Operation::Label(header),
                Operation::ConstI32(2),
                Operation::Add(UnsignedType::I32),
                Operation::Br(to(cont)),
                Operation::Label(els),
                Operation::ConstI32(-2i32 as u32),
                Operation::Add(UnsignedType::I32),
                Operation::Label(cont),
                ret(Some(InclusiveRange { start: 1, end: 1 })),
            ]
        );
        assert_eq!(compiled.label_callers.get(&header), Some(&1));
        assert_eq!(compiled.label_callers.get(&els), Some(&1));
        assert_eq!(compiled.label_callers.get(&cont), Some(&1));
    }

    #[test]
    fn bulk_memory_ops_lower_directly() {
        // (func (memory.init 1 (i32.const 16) (i32.const 0) (i32.const 7))
        //       (data.drop 1))
        let body = FuncBody {
            locals: Vec::new(),
            body:   vec![
                instr(opcodes::I32_CONST, Operands::I32(16)),
                instr(opcodes::I32_CONST, Operands::I32(0)),
                instr(opcodes::I32_CONST, Operands::I32(7)),
                misc_instr(misc::MEMORY_INIT, Operands::DataIndex(1)),
                misc_instr(misc::DATA_DROP, Operands::DataIndex(1)),
                instr(opcodes::END, Operands::None),
            ],
        };
        let module = Module {
            types: vec![FunctionType::default()],
            functions: vec![0],
            memory: Some(MemoryType {
                limits: crate::module::types::Limits { min: 1, max: None },
            }),
            data: vec![
                DataSegment {
                    mode: DataMode::Active {
                        memory_index: 0,
                        offset:       crate::module::ConstExpr::I32(0),
                    },
                    init: b"hello".to_vec().into(),
                },
                DataSegment {
                    mode: DataMode::Passive,
                    init: b"goodbye".to_vec().into(),
                },
            ],
            data_count: Some(2),
            code: vec![body.clone()],
            ..Module::default()
        };
        let compiled = compile_function(&module, 0, &body).unwrap();
        assert_eq!(
            compiled.operations,
            vec![
                Operation::ConstI32(16),
                Operation::ConstI32(0),
                Operation::ConstI32(7),
                Operation::MemoryInit { data_index: 1 },
                Operation::DataDrop { data_index: 1 },
                ret(None),
            ]
        );
    }

    #[test]
    fn saturating_truncation_sets_the_non_trapping_flag() {
        let (module, body) = module_with_one_func(
            FunctionType::new(vec![VF32], vec![VI32]),
            vec![
                instr(opcodes::LOCAL_GET, Operands::LocalIndex(0)),
                misc_instr(misc::I32_TRUNC_SAT_F32_S, Operands::None),
                instr(opcodes::END, Operands::None),
            ],
        );
        let compiled = compile_function(&module, 0, &body).unwrap();
        assert_eq!(
            compiled.operations,
            vec![
                Operation::Pick { depth: 0 },
                Operation::ITruncFromF {
                    input:        Float::F32,
                    output:       SignedInt::Int32,
                    non_trapping: true,
                },
                ret(Some(InclusiveRange { start: 1, end: 1 })),
            ]
        );
    }

    #[test]
    fn sign_extension_ops_lower_to_dedicated_operations() {
        let (module, body) = module_with_one_func(
            FunctionType::new(vec![VI32], vec![VI32]),
            vec![
                instr(opcodes::LOCAL_GET, Operands::LocalIndex(0)),
                instr(opcodes::I32_EXTEND8_S, Operands::None),
                instr(opcodes::END, Operands::None),
            ],
        );
        let compiled = compile_function(&module, 0, &body).unwrap();
        assert_eq!(
            compiled.operations,
            vec![
                Operation::Pick { depth: 0 },
                Operation::SignExtend32From8,
                ret(Some(InclusiveRange { start: 1, end: 1 })),
            ]
        );
    }

    #[test]
    fn loop_branches_target_the_header() {
        // (func (loop (br 0)))
        let (module, body) = module_with_one_func(
            FunctionType::default(),
            vec![
                instr(opcodes::LOOP, Operands::Block(BlockType::Empty)),
                instr(opcodes::BR, Operands::LabelIndex(0)),
                instr(opcodes::END, Operands::None),
                instr(opcodes::END, Operands::None),
            ],
        );
        let compiled = compile_function(&module, 0, &body).unwrap();
        let header = Label {
            frame_id: 2,
            kind:     LabelKind::Header,
        };
        let cont = Label {
            frame_id: 2,
            kind:     LabelKind::Continuation,
        };
        assert_eq!(
            compiled.operations,
            vec![
                Operation::Label(header),
                Operation::Br(BranchTarget {
                    label: Some(header),
                    drop:  None,
                }),
                Operation::Label(cont),
                ret(None),
            ]
        );
        assert_eq!(compiled.label_callers.get(&header), Some(&1));
        assert_eq!(compiled.label_callers.get(&cont), None);
    }

    #[test]
    fn local_set_swaps_into_the_local_slot() {
        // (func (param i32) (local i32) (local.set 1 (i32.const 7)))
        let body = FuncBody {
            locals: vec![VI32],
            body:   vec![
                instr(opcodes::I32_CONST, Operands::I32(7)),
                instr(opcodes::LOCAL_SET, Operands::LocalIndex(1)),
                instr(opcodes::END, Operands::None),
            ],
        };
        let module = Module {
            types: vec![FunctionType::new(vec![VI32], vec![])],
            functions: vec![0],
            code: vec![body.clone()],
            ..Module::default()
        };
        let compiled = compile_function(&module, 0, &body).unwrap();
        assert_eq!(
            compiled.operations,
            vec![
                Operation::ConstI32(7),
                Operation::Swap { depth: 1 },
                Operation::Drop(InclusiveRange { start: 0, end: 0 }),
                ret(Some(InclusiveRange { start: 0, end: 1 })),
            ]
        );
    }

    #[test]
    fn memargs_carry_into_load_operations() {
        let (module, body) = module_with_one_func(
            FunctionType::new(vec![VI32], vec![VI32]),
            vec![
                instr(opcodes::LOCAL_GET, Operands::LocalIndex(0)),
                instr(
                    opcodes::I32_LOAD,
                    Operands::Memargs(InstrMemArg {
                        align:  2,
                        offset: 8,
                    }),
                ),
                instr(opcodes::END, Operands::None),
            ],
        );
        let compiled = compile_function(&module, 0, &body).unwrap();
        assert_eq!(
            compiled.operations[1],
            Operation::Load {
                ty:  UnsignedType::I32,
                arg: crate::ir::MemArg {
                    align:  2,
                    offset: 8,
                },
            }
        );
    }
}
