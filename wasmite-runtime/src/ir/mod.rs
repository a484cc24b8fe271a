//! The stack-machine intermediate representation executed by the
//! interpreter.
//!
//! Each validated function body is rewritten by [compile] into an ordered
//! list of [Operation]s: structured control flow becomes labelled branch
//! targets, implicit operand-stack effects become explicit `Pick`/`Drop`/
//! `Swap` slot manipulation, and every numeric operator becomes one
//! operation parameterized by signedness where the distinction matters.

use {crate::module::types::RefType, std::collections::HashMap};

mod compile;

pub use compile::{compile_function, CompiledFunc};

/// Identifies one of the up to three branch targets synthesized for a
/// structured control frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LabelKind {
    /// The first operation of a `loop` or of an `if`'s then-branch.
    Header,
    /// The first operation of an `if`'s else-branch.
    Else,
    /// The operation after a frame's `end`.
    Continuation,
}

/// A branch label: the frame it belongs to plus which of the frame's targets
/// it names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label {
    pub frame_id: u32,
    pub kind:     LabelKind,
}

/// An inclusive range of value-stack slot depths, 0 being the top of the
/// stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InclusiveRange {
    pub start: u32,
    pub end:   u32,
}

/// Where a branch goes and which slots it sheds on the way. A `label` of
/// `None` is a return from the function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BranchTarget {
    pub label: Option<Label>,
    pub drop:  Option<InclusiveRange>,
}

/// The integer interpretations used by operations where signedness changes
/// the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignedInt {
    Int32,
    Int64,
    Uint32,
    Uint64,
}

/// Operand interpretations for comparison and division operators, which are
/// defined for both integer signednesses and floats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignedType {
    Int32,
    Int64,
    Uint32,
    Uint64,
    Float32,
    Float64,
}

/// Operand widths for operators that ignore integer signedness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsignedType {
    I32,
    I64,
    F32,
    F64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsignedInt {
    I32,
    I64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Float {
    F32,
    F64,
}

/// The alignment hint and constant offset of a memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemArg {
    pub align:  u32,
    pub offset: u32,
}

impl From<crate::module::MemArg> for MemArg {
    fn from(arg: crate::module::MemArg) -> MemArg {
        MemArg {
            align:  arg.align,
            offset: arg.offset,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Unreachable,
    /// A no-op marking a branch target. The interpreter resolves labels to
    /// positions before execution and skips labels nothing branches to.
    Label(Label),
    Br(BranchTarget),
    /// Conditional branch. An `els` of `None` falls through to the next
    /// operation (the `br_if` case); `if` lowers with both targets labelled.
    BrIf {
        then: BranchTarget,
        els:  Option<BranchTarget>,
    },
    BrTable {
        targets: Vec<BranchTarget>,
        default: BranchTarget,
    },
    Call {
        func_index: u32,
    },
    CallIndirect {
        type_index:  u32,
        table_index: u32,
    },

    /// Duplicate the slot `depth` below the top onto the top.
    Pick {
        depth: u32,
    },
    /// Exchange the top slot with the slot `depth` below it.
    Swap {
        depth: u32,
    },
    /// Remove a contiguous span of slots.
    Drop(InclusiveRange),
    /// Pop `cond, v2, v1`; push `v1` if cond is non-zero, else `v2`.
    Select,

    GlobalGet {
        index: u32,
    },
    GlobalSet {
        index: u32,
    },

    Load {
        ty:  UnsignedType,
        arg: MemArg,
    },
    Load8 {
        ty:  SignedInt,
        arg: MemArg,
    },
    Load16 {
        ty:  SignedInt,
        arg: MemArg,
    },
    Load32 {
        signed: bool,
        arg:    MemArg,
    },
    Store {
        ty:  UnsignedType,
        arg: MemArg,
    },
    Store8 {
        arg: MemArg,
    },
    Store16 {
        arg: MemArg,
    },
    Store32 {
        arg: MemArg,
    },
    MemorySize,
    MemoryGrow,
    MemoryInit {
        data_index: u32,
    },
    DataDrop {
        data_index: u32,
    },
    MemoryCopy,
    MemoryFill,

    TableInit {
        elem_index:  u32,
        table_index: u32,
    },
    ElemDrop {
        elem_index: u32,
    },
    TableCopy {
        dst_index: u32,
        src_index: u32,
    },
    TableGet {
        table_index: u32,
    },
    TableSet {
        table_index: u32,
    },
    TableSize {
        table_index: u32,
    },
    TableGrow {
        table_index: u32,
    },
    TableFill {
        table_index: u32,
    },

    RefFunc {
        func_index: u32,
    },
    RefNull {
        ty: RefType,
    },
    RefIsNull,

    ConstI32(u32),
    ConstI64(u64),
    ConstF32(u32),
    ConstF64(u64),

    Eqz(UnsignedInt),
    Eq(UnsignedType),
    Ne(UnsignedType),
    Lt(SignedType),
    Gt(SignedType),
    Le(SignedType),
    Ge(SignedType),

    Add(UnsignedType),
    Sub(UnsignedType),
    Mul(UnsignedType),
    Clz(UnsignedInt),
    Ctz(UnsignedInt),
    Popcnt(UnsignedInt),
    Div(SignedType),
    Rem(SignedInt),
    And(UnsignedInt),
    Or(UnsignedInt),
    Xor(UnsignedInt),
    Shl(UnsignedInt),
    Shr(SignedInt),
    Rotl(UnsignedInt),
    Rotr(UnsignedInt),

    Abs(Float),
    Neg(Float),
    Ceil(Float),
    Floor(Float),
    Trunc(Float),
    Nearest(Float),
    Sqrt(Float),
    Min(Float),
    Max(Float),
    Copysign(Float),

    I32WrapFromI64,
    /// Float-to-integer truncation, trapping or saturating.
    ITruncFromF {
        input:        Float,
        output:       SignedInt,
        non_trapping: bool,
    },
    FConvertFromI {
        input:  SignedInt,
        output: Float,
    },
    F32DemoteFromF64,
    F64PromoteFromF32,
    I32ReinterpretFromF32,
    I64ReinterpretFromF64,
    F32ReinterpretFromI32,
    F64ReinterpretFromI64,
    /// i64.extend_i32_s / i64.extend_i32_u.
    ExtendI64FromI32 {
        signed: bool,
    },
    SignExtend32From8,
    SignExtend32From16,
    SignExtend64From8,
    SignExtend64From16,
    SignExtend64From32,
}

/// How many branch targets reference each label, recorded by the lowerer so
/// the interpreter can skip unreferenced labels when resolving positions.
pub type LabelCallers = HashMap<Label, u32>;
