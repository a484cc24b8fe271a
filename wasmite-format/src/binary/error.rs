//! Binary decoding errors.

use {thiserror::Error, wasmite_runtime::features::FeatureError};

#[derive(Debug, Error)]
pub enum BinaryErrorKind {
    #[error("i/o error reading module: {0}")]
    Io(#[from] std::io::Error),
    #[error("unexpected end of binary")]
    UnexpectedEnd,
    #[error("invalid magic number")]
    BadMagic,
    #[error("unsupported binary version")]
    BadVersion,
    #[error("malformed LEB128 integer: {0}")]
    BadLeb128(&'static str),
    #[error("invalid value type {0:#x}")]
    InvalidValueType(u8),
    #[error("invalid reference type {0:#x}")]
    InvalidRefType(u8),
    #[error("invalid function type prefix {0:#x}")]
    InvalidFuncTypePrefix(u8),
    #[error("invalid limits flag {0:#x}")]
    InvalidLimitsFlag(u8),
    #[error("invalid mutability flag {0:#x}")]
    InvalidMutabilityFlag(u8),
    #[error("invalid import kind {0:#x}")]
    InvalidImportKind(u8),
    #[error("invalid export kind {0:#x}")]
    InvalidExportKind(u8),
    #[error("invalid block type {0}")]
    InvalidBlockType(i64),
    #[error("invalid element segment kind {0}")]
    InvalidElemKind(u32),
    #[error("invalid data segment kind {0}")]
    InvalidDataKind(u32),
    #[error("invalid opcode {0:#x}")]
    InvalidOpcode(u8),
    #[error("invalid misc opcode {0}")]
    InvalidMiscOpcode(u32),
    #[error("invalid constant expression opcode {0:#x}")]
    InvalidConstExprOpcode(u8),
    #[error("constant expression is not terminated by end")]
    UnterminatedConstExpr,
    #[error("expected reserved zero byte, found {0:#x}")]
    NonZeroReservedByte(u8),
    #[error("name is not valid UTF-8")]
    InvalidUtf8,
    #[error("section {0} appears out of order or more than once")]
    SectionOutOfOrder(u8),
    #[error("invalid section id {0}")]
    InvalidSectionId(u8),
    #[error("section size mismatch: declared {declared}, consumed {consumed}")]
    SectionSizeMismatch { declared: u32, consumed: u64 },
    #[error("function body size mismatch: declared {declared}, consumed {consumed}")]
    BodySizeMismatch { declared: u32, consumed: u64 },
    #[error("function and code section lengths differ")]
    FuncSizeMismatch,
    #[error("data count and data section lengths differ")]
    DataCountMismatch,
    #[error("too many locals")]
    TooManyLocals,
    #[error("multiple memories")]
    MultipleMemories,
    #[error("{0}")]
    Feature(#[from] FeatureError),
}

/// A decoding error plus the byte offset where it was detected.
#[derive(Debug, Error)]
#[error("{kind} (at offset {offset})")]
pub struct BinaryError {
    pub kind:   BinaryErrorKind,
    pub offset: u64,
}

pub type Result<T> = std::result::Result<T, BinaryError>;
