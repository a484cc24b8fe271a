//! The runtime error taxonomy.
//!
//! Propagation is strictly non-recovering: the first error aborts the current
//! call or instantiation and unwinds to the embedder. Instantiation is
//! transactional, so any of these errors leaves the store without the
//! attempted module.

use {crate::validation::ValidationError, thiserror::Error};

/// An unrecoverable runtime error defined by the WebAssembly specification.
/// Display strings match the specification's trap descriptions.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TrapKind {
    #[error("unreachable")]
    Unreachable,
    #[error("integer divide by zero")]
    IntegerDivideByZero,
    #[error("integer overflow")]
    IntegerOverflow,
    #[error("invalid conversion to integer")]
    InvalidConversionToInteger,
    #[error("out of bounds memory access")]
    OutOfBoundsMemoryAccess,
    #[error("out of bounds table access")]
    OutOfBoundsTableAccess,
    #[error("uninitialized element")]
    UninitializedElement,
    #[error("indirect call type mismatch")]
    IndirectCallTypeMismatch,
    #[error("call stack exhausted")]
    CallStackExhausted,
}

/// Failures while resolving a module's imports against the store, or while
/// reserving its name.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LinkError {
    #[error("module {0} has already been instantiated")]
    DuplicateModuleName(String),
    #[error("module[{0}] not instantiated")]
    ModuleNotInstantiated(String),
    #[error("{name:?} is not exported in module {module:?}")]
    ImportNotFound { module: String, name: String },
    #[error("import[{index}] {module}.{name}: expected a {expected}, but export is a {actual}")]
    ImportKindMismatch {
        index:    usize,
        module:   String,
        name:     String,
        expected: &'static str,
        actual:   &'static str,
    },
    #[error("import[{index}] {module}.{name}: signature mismatch: {expected} != {actual}")]
    SignatureMismatch {
        index:    usize,
        module:   String,
        name:     String,
        expected: String,
        actual:   String,
    },
    #[error("import[{index}] {module}.{name}: minimum size mismatch: {expected} > {actual}")]
    MinSizeMismatch {
        index:    usize,
        module:   String,
        name:     String,
        expected: u32,
        actual:   u32,
    },
    #[error("import[{index}] {module}.{name}: maximum size mismatch: {expected} < {actual}")]
    MaxSizeMismatch {
        index:    usize,
        module:   String,
        name:     String,
        expected: u32,
        actual:   u32,
    },
    #[error("import[{index}] {module}.{name}: maximum size mismatch: {expected}, but actual has no max")]
    MissingMax {
        index:    usize,
        module:   String,
        name:     String,
        expected: u32,
    },
    #[error("import[{index}] {module}.{name}: mutability mismatch: {expected} != {actual}")]
    GlobalMutabilityMismatch {
        index:    usize,
        module:   String,
        name:     String,
        expected: bool,
        actual:   bool,
    },
    #[error("import[{index}] {module}.{name}: value type mismatch: {expected} != {actual}")]
    GlobalTypeMismatch {
        index:    usize,
        module:   String,
        name:     String,
        expected: String,
        actual:   String,
    },
    #[error("import[{index}] {module}.{name}: element type mismatch")]
    TableElementTypeMismatch {
        index:  usize,
        module: String,
        name:   String,
    },
    #[error("too many function types in a store")]
    TooManyFunctionTypes,
}

/// Failures after linking, while building the instance or running its start
/// function.
#[derive(Debug, Error)]
pub enum InstantiationError {
    #[error("out of bounds memory access")]
    DataSegmentOutOfBounds,
    #[error("out of bounds table access")]
    ElementSegmentOutOfBounds,
    #[error("constant expression evaluation failed: {0}")]
    ConstExpr(String),
    #[error("memory capacity {capacity} pages is less than the declared minimum {min}")]
    MemoryCapacityTooSmall { capacity: u32, min: u32 },
    #[error("memory minimum {min} pages exceeds the limit of {limit}")]
    MemoryTooLarge { min: u32, limit: u32 },
    #[error("start {desc} failed: {source}")]
    Start {
        desc:   String,
        #[source]
        source: Box<RuntimeError>,
    },
}

/// The top-level error returned from any store or engine operation.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("{0}")]
    Trap(#[from] TrapKind),
    #[error("{0}")]
    Validation(#[from] ValidationError),
    #[error("{0}")]
    Link(#[from] LinkError),
    #[error("{0}")]
    Instantiation(#[from] InstantiationError),
    /// An error returned by a host function, propagated verbatim.
    #[error("{0}")]
    Host(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// The call context's cancellation signal fired.
    #[error("call cancelled")]
    Cancelled,
    /// Invalid module configuration, detected while materializing the
    /// system context.
    #[error("{0}")]
    Config(#[from] crate::sys::SysError),
    #[error("{name:?} is not exported in module {module:?}")]
    ExportNotFound { module: String, name: String },
    #[error("export {name:?} in module {module:?} is a {actual}, not a {expected}")]
    ExportKindMismatch {
        module:   String,
        name:     String,
        expected: &'static str,
        actual:   &'static str,
    },
    #[error("expected {expected} arguments, got {got}")]
    ArgumentCount { expected: usize, got: usize },
    #[error("argument[{index}] type mismatch: expected {expected}, got {got}")]
    ArgumentType {
        index:    usize,
        expected: String,
        got:      String,
    },
    /// The module instance backing a shared function was closed; importers
    /// observe this error rather than dangling state.
    #[error("module {0:?} has been closed")]
    ModuleClosed(String),
    /// A runtime check failed for something module validation should have
    /// ruled out. Reaching this is a bug in the implementation, not in the
    /// guest module.
    #[error("implementation bug: {0}")]
    ImplementationBug(String),
}

/// Constructs a [RuntimeError::ImplementationBug] for a condition validation
/// should have made impossible.
#[macro_export]
macro_rules! impl_bug {
    ( $fmt:literal $(, $( $arg:expr ),*)? ) => {
        $crate::error::RuntimeError::ImplementationBug(
            format!($fmt$(, $($arg,)*)?)
        )
    }
}

impl RuntimeError {
    /// The trap this error carries, if it is one.
    pub fn as_trap(&self) -> Option<TrapKind> {
        match self {
            RuntimeError::Trap(t) => Some(*t),
            _ => None,
        }
    }

    pub fn host(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> RuntimeError {
        RuntimeError::Host(err.into())
    }
}

impl From<crate::features::FeatureError> for RuntimeError {
    fn from(e: crate::features::FeatureError) -> RuntimeError {
        RuntimeError::Validation(e.into())
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Helper mirroring `bool::then_some(()).ok_or(..)` for trap checks, keeping
/// bounds checks on one line at the use sites.
pub(crate) fn check(cond: bool, trap: TrapKind) -> Result<()> {
    if cond {
        Ok(())
    } else {
        Err(trap.into())
    }
}
