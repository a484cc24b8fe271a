//! Function instances.

use {
    super::ModuleInstance,
    crate::{
        host::HostFunc,
        module::types::FunctionType,
        store::{FuncAddr, FunctionTypeId},
    },
    std::{fmt, sync::Weak},
};

/// How a function instance is called.
pub enum FuncKind {
    /// A function defined in WebAssembly. The owning instance is held
    /// non-owning to break the instance↔function cycle; a dead reference
    /// means the owning module was closed and calls report an error.
    Wasm {
        module: Weak<ModuleInstance>,
        /// Position in the owning module's function index space.
        index:  u32,
    },
    /// A host-provided function with an explicit type descriptor.
    Host(HostFunc),
}

/// A function instance. Both kinds carry the interned type id used by
/// `call_indirect` checks and the store-wide address that funcref values
/// encode.
pub struct FunctionInstance {
    pub kind:       FuncKind,
    pub ty:         FunctionType,
    pub type_id:    FunctionTypeId,
    pub addr:       FuncAddr,
    pub debug_name: String,
}

impl FunctionInstance {
    pub fn is_host(&self) -> bool {
        matches!(self.kind, FuncKind::Host(_))
    }
}

impl fmt::Debug for FunctionInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            FuncKind::Wasm { index, .. } => format!("wasm[{index}]"),
            FuncKind::Host(_) => "host".to_string(),
        };
        f.debug_struct("FunctionInstance")
            .field("kind", &kind)
            .field("ty", &self.ty)
            .field("type_id", &self.type_id)
            .field("addr", &self.addr)
            .field("debug_name", &self.debug_name)
            .finish()
    }
}
