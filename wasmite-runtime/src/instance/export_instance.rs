//! Export instances.

use crate::module::types::ExternKind;

/// One export of a module instance: the external kind plus the index into
/// the owning instance's corresponding array. Export instances always point
/// into live arrays of their own instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportInstance {
    pub kind:  ExternKind,
    pub index: u32,
}
