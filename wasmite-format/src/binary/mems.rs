//! Memory section. The module record holds at most one memory, so a section
//! declaring more is rejected here; the validator enforces the single-memory
//! rule across locals and imports.

use {
    super::{
        error::{BinaryErrorKind, Result},
        BinaryParser,
    },
    std::io::Read,
    wasmite_runtime::module::types::MemoryType,
};

impl<R: Read> BinaryParser<R> {
    pub(crate) fn read_mems_section(&mut self) -> Result<Option<MemoryType>> {
        let mems = self.read_vec(|s| s.read_memory_type())?;
        if mems.len() > 1 {
            return Err(self.err(BinaryErrorKind::MultipleMemories));
        }
        Ok(mems.into_iter().next())
    }
}
