//! Import section.

use {
    super::{
        error::{BinaryErrorKind, Result},
        BinaryParser,
    },
    std::io::Read,
    wasmite_runtime::module::{Import, ImportDesc},
};

impl<R: Read> BinaryParser<R> {
    pub(crate) fn read_imports_section(&mut self) -> Result<Vec<Import>> {
        self.read_vec(|s| {
            let module = s.read_name()?;
            let name = s.read_name()?;
            let desc = match s.read_byte()? {
                0x00 => ImportDesc::Func(s.read_u32()?),
                0x01 => ImportDesc::Table(s.read_table_type()?),
                0x02 => ImportDesc::Memory(s.read_memory_type()?),
                0x03 => ImportDesc::Global(s.read_global_type()?),
                other => return Err(s.err(BinaryErrorKind::InvalidImportKind(other))),
            };
            Ok(Import { module, name, desc })
        })
    }
}
