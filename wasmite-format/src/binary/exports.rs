//! Export section.

use {
    super::{
        error::{BinaryErrorKind, Result},
        BinaryParser,
    },
    std::io::Read,
    wasmite_runtime::module::{Export, ExportDesc},
};

impl<R: Read> BinaryParser<R> {
    pub(crate) fn read_exports_section(&mut self) -> Result<Vec<Export>> {
        self.read_vec(|s| {
            let name = s.read_name()?;
            let desc = match s.read_byte()? {
                0x00 => ExportDesc::Func(s.read_u32()?),
                0x01 => ExportDesc::Table(s.read_u32()?),
                0x02 => ExportDesc::Memory(s.read_u32()?),
                0x03 => ExportDesc::Global(s.read_u32()?),
                other => return Err(s.err(BinaryErrorKind::InvalidExportKind(other))),
            };
            Ok(Export { name, desc })
        })
    }
}
