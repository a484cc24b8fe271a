//! Section framing: ids, canonical ordering, and size accounting.

use {
    super::{
        error::{BinaryErrorKind, Result},
        BinaryParser,
    },
    std::io::Read,
    tracing::trace,
    wasmite_runtime::module::Module,
};

/// Section ids as they appear in the binary format.
///
/// [Spec]: https://webassembly.github.io/spec/core/binary/modules.html#sections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionId {
    Custom,
    Type,
    Import,
    Function,
    Table,
    Memory,
    Global,
    Export,
    Start,
    Element,
    Code,
    Data,
    DataCount,
}

impl SectionId {
    fn from_byte(b: u8) -> Option<SectionId> {
        Some(match b {
            0 => SectionId::Custom,
            1 => SectionId::Type,
            2 => SectionId::Import,
            3 => SectionId::Function,
            4 => SectionId::Table,
            5 => SectionId::Memory,
            6 => SectionId::Global,
            7 => SectionId::Export,
            8 => SectionId::Start,
            9 => SectionId::Element,
            10 => SectionId::Code,
            11 => SectionId::Data,
            12 => SectionId::DataCount,
            _ => return None,
        })
    }

    /// Position in the canonical section order. The data-count section sits
    /// between element and code; custom sections may appear anywhere.
    fn order(self) -> u8 {
        match self {
            SectionId::Custom => 0,
            SectionId::Type => 1,
            SectionId::Import => 2,
            SectionId::Function => 3,
            SectionId::Table => 4,
            SectionId::Memory => 5,
            SectionId::Global => 6,
            SectionId::Export => 7,
            SectionId::Start => 8,
            SectionId::Element => 9,
            SectionId::DataCount => 10,
            SectionId::Code => 11,
            SectionId::Data => 12,
        }
    }
}

impl<R: Read> BinaryParser<R> {
    /// Read one section into `module`. Returns false at a clean end of
    /// stream. Non-custom sections must appear in canonical order, each at
    /// most once; every section's declared size must match exactly the bytes
    /// its reader consumes.
    pub(crate) fn read_section(
        &mut self,
        module: &mut Module,
        last_order: &mut u8,
    ) -> Result<bool> {
        let mut first = [0u8; 1];
        match self.read(&mut first) {
            Ok(0) => return Ok(false),
            Ok(_) => {}
            Err(e) => return Err(self.err(BinaryErrorKind::Io(e))),
        }
        let id = SectionId::from_byte(first[0])
            .ok_or_else(|| self.err(BinaryErrorKind::InvalidSectionId(first[0])))?;

        if id != SectionId::Custom {
            if id.order() <= *last_order {
                return Err(self.err(BinaryErrorKind::SectionOutOfOrder(first[0])));
            }
            *last_order = id.order();
        }

        let declared = self.read_u32()?;
        let start = self.position();
        trace!(target: "wasmite::decode", ?id, size = declared, "reading section");

        match id {
            SectionId::Custom => self.read_custom_section(module, declared)?,
            SectionId::Type => module.types = self.read_types_section()?,
            SectionId::Import => module.imports = self.read_imports_section()?,
            SectionId::Function => module.functions = self.read_funcs_section()?,
            SectionId::Table => module.tables = self.read_tables_section()?,
            SectionId::Memory => module.memory = self.read_mems_section()?,
            SectionId::Global => module.globals = self.read_globals_section()?,
            SectionId::Export => module.exports = self.read_exports_section()?,
            SectionId::Start => module.start = Some(self.read_start_section()?),
            SectionId::Element => module.elements = self.read_elems_section()?,
            SectionId::Code => module.code = self.read_code_section()?,
            SectionId::Data => module.data = self.read_data_section()?,
            SectionId::DataCount => module.data_count = Some(self.read_u32()?),
        }

        let consumed = self.position() - start;
        if consumed != declared as u64 {
            return Err(self.err(BinaryErrorKind::SectionSizeMismatch { declared, consumed }));
        }
        Ok(true)
    }
}
