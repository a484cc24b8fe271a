//! Custom sections. The `name` section is decoded into the module record;
//! every other custom section is skipped.

use {
    super::{
        error::{BinaryErrorKind, Result},
        BinaryParser,
    },
    std::io::Read,
    wasmite_runtime::module::Module,
};

const SUBSECTION_MODULE_NAME: u8 = 0;
const SUBSECTION_FUNCTION_NAMES: u8 = 1;

impl<R: Read> BinaryParser<R> {
    pub(crate) fn read_custom_section(&mut self, module: &mut Module, size: u32) -> Result<()> {
        let start = self.position();
        let name = self.read_name()?;
        let name_len = self.position() - start;
        let remaining = (size as u64)
            .checked_sub(name_len)
            .ok_or_else(|| self.err(BinaryErrorKind::UnexpectedEnd))?;
        if name == "name" {
            self.read_name_section(module, remaining)
        } else {
            self.skip(remaining)
        }
    }

    /// The name section: a sequence of size-prefixed subsections. Unknown
    /// subsections are skipped.
    ///
    /// [Spec]: https://webassembly.github.io/spec/core/appendix/custom.html#name-section
    fn read_name_section(&mut self, module: &mut Module, size: u64) -> Result<()> {
        let end = self.position() + size;
        while self.position() < end {
            let id = self.read_byte()?;
            let sub_size = self.read_u32()? as u64;
            let sub_end = self.position() + sub_size;
            match id {
                SUBSECTION_MODULE_NAME => {
                    module.names.module_name = Some(self.read_name()?);
                }
                SUBSECTION_FUNCTION_NAMES => {
                    let entries = self.read_vec(|s| {
                        let index = s.read_u32()?;
                        let name = s.read_name()?;
                        Ok((index, name))
                    })?;
                    module.names.function_names = entries.into_iter().collect();
                }
                _ => self.skip(sub_size)?,
            }
            if self.position() != sub_end {
                return Err(self.err(BinaryErrorKind::SectionSizeMismatch {
                    declared: sub_size as u32,
                    consumed: sub_size + self.position() - sub_end,
                }));
            }
        }
        Ok(())
    }

    fn skip(&mut self, n: u64) -> Result<()> {
        let copied = {
            let mut limited = self.by_ref().take(n);
            std::io::copy(&mut limited, &mut std::io::sink())
        };
        match copied {
            Ok(copied) if copied == n => Ok(()),
            Ok(_) => Err(self.err(BinaryErrorKind::UnexpectedEnd)),
            Err(e) => Err(self.err(BinaryErrorKind::Io(e))),
        }
    }
}
