//! Data section. Kind 0 is the 1.0 active form; kinds 1 (passive) and 2
//! (active with an explicit memory index) arrive with bulk memory.

use {
    super::{
        error::{BinaryErrorKind, Result},
        BinaryParser,
    },
    std::io::Read,
    wasmite_runtime::{
        features,
        module::{DataMode, DataSegment},
    },
};

impl<R: Read> BinaryParser<R> {
    pub(crate) fn read_data_section(&mut self) -> Result<Vec<DataSegment>> {
        self.read_vec(|s| s.read_data())
    }

    fn read_data(&mut self) -> Result<DataSegment> {
        let kind = self.read_u32()?;
        if kind != 0 {
            self.features()
                .require(features::BULK_MEMORY_OPERATIONS, "data segment kind")
                .map_err(|e| self.err(e.into()))?;
        }
        let mode = match kind {
            0 => DataMode::Active {
                memory_index: 0,
                offset:       self.read_const_expr()?,
            },
            1 => DataMode::Passive,
            2 => DataMode::Active {
                memory_index: self.read_u32()?,
                offset:       self.read_const_expr()?,
            },
            other => return Err(self.err(BinaryErrorKind::InvalidDataKind(other))),
        };
        Ok(DataSegment {
            mode,
            init: self.read_bytes()?,
        })
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        wasmite_runtime::{
            features::{FEATURES_CORE_1, FEATURES_CORE_2},
            module::ConstExpr,
        },
    };

    #[test]
    fn active_and_passive_segments() {
        // count=2: (kind 0, i32.const 0, "hi"), (kind 1, "go")
        let bytes = [
            0x02, 0x00, 0x41, 0x00, 0x0B, 0x02, b'h', b'i', 0x01, 0x02, b'g', b'o',
        ];
        let data = BinaryParser::new(&bytes[..], FEATURES_CORE_2)
            .read_data_section()
            .unwrap();
        assert!(matches!(
            data[0].mode,
            DataMode::Active {
                memory_index: 0,
                offset: ConstExpr::I32(0)
            }
        ));
        assert_eq!(&*data[0].init, b"hi");
        assert!(data[1].is_passive());
        assert_eq!(&*data[1].init, b"go");
    }

    #[test]
    fn passive_segments_gate_on_bulk_memory() {
        let bytes = [0x01, 0x01, 0x00];
        let err = BinaryParser::new(&bytes[..], FEATURES_CORE_1)
            .read_data_section()
            .unwrap_err();
        assert_eq!(
            err.kind.to_string(),
            "data segment kind is not supported as feature bulk-memory-operations is disabled"
        );
    }
}
