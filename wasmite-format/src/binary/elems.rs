//! Element section.
//!
//! The section's per-segment kind is a three-bit field: bit 0 selects
//! passive/declarative over active, bit 1 selects an explicit table index
//! (active) or the declarative form (passive), and bit 2 selects expression
//! initializers over function-index lists. Only kind 0 exists in 1.0.

use {
    super::{
        error::{BinaryErrorKind, Result},
        BinaryParser,
    },
    std::io::Read,
    wasmite_runtime::{
        features,
        module::{types::RefType, ConstExpr, ElementMode, ElementSegment},
    },
};

#[derive(Debug, Clone, Copy)]
struct ElemKind {
    bit0: bool,
    bit1: bool,
    bit2: bool,
}

impl ElemKind {
    fn new(fields: u32) -> ElemKind {
        ElemKind {
            bit0: fields & 1 != 0,
            bit1: fields & 2 != 0,
            bit2: fields & 4 != 0,
        }
    }

    fn active(self) -> bool {
        !self.bit0
    }

    fn passive(self) -> bool {
        self.bit0 && !self.bit1
    }

    fn has_table_index(self) -> bool {
        self.active() && self.bit1
    }

    fn has_init_exprs(self) -> bool {
        self.bit2
    }

    fn has_elem_type(self) -> bool {
        self.bit0 || self.bit1
    }
}

impl<R: Read> BinaryParser<R> {
    pub(crate) fn read_elems_section(&mut self) -> Result<Vec<ElementSegment>> {
        self.read_vec(|s| s.read_elem())
    }

    fn read_elem(&mut self) -> Result<ElementSegment> {
        let fields = self.read_u32()?;
        if fields > 7 {
            return Err(self.err(BinaryErrorKind::InvalidElemKind(fields)));
        }
        if fields != 0 {
            self.features()
                .require(features::BULK_MEMORY_OPERATIONS, "element segment kind")
                .map_err(|e| self.err(e.into()))?;
        }
        let kind = ElemKind::new(fields);

        let table_index = if kind.has_table_index() {
            self.read_u32()?
        } else {
            0
        };

        let offset = if kind.active() {
            Some(self.read_const_expr()?)
        } else {
            None
        };

        let (ref_type, init) = if kind.has_init_exprs() {
            let ref_type = if kind.has_elem_type() {
                self.read_ref_type()?
            } else {
                RefType::Func
            };
            (ref_type, self.read_vec(|s| s.read_const_expr())?)
        } else {
            if kind.has_elem_type() {
                // The element kind byte; zero (funcref) is the only value.
                let ek = self.read_byte()?;
                if ek != 0 {
                    return Err(self.err(BinaryErrorKind::InvalidElemKind(ek as u32)));
                }
            }
            let funcs = self.read_vec(|s| s.read_u32())?;
            (
                RefType::Func,
                funcs.into_iter().map(ConstExpr::RefFunc).collect(),
            )
        };

        let mode = if kind.active() {
            ElementMode::Active {
                table_index,
                offset: offset.ok_or_else(|| self.err(BinaryErrorKind::UnexpectedEnd))?,
            }
        } else if kind.passive() {
            ElementMode::Passive
        } else {
            ElementMode::Declarative
        };

        Ok(ElementSegment {
            ref_type,
            mode,
            init,
        })
    }
}
