//! Table instances.

use {
    super::ExpectPoisoned,
    crate::{
        error::{check, Result, TrapKind},
        module::types::TableType,
        values::NULL_REF,
    },
    std::sync::RwLock,
};

/// A table instance: a vector of encoded reference slots plus the table's
/// type. All elements hold values of the table's reference type; growth never
/// exceeds the declared maximum.
///
/// [Spec]: https://webassembly.github.io/spec/core/exec/runtime.html#table-instances
#[derive(Debug)]
pub struct TableInstance {
    pub table_type: TableType,
    elems:          RwLock<Vec<u64>>,
}

impl TableInstance {
    /// Allocates at the declared minimum, filled with null references.
    pub fn new(table_type: TableType) -> TableInstance {
        let elems = vec![NULL_REF; table_type.limits.min as usize];
        TableInstance {
            table_type,
            elems: RwLock::new(elems),
        }
    }

    pub fn size(&self) -> u32 {
        self.elems.read().expect_poisoned().len() as u32
    }

    pub fn get(&self, index: u32) -> Result<u64> {
        self.elems
            .read()
            .expect_poisoned()
            .get(index as usize)
            .copied()
            .ok_or_else(|| TrapKind::OutOfBoundsTableAccess.into())
    }

    pub fn set(&self, index: u32, value: u64) -> Result<()> {
        let mut elems = self.elems.write().expect_poisoned();
        let slot = elems
            .get_mut(index as usize)
            .ok_or(TrapKind::OutOfBoundsTableAccess)?;
        *slot = value;
        Ok(())
    }

    /// `table.grow`: append `delta` copies of `init` and return the old
    /// element count, or None when the result would exceed the maximum.
    pub fn grow(&self, delta: u32, init: u64) -> Option<u32> {
        let mut elems = self.elems.write().expect_poisoned();
        let old_size = elems.len() as u32;
        let new_size = old_size.checked_add(delta)?;
        if let Some(max) = self.table_type.limits.max {
            if new_size > max {
                return None;
            }
        }
        elems.resize(new_size as usize, init);
        Some(old_size)
    }

    /// `table.fill`: set `n` slots starting at `dst`, bounds pre-checked.
    pub fn fill(&self, dst: u32, value: u64, n: u32) -> Result<()> {
        let mut elems = self.elems.write().expect_poisoned();
        let range = table_range(dst, n, elems.len())?;
        elems[range].fill(value);
        Ok(())
    }

    /// `table.init` and active element segments: copy from a segment's
    /// reference list. Both ranges are checked before any slot is written.
    pub fn init(&self, dst: u32, refs: &[u64], src: u32, n: u32) -> Result<()> {
        check(
            (src as u64 + n as u64) <= refs.len() as u64,
            TrapKind::OutOfBoundsTableAccess,
        )?;
        let mut elems = self.elems.write().expect_poisoned();
        let range = table_range(dst, n, elems.len())?;
        elems[range].copy_from_slice(&refs[src as usize..(src + n) as usize]);
        Ok(())
    }

    /// `table.copy` within one table, defined for overlapping ranges.
    pub fn copy_within(&self, dst: u32, src: u32, n: u32) -> Result<()> {
        let mut elems = self.elems.write().expect_poisoned();
        let src_range = table_range(src, n, elems.len())?;
        table_range(dst, n, elems.len())?;
        elems.copy_within(src_range, dst as usize);
        Ok(())
    }

    /// `table.copy` between two distinct tables.
    pub fn copy_from(&self, src_table: &TableInstance, dst: u32, src: u32, n: u32) -> Result<()> {
        let src_elems = src_table.elems.read().expect_poisoned();
        let src_range = table_range(src, n, src_elems.len())?;
        let mut elems = self.elems.write().expect_poisoned();
        let dst_range = table_range(dst, n, elems.len())?;
        elems[dst_range].copy_from_slice(&src_elems[src_range]);
        Ok(())
    }
}

fn table_range(start: u32, n: u32, len: usize) -> Result<std::ops::Range<usize>> {
    check(
        (start as u64 + n as u64) <= len as u64,
        TrapKind::OutOfBoundsTableAccess,
    )?;
    Ok(start as usize..(start + n) as usize)
}
