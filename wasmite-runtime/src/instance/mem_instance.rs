//! Linear memory instances.

use {
    super::ExpectPoisoned,
    crate::{
        error::{check, Result, TrapKind},
        module::types::MemoryType,
    },
    std::sync::RwLock,
};

/// The WebAssembly page size, 64 KiB.
pub const PAGE_SIZE: usize = 65536;

/// The absolute ceiling on memory size: 65536 pages, 4 GiB.
pub const MEMORY_LIMIT_PAGES: u32 = 65536;

/// A memory instance: a byte buffer whose length is always a whole number of
/// pages, between the declared minimum and the effective maximum.
///
/// The buffer carries its own lock so that concurrent calls against the same
/// instance are safe; the runtime adds no ordering beyond it. Growth never
/// shrinks the buffer.
///
/// [Spec]: https://webassembly.github.io/spec/core/exec/runtime.html#memory-instances
#[derive(Debug)]
pub struct MemoryInstance {
    pub mem_type: MemoryType,
    /// Effective maximum in pages: the declared max clamped to the configured
    /// hard limit, or the limit itself when the module declares none.
    pub max_pages: u32,
    data:         RwLock<Vec<u8>>,
}

impl MemoryInstance {
    /// Allocates the buffer at `min` pages, reserving `capacity_pages` up
    /// front. The reservation affects allocation only, never the reported
    /// size.
    pub fn new(mem_type: MemoryType, capacity_pages: u32, limit_pages: u32) -> MemoryInstance {
        let max_pages = mem_type.limits.max.unwrap_or(limit_pages).min(limit_pages);
        let mut data = Vec::with_capacity(capacity_pages as usize * PAGE_SIZE);
        data.resize(mem_type.limits.min as usize * PAGE_SIZE, 0);
        MemoryInstance {
            mem_type,
            max_pages,
            data: RwLock::new(data),
        }
    }

    /// Current size in pages.
    pub fn size(&self) -> u32 {
        (self.data.read().expect_poisoned().len() / PAGE_SIZE) as u32
    }

    /// Current size in bytes.
    pub fn byte_len(&self) -> usize {
        self.data.read().expect_poisoned().len()
    }

    /// `memory.grow`: append `delta` zeroed pages and return the old page
    /// count, or None (the −1 case) when the result would exceed the
    /// effective maximum. No mutation happens on failure.
    pub fn grow(&self, delta: u32) -> Option<u32> {
        let mut data = self.data.write().expect_poisoned();
        let old_pages = (data.len() / PAGE_SIZE) as u32;
        let new_pages = old_pages.checked_add(delta)?;
        if new_pages > self.max_pages {
            return None;
        }
        data.resize(new_pages as usize * PAGE_SIZE, 0);
        Some(old_pages)
    }

    /// Load `n` (1..=8) bytes at `addr` as a little-endian, zero-extended
    /// 64-bit value.
    pub fn load_le(&self, addr: u64, n: usize) -> Result<u64> {
        let data = self.data.read().expect_poisoned();
        let range = offset_range(addr, n, data.len())?;
        let mut buf = [0u8; 8];
        buf[..n].copy_from_slice(&data[range]);
        Ok(u64::from_le_bytes(buf))
    }

    /// Store the low `n` (1..=8) bytes of `value` at `addr`, little-endian.
    pub fn store_le(&self, addr: u64, n: usize, value: u64) -> Result<()> {
        let mut data = self.data.write().expect_poisoned();
        let range = offset_range(addr, n, data.len())?;
        data[range].copy_from_slice(&value.to_le_bytes()[..n]);
        Ok(())
    }

    /// Host-side read of a byte range.
    pub fn read(&self, addr: u64, buf: &mut [u8]) -> Result<()> {
        let data = self.data.read().expect_poisoned();
        let range = offset_range(addr, buf.len(), data.len())?;
        buf.copy_from_slice(&data[range]);
        Ok(())
    }

    /// Host-side write of a byte range.
    pub fn write(&self, addr: u64, bytes: &[u8]) -> Result<()> {
        let mut data = self.data.write().expect_poisoned();
        let range = offset_range(addr, bytes.len(), data.len())?;
        data[range].copy_from_slice(bytes);
        Ok(())
    }

    /// `memory.init` and active data segments: copy `n` bytes from
    /// `src[src_offset..]` to `dst`. Bounds on both sides are checked before
    /// any byte is written.
    pub fn init(&self, dst: u64, src: &[u8], src_offset: u64, n: u64) -> Result<()> {
        let src_end = src_offset.checked_add(n);
        check(
            src_end.is_some_and(|end| end <= src.len() as u64),
            TrapKind::OutOfBoundsMemoryAccess,
        )?;
        let mut data = self.data.write().expect_poisoned();
        let range = offset_range(dst, n as usize, data.len())?;
        data[range].copy_from_slice(&src[src_offset as usize..(src_offset + n) as usize]);
        Ok(())
    }

    /// `memory.copy`, defined for overlapping ranges.
    pub fn copy_within(&self, dst: u64, src: u64, n: u64) -> Result<()> {
        let mut data = self.data.write().expect_poisoned();
        let src_range = offset_range(src, n as usize, data.len())?;
        offset_range(dst, n as usize, data.len())?;
        data.copy_within(src_range, dst as usize);
        Ok(())
    }

    /// `memory.fill`.
    pub fn fill(&self, dst: u64, val: u8, n: u64) -> Result<()> {
        let mut data = self.data.write().expect_poisoned();
        let range = offset_range(dst, n as usize, data.len())?;
        data[range].fill(val);
        Ok(())
    }
}

fn offset_range(addr: u64, n: usize, len: usize) -> Result<std::ops::Range<usize>> {
    let end = addr.checked_add(n as u64);
    check(
        end.is_some_and(|end| end <= len as u64),
        TrapKind::OutOfBoundsMemoryAccess,
    )?;
    let addr = addr as usize;
    Ok(addr..addr + n)
}
