//! Guest memory, assembled from one or more host buffers.
//!
//! The guest sees a single flat address space starting at 0.  The console backs it with
//! an ordered list of [`Region`]s, which need not be contiguous in host memory - typically
//! one buffer in each of the console's RAM banks.  Region `n` starts at the guest address
//! following the end of region `n - 1`.
//!
//! Translation never crosses a region boundary: a request that would span two regions,
//! or run off the end of the last, is rejected with [`Error::InvalidAddress`].
//! [`MemoryMap::load()`] is the exception, as bulk image staging is allowed to straddle
//! regions.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use alloc::vec;
use alloc::vec::Vec;
use core::ops::Range;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{Error, Result};

/// One contiguous host buffer backing part of guest memory.
#[derive(Debug, Clone)]
pub struct Region {
    data: Vec<u8>,
}

impl Region {
    /// Create a region taking ownership of an existing buffer.
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Create a zero-filled region.
    pub fn zeroed(size: usize) -> Self {
        Self::new(vec![0u8; size])
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// Where a guest address landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    /// Index of the region, in guest address order
    pub region: usize,
    /// Byte range within that region
    pub range: Range<usize>,
}

/// Ordered list of regions making up guest memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryMap {
    regions: Vec<Region>,
}

impl MemoryMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a map from the given regions, in guest address order.
    pub fn from_regions(regions: impl IntoIterator<Item = Region>) -> Self {
        Self {
            regions: regions.into_iter().collect(),
        }
    }

    /// Append a region after the current end of guest memory.
    pub fn push(&mut self, region: Region) {
        debug!(
            "Guest region {} at {:#010X} size {}KB",
            self.regions.len(),
            self.size(),
            region.size() / 1024
        );
        self.regions.push(region);
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// Total guest memory size in bytes.
    pub fn size(&self) -> usize {
        self.regions.iter().map(Region::size).sum()
    }

    /// Resolve `len` bytes at guest address `addr` to a region and a range within it.
    pub fn resolve(&self, addr: u32, len: usize) -> Result<Location> {
        let mut offset = addr as usize;
        for (index, region) in self.regions.iter().enumerate() {
            if offset < region.size() {
                let end = offset.checked_add(len).ok_or(Error::InvalidAddress)?;
                if end > region.size() {
                    return Err(Error::InvalidAddress);
                }
                return Ok(Location {
                    region: index,
                    range: offset..end,
                });
            }
            offset -= region.size();
        }
        Err(Error::InvalidAddress)
    }

    /// Borrow `len` bytes of guest memory at `addr`.
    pub fn translate(&self, addr: u32, len: usize) -> Result<&[u8]> {
        let location = self.resolve(addr, len)?;
        Ok(&self.regions[location.region].data[location.range])
    }

    /// Mutably borrow `len` bytes of guest memory at `addr`.
    pub fn translate_mut(&mut self, addr: u32, len: usize) -> Result<&mut [u8]> {
        let location = self.resolve(addr, len)?;
        Ok(&mut self.regions[location.region].data[location.range])
    }

    /// Read the word at `addr`, as it is sent on the link: the first byte in guest memory
    /// is the most significant.
    pub fn read_word(&self, addr: u32) -> Result<u32> {
        let bytes = self.translate(addr, 4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Copy `data` into guest memory at `addr`, continuing into following regions as
    /// required.
    pub fn load(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        let end = (addr as usize)
            .checked_add(data.len())
            .ok_or(Error::OutOfMemory)?;
        if end > self.size() {
            return Err(Error::OutOfMemory);
        }

        let mut guest = addr as usize;
        let mut remaining = data;
        while !remaining.is_empty() {
            let location = self.resolve(guest as u32, 1)?;
            let region = &mut self.regions[location.region].data;
            let start = location.range.start;
            let count = remaining.len().min(region.len() - start);
            region[start..start + count].copy_from_slice(&remaining[..count]);
            remaining = &remaining[count..];
            guest += count;
        }
        Ok(())
    }
}
