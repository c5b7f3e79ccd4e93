// Licensed under the Apache-2.0 license

use core::mem::size_of;

use log::error;
use rsu_error::{RsuError, RsuResult};
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout};

pub const SPT_MAGIC_NUMBER: u32 = 0x5771_3427;
pub const SPT_VERSION: u32 = 0;
pub const SPT_MAX_ENTRIES: usize = 127;
/// Bytes available for a partition name, including the terminating NUL.
pub const SPT_PARTITION_NAME_LEN: usize = 16;

pub const SPT_FLAG_RESERVED: u32 = 1 << 0;
pub const SPT_FLAG_READONLY: u32 = 1 << 1;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct SptEntry {
    pub name: [u8; SPT_PARTITION_NAME_LEN],
    /// Flash offset as `[low, high]` words.
    pub offset: [u32; 2],
    pub length: u32,
    pub flags: u32,
}

impl SptEntry {
    /// Builds an entry, rejecting names that are empty or do not fit with
    /// their terminator.
    pub fn new(name: &str, offset: u64, length: u32, flags: u32) -> RsuResult<Self> {
        let mut entry = SptEntry::new_zeroed();
        entry.set_name(name)?;
        entry.set_offset(offset);
        entry.length = length;
        entry.flags = flags;
        Ok(entry)
    }

    /// Name bytes up to the first NUL.
    pub fn name_bytes(&self) -> &[u8] {
        let len = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(SPT_PARTITION_NAME_LEN);
        &self.name[..len]
    }

    pub fn name_str(&self) -> &str {
        core::str::from_utf8(self.name_bytes()).unwrap_or("?")
    }

    pub fn set_name(&mut self, name: &str) -> RsuResult<()> {
        let bytes = name.as_bytes();
        if bytes.is_empty() || bytes.len() >= SPT_PARTITION_NAME_LEN || bytes.contains(&0) {
            return Err(RsuError::InvalidArgument);
        }
        self.name = [0; SPT_PARTITION_NAME_LEN];
        self.name[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    pub fn offset(&self) -> u64 {
        self.offset[0] as u64 | (self.offset[1] as u64) << 32
    }

    pub fn set_offset(&mut self, offset: u64) {
        self.offset = [offset as u32, (offset >> 32) as u32];
    }

    /// One past the last byte of the partition. `InvalidArgument` if that
    /// does not fit in 64 bits.
    pub fn end(&self) -> RsuResult<u64> {
        range_end(self.offset(), self.length)
    }

    pub fn is_reserved(&self) -> bool {
        self.flags & SPT_FLAG_RESERVED != 0
    }

    pub fn is_readonly(&self) -> bool {
        self.flags & SPT_FLAG_READONLY != 0
    }

    /// Whether `[offset, offset + length)` intersects this partition.
    pub fn overlaps(&self, offset: u64, length: u32) -> RsuResult<bool> {
        let end = self.end()?;
        let query_end = range_end(offset, length)?;
        Ok(offset < end && self.offset() < query_end)
    }
}

fn range_end(offset: u64, length: u32) -> RsuResult<u64> {
    offset
        .checked_add(length as u64)
        .ok_or(RsuError::InvalidArgument)
}

/// Sub-Partition Table, the flash directory of named regions.
#[repr(C)]
#[derive(Debug, Clone, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct SubPartitionTable {
    pub magic_number: u32,
    pub version: u32,
    pub entries: u32,
    pub reserved: [u32; 5],
    pub partition: [SptEntry; SPT_MAX_ENTRIES],
}

pub const SPT_SIZE: usize = size_of::<SubPartitionTable>();
const _: () = assert!(SPT_SIZE == 4096);

impl SubPartitionTable {
    /// An empty, valid table.
    pub fn new_empty() -> Self {
        let mut spt = SubPartitionTable::new_zeroed();
        spt.magic_number = SPT_MAGIC_NUMBER;
        spt.version = SPT_VERSION;
        spt
    }

    /// Decodes a table from raw flash contents without validating it.
    pub fn from_flash_bytes(bytes: &[u8]) -> RsuResult<Self> {
        let (spt, _) =
            SubPartitionTable::read_from_prefix(bytes).map_err(|_| RsuError::InvalidArgument)?;
        Ok(spt)
    }

    pub fn verify(&self) -> bool {
        if self.magic_number != SPT_MAGIC_NUMBER {
            error!(
                "[rsu] Bad SPT magic number {:#010x}, expected {:#010x}",
                self.magic_number, SPT_MAGIC_NUMBER
            );
            return false;
        }
        if self.entries as usize > SPT_MAX_ENTRIES {
            error!("[rsu] SPT lists {} entries", self.entries);
            return false;
        }
        true
    }

    pub fn verified(self) -> RsuResult<Self> {
        if self.verify() {
            Ok(self)
        } else {
            Err(RsuError::CorruptMetadata)
        }
    }

    pub fn len(&self) -> usize {
        (self.entries as usize).min(SPT_MAX_ENTRIES)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entries(&self) -> &[SptEntry] {
        &self.partition[..self.len()]
    }

    pub fn entry(&self, index: usize) -> RsuResult<&SptEntry> {
        self.entries().get(index).ok_or(RsuError::NotFound)
    }

    pub fn entry_mut(&mut self, index: usize) -> RsuResult<&mut SptEntry> {
        let len = self.len();
        self.partition[..len]
            .get_mut(index)
            .ok_or(RsuError::NotFound)
    }

    /// Index of the first entry called `name`. Names are not required to be
    /// unique in flash; the first match wins.
    pub fn find_slot_by_name(&self, name: &str) -> Option<usize> {
        self.entries()
            .iter()
            .position(|entry| entry.name_bytes() == name.as_bytes())
    }

    /// Index of the first entry starting at `offset`.
    pub fn find_slot_by_offset(&self, offset: u64) -> Option<usize> {
        self.entries()
            .iter()
            .position(|entry| entry.offset() == offset)
    }

    /// Index of the first entry intersecting `[offset, offset + length)`.
    pub fn find_overlap(&self, offset: u64, length: u32) -> RsuResult<Option<usize>> {
        for (index, entry) in self.entries().iter().enumerate() {
            if entry.overlaps(offset, length)? {
                return Ok(Some(index));
            }
        }
        Ok(None)
    }

    /// Appends `entry`, returning its index.
    pub fn push(&mut self, entry: SptEntry) -> RsuResult<usize> {
        let index = self.len();
        if index >= SPT_MAX_ENTRIES {
            return Err(RsuError::InvalidArgument);
        }
        self.partition[index] = entry;
        self.entries = index as u32 + 1;
        Ok(index)
    }

    /// Removes entry `index`, shifting the following entries down.
    pub fn remove(&mut self, index: usize) -> RsuResult<SptEntry> {
        let len = self.len();
        if index >= len {
            return Err(RsuError::NotFound);
        }
        let removed = self.partition[index];
        self.partition.copy_within(index + 1..len, index);
        self.partition[len - 1] = SptEntry::new_zeroed();
        self.entries = len as u32 - 1;
        Ok(removed)
    }
}
