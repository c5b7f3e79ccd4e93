/*++

Licensed under the Apache-2.0 license.

File Name:

    rsu_flash.rs

Abstract:

    File contains a builder that formats a flash device with the RSU
    metadata partitions: both SPT copies and both CPB copies.

--*/

use log::info;
use rsu_error::{RsuError, RsuResult};
use rsu_image::flash::FlashStorage;
use rsu_image::{
    CmfPointerBlock, SptEntry, SubPartitionTable, CPB_MAX_SLOTS, SPT_FLAG_RESERVED,
};
use zerocopy::IntoBytes;

pub const BOOT_INFO_OFFSET: u64 = 0x0;
pub const BOOT_INFO_SIZE: u32 = 0x1_0000;
pub const FACTORY_IMAGE_OFFSET: u64 = 0x1_0000;
pub const FACTORY_IMAGE_SIZE: u32 = 0xf_0000;
pub const SPT0_OFFSET: u64 = 0x10_0000;
pub const SPT1_OFFSET: u64 = 0x10_8000;
pub const CPB0_OFFSET: u64 = 0x11_0000;
pub const CPB1_OFFSET: u64 = 0x11_8000;
/// Size of each SPT and CPB partition.
pub const METADATA_PARTITION_SIZE: u32 = 0x8000;
/// First offset past the factory and metadata partitions.
pub const FIRST_SLOT_OFFSET: u64 = 0x20_0000;
pub const DEFAULT_FLASH_SIZE: usize = 0x400_0000;

/// Lays out the RSU metadata of a flash device.
///
/// The SPT lists every partition, including the metadata ones. The pointer
/// block is written to every partition named `CPB0` or `CPB1`.
pub struct RsuFlashBuilder {
    spt: SubPartitionTable,
    cpb: CmfPointerBlock,
    spt_offsets: [u64; 2],
}

impl Default for RsuFlashBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RsuFlashBuilder {
    /// No partitions and an empty pointer block.
    pub fn new() -> Self {
        Self {
            spt: SubPartitionTable::new_empty(),
            cpb: CmfPointerBlock::new_empty(CPB_MAX_SLOTS),
            spt_offsets: [SPT0_OFFSET, SPT1_OFFSET],
        }
    }

    /// The boot info, factory image and metadata partitions, all reserved.
    pub fn with_default_layout() -> RsuResult<Self> {
        let mut builder = Self::new();
        let layout = [
            ("BOOT_INFO", BOOT_INFO_OFFSET, BOOT_INFO_SIZE),
            ("FACTORY_IMAGE", FACTORY_IMAGE_OFFSET, FACTORY_IMAGE_SIZE),
            ("SPT0", SPT0_OFFSET, METADATA_PARTITION_SIZE),
            ("SPT1", SPT1_OFFSET, METADATA_PARTITION_SIZE),
            ("CPB0", CPB0_OFFSET, METADATA_PARTITION_SIZE),
            ("CPB1", CPB1_OFFSET, METADATA_PARTITION_SIZE),
        ];
        for (name, offset, length) in layout {
            builder.add_partition(name, offset, length, SPT_FLAG_RESERVED)?;
        }
        Ok(builder)
    }

    /// Adds a partition. Names must be unique and ranges must not overlap.
    pub fn add_partition(
        &mut self,
        name: &str,
        offset: u64,
        length: u32,
        flags: u32,
    ) -> RsuResult<usize> {
        if self.spt.find_slot_by_name(name).is_some() {
            return Err(RsuError::AlreadyExists);
        }
        if self.spt.find_overlap(offset, length)?.is_some() {
            return Err(RsuError::InvalidArgument);
        }
        self.spt.push(SptEntry::new(name, offset, length, flags)?)
    }

    /// Number of pointer slots in the CPB. Clears existing pointers.
    pub fn cpb_slots(&mut self, nslots: usize) -> &mut Self {
        self.cpb = CmfPointerBlock::new_empty(nslots);
        self
    }

    /// Fills the pointer block from `pointers`, lowest priority first.
    pub fn set_pointers(&mut self, pointers: &[u64]) -> RsuResult<&mut Self> {
        if pointers.len() > self.cpb.slots().len() {
            return Err(RsuError::InvalidArgument);
        }
        self.cpb.pointer_slot[..pointers.len()].copy_from_slice(pointers);
        Ok(self)
    }

    /// Where the two SPT copies go. Must match what the SDM reports.
    pub fn spt_offsets(&mut self, spt0: u64, spt1: u64) -> &mut Self {
        self.spt_offsets = [spt0, spt1];
        self
    }

    pub fn spt(&self) -> &SubPartitionTable {
        &self.spt
    }

    pub fn cpb(&self) -> &CmfPointerBlock {
        &self.cpb
    }

    /// Erases the metadata partitions of `flash` and writes the tables.
    pub fn write_to(&self, flash: &dyn FlashStorage) -> RsuResult<()> {
        for offset in self.spt_offsets {
            write_partition(flash, offset as usize, self.spt.as_bytes())?;
        }
        for name in ["CPB0", "CPB1"] {
            let Some(index) = self.spt.find_slot_by_name(name) else {
                continue;
            };
            let entry = self.spt.entry(index)?;
            write_partition(flash, entry.offset() as usize, self.cpb.as_bytes())?;
        }
        info!(
            "[rsu-flash] Formatted {} partitions, {} CPB slots",
            self.spt.len(),
            self.cpb.slots().len()
        );
        Ok(())
    }
}

fn write_partition(flash: &dyn FlashStorage, offset: usize, bytes: &[u8]) -> RsuResult<()> {
    flash.erase(offset, METADATA_PARTITION_SIZE as usize)?;
    flash.write(bytes, offset)?;
    Ok(())
}
