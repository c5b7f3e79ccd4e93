// Licensed under the Apache-2.0 license

use arrayvec::ArrayString;
use rsu_image::{SptEntry, SPT_PARTITION_NAME_LEN};

use crate::flash::{FlashDrvError, FlashStorage};

/// Bounded view of one SPT partition.
///
/// All offsets are relative to the start of the partition, and every access
/// is checked against its length before it reaches the flash driver.
pub struct FlashPartition<'a> {
    driver: &'a dyn FlashStorage,
    name: ArrayString<SPT_PARTITION_NAME_LEN>,
    base_offset: usize,
    length: usize,
}

impl<'a> FlashPartition<'a> {
    /// Creates a view of `length` bytes at `base_offset`.
    ///
    /// Returns `Err(FlashDrvError::SIZE)` if the range does not fit in the
    /// device.
    pub fn new(
        driver: &'a dyn FlashStorage,
        name: &str,
        base_offset: usize,
        length: usize,
    ) -> Result<Self, FlashDrvError> {
        let end = base_offset.checked_add(length).ok_or(FlashDrvError::SIZE)?;
        if end > driver.capacity() {
            return Err(FlashDrvError::SIZE);
        }
        let name = ArrayString::from(name).map_err(|_| FlashDrvError::INVAL)?;
        Ok(FlashPartition {
            driver,
            name,
            base_offset,
            length,
        })
    }

    /// View of the range an SPT entry describes.
    pub fn from_entry(
        driver: &'a dyn FlashStorage,
        entry: &SptEntry,
    ) -> Result<Self, FlashDrvError> {
        let base = usize::try_from(entry.offset()).map_err(|_| FlashDrvError::SIZE)?;
        Self::new(driver, entry.name_str(), base, entry.length as usize)
    }

    fn check(&self, partition_offset: usize, len: usize) -> Result<usize, FlashDrvError> {
        match partition_offset.checked_add(len) {
            Some(end) if end <= self.length => Ok(self.base_offset + partition_offset),
            _ => Err(FlashDrvError::SIZE),
        }
    }

    pub fn read(&self, partition_offset: usize, buf: &mut [u8]) -> Result<(), FlashDrvError> {
        let address = self.check(partition_offset, buf.len())?;
        self.driver.read(buf, address)
    }

    pub fn write(&self, partition_offset: usize, buf: &[u8]) -> Result<(), FlashDrvError> {
        let address = self.check(partition_offset, buf.len())?;
        self.driver.write(buf, address)
    }

    pub fn erase(&self, partition_offset: usize, len: usize) -> Result<(), FlashDrvError> {
        let address = self.check(partition_offset, len)?;
        self.driver.erase(address, len)
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_offset(&self) -> usize {
        self.base_offset
    }
}
