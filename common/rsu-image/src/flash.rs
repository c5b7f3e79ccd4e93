// Licensed under the Apache-2.0 license

//! Generic interface for the flash device holding RSU images and metadata.

pub use rsu_error::FlashDrvError;

/// Simple interface for reading, writing and erasing arbitrary lengths of
/// data on flash storage. How the device is attached (QSPI, NAND, eMMC) is up
/// to the implementer.
pub trait FlashStorage {
    /// Read from the flash storage, filling the provided buffer with data
    fn read(&self, buffer: &mut [u8], address: usize) -> Result<(), FlashDrvError>;

    /// Write to the flash storage with the full contents of the buffer, starting at the specified address
    fn write(&self, buffer: &[u8], address: usize) -> Result<(), FlashDrvError>;

    /// Erase `length` bytes starting at address `address`. The address must be
    /// in the address space of the physical storage.
    fn erase(&self, address: usize, length: usize) -> Result<(), FlashDrvError>;

    /// Returns the size of the flash storage in bytes.
    fn capacity(&self) -> usize;
}

impl<T: FlashStorage + ?Sized> FlashStorage for &T {
    fn read(&self, buffer: &mut [u8], address: usize) -> Result<(), FlashDrvError> {
        (**self).read(buffer, address)
    }

    fn write(&self, buffer: &[u8], address: usize) -> Result<(), FlashDrvError> {
        (**self).write(buffer, address)
    }

    fn erase(&self, address: usize, length: usize) -> Result<(), FlashDrvError> {
        (**self).erase(address, length)
    }

    fn capacity(&self) -> usize {
        (**self).capacity()
    }
}
