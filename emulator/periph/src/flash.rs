/*++

Licensed under the Apache-2.0 license.

File Name:

    flash.rs

Abstract:

    File contains an in-memory flash device, optionally backed by a file.

--*/

use rsu_image::flash::{FlashDrvError, FlashStorage};
use std::cell::{Cell, RefCell};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Erased flash reads back as this byte.
pub const ERASED_BYTE: u8 = 0xff;

/// Byte-addressable flash device.
///
/// Contents live in memory. When opened on a file every write and erase is
/// written through to the file first.
pub struct EmulatedFlash {
    data: RefCell<Vec<u8>>,
    file: RefCell<Option<File>>,
    fail_writes: Cell<bool>,
    writes: Cell<usize>,
    erases: Cell<usize>,
}

impl EmulatedFlash {
    /// Fully erased in-memory flash of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: RefCell::new(vec![ERASED_BYTE; capacity]),
            file: RefCell::new(None),
            fail_writes: Cell::new(false),
            writes: Cell::new(0),
            erases: Cell::new(0),
        }
    }

    fn initialize_flash_storage(file: &mut File, from: usize, size: usize) -> std::io::Result<()> {
        file.seek(SeekFrom::Start(from as u64))?;
        let mut remaining = size - from;
        let chunk = vec![ERASED_BYTE; 1048576]; // 1MB chunk
        while remaining > 0 {
            let write_size = std::cmp::min(remaining, chunk.len());
            file.write_all(&chunk[..write_size])?;
            remaining -= write_size;
        }
        Ok(())
    }

    /// Opens (or creates) a flash image file of `capacity` bytes. A shorter
    /// file is extended with erased bytes; a longer one is rejected.
    pub fn open(path: &Path, capacity: usize) -> std::io::Result<Self> {
        let mut file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let len = file.metadata()?.len() as usize;
        if len > capacity {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("flash file is {len} bytes, larger than {capacity}"),
            ));
        }
        if len < capacity {
            Self::initialize_flash_storage(&mut file, len, capacity)?;
        }

        let mut data = vec![0; capacity];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut data)?;

        Ok(Self {
            data: RefCell::new(data),
            file: RefCell::new(Some(file)),
            fail_writes: Cell::new(false),
            writes: Cell::new(0),
            erases: Cell::new(0),
        })
    }

    /// Makes every following write and erase fail until cleared.
    pub fn inject_write_failure(&self, fail: bool) {
        self.fail_writes.set(fail);
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        self.writes.get()
    }

    /// Number of successful erases so far.
    pub fn erase_count(&self) -> usize {
        self.erases.get()
    }

    /// Copy of `len` bytes at `address`.
    pub fn contents(&self, address: usize, len: usize) -> Vec<u8> {
        self.data.borrow()[address..address + len].to_vec()
    }

    fn check_range(&self, address: usize, len: usize) -> Result<(), FlashDrvError> {
        match address.checked_add(len) {
            Some(end) if end <= self.capacity() => Ok(()),
            _ => Err(FlashDrvError::SIZE),
        }
    }

    fn store(&self, address: usize, bytes: &[u8]) -> Result<(), FlashDrvError> {
        if self.fail_writes.get() {
            return Err(FlashDrvError::FAIL);
        }
        if let Some(file) = self.file.borrow_mut().as_mut() {
            file.seek(SeekFrom::Start(address as u64))
                .and_then(|_| file.write_all(bytes))
                .map_err(|_| FlashDrvError::FAIL)?;
        }
        self.data.borrow_mut()[address..address + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

impl FlashStorage for EmulatedFlash {
    fn read(&self, buffer: &mut [u8], address: usize) -> Result<(), FlashDrvError> {
        self.check_range(address, buffer.len())?;
        buffer.copy_from_slice(&self.data.borrow()[address..address + buffer.len()]);
        Ok(())
    }

    fn write(&self, buffer: &[u8], address: usize) -> Result<(), FlashDrvError> {
        self.check_range(address, buffer.len())?;
        self.store(address, buffer)?;
        self.writes.set(self.writes.get() + 1);
        Ok(())
    }

    fn erase(&self, address: usize, length: usize) -> Result<(), FlashDrvError> {
        self.check_range(address, length)?;
        self.store(address, &vec![ERASED_BYTE; length])?;
        self.erases.set(self.erases.get() + 1);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.data.borrow().len()
    }
}
