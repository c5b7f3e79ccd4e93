// Licensed under the Apache-2.0 license

use sdm_mbox_common::hil::MailboxRegs;

/// Memory-mapped SDM mailbox register block.
pub struct MmioMailboxRegs<D: FnMut(u32)> {
    base: usize,
    delay: D,
}

impl<D: FnMut(u32)> MmioMailboxRegs<D> {
    /// # Safety
    ///
    /// `base` must be the address of the SDM mailbox register block, mapped
    /// for the lifetime of the returned value and not accessed through any
    /// other path while it is alive.
    pub const unsafe fn new(base: usize, delay: D) -> Self {
        Self { base, delay }
    }
}

impl<D: FnMut(u32)> MailboxRegs for MmioMailboxRegs<D> {
    fn read(&mut self, offset: u32) -> u32 {
        // SAFETY: the constructor's contract covers the whole register window.
        unsafe { core::ptr::read_volatile((self.base + offset as usize) as *const u32) }
    }

    fn write(&mut self, offset: u32, value: u32) {
        // SAFETY: the constructor's contract covers the whole register window.
        unsafe { core::ptr::write_volatile((self.base + offset as usize) as *mut u32, value) }
    }

    fn delay_us(&mut self, us: u32) {
        (self.delay)(us)
    }
}
