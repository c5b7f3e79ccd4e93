// Licensed under the Apache-2.0 license

//! Register access seam between the mailbox protocol and the hardware.

/// Word access to the SDM mailbox register block.
///
/// The real implementation performs volatile MMIO; the emulator implements
/// the same register semantics in memory. Offsets are byte offsets from the
/// mailbox base, as listed in `MailboxRegisterMap`.
pub trait MailboxRegs {
    /// Reads the 32-bit register at `offset`.
    fn read(&mut self, offset: u32) -> u32;

    /// Writes the 32-bit register at `offset`.
    fn write(&mut self, offset: u32, value: u32);

    /// Busy-waits for `us` microseconds between polls.
    fn delay_us(&mut self, us: u32);
}

impl<T: MailboxRegs + ?Sized> MailboxRegs for &mut T {
    fn read(&mut self, offset: u32) -> u32 {
        (**self).read(offset)
    }

    fn write(&mut self, offset: u32, value: u32) {
        (**self).write(offset, value)
    }

    fn delay_us(&mut self, us: u32) {
        (**self).delay_us(us)
    }
}
