// Licensed under the Apache-2.0 license

use emulator_periph::{EmulatedFlash, EmulatedSdm, RsuFlashBuilder, FIRST_SLOT_OFFSET};
use rsu::{RsuContext, RsuResult, CMF_MAGIC_NUMBER};
use sdm_mbox_driver::{SdmMailbox, SdmManager};

pub const FLASH_SIZE: usize = 0x100_0000;
pub const SLOT_SIZE: u32 = 0x10_0000;

pub type Session<'a> = RsuContext<'a, SdmMailbox<&'a mut EmulatedSdm>>;

pub fn slot_offset(index: usize) -> u64 {
    FIRST_SLOT_OFFSET + index as u64 * SLOT_SIZE as u64
}

/// CMF image of `len` bytes whose payload is derived from `seed`.
pub fn cmf_image(len: usize, seed: u8) -> Vec<u8> {
    let mut image: Vec<u8> = (0..len).map(|i| (i as u8).wrapping_mul(seed)).collect();
    image[..4].copy_from_slice(&CMF_MAGIC_NUMBER.to_le_bytes());
    image
}

/// An emulated board: the SDM mailbox peer and a QSPI flash holding the
/// default RSU layout plus application partitions P1..Pn.
pub struct Platform {
    pub sdm: EmulatedSdm,
    pub flash: EmulatedFlash,
}

impl Platform {
    pub fn new(app_slots: usize) -> Self {
        let _ = simple_logger::SimpleLogger::new()
            .with_level(log::LevelFilter::Debug)
            .init();
        let flash = EmulatedFlash::new(FLASH_SIZE);
        let mut builder = RsuFlashBuilder::with_default_layout().unwrap();
        for index in 0..app_slots {
            builder
                .add_partition(&format!("P{}", index + 1), slot_offset(index), SLOT_SIZE, 0)
                .unwrap();
        }
        builder.write_to(&flash).unwrap();
        Self {
            sdm: EmulatedSdm::new(),
            flash,
        }
    }

    /// Brings the mailbox up and opens an RSU session, the way a boot loader
    /// does on every boot.
    pub fn session(&mut self) -> RsuResult<Session<'_>> {
        let mut mailbox = SdmMailbox::new(&mut self.sdm);
        mailbox.init()?;
        RsuContext::new(SdmManager::new(mailbox), &self.flash)
    }

    /// Reboots the HPS, which boots whatever image the last update selected.
    pub fn reboot(&mut self) -> RsuResult<()> {
        self.session()?.sdm().reboot_hps()?;
        Ok(())
    }
}
