/*++

Licensed under the Apache-2.0 license.

File Name:

    context.rs

Abstract:

    File contains the RSU context: the SDM connection, the flash device and
    scratch copies of the SPT and CPB, with whole-table load and save.

--*/

use log::{error, info};
use rsu_config::RsuLayout;
use rsu_error::{RsuError, RsuResult};
use rsu_image::{
    CmfPointerBlock, SubPartitionTable, CPB_MAX_SLOTS, CPB_SIZE, SPT_SIZE,
};
use sdm_mbox_common::RsuStatusInfo;
use sdm_mbox_driver::{MailboxTransport, SdmManager};
use zerocopy::IntoBytes;

use crate::flash::FlashStorage;
use crate::image_verifier::{CmfImageVerifier, ImageVerifier};

/// Snapshot returned by [`RsuContext::list`].
pub struct RsuListing<'c> {
    pub status: RsuStatusInfo,
    pub spt_offsets: [u64; 2],
    pub cpb_offset: u64,
    pub spt: &'c SubPartitionTable,
    pub cpb: &'c CmfPointerBlock,
}

/// State of one RSU session.
///
/// The SPT and CPB held here are scratch copies. Every operation reloads
/// them from flash, so nothing carries over between calls except what was
/// written back. A failed load leaves the previous copy untouched.
pub struct RsuContext<'a, T: MailboxTransport> {
    pub(crate) sdm: SdmManager<T>,
    pub(crate) flash: &'a dyn FlashStorage,
    pub(crate) verifier: &'a dyn ImageVerifier,
    pub(crate) layout: RsuLayout,
    spt_offsets: [u64; 2],
    pub(crate) spt: SubPartitionTable,
    pub(crate) cpb: CmfPointerBlock,
}

impl<'a, T: MailboxTransport> RsuContext<'a, T> {
    /// Opens a session with the default layout, asking the SDM where the
    /// sub-partition tables live.
    pub fn new(sdm: SdmManager<T>, flash: &'a dyn FlashStorage) -> RsuResult<Self> {
        Self::with_layout(sdm, flash, RsuLayout::DEFAULT)
    }

    pub fn with_layout(
        mut sdm: SdmManager<T>,
        flash: &'a dyn FlashStorage,
        layout: RsuLayout,
    ) -> RsuResult<Self> {
        let offsets = sdm.get_subpartition_offsets()?;
        let spt0 = offsets
            .get(layout.spt0_index)
            .ok_or(RsuError::InvalidArgument)?;
        let spt1 = offsets
            .get(layout.spt1_index)
            .ok_or(RsuError::InvalidArgument)?;
        info!("[rsu] SPT0 at {:#010x}, SPT1 at {:#010x}", spt0, spt1);

        Ok(Self {
            sdm,
            flash,
            verifier: &CmfImageVerifier,
            layout,
            spt_offsets: [*spt0 as u64, *spt1 as u64],
            spt: SubPartitionTable::new_empty(),
            cpb: CmfPointerBlock::new_empty(0),
        })
    }

    /// Replaces the header checks applied by the non-raw program and verify
    /// operations.
    pub fn set_image_verifier(&mut self, verifier: &'a dyn ImageVerifier) {
        self.verifier = verifier;
    }

    pub fn sdm(&mut self) -> &mut SdmManager<T> {
        &mut self.sdm
    }

    pub fn into_sdm(self) -> SdmManager<T> {
        self.sdm
    }

    pub fn spt_offsets(&self) -> [u64; 2] {
        self.spt_offsets
    }

    /// Last successfully loaded SPT.
    pub fn spt(&self) -> &SubPartitionTable {
        &self.spt
    }

    /// Last successfully loaded CPB.
    pub fn cpb(&self) -> &CmfPointerBlock {
        &self.cpb
    }

    fn read_spt_at(&self, offset: u64) -> RsuResult<SubPartitionTable> {
        let mut buf = [0u8; SPT_SIZE];
        self.flash.read(&mut buf, offset as usize)?;
        SubPartitionTable::from_flash_bytes(&buf)?.verified()
    }

    /// Reads SPT0, the authoritative copy.
    pub fn load_spt(&mut self) -> RsuResult<&SubPartitionTable> {
        let spt = self.read_spt_at(self.spt_offsets[0]).inspect_err(|_| {
            error!("[rsu] SPT0 at {:#x} is corrupt", self.spt_offsets[0]);
        })?;
        self.spt = spt;
        Ok(&self.spt)
    }

    fn entry_offset(&self, name: &str) -> Option<u64> {
        self.spt
            .find_slot_by_name(name)
            .and_then(|index| self.spt.entry(index).ok())
            .map(|entry| entry.offset())
    }

    /// Flash offset of the CPB, as listed in the loaded SPT.
    pub fn cpb_offset(&self) -> RsuResult<u64> {
        self.entry_offset(self.layout.cpb_name).ok_or_else(|| {
            error!("[rsu] No {} entry in the SPT", self.layout.cpb_name);
            RsuError::NotFound
        })
    }

    /// Reads the CPB from the offset listed in the loaded SPT.
    pub fn load_cpb(&mut self) -> RsuResult<&CmfPointerBlock> {
        let offset = self.cpb_offset()?;
        let mut buf = [0u8; CPB_SIZE];
        self.flash.read(&mut buf, offset as usize)?;
        let cpb = CmfPointerBlock::from_flash_bytes(&buf)?
            .verified()
            .inspect_err(|_| error!("[rsu] CPB at {:#x} is corrupt", offset))?;
        self.cpb = cpb;
        Ok(&self.cpb)
    }

    /// Loads the SPT and then the CPB it points to.
    pub fn load(&mut self) -> RsuResult<()> {
        self.load_spt()?;
        self.load_cpb()?;
        Ok(())
    }

    fn write_table(&self, offset: u64, size: usize, bytes: &[u8]) -> RsuResult<()> {
        self.flash.erase(offset as usize, size)?;
        self.flash.write(bytes, offset as usize)?;
        Ok(())
    }

    /// Writes the scratch SPT to SPT1 and then SPT0.
    pub fn save_spt(&mut self) -> RsuResult<()> {
        for offset in [self.spt_offsets[1], self.spt_offsets[0]] {
            self.write_table(offset, self.layout.spt_size, self.spt.as_bytes())?;
        }
        info!("[rsu] Saved SPT with {} entries", self.spt.len());
        Ok(())
    }

    /// Writes the scratch CPB to CPB0 and, if the SPT lists one, CPB1.
    pub fn save_cpb(&mut self) -> RsuResult<()> {
        let primary = self.cpb_offset()?;
        self.write_table(primary, self.layout.cpb_size, self.cpb.as_bytes())?;
        if let Some(backup) = self.entry_offset(self.layout.cpb_backup_name) {
            self.write_table(backup, self.layout.cpb_size, self.cpb.as_bytes())?;
        }
        info!("[rsu] Saved CPB at {:#x}", primary);
        Ok(())
    }

    /// Copies the SPT in flash into `buf`. Returns the number of bytes.
    pub fn save_spt_to(&mut self, buf: &mut [u8]) -> RsuResult<usize> {
        let bytes = self.load_spt()?.as_bytes();
        let dest = buf.get_mut(..bytes.len()).ok_or(RsuError::InvalidArgument)?;
        dest.copy_from_slice(bytes);
        Ok(bytes.len())
    }

    /// Replaces both SPT copies with the table in `buf`.
    pub fn restore_spt_from(&mut self, buf: &[u8]) -> RsuResult<()> {
        let spt = SubPartitionTable::from_flash_bytes(buf)?.verified()?;
        self.spt = spt;
        info!("[rsu] Restoring SPT");
        self.save_spt()
    }

    /// Copies the CPB in flash into `buf`. Returns the number of bytes.
    pub fn save_cpb_to(&mut self, buf: &mut [u8]) -> RsuResult<usize> {
        self.load_spt()?;
        let bytes = self.load_cpb()?.as_bytes();
        let dest = buf.get_mut(..bytes.len()).ok_or(RsuError::InvalidArgument)?;
        dest.copy_from_slice(bytes);
        Ok(bytes.len())
    }

    /// Replaces the CPB copies with the block in `buf`. The SPT must be
    /// intact since it locates the CPB.
    pub fn restore_cpb_from(&mut self, buf: &[u8]) -> RsuResult<()> {
        let cpb = CmfPointerBlock::from_flash_bytes(buf)?.verified()?;
        self.load_spt()?;
        self.cpb = cpb;
        info!("[rsu] Restoring CPB");
        self.save_cpb()
    }

    /// Writes a CPB with every pointer unused. Used to recover from a corrupt
    /// CPB.
    pub fn create_empty_cpb(&mut self) -> RsuResult<()> {
        self.load_spt()?;
        self.cpb = CmfPointerBlock::new_empty(CPB_MAX_SLOTS);
        info!("[rsu] Creating empty CPB");
        self.save_cpb()
    }

    /// Status, SPT and CPB in one go.
    pub fn list(&mut self) -> RsuResult<RsuListing<'_>> {
        let status = self.sdm.get_status()?;
        self.load()?;
        let cpb_offset = self.cpb_offset()?;
        Ok(RsuListing {
            status,
            spt_offsets: self.spt_offsets,
            cpb_offset,
            spt: &self.spt,
            cpb: &self.cpb,
        })
    }
}
