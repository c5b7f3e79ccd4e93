// Licensed under the Apache-2.0 license

use arrayvec::ArrayString;
use log::{error, info, warn};
use rsu_error::{RsuError, RsuResult};
use rsu_image::{SptEntry, SPT_PARTITION_NAME_LEN};
use sdm_mbox_driver::MailboxTransport;

use crate::context::RsuContext;
use crate::flash::FlashPartition;

/// Chunk size used when reading a slot back for comparison.
const VERIFY_CHUNK_SIZE: usize = 256;

/// Everything known about one slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo {
    pub name: ArrayString<SPT_PARTITION_NAME_LEN>,
    pub offset: u64,
    pub size: u32,
    /// 1 is the highest priority, 0 means the slot is disabled.
    pub priority: u32,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ImageKind {
    Application,
    FactoryUpdate,
    Raw,
}

impl<'a, T: MailboxTransport> RsuContext<'a, T> {
    fn slot_entry(&self, slot: usize) -> RsuResult<SptEntry> {
        self.spt.entry(slot).copied()
    }

    /// Entry of a slot the slot manager may modify.
    fn mutable_slot_entry(&self, slot: usize) -> RsuResult<SptEntry> {
        let entry = self.slot_entry(slot)?;
        if entry.is_reserved() || entry.is_readonly() {
            warn!("[rsu] Slot {} ({}) is protected", slot, entry.name_str());
            return Err(RsuError::InvalidArgument);
        }
        Ok(entry)
    }

    fn slot_partition(&self, entry: &SptEntry) -> RsuResult<FlashPartition<'a>> {
        Ok(FlashPartition::from_entry(self.flash, entry)?)
    }

    pub fn slot_count(&mut self) -> RsuResult<usize> {
        Ok(self.load_spt()?.len())
    }

    /// Index of the first slot called `name`.
    pub fn slot_by_name(&mut self, name: &str) -> RsuResult<usize> {
        self.load_spt()?
            .find_slot_by_name(name)
            .ok_or(RsuError::NotFound)
    }

    pub fn slot_get_info(&mut self, slot: usize) -> RsuResult<SlotInfo> {
        self.load()?;
        let entry = self.slot_entry(slot)?;
        let name = ArrayString::from(entry.name_str()).map_err(|_| RsuError::CorruptMetadata)?;
        Ok(SlotInfo {
            name,
            offset: entry.offset(),
            size: entry.length,
            priority: self.cpb.priority_of(entry.offset()),
        })
    }

    pub fn slot_size(&mut self, slot: usize) -> RsuResult<u32> {
        self.load_spt()?;
        Ok(self.slot_entry(slot)?.length)
    }

    /// Priority rank of a slot, 1 being the highest and 0 disabled.
    pub fn slot_priority(&mut self, slot: usize) -> RsuResult<u32> {
        self.load()?;
        let entry = self.slot_entry(slot)?;
        Ok(self.cpb.priority_of(entry.offset()))
    }

    /// Adds a slot to the SPT. Returns its index.
    pub fn slot_create(&mut self, name: &str, offset: u64, size: u32) -> RsuResult<usize> {
        self.load_spt()?;
        let entry = SptEntry::new(name, offset, size, 0)?;
        if self.spt.find_slot_by_name(name).is_some() {
            return Err(RsuError::AlreadyExists);
        }
        if size == 0 || entry.end()? > self.flash.capacity() as u64 {
            return Err(RsuError::InvalidArgument);
        }
        if let Some(other) = self.spt.find_overlap(offset, size)? {
            error!(
                "[rsu] Slot {} overlaps {}",
                name,
                self.spt.entries()[other].name_str()
            );
            return Err(RsuError::InvalidArgument);
        }

        let slot = self.spt.push(entry)?;
        self.save_spt()?;
        info!(
            "[rsu] Created slot {} ({}) at {:#x}, {:#x} bytes",
            slot, name, offset, size
        );
        Ok(slot)
    }

    /// Removes a slot from the CPB and then from the SPT. Later slots move
    /// down by one.
    pub fn slot_delete(&mut self, slot: usize) -> RsuResult<()> {
        self.load()?;
        let entry = self.mutable_slot_entry(slot)?;
        self.disable_slot_pointer(slot, &entry)?;
        self.spt.remove(slot)?;
        self.save_spt()?;
        info!("[rsu] Deleted slot {} ({})", slot, entry.name_str());
        Ok(())
    }

    pub fn slot_rename(&mut self, slot: usize, name: &str) -> RsuResult<()> {
        self.load_spt()?;
        let old = self.mutable_slot_entry(slot)?;
        if let Some(existing) = self.spt.find_slot_by_name(name) {
            if existing != slot {
                return Err(RsuError::AlreadyExists);
            }
        }
        self.spt.entry_mut(slot)?.set_name(name)?;
        self.save_spt()?;
        info!("[rsu] Renamed slot {} from {} to {}", slot, old.name_str(), name);
        Ok(())
    }

    fn disable_slot_pointer(&mut self, slot: usize, entry: &SptEntry) -> RsuResult<()> {
        if self.cpb.disable(entry.offset()) {
            self.save_cpb()?;
            info!("[rsu] Disabled slot {} ({})", slot, entry.name_str());
        }
        Ok(())
    }

    /// Makes a slot the highest priority image. Enabling the slot already on
    /// top writes nothing.
    pub fn slot_enable(&mut self, slot: usize) -> RsuResult<()> {
        self.load()?;
        let entry = self.mutable_slot_entry(slot)?;
        if self.cpb.enable(entry.offset())? {
            self.save_cpb()?;
            info!("[rsu] Enabled slot {} ({})", slot, entry.name_str());
        }
        Ok(())
    }

    /// Takes a slot out of the CPB. Its SPT entry and contents stay.
    pub fn slot_disable(&mut self, slot: usize) -> RsuResult<()> {
        self.load()?;
        let entry = self.mutable_slot_entry(slot)?;
        self.disable_slot_pointer(slot, &entry)?;
        Ok(())
    }

    /// Disables a slot and erases its whole flash range.
    pub fn slot_erase(&mut self, slot: usize) -> RsuResult<()> {
        self.load()?;
        let entry = self.mutable_slot_entry(slot)?;
        self.disable_slot_pointer(slot, &entry)?;
        let partition = self.slot_partition(&entry)?;
        partition.erase(0, partition.len())?;
        info!("[rsu] Erased slot {} ({})", slot, entry.name_str());
        Ok(())
    }

    fn check_image(&self, kind: ImageKind, buf: &[u8]) -> RsuResult<()> {
        let valid = match kind {
            ImageKind::Application => self.verifier.verify_header(buf),
            ImageKind::FactoryUpdate => self.verifier.verify_factory_update(buf),
            ImageKind::Raw => true,
        };
        if !valid {
            error!("[rsu] Image header rejected");
            return Err(RsuError::InvalidArgument);
        }
        Ok(())
    }

    fn program(&mut self, slot: usize, buf: &[u8], kind: ImageKind) -> RsuResult<()> {
        self.load()?;
        let entry = self.mutable_slot_entry(slot)?;
        if buf.is_empty() || buf.len() > entry.length as usize {
            return Err(RsuError::InvalidArgument);
        }
        self.check_image(kind, buf)?;

        // The slot must not be booted while its contents are in flux.
        self.disable_slot_pointer(slot, &entry)?;

        let partition = self.slot_partition(&entry)?;
        partition.erase(0, partition.len())?;
        partition.write(0, buf)?;
        compare(&partition, buf)?;
        info!(
            "[rsu] Programmed slot {} ({}) with {:#x} bytes",
            slot,
            entry.name_str(),
            buf.len()
        );

        if kind != ImageKind::Raw && self.cpb.enable(entry.offset())? {
            self.save_cpb()?;
            info!("[rsu] Enabled slot {} ({})", slot, entry.name_str());
        }
        Ok(())
    }

    /// Checks the image header, writes the image into a slot and makes the
    /// slot the highest priority.
    pub fn slot_program_buf(&mut self, slot: usize, buf: &[u8]) -> RsuResult<()> {
        self.program(slot, buf, ImageKind::Application)
    }

    /// Like [`Self::slot_program_buf`] for a factory update image.
    pub fn slot_program_factory_update_buf(&mut self, slot: usize, buf: &[u8]) -> RsuResult<()> {
        self.program(slot, buf, ImageKind::FactoryUpdate)
    }

    /// Writes arbitrary data into a slot. The CPB is left disabled for it.
    pub fn slot_program_buf_raw(&mut self, slot: usize, buf: &[u8]) -> RsuResult<()> {
        self.program(slot, buf, ImageKind::Raw)
    }

    fn verify(&mut self, slot: usize, buf: &[u8], kind: ImageKind) -> RsuResult<()> {
        self.load_spt()?;
        let entry = self.slot_entry(slot)?;
        if buf.len() > entry.length as usize {
            return Err(RsuError::InvalidArgument);
        }
        self.check_image(kind, buf)?;
        compare(&self.slot_partition(&entry)?, buf)
    }

    /// Compares a slot against an image, checking the image header first.
    pub fn slot_verify_buf(&mut self, slot: usize, buf: &[u8]) -> RsuResult<()> {
        self.verify(slot, buf, ImageKind::Application)
    }

    pub fn slot_verify_buf_raw(&mut self, slot: usize, buf: &[u8]) -> RsuResult<()> {
        self.verify(slot, buf, ImageKind::Raw)
    }

    /// Asks the SDM to boot a slot on the next reset.
    pub fn slot_load(&mut self, slot: usize) -> RsuResult<()> {
        self.load_spt()?;
        let entry = self.mutable_slot_entry(slot)?;
        info!("[rsu] Loading slot {} ({}) after reboot", slot, entry.name_str());
        self.sdm.update(entry.offset())?;
        Ok(())
    }

    /// Asks the SDM to boot the factory image on the next reset.
    pub fn slot_load_factory(&mut self) -> RsuResult<()> {
        self.load_spt()?;
        let slot = self
            .spt
            .find_slot_by_name(self.layout.factory_name)
            .ok_or(RsuError::NotFound)?;
        let offset = self.slot_entry(slot)?.offset();
        info!("[rsu] Loading factory image after reboot");
        self.sdm.update(offset)?;
        Ok(())
    }
}

/// Reads `partition` back and compares it with `expected`.
fn compare(partition: &FlashPartition, expected: &[u8]) -> RsuResult<()> {
    let mut chunk = [0u8; VERIFY_CHUNK_SIZE];
    for (index, want) in expected.chunks(VERIFY_CHUNK_SIZE).enumerate() {
        let base = index * VERIFY_CHUNK_SIZE;
        let got = &mut chunk[..want.len()];
        partition.read(base, got)?;
        if let Some(pos) = got.iter().zip(want).position(|(a, b)| a != b) {
            error!(
                "[rsu] {} differs at {:#x}",
                partition.name(),
                base + pos
            );
            return Err(RsuError::VerifyMismatch { offset: base + pos });
        }
    }
    Ok(())
}
