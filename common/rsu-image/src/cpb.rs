// Licensed under the Apache-2.0 license

use core::mem::{offset_of, size_of};

use log::error;
use rsu_error::{RsuError, RsuResult};
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout};

pub const CPB_MAGIC_NUMBER: u32 = 0x5778_9609;
pub const CPB_MAX_SLOTS: usize = 508;
pub const CPB_HEADER_SIZE: u32 = offset_of!(CmfPointerBlock, pointer_slot) as u32;

/// Pointer value left behind by `disable`.
pub const CPB_SLOT_CLEARED: u64 = 0;
/// Pointer value of erased flash.
pub const CPB_SLOT_ERASED: u64 = !0;

/// Whether a pointer slot references an image.
pub const fn is_pointer_valid(pointer: u64) -> bool {
    pointer != CPB_SLOT_CLEARED && pointer != CPB_SLOT_ERASED
}

/// CMF Pointer Block. The priority of an image is its position in
/// `pointer_slot`: the highest index holding a valid pointer boots first.
#[repr(C)]
#[derive(Debug, Clone, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct CmfPointerBlock {
    pub magic_number: u32,
    pub header_size: u32,
    pub total_size: u32,
    pub reserved1: u32,
    pub iptab_offset: u32,
    pub nslots: u32,
    pub reserved2: u32,
    pub reserved3: u32,
    pub pointer_slot: [u64; CPB_MAX_SLOTS],
}

pub const CPB_SIZE: usize = size_of::<CmfPointerBlock>();
const _: () = assert!(CPB_SIZE == 4096);

impl CmfPointerBlock {
    /// A valid block with `nslots` unused pointers.
    pub fn new_empty(nslots: usize) -> Self {
        let mut cpb = CmfPointerBlock::new_zeroed();
        cpb.magic_number = CPB_MAGIC_NUMBER;
        cpb.header_size = CPB_HEADER_SIZE;
        cpb.total_size = CPB_SIZE as u32;
        cpb.iptab_offset = CPB_HEADER_SIZE;
        cpb.nslots = nslots.min(CPB_MAX_SLOTS) as u32;
        cpb.pointer_slot = [CPB_SLOT_ERASED; CPB_MAX_SLOTS];
        cpb
    }

    /// Decodes a block from raw flash contents without validating it.
    pub fn from_flash_bytes(bytes: &[u8]) -> RsuResult<Self> {
        let (cpb, _) =
            CmfPointerBlock::read_from_prefix(bytes).map_err(|_| RsuError::InvalidArgument)?;
        Ok(cpb)
    }

    pub fn verify(&self) -> bool {
        if self.magic_number != CPB_MAGIC_NUMBER {
            error!(
                "[rsu] Bad CPB magic number {:#010x}, expected {:#010x}",
                self.magic_number, CPB_MAGIC_NUMBER
            );
            return false;
        }
        if self.nslots as usize > CPB_MAX_SLOTS {
            error!("[rsu] CPB lists {} slots", self.nslots);
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

    /// Pointer slots in use by this block.
    pub fn slots(&self) -> &[u64] {
        &self.pointer_slot[..(self.nslots as usize).min(CPB_MAX_SLOTS)]
    }

    fn slots_mut(&mut self) -> &mut [u64] {
        let nslots = (self.nslots as usize).min(CPB_MAX_SLOTS);
        &mut self.pointer_slot[..nslots]
    }

    /// Indices of valid pointers, highest priority first.
    pub fn priority_order(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots()
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, pointer)| is_pointer_valid(**pointer))
            .map(|(index, _)| index)
    }

    /// Priority rank of the image at `offset`, 1 being the highest. Returns
    /// 0 when no valid pointer references it.
    pub fn priority_of(&self, offset: u64) -> u32 {
        self.priority_order()
            .position(|index| self.pointer_slot[index] == offset)
            .map_or(0, |rank| rank as u32 + 1)
    }

    fn highest_valid(&self) -> Option<usize> {
        self.priority_order().next()
    }

    /// Moves every valid pointer toward index 0, keeping their order, and
    /// marks the rest unused. Returns the number of valid pointers.
    pub fn compact(&mut self) -> usize {
        let slots = self.slots_mut();
        let mut next = 0;
        for index in 0..slots.len() {
            if is_pointer_valid(slots[index]) {
                slots[next] = slots[index];
                next += 1;
            }
        }
        slots[next..].fill(CPB_SLOT_ERASED);
        next
    }

    /// Makes `offset` the highest priority image. Other images keep their
    /// relative order. Returns whether the block changed, or
    /// `InvalidArgument` if every pointer is already in use.
    pub fn enable(&mut self, offset: u64) -> RsuResult<bool> {
        if !is_pointer_valid(offset) || self.slots().is_empty() {
            return Err(RsuError::InvalidArgument);
        }
        if let Some(top) = self.highest_valid() {
            if self.pointer_slot[top] == offset {
                return Ok(false);
            }
        }
        self.disable(offset);
        if self.slots().iter().all(|&pointer| is_pointer_valid(pointer)) {
            error!("[rsu] CPB has no free pointer for {:#x}", offset);
            return Err(RsuError::InvalidArgument);
        }
        let mut target = self.highest_valid().map_or(0, |top| top + 1);
        if target >= self.slots().len() {
            target = self.compact();
        }
        self.slots_mut()[target] = offset;
        Ok(true)
    }

    /// Clears every pointer referencing `offset`. Returns whether any did.
    pub fn disable(&mut self, offset: u64) -> bool {
        let mut changed = false;
        for pointer in self.slots_mut().iter_mut() {
            if is_pointer_valid(*pointer) && *pointer == offset {
                *pointer = CPB_SLOT_CLEARED;
                changed = true;
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(cpb: &CmfPointerBlock) -> Vec<usize> {
        cpb.priority_order().collect()
    }

    #[test]
    fn test_layout() {
        assert_eq!(CPB_HEADER_SIZE, 32);
        let cpb = CmfPointerBlock::new_empty(8);
        assert!(cpb.verify());
        assert_eq!(cpb.slots().len(), 8);
        assert!(order(&cpb).is_empty());
    }

    #[test]
    fn test_priority_order_skips_sentinels() {
        let mut cpb = CmfPointerBlock::new_empty(8);
        cpb.pointer_slot[0] = 0x10000;
        cpb.pointer_slot[3] = 0x20000;
        cpb.pointer_slot[4] = CPB_SLOT_CLEARED;
        cpb.pointer_slot[5] = 0x30000;
        assert_eq!(order(&cpb), vec![5, 3, 0]);
        assert_eq!(cpb.priority_of(0x30000), 1);
        assert_eq!(cpb.priority_of(0x10000), 3);
        assert_eq!(cpb.priority_of(0x40000), 0);
    }

    #[test]
    fn test_enable_places_above_highest() {
        let mut cpb = CmfPointerBlock::new_empty(8);
        cpb.pointer_slot[0] = 0x10000;
        cpb.pointer_slot[3] = 0x20000;
        assert!(cpb.enable(0x10000).unwrap());
        assert_eq!(cpb.pointer_slot[0], CPB_SLOT_CLEARED);
        assert_eq!(cpb.pointer_slot[4], 0x10000);
        assert_eq!(order(&cpb), vec![4, 3]);
    }

    #[test]
    fn test_enable_top_is_noop() {
        let mut cpb = CmfPointerBlock::new_empty(8);
        cpb.pointer_slot[1] = 0x10000;
        cpb.pointer_slot[6] = 0x20000;
        let before = cpb.pointer_slot;
        assert!(!cpb.enable(0x20000).unwrap());
        assert_eq!(cpb.pointer_slot, before);
    }

    #[test]
    fn test_enable_compacts_full_top() {
        let mut cpb = CmfPointerBlock::new_empty(8);
        cpb.pointer_slot[2] = 0x10000;
        cpb.pointer_slot[5] = 0x20000;
        cpb.pointer_slot[7] = 0x30000;
        assert!(cpb.enable(0x40000).unwrap());
        assert_eq!(&cpb.slots()[..4], &[0x10000, 0x20000, 0x30000, 0x40000]);
        assert!(cpb.slots()[4..].iter().all(|&p| p == CPB_SLOT_ERASED));
        assert_eq!(cpb.priority_of(0x40000), 1);
        assert_eq!(cpb.priority_of(0x30000), 2);
    }

    #[test]
    fn test_enable_into_full_block_fails() {
        let mut cpb = CmfPointerBlock::new_empty(4);
        cpb.slots_mut()
            .copy_from_slice(&[0x1000, 0x2000, 0x3000, 0x4000]);
        let before = cpb.pointer_slot;
        assert_eq!(cpb.enable(0x9000), Err(RsuError::InvalidArgument));
        assert_eq!(cpb.pointer_slot, before);
        assert_eq!(cpb.priority_of(0x9000), 0);

        // A pointer already in the block frees its own entry.
        assert_eq!(cpb.enable(0x1000), Ok(true));
        assert_eq!(cpb.slots(), &[0x2000, 0x3000, 0x4000, 0x1000]);
    }

    #[test]
    fn test_enable_into_full_max_block_fails() {
        let mut cpb = CmfPointerBlock::new_empty(CPB_MAX_SLOTS);
        for (index, pointer) in cpb.slots_mut().iter_mut().enumerate() {
            *pointer = 0x10_0000 + index as u64 * 0x1000;
        }
        let before = cpb.pointer_slot;
        assert_eq!(cpb.enable(0x9000_0000), Err(RsuError::InvalidArgument));
        assert_eq!(cpb.pointer_slot, before);
    }

    #[test]
    fn test_disable() {
        let mut cpb = CmfPointerBlock::new_empty(8);
        cpb.pointer_slot[7] = 0x10000;
        assert!(cpb.disable(0x10000));
        assert_eq!(cpb.pointer_slot[7], CPB_SLOT_CLEARED);
        assert_eq!(cpb.priority_of(0x10000), 0);
        assert!(!cpb.disable(0x10000));
    }

    #[test]
    fn test_corrupt_magic() {
        let mut cpb = CmfPointerBlock::new_empty(8);
        cpb.magic_number = 0;
        assert_eq!(cpb.verified().err(), Some(RsuError::CorruptMetadata));
    }
}
