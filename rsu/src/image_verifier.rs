// Licensed under the Apache-2.0 license

/// First word of a configuration management firmware (CMF) image.
pub const CMF_MAGIC_NUMBER: u32 = 0x6229_4895;

/// Checks the header of an image before it is programmed into a slot.
///
/// The header is user-defined and it is up to the implementer to parse it
/// and enforce any required policies.
///
/// Returns true if every required check passes, false on any structural or
/// policy failure.
pub trait ImageVerifier {
    fn verify_header(&self, header: &[u8]) -> bool;

    /// Checks a factory update image, which replaces the decision firmware
    /// and the factory image together.
    fn verify_factory_update(&self, header: &[u8]) -> bool {
        self.verify_header(header)
    }
}

/// Accepts any image that starts with the CMF magic number.
#[derive(Debug, Default, Clone, Copy)]
pub struct CmfImageVerifier;

impl ImageVerifier for CmfImageVerifier {
    fn verify_header(&self, header: &[u8]) -> bool {
        match header.get(..4) {
            Some(word) => {
                u32::from_le_bytes([word[0], word[1], word[2], word[3]]) == CMF_MAGIC_NUMBER
            }
            None => false,
        }
    }
}
