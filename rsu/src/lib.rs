/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    Remote System Update: slot management on top of the SDM mailbox and the
    flash-resident SPT and CPB.

--*/

#![cfg_attr(not(test), no_std)]

mod context;
pub mod flash;
pub mod image_verifier;
mod slot;
mod status;

pub use context::{RsuContext, RsuListing};
pub use image_verifier::{CmfImageVerifier, ImageVerifier, CMF_MAGIC_NUMBER};
pub use rsu_error::{RsuError, RsuResult};
pub use slot::SlotInfo;
