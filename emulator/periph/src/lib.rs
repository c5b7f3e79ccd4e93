/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    File contains exports for the SDM mailbox and RSU flash emulation library.

--*/

mod flash;
mod rsu_flash;
mod sdm_mbox;

pub use flash::EmulatedFlash;
pub use rsu_flash::*;
pub use sdm_mbox::{EmulatedSdm, LoggedCommand};
