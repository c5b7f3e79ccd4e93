// Licensed under the Apache-2.0 license

//! HPS side of the SDM mailbox: the ring buffer transport and the typed
//! command layer built on it.

#![cfg_attr(not(test), no_std)]

mod commands;
mod mmio;
mod transport;

pub use commands::*;
pub use mmio::MmioMailboxRegs;
pub use sdm_mbox_common::hil::MailboxRegs;
pub use transport::*;
