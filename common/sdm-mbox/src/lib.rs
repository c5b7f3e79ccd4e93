// Licensed under the Apache-2.0 license

//! Wire formats shared by the HPS-side SDM mailbox driver and the emulated SDM.

#![no_std]

mod header;
pub use header::*;
pub mod hil;
mod messages;
pub use messages::*;
mod ring;
pub use ring::*;
