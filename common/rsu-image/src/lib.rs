// Licensed under the Apache-2.0 license

//! On-flash layouts of the RSU metadata: the Sub-Partition Table (SPT) and
//! the CMF Pointer Block (CPB), plus the flash access seam they are read
//! through.

#![cfg_attr(not(test), no_std)]

mod cpb;
pub mod flash;
mod spt;

pub use cpb::*;
pub use spt::*;
