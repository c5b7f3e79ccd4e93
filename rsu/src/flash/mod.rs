// Licensed under the Apache-2.0 license

mod flash_partition;

pub use flash_partition::FlashPartition;
pub use rsu_image::flash::{FlashDrvError, FlashStorage};
