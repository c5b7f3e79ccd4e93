/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    Host tool running RSU commands against a flash image file and an
    emulated SDM.

--*/

mod commands;

pub use commands::{run, RsuArgs, RsuCommand};
