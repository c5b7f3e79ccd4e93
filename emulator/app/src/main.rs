/*++

Licensed under the Apache-2.0 license.

File Name:

    main.rs

Abstract:

    File contains main entrypoint for the RSU emulator.

--*/

use clap::Parser;
use rsu_emulator::{run, RsuArgs};
use std::io;

fn main() {
    let cli = RsuArgs::parse();
    let _ = simple_logger::SimpleLogger::new()
        .with_level(cli.log_level)
        .init();

    if let Err(err) = run(&cli, &mut io::stdout()) {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}
