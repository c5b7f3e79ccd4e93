// Licensed under the Apache-2.0 license

use crate::platform::{slot_offset, Platform, Session};
use anyhow::Result;
use emulator_periph::EmulatedSdm;
use rsu::RsuError;
use sdm_mbox_common::CommandId;

fn emulator<'s>(session: &'s mut Session<'_>) -> &'s mut EmulatedSdm {
    session.sdm().transport_mut().regs_mut()
}

#[test]
fn test_session_survives_stray_and_busy_responses() -> Result<()> {
    let mut platform = Platform::new(1);
    let mut session = platform.session()?;
    let p1 = session.slot_by_name("P1")?;

    emulator(&mut session).inject_stray_responses(3);
    emulator(&mut session).inject_busy(2);
    session.slot_load(p1)?;
    drop(session);

    let updates = platform
        .sdm
        .command_log()
        .iter()
        .filter(|cmd| cmd.header.opcode() == CommandId::RSU_UPDATE.0)
        .count();
    assert_eq!(updates, 3);
    assert_eq!(platform.sdm.pending_update(), Some(slot_offset(0)));
    Ok(())
}

#[test]
fn test_persistently_busy_sdm_fails_the_update() -> Result<()> {
    let mut platform = Platform::new(1);
    let mut session = platform.session()?;
    let p1 = session.slot_by_name("P1")?;

    emulator(&mut session).inject_busy(3);
    assert_eq!(session.slot_load(p1), Err(RsuError::DeviceBusy));
    drop(session);
    assert_eq!(platform.sdm.pending_update(), None);
    Ok(())
}

#[test]
fn test_lost_doorbell_times_out() -> Result<()> {
    let mut platform = Platform::new(0);
    let mut session = platform.session()?;
    emulator(&mut session).drop_doorbells(u32::MAX);
    assert_eq!(session.status_log(), Err(RsuError::Timeout));
    assert_eq!(session.running_factory(), Err(RsuError::Timeout));

    // Flash-only operations are unaffected.
    assert_eq!(session.slot_count()?, 6);
    Ok(())
}

#[test]
fn test_sdm_error_codes_surface() -> Result<()> {
    let mut platform = Platform::new(1);
    platform.sdm.fail_next(CommandId::GET_SUBPARTITION_TABLE, 0x3ff, 1);
    assert_eq!(platform.session().err(), Some(RsuError::Sdm(0x3ff)));

    let mut session = platform.session()?;
    emulator(&mut session).fail_next(CommandId::RSU_UPDATE, 0x3ff, 1);
    assert_eq!(session.slot_load_factory(), Err(RsuError::Sdm(0x3ff)));
    session.slot_load_factory()?;
    Ok(())
}

#[test]
fn test_slow_sdm_consumer() -> Result<()> {
    let mut platform = Platform::new(1);
    let mut session = platform.session()?;
    emulator(&mut session).set_consume_delay(5);
    let status = session.status_log()?;
    let version = session.dcmf_version()?;
    session.notify(0x42)?;
    drop(session);

    assert_eq!(status, platform.sdm.rsu_status());
    assert_eq!(version, [0x0114_0200; 4]);
    assert_eq!(platform.sdm.stages(), &[0x42]);
    Ok(())
}
