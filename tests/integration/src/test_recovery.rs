// Licensed under the Apache-2.0 license

use crate::platform::{cmf_image, Platform};
use anyhow::Result;
use emulator_periph::{CPB0_OFFSET, CPB1_OFFSET, SPT0_OFFSET, SPT1_OFFSET};
use rsu::RsuError;
use rsu_image::flash::FlashStorage;
use rsu_image::{CPB_SIZE, SPT_SIZE};

#[test]
fn test_corrupt_spt_restored_from_backup() -> Result<()> {
    let mut platform = Platform::new(2);
    platform.flash.erase(SPT0_OFFSET as usize, SPT_SIZE).unwrap();
    let mut backup = vec![0u8; SPT_SIZE];
    platform.flash.read(&mut backup, SPT1_OFFSET as usize).unwrap();

    let mut session = platform.session()?;
    assert_eq!(session.slot_count(), Err(RsuError::CorruptMetadata));
    assert_eq!(session.slot_by_name("P1"), Err(RsuError::CorruptMetadata));

    session.restore_spt_from(&backup)?;
    assert_eq!(session.slot_count()?, 8);
    assert_eq!(session.slot_by_name("P2")?, 7);
    drop(session);

    assert_eq!(
        platform.flash.contents(SPT0_OFFSET as usize, SPT_SIZE),
        backup
    );
    Ok(())
}

#[test]
fn test_corrupt_cpb_replaced_with_empty_block() -> Result<()> {
    let mut platform = Platform::new(1);
    let mut session = platform.session()?;
    let p1 = session.slot_by_name("P1")?;
    session.slot_program_buf(p1, &cmf_image(0x400, 11))?;
    drop(session);

    platform.flash.write(&[0u8; 16], CPB0_OFFSET as usize).unwrap();
    let mut session = platform.session()?;
    assert_eq!(session.slot_priority(p1), Err(RsuError::CorruptMetadata));
    assert_eq!(session.slot_enable(p1), Err(RsuError::CorruptMetadata));

    session.create_empty_cpb()?;
    assert_eq!(session.slot_priority(p1)?, 0);
    session.slot_enable(p1)?;
    assert_eq!(session.slot_priority(p1)?, 1);
    drop(session);

    assert_eq!(
        platform.flash.contents(CPB0_OFFSET as usize, CPB_SIZE),
        platform.flash.contents(CPB1_OFFSET as usize, CPB_SIZE)
    );
    Ok(())
}

#[test]
fn test_exported_cpb_can_be_restored() -> Result<()> {
    let mut platform = Platform::new(2);
    let mut session = platform.session()?;
    let p1 = session.slot_by_name("P1")?;
    let p2 = session.slot_by_name("P2")?;
    session.slot_program_buf(p1, &cmf_image(0x400, 13))?;
    session.slot_program_buf(p2, &cmf_image(0x400, 17))?;

    let mut saved = vec![0u8; CPB_SIZE];
    assert_eq!(session.save_cpb_to(&mut saved)?, CPB_SIZE);

    session.slot_disable(p2)?;
    session.slot_disable(p1)?;
    assert_eq!(session.slot_priority(p2)?, 0);

    session.restore_cpb_from(&saved)?;
    assert_eq!(session.slot_priority(p2)?, 1);
    assert_eq!(session.slot_priority(p1)?, 2);
    Ok(())
}

#[test]
fn test_garbage_tables_are_not_restored() -> Result<()> {
    let mut platform = Platform::new(1);
    let writes = platform.flash.write_count();

    let mut session = platform.session()?;
    assert_eq!(
        session.restore_spt_from(&[0u8; SPT_SIZE]),
        Err(RsuError::CorruptMetadata)
    );
    assert_eq!(
        session.restore_cpb_from(&[0xffu8; CPB_SIZE]),
        Err(RsuError::CorruptMetadata)
    );
    assert_eq!(session.slot_count()?, 7);
    drop(session);

    assert_eq!(platform.flash.write_count(), writes);
    Ok(())
}
