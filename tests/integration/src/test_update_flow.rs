// Licensed under the Apache-2.0 license

use crate::platform::{cmf_image, slot_offset, Platform};
use anyhow::Result;
use emulator_periph::FACTORY_IMAGE_OFFSET;
use rsu::RsuError;

#[test]
fn test_program_and_boot_new_image() -> Result<()> {
    let mut platform = Platform::new(2);
    let image = cmf_image(0x2000, 3);

    let mut session = platform.session()?;
    assert!(session.running_factory()?);
    let p1 = session.slot_by_name("P1")?;
    session.slot_program_buf(p1, &image)?;
    session.slot_verify_buf(p1, &image)?;
    assert_eq!(session.slot_priority(p1)?, 1);
    session.slot_load(p1)?;
    drop(session);

    assert_eq!(platform.sdm.pending_update(), Some(slot_offset(0)));
    platform.reboot()?;
    assert_eq!(platform.sdm.rsu_status().current_image, slot_offset(0));

    let mut session = platform.session()?;
    assert!(!session.running_factory()?);
    assert_eq!(session.status_log()?.current_image, slot_offset(0));
    Ok(())
}

#[test]
fn test_newest_image_takes_priority() -> Result<()> {
    let mut platform = Platform::new(3);
    let mut session = platform.session()?;
    let p1 = session.slot_by_name("P1")?;
    let p2 = session.slot_by_name("P2")?;
    let p3 = session.slot_by_name("P3")?;

    session.slot_program_buf(p1, &cmf_image(0x1000, 5))?;
    session.slot_program_buf(p2, &cmf_image(0x1000, 7))?;
    assert_eq!(session.slot_priority(p2)?, 1);
    assert_eq!(session.slot_priority(p1)?, 2);
    assert_eq!(session.slot_priority(p3)?, 0);

    let listing = session.list()?;
    let order: Vec<u64> = listing
        .cpb
        .priority_order()
        .map(|index| listing.cpb.slots()[index])
        .collect();
    assert_eq!(order, vec![slot_offset(1), slot_offset(0)]);

    session.slot_disable(p2)?;
    assert_eq!(session.slot_priority(p1)?, 1);
    assert_eq!(session.slot_priority(p2)?, 0);

    session.slot_enable(p2)?;
    session.slot_enable(p1)?;
    assert_eq!(session.slot_priority(p1)?, 1);
    assert_eq!(session.slot_priority(p2)?, 2);
    Ok(())
}

#[test]
fn test_fall_back_to_factory_image() -> Result<()> {
    let mut platform = Platform::new(1);
    let mut session = platform.session()?;
    let p1 = session.slot_by_name("P1")?;
    session.slot_program_buf(p1, &cmf_image(0x800, 9))?;
    session.slot_load(p1)?;
    drop(session);
    platform.reboot()?;

    let mut session = platform.session()?;
    assert!(!session.running_factory()?);
    session.slot_load_factory()?;
    drop(session);
    platform.reboot()?;

    assert_eq!(platform.sdm.rsu_status().current_image, FACTORY_IMAGE_OFFSET);
    assert!(platform.session()?.running_factory()?);
    assert_eq!(platform.sdm.reboot_count(), 2);
    Ok(())
}

#[test]
fn test_slot_lifecycle_persists_across_sessions() -> Result<()> {
    let mut platform = Platform::new(0);
    let mut session = platform.session()?;
    let slot = session.slot_create("APP", slot_offset(0), 0x8_0000)?;
    session.slot_program_buf_raw(slot, &[0x5a; 0x400])?;
    assert_eq!(session.slot_priority(slot)?, 0);
    drop(session);

    let mut session = platform.session()?;
    assert_eq!(session.slot_by_name("APP")?, slot);
    session.slot_verify_buf_raw(slot, &[0x5a; 0x400])?;
    session.slot_rename(slot, "APP2")?;
    assert_eq!(session.slot_by_name("APP"), Err(RsuError::NotFound));
    session.slot_enable(slot)?;
    session.slot_erase(slot)?;
    assert_eq!(session.slot_priority(slot)?, 0);
    session.slot_delete(slot)?;
    drop(session);

    assert_eq!(platform.session()?.slot_count()?, 6);
    assert_eq!(
        platform.flash.contents(slot_offset(0) as usize, 4),
        vec![0xff; 4]
    );
    Ok(())
}

#[test]
fn test_failed_boot_is_acknowledged() -> Result<()> {
    let mut platform = Platform::new(1);
    let mut status = platform.sdm.rsu_status();
    status.fail_image = slot_offset(0);
    status.state = 0xf004_d003;
    status.error_details = 0x1234;
    status.retry_counter = 2;
    platform.sdm.set_rsu_status(status);

    let mut session = platform.session()?;
    let logged = session.status_log()?;
    assert_eq!(logged.fail_image, slot_offset(0));
    session.clear_error_status()?;
    session.reset_retry_counter()?;
    session.notify(0x0003)?;
    let logged = session.status_log()?;
    assert_eq!(logged.fail_image, 0);
    assert_eq!(logged.retry_counter, 0);
    drop(session);

    assert_eq!(platform.sdm.stages(), &[0x0003]);
    Ok(())
}
