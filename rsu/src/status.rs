// Licensed under the Apache-2.0 license

use log::{info, warn};
use rsu_error::{RsuError, RsuResult};
use sdm_mbox_common::{
    RsuStatusInfo, DCMF_COPIES, HPS_NOTIFY_CLEAR_ERROR_STATUS, HPS_NOTIFY_IGNORE_STAGE,
    HPS_NOTIFY_RESET_RETRY_COUNTER, HPS_NOTIFY_VALUE_MASK,
};
use sdm_mbox_driver::MailboxTransport;

use crate::context::RsuContext;

impl<T: MailboxTransport> RsuContext<'_, T> {
    /// RSU status as reported by the SDM.
    pub fn status_log(&mut self) -> RsuResult<RsuStatusInfo> {
        Ok(self.sdm.get_status()?)
    }

    /// Reports an HPS execution stage. Only the low 16 bits are sent.
    pub fn notify(&mut self, value: u32) -> RsuResult<()> {
        self.sdm.hps_stage_notify(value & HPS_NOTIFY_VALUE_MASK)?;
        Ok(())
    }

    /// Sends a notify action that only firmware with ACMF version 1 or
    /// later understands.
    fn notify_action(&mut self, action: u32) -> RsuResult<()> {
        let status = self.sdm.get_status()?;
        if status.version_fields().acmf() < 1 {
            warn!("[rsu] Firmware does not support notify action {:#x}", action);
            return Err(RsuError::Unsupported);
        }
        self.sdm.hps_stage_notify(HPS_NOTIFY_IGNORE_STAGE | action)?;
        Ok(())
    }

    /// Clears the last failure recorded in the RSU status.
    pub fn clear_error_status(&mut self) -> RsuResult<()> {
        self.notify_action(HPS_NOTIFY_CLEAR_ERROR_STATUS)?;
        info!("[rsu] Cleared error status");
        Ok(())
    }

    pub fn reset_retry_counter(&mut self) -> RsuResult<()> {
        self.notify_action(HPS_NOTIFY_RESET_RETRY_COUNTER)?;
        info!("[rsu] Reset retry counter");
        Ok(())
    }

    /// Versions of the four decision firmware copies.
    pub fn dcmf_version(&mut self) -> RsuResult<[u32; DCMF_COPIES]> {
        Ok(self.sdm.get_device_info()?.dcmf_version)
    }

    /// Status of the four decision firmware copies, 0 meaning intact.
    pub fn dcmf_status(&mut self) -> RsuResult<[u16; DCMF_COPIES]> {
        Ok(self.sdm.get_device_info()?.dcmf_status)
    }

    pub fn max_retry(&mut self) -> RsuResult<u32> {
        Ok(self.sdm.get_device_info()?.max_retry)
    }

    /// Whether the SDM booted the factory image.
    pub fn running_factory(&mut self) -> RsuResult<bool> {
        let status = self.sdm.get_status()?;
        self.load_spt()?;
        let slot = self
            .spt
            .find_slot_by_name(self.layout.factory_name)
            .ok_or(RsuError::NotFound)?;
        Ok(self.spt.entry(slot)?.offset() == status.current_image)
    }

    /// Asks the SDM to boot the image at `offset` on the next reset, without
    /// consulting the SPT.
    pub fn update(&mut self, offset: u64) -> RsuResult<()> {
        self.sdm.update(offset)?;
        Ok(())
    }
}
