// Licensed under the Apache-2.0 license

use log::{debug, info, warn};
use rsu_error::{MboxError, MboxResult};
use sdm_mbox_common::{
    CommandId, DeviceInfo, FpgaConfigStatus, RsuStatusInfo, CFGSTAT_STATE_CONFIG,
    DEVICE_INFO_WORDS, RECONFIG_PIN_STATUS_NSTATUS, RECONFIG_SOFTFUNC_STATUS_CONF_DONE,
    RECONFIG_SOFTFUNC_STATUS_INIT_DONE, RECONFIG_SOFTFUNC_STATUS_SEU_ERROR,
    RECONFIG_STATUS_PIN_STATUS, RECONFIG_STATUS_RESPONSE_LEN, RECONFIG_STATUS_SOFTFUNC_STATUS,
    RECONFIG_STATUS_STATE,
};

use crate::transport::MailboxTransport;

/// Words in the GET_SUBPARTITION_TABLE response.
pub const SUBPARTITION_TABLE_WORDS: usize = 4;

/// Older firmware reports an ACMF version of 0 even though it speaks the
/// version 1 protocol. Firmware that fills in the retry counter is known to
/// be at least that new, so its ACMF field is raised to 1.
pub fn legacy_acmf_fixup(info: &mut RsuStatusInfo) {
    if !info.has_retry_counter() {
        return;
    }
    let mut version = info.version_fields();
    if version.acmf() == 0 {
        version.set_acmf(1);
        info.version = version.0;
    }
}

fn expect_len(expected: usize, actual: usize) -> MboxResult<()> {
    if actual < expected {
        return Err(MboxError::ResponseTooShort { expected, actual });
    }
    Ok(())
}

/// Typed SDM commands over a mailbox transport.
pub struct SdmManager<T: MailboxTransport> {
    transport: T,
    qspi_ref_clk_hz: Option<u32>,
}

impl<T: MailboxTransport> SdmManager<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            qspi_ref_clk_hz: None,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    fn send(&mut self, cmd: CommandId, args: &[u32]) -> MboxResult<()> {
        self.transport.send_cmd(cmd, args, false, &mut [])?;
        Ok(())
    }

    /// Restarts the SDM side of the mailbox through the urgent register.
    pub fn restart(&mut self) -> MboxResult<()> {
        self.transport
            .send_cmd(CommandId::RESTART, &[], true, &mut [])?;
        Ok(())
    }

    pub fn qspi_close(&mut self) -> MboxResult<()> {
        self.send(CommandId::QSPI_CLOSE, &[])
    }

    /// Takes direct control of the QSPI controller from the SDM. Returns the
    /// controller reference clock in Hz, which is also kept for
    /// `qspi_ref_clk_hz`.
    pub fn qspi_open(&mut self) -> MboxResult<u32> {
        if let Err(err) = self.send(CommandId::QSPI_OPEN, &[]) {
            warn!("[sdm-mbox] QSPI open failed ({:?}), reopening", err);
            self.qspi_close()?;
            self.send(CommandId::QSPI_OPEN, &[])?;
        }

        let mut resp = [0u32; 1];
        let result = self
            .transport
            .send_cmd(CommandId::QSPI_DIRECT, &[], false, &mut resp)
            .and_then(|len| expect_len(1, len));
        if let Err(err) = result {
            // Best effort; the direct mode failure is what gets reported.
            let _ = self.qspi_close();
            return Err(err);
        }

        info!("[sdm-mbox] QSPI reference clock {} Hz", resp[0]);
        self.qspi_ref_clk_hz = Some(resp[0]);
        Ok(resp[0])
    }

    /// Reference clock reported by the last successful `qspi_open`.
    pub fn qspi_ref_clk_hz(&self) -> Option<u32> {
        self.qspi_ref_clk_hz
    }

    /// Raw GET_SUBPARTITION_TABLE response, which carries the flash offsets
    /// of both SPT copies.
    pub fn get_subpartition_offsets(&mut self) -> MboxResult<[u32; SUBPARTITION_TABLE_WORDS]> {
        let mut resp = [0u32; SUBPARTITION_TABLE_WORDS];
        let len = self
            .transport
            .send_cmd(CommandId::GET_SUBPARTITION_TABLE, &[], false, &mut resp)?;
        expect_len(SUBPARTITION_TABLE_WORDS, len)?;
        Ok(resp)
    }

    /// Reads the RSU status. Firmware that returns a short response leaves
    /// the missing fields at their defaults, the retry counter included.
    pub fn get_status(&mut self) -> MboxResult<RsuStatusInfo> {
        let mut words = RsuStatusInfo::default().to_words();
        let len = self
            .transport
            .send_cmd(CommandId::RSU_STATUS, &[], false, &mut words)?;
        debug!("[sdm-mbox] RSU status is {} words", len);

        let mut info = RsuStatusInfo::from_words(&words);
        legacy_acmf_fixup(&mut info);
        Ok(info)
    }

    /// Asks the SDM to load the image at `flash_offset` on the next reset.
    pub fn update(&mut self, flash_offset: u64) -> MboxResult<()> {
        info!("[sdm-mbox] RSU update to {:#x}", flash_offset);
        self.send(
            CommandId::RSU_UPDATE,
            &[flash_offset as u32, (flash_offset >> 32) as u32],
        )
    }

    pub fn hps_stage_notify(&mut self, execution_stage: u32) -> MboxResult<()> {
        self.send(CommandId::HPS_STAGE_NOTIFY, &[execution_stage])
    }

    pub fn reboot_hps(&mut self) -> MboxResult<()> {
        info!("[sdm-mbox] Requesting HPS reboot");
        self.send(CommandId::REBOOT_HPS, &[])
    }

    /// Decision firmware versions and status plus the max retry setting.
    pub fn get_device_info(&mut self) -> MboxResult<DeviceInfo> {
        let mut words = [0u32; DEVICE_INFO_WORDS];
        let len = self
            .transport
            .send_cmd(CommandId::RSU_GET_DEVICE_INFO, &[], false, &mut words)?;
        expect_len(DEVICE_INFO_WORDS, len)?;
        Ok(DeviceInfo::from_words(&words))
    }

    /// Polls FPGA configuration state with CONFIG_STATUS or
    /// RECONFIG_STATUS.
    ///
    /// A configuration still in progress is `Ok(Configuring)`; callers keep
    /// polling. Pin or SEU failures are `HardwareError` and any other
    /// non-zero state is `ConfigError`.
    pub fn get_fpga_config_status(&mut self, cmd: CommandId) -> MboxResult<FpgaConfigStatus> {
        if cmd != CommandId::CONFIG_STATUS && cmd != CommandId::RECONFIG_STATUS {
            return Err(MboxError::InvalidArgument);
        }

        let mut resp = [0u32; RECONFIG_STATUS_RESPONSE_LEN];
        let len = self.transport.send_cmd(cmd, &[], false, &mut resp)?;
        expect_len(RECONFIG_STATUS_SOFTFUNC_STATUS + 1, len)?;

        let state = resp[RECONFIG_STATUS_STATE];
        if state != 0 && state != CFGSTAT_STATE_CONFIG {
            return Err(MboxError::ConfigError(state));
        }

        if resp[RECONFIG_STATUS_PIN_STATUS] & RECONFIG_PIN_STATUS_NSTATUS == 0 {
            return Err(MboxError::HardwareError);
        }

        let softfunc = resp[RECONFIG_STATUS_SOFTFUNC_STATUS];
        if softfunc & RECONFIG_SOFTFUNC_STATUS_SEU_ERROR != 0 {
            return Err(MboxError::HardwareError);
        }

        let done = RECONFIG_SOFTFUNC_STATUS_CONF_DONE | RECONFIG_SOFTFUNC_STATUS_INIT_DONE;
        if softfunc & done == done && state == 0 {
            Ok(FpgaConfigStatus::Done)
        } else {
            Ok(FpgaConfigStatus::Configuring)
        }
    }
}
