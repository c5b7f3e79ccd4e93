/*++

Licensed under the Apache-2.0 license.

File Name:

    transport.rs

Abstract:

    Command and response ring handling for the SDM mailbox.

--*/

use log::{debug, warn};
use rsu_config::{MailboxRegisterMap, MailboxTiming, MBOX_ALL_INTRS, MBOX_STATUS_UA_MASK};
use rsu_error::{MboxError, MboxResult};
use sdm_mbox_common::hil::MailboxRegs;
use sdm_mbox_common::{
    CmdHeader, CommandId, RespHeader, Ring, SdmResponseCode, MBOX_CLIENT_ID_HPS, MBOX_ID_HPS,
    MBOX_MAX_ARGS, MBOX_MAX_CMD_INDEX,
};

/// Command/response channel to the SDM as seen by the command layer.
pub trait MailboxTransport {
    /// Sends `cmd` with `args` and waits for its response, retrying attempts
    /// that time out or find the SDM busy. Response data words are copied
    /// into `resp`; words that do not fit are dropped. Returns the number of
    /// words copied.
    ///
    /// Urgent commands bypass the command ring and carry no arguments or
    /// response data.
    fn send_cmd(
        &mut self,
        cmd: CommandId,
        args: &[u32],
        urgent: bool,
        resp: &mut [u32],
    ) -> MboxResult<usize>;

    /// Queues `cmd` without waiting for a response.
    fn send_cmd_only(&mut self, cmd: CommandId, args: &[u32]) -> MboxResult<()>;

    /// Copies whatever raw words sit in the response ring into `resp`,
    /// without waiting. Returns the number of words copied.
    fn receive_response(&mut self, resp: &mut [u32]) -> usize;

    /// Discards up to `max_count` complete responses currently in the
    /// response ring. Returns how many were discarded.
    fn drain_responses(&mut self, max_count: usize) -> usize;
}

/// Ring buffer mailbox driver over a register block.
pub struct SdmMailbox<R: MailboxRegs> {
    regs: R,
    map: MailboxRegisterMap,
    timing: MailboxTiming,
    cmd_ring: Ring,
    resp_ring: Ring,
    client: u8,
    id: u8,
}

impl<R: MailboxRegs> SdmMailbox<R> {
    pub fn new(regs: R) -> Self {
        Self::with_config(regs, MailboxRegisterMap::DEFAULT, MailboxTiming::DEFAULT)
    }

    pub fn with_config(regs: R, map: MailboxRegisterMap, timing: MailboxTiming) -> Self {
        Self {
            regs,
            map,
            timing,
            cmd_ring: Ring::new(map.cmd_buf_words),
            resp_ring: Ring::new(map.resp_buf_words),
            client: MBOX_CLIENT_ID_HPS,
            id: MBOX_ID_HPS,
        }
    }

    pub fn regs(&self) -> &R {
        &self.regs
    }

    pub fn regs_mut(&mut self) -> &mut R {
        &mut self.regs
    }

    pub fn into_inner(self) -> R {
        self.regs
    }

    /// Brings the mailbox to a known state: interrupts enabled, no urgent
    /// request or doorbell pending, and the SDM side restarted.
    pub fn init(&mut self) -> MboxResult<()> {
        self.regs.write(self.map.flags, MBOX_ALL_INTRS);
        self.regs.write(self.map.urg, 0);
        self.regs.write(self.map.doorbell_from_sdm, 0);

        self.send_cmd(CommandId::RESTART, &[], true, &mut [])?;

        // RESTART clears the interrupt enables.
        self.regs.write(self.map.flags, MBOX_ALL_INTRS);
        Ok(())
    }

    /// Writes one word at `cin` once the command ring has room, advancing
    /// and publishing the cursor. While the ring is full the SDM doorbell is
    /// rung once so it drains the ring.
    pub fn write_word(&mut self, cin: &mut u32, word: u32) -> MboxResult<()> {
        let mut overflow = false;
        for _ in 0..self.timing.cmd_buf_iterations {
            let cout = self.regs.read(self.map.cout);
            if self.cmd_ring.is_full(*cin, cout) {
                if !overflow {
                    self.regs.write(self.map.doorbell_to_sdm, 1);
                    overflow = true;
                }
                self.regs.delay_us(self.timing.poll_interval_us);
            } else {
                self.regs.write(self.map.cmd_slot(*cin), word);
                *cin = self.cmd_ring.next(*cin);
                self.regs.write(self.map.cin, *cin);
                return Ok(());
            }
        }
        warn!("[sdm-mbox] Command buffer stayed full");
        Err(MboxError::Timeout)
    }

    /// Writes a command header and its arguments into the command ring, then
    /// rings the SDM doorbell.
    pub fn send_command(&mut self, cmd: CommandId, indirect: bool, args: &[u32]) -> MboxResult<()> {
        if cmd.0 > MBOX_MAX_CMD_INDEX || args.len() > MBOX_MAX_ARGS {
            return Err(MboxError::InvalidArgument);
        }
        let header = CmdHeader::new(self.client, self.id, args.len() as u32, indirect, cmd.0);
        let mut cin = self.regs.read(self.map.cin) % self.cmd_ring.capacity();

        self.write_word(&mut cin, header.0)?;
        for &arg in args {
            self.write_word(&mut cin, arg)?;
        }

        // The SDM may not have been told about the tail of the command yet.
        self.regs.write(self.map.doorbell_to_sdm, 1);
        debug!("[sdm-mbox] Sent command {} with {} args", cmd.0, args.len());
        Ok(())
    }

    /// Every check of the doorbell costs one unit of `budget`, whether or not
    /// it finds the doorbell raised.
    fn wait_doorbell(&mut self, budget: &mut u32) -> MboxResult<()> {
        while *budget > 0 {
            *budget -= 1;
            if self.regs.read(self.map.doorbell_from_sdm) & 1 != 0 {
                self.regs.write(self.map.doorbell_from_sdm, 0);
                return Ok(());
            }
            self.regs.delay_us(self.timing.poll_interval_us);
        }
        warn!("[sdm-mbox] Timed out waiting for the SDM doorbell");
        Err(MboxError::Timeout)
    }

    /// Waits for the doorbell from the SDM and clears it. Returns whether
    /// the response ring holds unread words.
    pub fn wait_response(&mut self) -> MboxResult<bool> {
        let mut budget = self.timing.doorbell_iterations;
        self.wait_doorbell(&mut budget)?;
        let rout = self.regs.read(self.map.rout) % self.resp_ring.capacity();
        Ok(self.response_pending(rout))
    }

    fn response_pending(&mut self, rout: u32) -> bool {
        self.regs.read(self.map.rin) % self.resp_ring.capacity() != rout
    }

    fn wait_resp_word(&mut self, rout: u32) -> MboxResult<()> {
        for _ in 0..self.timing.resp_word_iterations {
            if self.response_pending(rout) {
                return Ok(());
            }
            self.regs.delay_us(self.timing.poll_interval_us);
        }
        warn!("[sdm-mbox] Timed out waiting for response data");
        Err(MboxError::Timeout)
    }

    fn read_resp_word(&mut self, rout: &mut u32) -> u32 {
        let word = self.regs.read(self.map.resp_slot(*rout));
        *rout = self.resp_ring.next(*rout);
        self.regs.write(self.map.rout, *rout);
        word
    }

    fn clear_doorbell(&mut self) {
        if self.regs.read(self.map.doorbell_from_sdm) & 1 != 0 {
            self.regs.write(self.map.doorbell_from_sdm, 0);
        }
    }

    fn send_urgent(&mut self, cmd: CommandId) -> MboxResult<usize> {
        let status = self.regs.read(self.map.status) & MBOX_STATUS_UA_MASK;
        self.regs.write(self.map.urg, cmd.0);
        self.regs.write(self.map.doorbell_to_sdm, 1);

        let mut budget = self.timing.doorbell_iterations;
        self.wait_doorbell(&mut budget)?;

        let new_status = self.regs.read(self.map.status) & MBOX_STATUS_UA_MASK;
        if new_status ^ status != 0 {
            debug!("[sdm-mbox] Urgent command {} acknowledged", cmd.0);
            Ok(0)
        } else {
            warn!("[sdm-mbox] Urgent command {} not acknowledged", cmd.0);
            Err(MboxError::CommError)
        }
    }

    /// One attempt at sending `cmd` and collecting its response.
    ///
    /// Responses for other clients or transactions are consumed together
    /// with their data words and dropped, so they cannot stall the ring. All
    /// doorbell waits of one attempt share a single poll budget, and every
    /// dropped response is charged to it as well.
    pub fn send_and_wait(
        &mut self,
        cmd: CommandId,
        args: &[u32],
        urgent: bool,
        resp: &mut [u32],
    ) -> MboxResult<usize> {
        if urgent {
            return self.send_urgent(cmd);
        }

        self.send_command(cmd, false, args)?;

        let mut budget = self.timing.doorbell_iterations;
        loop {
            self.wait_doorbell(&mut budget)?;

            let mut rout = self.regs.read(self.map.rout) % self.resp_ring.capacity();
            while self.response_pending(rout) {
                let header = RespHeader(self.read_resp_word(&mut rout));
                let matched = header.matches(self.client, self.id);
                let mut copied = 0;
                for _ in 0..header.len() {
                    self.wait_resp_word(rout)?;
                    let word = self.read_resp_word(&mut rout);
                    if matched && copied < resp.len() {
                        resp[copied] = word;
                        copied += 1;
                    }
                }
                if matched {
                    debug!(
                        "[sdm-mbox] Command {} response code {:#x}, {} words",
                        cmd.0,
                        header.error_code(),
                        header.len()
                    );
                    return response_result(header.error_code(), copied);
                }
                warn!("[sdm-mbox] Dropping stray response {:#010x}", header.0);
                if budget == 0 {
                    warn!("[sdm-mbox] Command {} only saw stray responses", cmd.0);
                    return Err(MboxError::Timeout);
                }
                budget -= 1;
            }
        }
    }
}

fn response_result(code: u32, copied: usize) -> MboxResult<usize> {
    match SdmResponseCode::try_from(code) {
        Ok(SdmResponseCode::Ok) => Ok(copied),
        Ok(SdmResponseCode::DeviceBusy) => Err(MboxError::DeviceBusy),
        Ok(SdmResponseCode::Timeout) => Err(MboxError::Timeout),
        Ok(SdmResponseCode::InvalidCommand) => Err(MboxError::Unsupported),
        _ => Err(MboxError::Sdm(code)),
    }
}

impl<R: MailboxRegs> MailboxTransport for SdmMailbox<R> {
    fn send_cmd(
        &mut self,
        cmd: CommandId,
        args: &[u32],
        urgent: bool,
        resp: &mut [u32],
    ) -> MboxResult<usize> {
        let mut result = Err(MboxError::Timeout);
        for attempt in 1..=self.timing.retries.max(1) {
            result = self.send_and_wait(cmd, args, urgent, resp);
            match result {
                Err(MboxError::Timeout) | Err(MboxError::DeviceBusy) => {
                    warn!(
                        "[sdm-mbox] Command {} attempt {} failed: {:?}",
                        cmd.0,
                        attempt,
                        result
                    );
                    self.regs.delay_us(self.timing.retry_backoff_us);
                }
                _ => break,
            }
        }
        result
    }

    fn send_cmd_only(&mut self, cmd: CommandId, args: &[u32]) -> MboxResult<()> {
        self.send_command(cmd, false, args)
    }

    fn receive_response(&mut self, resp: &mut [u32]) -> usize {
        self.clear_doorbell();

        let mut rout = self.regs.read(self.map.rout) % self.resp_ring.capacity();
        let mut len = 0;
        while len < resp.len() && self.response_pending(rout) {
            resp[len] = self.read_resp_word(&mut rout);
            len += 1;
        }
        len
    }

    fn drain_responses(&mut self, max_count: usize) -> usize {
        self.clear_doorbell();

        let mut rout = self.regs.read(self.map.rout) % self.resp_ring.capacity();
        let mut count = 0;
        while count < max_count && self.response_pending(rout) {
            let header = RespHeader(self.read_resp_word(&mut rout));
            for _ in 0..header.len() {
                if self.wait_resp_word(rout).is_err() {
                    return count;
                }
                self.read_resp_word(&mut rout);
            }
            debug!("[sdm-mbox] Drained response {:#010x}", header.0);
            count += 1;
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emulator_periph::EmulatedSdm;
    use sdm_mbox_common::RSU_STATUS_WORDS;

    fn init_logger() {
        let _ = simple_logger::SimpleLogger::new()
            .with_level(log::LevelFilter::Debug)
            .init();
    }

    fn mailbox(sdm: &mut EmulatedSdm) -> SdmMailbox<&mut EmulatedSdm> {
        init_logger();
        SdmMailbox::new(sdm)
    }

    /// Register block of an SDM that answers every doorbell acknowledgement
    /// with another response for a different client, forever.
    #[derive(Default)]
    struct StrayFlood {
        cin: u32,
        rin: u32,
        rout: u32,
        strays: u32,
        doorbell_checks: u32,
    }

    impl MailboxRegs for StrayFlood {
        fn read(&mut self, offset: u32) -> u32 {
            let map = MailboxRegisterMap::DEFAULT;
            match offset {
                o if o == map.cin || o == map.cout => self.cin,
                o if o == map.rin => self.rin,
                o if o == map.rout => self.rout,
                o if o == map.doorbell_from_sdm => {
                    self.doorbell_checks += 1;
                    1
                }
                o if o >= map.resp_buf && o < map.resp_slot(map.resp_buf_words) => {
                    RespHeader::new(MBOX_CLIENT_ID_HPS + 1, 0, 0, 0).0
                }
                _ => 0,
            }
        }

        fn write(&mut self, offset: u32, value: u32) {
            let map = MailboxRegisterMap::DEFAULT;
            if offset == map.cin {
                self.cin = value;
            } else if offset == map.rout {
                self.rout = value;
                self.strays += 1;
            } else if offset == map.doorbell_from_sdm && value == 0 {
                self.rin = (self.rin + 1) % map.resp_buf_words;
            }
        }

        fn delay_us(&mut self, _us: u32) {}
    }

    fn flood_timing() -> MailboxTiming {
        MailboxTiming {
            doorbell_iterations: 8,
            ..MailboxTiming::DEFAULT
        }
    }

    #[test]
    fn test_command_is_written_and_answered() {
        let mut sdm = EmulatedSdm::new();
        let mut mbox = mailbox(&mut sdm);
        let mut resp = [0u32; RSU_STATUS_WORDS];
        let len = mbox
            .send_cmd(CommandId::RSU_STATUS, &[], false, &mut resp)
            .unwrap();
        assert_eq!(len, RSU_STATUS_WORDS);
        drop(mbox);

        let log = sdm.command_log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].header.opcode(), CommandId::RSU_STATUS.0);
        assert_eq!(log[0].header.client(), MBOX_CLIENT_ID_HPS as u32);
        assert_eq!(log[0].header.id(), MBOX_ID_HPS as u32);
        assert_eq!(resp, sdm.rsu_status().to_words());
    }

    #[test]
    fn test_rejects_bad_commands() {
        let mut sdm = EmulatedSdm::new();
        let mut mbox = mailbox(&mut sdm);
        assert_eq!(
            mbox.send_cmd(CommandId(MBOX_MAX_CMD_INDEX + 1), &[], false, &mut []),
            Err(MboxError::InvalidArgument)
        );
        let args = [0u32; MBOX_MAX_ARGS + 1];
        assert_eq!(
            mbox.send_cmd(CommandId::RSU_UPDATE, &args, false, &mut []),
            Err(MboxError::InvalidArgument)
        );
        drop(mbox);
        assert!(sdm.command_log().is_empty());
    }

    #[test]
    fn test_long_command_overflows_ring() {
        let mut sdm = EmulatedSdm::new();
        sdm.set_consume_delay(3);
        let mut mbox = mailbox(&mut sdm);
        let args: Vec<u32> = (0..MBOX_MAX_ARGS as u32).collect();
        mbox.send_cmd(CommandId::HPS_STAGE_NOTIFY, &args, false, &mut [])
            .unwrap();
        drop(mbox);

        // 32 words never fit in a 32-slot ring at once.
        let log = sdm.command_log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].args, args);
        assert!(sdm.overflow_doorbells() >= 1);
    }

    #[test]
    fn test_response_words_beyond_capacity_are_dropped() {
        let mut sdm = EmulatedSdm::new();
        let mut mbox = mailbox(&mut sdm);
        let mut resp = [0u32; 2];
        let len = mbox
            .send_cmd(CommandId::RSU_STATUS, &[], false, &mut resp)
            .unwrap();
        assert_eq!(len, 2);

        // The ring is consistent for the next command.
        let mut resp = [0u32; RSU_STATUS_WORDS];
        assert_eq!(
            mbox.send_cmd(CommandId::RSU_STATUS, &[], false, &mut resp),
            Ok(RSU_STATUS_WORDS)
        );
        assert_eq!(mbox.drain_responses(16), 0);
    }

    #[test]
    fn test_stray_responses_are_skipped() {
        let mut sdm = EmulatedSdm::new();
        sdm.inject_stray_responses(5);
        let mut mbox = mailbox(&mut sdm);
        let mut resp = [0u32; RSU_STATUS_WORDS];
        assert_eq!(
            mbox.send_cmd(CommandId::RSU_STATUS, &[], false, &mut resp),
            Ok(RSU_STATUS_WORDS)
        );
        drop(mbox);
        assert_eq!(resp, sdm.rsu_status().to_words());
    }

    #[test]
    fn test_only_stray_responses_time_out() {
        init_logger();
        let timing = flood_timing();
        let mut mbox =
            SdmMailbox::with_config(StrayFlood::default(), MailboxRegisterMap::DEFAULT, timing);
        let mut resp = [0u32; 4];
        assert_eq!(
            mbox.send_and_wait(CommandId::RSU_STATUS, &[], false, &mut resp),
            Err(MboxError::Timeout)
        );
        let regs = mbox.regs();
        assert!(regs.strays > 0);
        assert!(regs.strays + regs.doorbell_checks <= timing.doorbell_iterations + 1);
        assert_eq!(resp, [0; 4]);
    }

    #[test]
    fn test_stray_flood_exhausts_every_retry() {
        init_logger();
        let timing = flood_timing();
        let mut mbox =
            SdmMailbox::with_config(StrayFlood::default(), MailboxRegisterMap::DEFAULT, timing);
        assert_eq!(
            mbox.send_cmd(CommandId::RSU_STATUS, &[], false, &mut []),
            Err(MboxError::Timeout)
        );
        let regs = mbox.into_inner();
        let per_attempt = timing.doorbell_iterations + 1;
        assert!(regs.strays + regs.doorbell_checks <= timing.retries * per_attempt);
        assert!(regs.strays >= timing.retries);
    }

    #[test]
    fn test_busy_is_retried() {
        let mut sdm = EmulatedSdm::new();
        sdm.inject_busy(2);
        let mut mbox = mailbox(&mut sdm);
        assert_eq!(
            mbox.send_cmd(CommandId::QSPI_CLOSE, &[], false, &mut []),
            Ok(0)
        );
        drop(mbox);
        assert_eq!(sdm.command_log().len(), 3);
    }

    #[test]
    fn test_busy_gives_up_after_retries() {
        let mut sdm = EmulatedSdm::new();
        sdm.inject_busy(3);
        let mut mbox = mailbox(&mut sdm);
        assert_eq!(
            mbox.send_cmd(CommandId::QSPI_CLOSE, &[], false, &mut []),
            Err(MboxError::DeviceBusy)
        );
        drop(mbox);
        assert_eq!(sdm.command_log().len(), 3);
    }

    #[test]
    fn test_missing_doorbell_times_out() {
        let mut sdm = EmulatedSdm::new();
        sdm.drop_doorbells(u32::MAX);
        let mut mbox = mailbox(&mut sdm);
        assert_eq!(
            mbox.send_cmd(CommandId::QSPI_CLOSE, &[], false, &mut []),
            Err(MboxError::Timeout)
        );
    }

    #[test]
    fn test_sdm_error_code_is_not_retried() {
        let mut sdm = EmulatedSdm::new();
        sdm.fail_next(CommandId::QSPI_OPEN, SdmResponseCode::Error as u32, 1);
        let mut mbox = mailbox(&mut sdm);
        assert_eq!(
            mbox.send_cmd(CommandId::QSPI_OPEN, &[], false, &mut []),
            Err(MboxError::Sdm(0x3ff))
        );
        drop(mbox);
        assert_eq!(sdm.command_log().len(), 1);
    }

    #[test]
    fn test_unknown_command_is_unsupported() {
        let mut sdm = EmulatedSdm::new();
        let mut mbox = mailbox(&mut sdm);
        assert_eq!(
            mbox.send_cmd(CommandId(1000), &[], false, &mut []),
            Err(MboxError::Unsupported)
        );
    }

    #[test]
    fn test_urgent_ack_toggles() {
        let mut sdm = EmulatedSdm::new();
        let mut mbox = mailbox(&mut sdm);
        assert_eq!(mbox.send_cmd(CommandId::RESTART, &[], true, &mut []), Ok(0));
        assert_eq!(mbox.send_cmd(CommandId::RESTART, &[], true, &mut []), Ok(0));
        drop(mbox);
        assert_eq!(sdm.urgent_count(), 2);
    }

    #[test]
    fn test_frozen_urgent_ack_is_comm_error() {
        let mut sdm = EmulatedSdm::new();
        sdm.freeze_urgent_ack(true);
        let mut mbox = mailbox(&mut sdm);
        assert_eq!(
            mbox.send_cmd(CommandId::RESTART, &[], true, &mut []),
            Err(MboxError::CommError)
        );
        drop(mbox);
        assert_eq!(sdm.urgent_count(), 1);
    }

    #[test]
    fn test_init_restarts_and_enables_interrupts() {
        let mut sdm = EmulatedSdm::new();
        let mut mbox = mailbox(&mut sdm);
        mbox.init().unwrap();
        drop(mbox);
        assert_eq!(sdm.urgent_count(), 1);
        assert_eq!(sdm.interrupt_flags(), MBOX_ALL_INTRS);
    }

    #[test]
    fn test_split_send_and_receive() {
        let mut sdm = EmulatedSdm::new();
        let mut mbox = mailbox(&mut sdm);
        mbox.send_cmd_only(CommandId::RSU_GET_DEVICE_INFO, &[]).unwrap();
        assert!(mbox.wait_response().unwrap());

        let mut raw = [0u32; 16];
        let len = mbox.receive_response(&mut raw);
        assert_eq!(len, 8);
        let header = RespHeader(raw[0]);
        assert!(header.matches(MBOX_CLIENT_ID_HPS, MBOX_ID_HPS));
        assert_eq!(header.len(), 7);
        assert_eq!(mbox.receive_response(&mut raw), 0);
    }

    #[test]
    fn test_drain_is_idempotent() {
        let mut sdm = EmulatedSdm::new();
        let mut mbox = mailbox(&mut sdm);
        mbox.send_cmd_only(CommandId::RSU_STATUS, &[]).unwrap();
        mbox.send_cmd_only(CommandId::QSPI_CLOSE, &[]).unwrap();
        assert_eq!(mbox.drain_responses(8), 2);
        assert_eq!(mbox.drain_responses(8), 0);
    }
}
