/*++

Licensed under the Apache-2.0 license.

File Name:

    sdm_mbox.rs

Abstract:

    File contains the SDM side of the HPS mailbox: the register block, both
    rings, a model of the RSU firmware and fault injection hooks.

--*/

use log::{debug, warn};
use rsu_config::{MailboxRegisterMap, MBOX_STATUS_UA_MASK};
use sdm_mbox_common::hil::MailboxRegs;
use sdm_mbox_common::{
    CmdHeader, CommandId, DeviceInfo, RespHeader, Ring, RsuStatusInfo, SdmResponseCode,
    HPS_NOTIFY_CLEAR_ERROR_STATUS, HPS_NOTIFY_IGNORE_STAGE, HPS_NOTIFY_RESET_RETRY_COUNTER,
    HPS_NOTIFY_VALUE_MASK, RECONFIG_PIN_STATUS_NSTATUS, RECONFIG_SOFTFUNC_STATUS_CONF_DONE,
    RECONFIG_SOFTFUNC_STATUS_INIT_DONE, RECONFIG_STATUS_RESPONSE_LEN, RSU_STATUS_WORDS,
};
use std::collections::VecDeque;

use crate::rsu_flash::{FACTORY_IMAGE_OFFSET, SPT0_OFFSET, SPT1_OFFSET};

/// A command as the SDM received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedCommand {
    pub header: CmdHeader,
    pub args: Vec<u32>,
}

struct Failure {
    cmd: CommandId,
    code: u32,
    remaining: u32,
}

/// Emulated Secure Device Manager behind the HPS mailbox.
///
/// Commands are consumed when the HPS rings the doorbell, or after a
/// configurable number of `delay_us` ticks to model a slow consumer.
/// Responses that do not fit in the response ring wait in an outbox and are
/// published as the HPS frees space.
pub struct EmulatedSdm {
    map: MailboxRegisterMap,
    cmd_ring: Ring,
    resp_ring: Ring,

    cin: u32,
    rout: u32,
    urg: u32,
    flags: u32,
    cout: u32,
    rin: u32,
    status: u32,
    doorbell_from_sdm: u32,
    cmd_buf: Vec<u32>,
    resp_buf: Vec<u32>,

    partial: Option<LoggedCommand>,
    outbox: VecDeque<u32>,
    consume_delay: u32,
    consume_countdown: Option<u32>,

    stray_responses: u32,
    busy_responses: u32,
    dropped_doorbells: u32,
    urgent_ack_frozen: bool,
    failures: Vec<Failure>,

    overflow_doorbells: u32,
    urgent_count: u32,
    log: Vec<LoggedCommand>,

    rsu_status: RsuStatusInfo,
    status_words: usize,
    device_info: DeviceInfo,
    spt_offsets: [u32; 4],
    config_status: [u32; RECONFIG_STATUS_RESPONSE_LEN],
    qspi_open: bool,
    qspi_ref_clk_hz: u32,
    pending_update: Option<u64>,
    reboot_count: u32,
    stages: Vec<u32>,
}

impl Default for EmulatedSdm {
    fn default() -> Self {
        Self::new()
    }
}

impl EmulatedSdm {
    pub fn new() -> Self {
        Self::with_register_map(MailboxRegisterMap::DEFAULT)
    }

    pub fn with_register_map(map: MailboxRegisterMap) -> Self {
        Self {
            map,
            cmd_ring: Ring::new(map.cmd_buf_words),
            resp_ring: Ring::new(map.resp_buf_words),
            cin: 0,
            rout: 0,
            urg: 0,
            flags: 0,
            cout: 0,
            rin: 0,
            status: 0,
            doorbell_from_sdm: 0,
            cmd_buf: vec![0; map.cmd_buf_words as usize],
            resp_buf: vec![0; map.resp_buf_words as usize],
            partial: None,
            outbox: VecDeque::new(),
            consume_delay: 0,
            consume_countdown: None,
            stray_responses: 0,
            busy_responses: 0,
            dropped_doorbells: 0,
            urgent_ack_frozen: false,
            failures: Vec::new(),
            overflow_doorbells: 0,
            urgent_count: 0,
            log: Vec::new(),
            rsu_status: RsuStatusInfo {
                current_image: FACTORY_IMAGE_OFFSET,
                fail_image: 0,
                state: 0,
                version: 0x0000_0202,
                error_location: 0,
                error_details: 0,
                retry_counter: 0,
            },
            status_words: RSU_STATUS_WORDS,
            device_info: DeviceInfo {
                dcmf_version: [0x0114_0200; 4],
                dcmf_status: [0; 4],
                max_retry: 3,
            },
            spt_offsets: [0, SPT0_OFFSET as u32, 0, SPT1_OFFSET as u32],
            config_status: [
                0,
                0,
                RECONFIG_PIN_STATUS_NSTATUS,
                RECONFIG_SOFTFUNC_STATUS_CONF_DONE | RECONFIG_SOFTFUNC_STATUS_INIT_DONE,
                0,
                0,
            ],
            qspi_open: false,
            qspi_ref_clk_hz: 200_000_000,
            pending_update: None,
            reboot_count: 0,
            stages: Vec::new(),
        }
    }

    /// Answers the next `count` commands with mismatched responses first.
    pub fn inject_stray_responses(&mut self, count: u32) {
        self.stray_responses = count;
    }

    /// Answers the next `count` commands with DEVICE_BUSY.
    pub fn inject_busy(&mut self, count: u32) {
        self.busy_responses = count;
    }

    /// Suppresses the next `count` doorbells to the HPS. `u32::MAX` never
    /// rings again.
    pub fn drop_doorbells(&mut self, count: u32) {
        self.dropped_doorbells = count;
    }

    /// Stops the urgent acknowledge bit from toggling.
    pub fn freeze_urgent_ack(&mut self, frozen: bool) {
        self.urgent_ack_frozen = frozen;
    }

    /// Answers the next `count` occurrences of `cmd` with `code`.
    pub fn fail_next(&mut self, cmd: CommandId, code: u32, count: u32) {
        self.failures.push(Failure {
            cmd,
            code,
            remaining: count,
        });
    }

    /// Waits `ticks` delay calls after a doorbell before consuming commands.
    pub fn set_consume_delay(&mut self, ticks: u32) {
        self.consume_delay = ticks;
    }

    pub fn command_log(&self) -> &[LoggedCommand] {
        &self.log
    }

    /// Doorbells the HPS rang while the command ring was full.
    pub fn overflow_doorbells(&self) -> u32 {
        self.overflow_doorbells
    }

    pub fn urgent_count(&self) -> u32 {
        self.urgent_count
    }

    pub fn interrupt_flags(&self) -> u32 {
        self.flags
    }

    pub fn rsu_status(&self) -> RsuStatusInfo {
        self.rsu_status
    }

    pub fn set_rsu_status(&mut self, status: RsuStatusInfo) {
        self.rsu_status = status;
    }

    /// Truncates RSU_STATUS responses, as older firmware does.
    pub fn set_status_words(&mut self, words: usize) {
        self.status_words = words.min(RSU_STATUS_WORDS);
    }

    pub fn set_device_info(&mut self, info: DeviceInfo) {
        self.device_info = info;
    }

    pub fn set_spt_offsets(&mut self, spt0: u32, spt1: u32) {
        self.spt_offsets = [0, spt0, 0, spt1];
    }

    pub fn set_config_status(&mut self, status: [u32; RECONFIG_STATUS_RESPONSE_LEN]) {
        self.config_status = status;
    }

    pub fn set_qspi_ref_clk_hz(&mut self, hz: u32) {
        self.qspi_ref_clk_hz = hz;
    }

    pub fn qspi_is_open(&self) -> bool {
        self.qspi_open
    }

    /// Image requested by the last RSU_UPDATE, until the next reboot.
    pub fn pending_update(&self) -> Option<u64> {
        self.pending_update
    }

    pub fn reboot_count(&self) -> u32 {
        self.reboot_count
    }

    /// Execution stages reported through HPS_STAGE_NOTIFY.
    pub fn stages(&self) -> &[u32] {
        &self.stages
    }

    fn raise_doorbell(&mut self) {
        if self.dropped_doorbells > 0 {
            if self.dropped_doorbells != u32::MAX {
                self.dropped_doorbells -= 1;
            }
            return;
        }
        self.doorbell_from_sdm = 1;
    }

    fn publish_responses(&mut self) {
        let mut published = false;
        while self.resp_ring.free(self.rin, self.rout) > 0 {
            let Some(word) = self.outbox.pop_front() else {
                break;
            };
            self.resp_buf[self.rin as usize] = word;
            self.rin = self.resp_ring.next(self.rin);
            published = true;
        }
        if published {
            self.raise_doorbell();
        }
    }

    fn respond(&mut self, header: CmdHeader, code: u32, data: &[u32]) {
        let resp = RespHeader::new(
            header.client() as u8,
            header.id() as u8,
            data.len() as u32,
            code,
        );
        self.outbox.push_back(resp.0);
        self.outbox.extend(data);
    }

    fn on_urgent(&mut self) {
        self.urgent_count += 1;
        debug!("[sdm-emu] Urgent command {}", self.urg);
        if CommandId(self.urg) == CommandId::RESTART {
            self.partial = None;
            self.outbox.clear();
            self.consume_countdown = None;
            self.flags = 0;
        }
        self.urg = 0;
        if !self.urgent_ack_frozen {
            self.status ^= MBOX_STATUS_UA_MASK;
        }
        self.raise_doorbell();
    }

    fn on_doorbell(&mut self) {
        if self.urg != 0 {
            self.on_urgent();
            return;
        }
        if self.cmd_ring.free(self.cin, self.cout) == 0 {
            self.overflow_doorbells += 1;
        }
        if self.consume_delay == 0 {
            self.consume();
        } else if self.consume_countdown.is_none() {
            self.consume_countdown = Some(self.consume_delay);
        }
    }

    fn tick(&mut self) {
        match self.consume_countdown {
            Some(0) | Some(1) => {
                self.consume_countdown = None;
                self.consume();
            }
            Some(n) => self.consume_countdown = Some(n - 1),
            None => {}
        }
        self.publish_responses();
    }

    fn consume(&mut self) {
        while self.cout != self.cin {
            let word = self.cmd_buf[self.cout as usize];
            self.cout = self.cmd_ring.next(self.cout);

            let mut cmd = match self.partial.take() {
                Some(mut cmd) => {
                    cmd.args.push(word);
                    cmd
                }
                None => LoggedCommand {
                    header: CmdHeader(word),
                    args: Vec::new(),
                },
            };
            if cmd.args.len() < cmd.header.len() as usize {
                self.partial = Some(cmd);
                continue;
            }
            self.execute(cmd);
        }
        self.publish_responses();
    }

    fn execute(&mut self, cmd: LoggedCommand) {
        let header = cmd.header;
        debug!(
            "[sdm-emu] Command {} with {} args",
            header.opcode(),
            cmd.args.len()
        );
        self.log.push(cmd.clone());

        for _ in 0..self.stray_responses {
            let stray = CmdHeader::new(
                header.client() as u8,
                (header.id() as u8 + 1) & 0xf,
                0,
                false,
                0,
            );
            self.respond(stray, SdmResponseCode::Ok as u32, &[0xdead_beef]);
        }
        self.stray_responses = 0;

        if self.busy_responses > 0 {
            self.busy_responses -= 1;
            self.respond(header, SdmResponseCode::DeviceBusy as u32, &[]);
            return;
        }

        let opcode = CommandId(header.opcode());
        if let Some(failure) = self
            .failures
            .iter_mut()
            .find(|f| f.cmd == opcode && f.remaining > 0)
        {
            failure.remaining -= 1;
            let code = failure.code;
            self.respond(header, code, &[]);
            return;
        }

        let (code, data) = self.handle(opcode, &cmd.args);
        self.respond(header, code as u32, &data);
    }

    fn handle(&mut self, opcode: CommandId, args: &[u32]) -> (SdmResponseCode, Vec<u32>) {
        match opcode {
            CommandId::RESTART => (SdmResponseCode::Ok, vec![]),
            CommandId::CONFIG_STATUS | CommandId::RECONFIG_STATUS => {
                (SdmResponseCode::Ok, self.config_status.to_vec())
            }
            CommandId::QSPI_OPEN => {
                self.qspi_open = true;
                (SdmResponseCode::Ok, vec![])
            }
            CommandId::QSPI_CLOSE => {
                self.qspi_open = false;
                (SdmResponseCode::Ok, vec![])
            }
            CommandId::QSPI_DIRECT if self.qspi_open => {
                (SdmResponseCode::Ok, vec![self.qspi_ref_clk_hz])
            }
            CommandId::QSPI_DIRECT => (SdmResponseCode::Error, vec![]),
            CommandId::REBOOT_HPS => {
                self.reboot_count += 1;
                if let Some(image) = self.pending_update.take() {
                    self.rsu_status.current_image = image;
                }
                (SdmResponseCode::Ok, vec![])
            }
            CommandId::GET_SUBPARTITION_TABLE => (SdmResponseCode::Ok, self.spt_offsets.to_vec()),
            CommandId::RSU_STATUS => (
                SdmResponseCode::Ok,
                self.rsu_status.to_words()[..self.status_words].to_vec(),
            ),
            CommandId::RSU_UPDATE if args.len() >= 2 => {
                self.pending_update = Some(args[0] as u64 | (args[1] as u64) << 32);
                (SdmResponseCode::Ok, vec![])
            }
            CommandId::HPS_STAGE_NOTIFY if !args.is_empty() => {
                let value = args[0];
                if value & HPS_NOTIFY_CLEAR_ERROR_STATUS != 0 {
                    self.rsu_status.fail_image = 0;
                    self.rsu_status.state = 0;
                    self.rsu_status.error_location = 0;
                    self.rsu_status.error_details = 0;
                }
                if value & HPS_NOTIFY_RESET_RETRY_COUNTER != 0 {
                    self.rsu_status.retry_counter = 0;
                }
                if value & HPS_NOTIFY_IGNORE_STAGE == 0 {
                    self.stages.push(value & HPS_NOTIFY_VALUE_MASK);
                }
                (SdmResponseCode::Ok, vec![])
            }
            CommandId::RSU_UPDATE | CommandId::HPS_STAGE_NOTIFY => {
                warn!("[sdm-emu] Command {} is missing arguments", opcode.0);
                (SdmResponseCode::Error, vec![])
            }
            CommandId::RSU_GET_DEVICE_INFO => {
                (SdmResponseCode::Ok, self.device_info.to_words().to_vec())
            }
            _ => {
                warn!("[sdm-emu] Unknown command {}", opcode.0);
                (SdmResponseCode::InvalidCommand, vec![])
            }
        }
    }

    fn cmd_slot_index(&self, offset: u32) -> Option<usize> {
        let start = self.map.cmd_buf;
        (offset >= start && offset < self.map.cmd_slot(self.map.cmd_buf_words))
            .then(|| ((offset - start) / 4) as usize)
    }

    fn resp_slot_index(&self, offset: u32) -> Option<usize> {
        let start = self.map.resp_buf;
        (offset >= start && offset < self.map.resp_slot(self.map.resp_buf_words))
            .then(|| ((offset - start) / 4) as usize)
    }
}

impl MailboxRegs for EmulatedSdm {
    fn read(&mut self, offset: u32) -> u32 {
        let map = self.map;
        match offset {
            o if o == map.cin => self.cin,
            o if o == map.rout => self.rout,
            o if o == map.urg => self.urg,
            o if o == map.flags => self.flags,
            o if o == map.cout => self.cout,
            o if o == map.rin => self.rin,
            o if o == map.status => self.status,
            o if o == map.doorbell_from_sdm => self.doorbell_from_sdm,
            o if o == map.doorbell_to_sdm => 0,
            o => {
                if let Some(index) = self.cmd_slot_index(o) {
                    self.cmd_buf[index]
                } else if let Some(index) = self.resp_slot_index(o) {
                    self.resp_buf[index]
                } else {
                    0
                }
            }
        }
    }

    fn write(&mut self, offset: u32, value: u32) {
        let map = self.map;
        match offset {
            o if o == map.cin => self.cin = value % self.cmd_ring.capacity(),
            o if o == map.rout => {
                self.rout = value % self.resp_ring.capacity();
                self.publish_responses();
            }
            o if o == map.urg => self.urg = value,
            o if o == map.flags => self.flags = value,
            o if o == map.doorbell_from_sdm => self.doorbell_from_sdm = value,
            o if o == map.doorbell_to_sdm => {
                if value & 1 != 0 {
                    self.on_doorbell();
                }
            }
            o => {
                if let Some(index) = self.cmd_slot_index(o) {
                    self.cmd_buf[index] = value;
                } else {
                    warn!("[sdm-emu] Ignoring write of {:#x} to {:#x}", value, o);
                }
            }
        }
    }

    fn delay_us(&mut self, _us: u32) {
        self.tick();
    }
}
