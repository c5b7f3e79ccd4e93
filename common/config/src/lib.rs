// Licensed under the Apache-2.0 license

#![no_std]

/// Register layout of the SDM mailbox as seen from the HPS.
///
/// These are the defaults for Stratix 10 / Agilex class devices. Offsets are in
/// bytes from the mailbox base address; buffer sizes are in 32-bit words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxRegisterMap {
    /// Command valid offset, owned by the HPS.
    pub cin: u32,
    /// Response consumed offset, owned by the HPS.
    pub rout: u32,
    /// Urgent command register.
    pub urg: u32,
    /// Interrupt enable flags.
    pub flags: u32,
    /// Command consumed offset, owned by the SDM.
    pub cout: u32,
    /// Response valid offset, owned by the SDM.
    pub rin: u32,
    pub status: u32,
    pub cmd_buf: u32,
    pub resp_buf: u32,
    pub doorbell_to_sdm: u32,
    pub doorbell_from_sdm: u32,
    pub cmd_buf_words: u32,
    pub resp_buf_words: u32,
}

impl MailboxRegisterMap {
    pub const DEFAULT: Self = Self {
        cin: 0x00,
        rout: 0x04,
        urg: 0x08,
        flags: 0x0c,
        cout: 0x20,
        rin: 0x24,
        status: 0x2c,
        cmd_buf: 0x40,
        resp_buf: 0xc0,
        doorbell_to_sdm: 0x400,
        doorbell_from_sdm: 0x480,
        cmd_buf_words: 32,
        resp_buf_words: 16,
    };

    /// Byte offset of command ring slot `index`.
    pub const fn cmd_slot(&self, index: u32) -> u32 {
        self.cmd_buf + index * 4
    }

    /// Byte offset of response ring slot `index`.
    pub const fn resp_slot(&self, index: u32) -> u32 {
        self.resp_buf + index * 4
    }
}

impl Default for MailboxRegisterMap {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Urgent acknowledge bit in the status register. The SDM toggles it once per
/// urgent command it accepts.
pub const MBOX_STATUS_UA_MASK: u32 = 1 << 8;

/// Command-buffer-empty, response-buffer-ready and urgent-ack interrupt enables.
pub const MBOX_FLAGS_COE: u32 = 1 << 0;
pub const MBOX_FLAGS_RIE: u32 = 1 << 1;
pub const MBOX_FLAGS_UAE: u32 = 1 << 8;
pub const MBOX_ALL_INTRS: u32 = MBOX_FLAGS_COE | MBOX_FLAGS_RIE | MBOX_FLAGS_UAE;

/// Fixed polling budget of the mailbox transport.
///
/// Every blocking wait in the transport is `iterations * poll_interval_us`
/// long at most. None of these are runtime configurable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxTiming {
    pub poll_interval_us: u32,
    /// Polls while the command ring is full.
    pub cmd_buf_iterations: u32,
    /// Doorbell checks and dropped stray responses allowed per attempt.
    pub doorbell_iterations: u32,
    /// Polls for each trailing response word of a matched response.
    pub resp_word_iterations: u32,
    pub retries: u32,
    pub retry_backoff_us: u32,
}

impl MailboxTiming {
    pub const DEFAULT: Self = Self {
        poll_interval_us: 1000,
        cmd_buf_iterations: 1000,
        doorbell_iterations: 1000,
        resp_word_iterations: 2000,
        retries: 3,
        retry_backoff_us: 2000,
    };
}

impl Default for MailboxTiming {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Names and sizes the RSU layer uses to locate its metadata in flash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RsuLayout {
    pub cpb_name: &'static str,
    pub cpb_backup_name: &'static str,
    pub factory_name: &'static str,
    /// Word index of the SPT0 offset in the GET_SUBPARTITION_TABLE response.
    pub spt0_index: usize,
    /// Word index of the SPT1 offset in the GET_SUBPARTITION_TABLE response.
    pub spt1_index: usize,
    pub spt_size: usize,
    pub cpb_size: usize,
}

impl RsuLayout {
    pub const DEFAULT: Self = Self {
        cpb_name: "CPB0",
        cpb_backup_name: "CPB1",
        factory_name: "FACTORY_IMAGE",
        spt0_index: 1,
        spt1_index: 3,
        spt_size: 4096,
        cpb_size: 4096,
    };
}

impl Default for RsuLayout {
    fn default() -> Self {
        Self::DEFAULT
    }
}
