// Licensed under the Apache-2.0 license

//! Command and response header words exchanged through the mailbox rings.

use bitfield::bitfield;

/// Client ID the boot loader uses for every command it issues.
pub const MBOX_CLIENT_ID_HPS: u8 = 0xb;
/// Transaction ID the boot loader uses for every command it issues.
pub const MBOX_ID_HPS: u8 = 0x1;

/// Argument words a single command may carry.
pub const MBOX_MAX_ARGS: usize = 31;
/// Highest opcode the SDM accepts.
pub const MBOX_MAX_CMD_INDEX: u32 = 2047;

bitfield! {
    /// First word of every command written into the command ring.
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    pub struct CmdHeader(u32);
    impl Debug;
    u32;
    pub opcode, set_opcode: 10, 0;
    pub indirect, set_indirect: 11, 11;
    pub len, set_len: 22, 12;
    pub id, set_id: 27, 24;
    pub client, set_client: 31, 28;
}

impl CmdHeader {
    pub fn new(client: u8, id: u8, len: u32, indirect: bool, opcode: u32) -> Self {
        let mut header = CmdHeader(0);
        header.set_client(client as u32);
        header.set_id(id as u32);
        header.set_len(len);
        header.set_indirect(indirect as u32);
        header.set_opcode(opcode);
        header
    }

    pub fn is_indirect(&self) -> bool {
        self.indirect() != 0
    }
}

bitfield! {
    /// First word of every response the SDM places in the response ring.
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    pub struct RespHeader(u32);
    impl Debug;
    u32;
    pub error_code, set_error_code: 10, 0;
    pub len, set_len: 22, 12;
    pub id, set_id: 27, 24;
    pub client, set_client: 31, 28;
}

impl RespHeader {
    pub fn new(client: u8, id: u8, len: u32, error_code: u32) -> Self {
        let mut header = RespHeader(0);
        header.set_client(client as u32);
        header.set_id(id as u32);
        header.set_len(len);
        header.set_error_code(error_code);
        header
    }

    /// Whether this response answers a command sent with `client`/`id`.
    pub fn matches(&self, client: u8, id: u8) -> bool {
        self.client() == client as u32 && self.id() == id as u32
    }
}
