// Licensed under the Apache-2.0 license

use bitfield::bitfield;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Mailbox command opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandId(pub u32);

impl CommandId {
    pub const RESTART: Self = Self(2);
    pub const CONFIG_STATUS: Self = Self(4);
    pub const RECONFIG_STATUS: Self = Self(9);
    pub const QSPI_OPEN: Self = Self(50);
    pub const QSPI_CLOSE: Self = Self(51);
    pub const QSPI_DIRECT: Self = Self(59);
    pub const REBOOT_HPS: Self = Self(71);
    pub const GET_SUBPARTITION_TABLE: Self = Self(90);
    pub const RSU_STATUS: Self = Self(91);
    pub const RSU_UPDATE: Self = Self(92);
    pub const HPS_STAGE_NOTIFY: Self = Self(93);
    pub const RSU_GET_DEVICE_INFO: Self = Self(116);
}

impl From<u32> for CommandId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<CommandId> for u32 {
    fn from(value: CommandId) -> Self {
        value.0
    }
}

/// Error field of a response header as reported by the SDM firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum SdmResponseCode {
    Ok = 0,
    InvalidCommand = 1,
    UnknownBr = 2,
    Unknown = 3,
    NotAllowedUnderSecurity = 0x85,
    NotConfigured = 0x100,
    Timeout = 0x1fe,
    DeviceBusy = 0x1ff,
    Error = 0x3ff,
}

/// Words in an RSU_STATUS response.
pub const RSU_STATUS_WORDS: usize = 9;

/// Value `retry_counter` holds until the firmware overwrites it. Firmware
/// that predates the retry counter leaves it untouched.
pub const RSU_RETRY_COUNTER_UNSET: u32 = u32::MAX;

bitfield! {
    /// Packed `version` word of the RSU status.
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    pub struct RsuVersion(u32);
    impl Debug;
    u32;
    pub dcmf, set_dcmf: 7, 0;
    pub acmf, set_acmf: 15, 8;
    pub error_source, set_error_source: 27, 16;
    pub current_index, set_current_index: 31, 28;
}

/// Snapshot of the SDM's remote system update state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RsuStatusInfo {
    pub current_image: u64,
    pub fail_image: u64,
    pub state: u32,
    pub version: u32,
    pub error_location: u32,
    pub error_details: u32,
    pub retry_counter: u32,
}

impl Default for RsuStatusInfo {
    fn default() -> Self {
        Self {
            current_image: 0,
            fail_image: 0,
            state: 0,
            version: 0,
            error_location: 0,
            error_details: 0,
            retry_counter: RSU_RETRY_COUNTER_UNSET,
        }
    }
}

impl RsuStatusInfo {
    pub fn from_words(words: &[u32; RSU_STATUS_WORDS]) -> Self {
        Self {
            current_image: words[0] as u64 | (words[1] as u64) << 32,
            fail_image: words[2] as u64 | (words[3] as u64) << 32,
            state: words[4],
            version: words[5],
            error_location: words[6],
            error_details: words[7],
            retry_counter: words[8],
        }
    }

    pub fn to_words(&self) -> [u32; RSU_STATUS_WORDS] {
        [
            self.current_image as u32,
            (self.current_image >> 32) as u32,
            self.fail_image as u32,
            (self.fail_image >> 32) as u32,
            self.state,
            self.version,
            self.error_location,
            self.error_details,
            self.retry_counter,
        ]
    }

    pub fn version_fields(&self) -> RsuVersion {
        RsuVersion(self.version)
    }

    /// Whether the firmware filled in the retry counter.
    pub fn has_retry_counter(&self) -> bool {
        self.retry_counter != RSU_RETRY_COUNTER_UNSET
    }
}

/// HPS_STAGE_NOTIFY argument flags.
pub const HPS_NOTIFY_IGNORE_STAGE: u32 = 1 << 18;
pub const HPS_NOTIFY_CLEAR_ERROR_STATUS: u32 = 1 << 17;
pub const HPS_NOTIFY_RESET_RETRY_COUNTER: u32 = 1 << 16;
pub const HPS_NOTIFY_VALUE_MASK: u32 = 0xffff;

/// RECONFIG_STATUS / CONFIG_STATUS response layout.
pub const RECONFIG_STATUS_RESPONSE_LEN: usize = 6;
pub const RECONFIG_STATUS_STATE: usize = 0;
pub const RECONFIG_STATUS_PIN_STATUS: usize = 2;
pub const RECONFIG_STATUS_SOFTFUNC_STATUS: usize = 3;

pub const RECONFIG_PIN_STATUS_NSTATUS: u32 = 1 << 31;
pub const RECONFIG_SOFTFUNC_STATUS_CONF_DONE: u32 = 1 << 0;
pub const RECONFIG_SOFTFUNC_STATUS_INIT_DONE: u32 = 1 << 1;
pub const RECONFIG_SOFTFUNC_STATUS_SEU_ERROR: u32 = 1 << 3;

/// Configuration states reported in the STATE word.
pub const CFGSTAT_STATE_IDLE: u32 = 0x0000_0000;
pub const CFGSTAT_STATE_CONFIG: u32 = 0x1000_0000;
pub const CFGSTAT_STATE_FAILED_UNSUPPORTED: u32 = 0xf000_0001;
pub const CFGSTAT_STATE_ERROR_INVALID: u32 = 0xf000_0002;
pub const CFGSTAT_STATE_ERROR_CORRUPT: u32 = 0xf000_0003;
pub const CFGSTAT_STATE_ERROR_AUTH: u32 = 0xf000_0004;
pub const CFGSTAT_STATE_ERROR_HARDWARE: u32 = 0xf000_0005;
pub const CFGSTAT_STATE_ERROR_TIMEOUT: u32 = 0xf000_0006;
pub const CFGSTAT_STATE_ERROR_FAILED: u32 = 0xf000_0007;
pub const CFGSTAT_STATE_ERROR_BOOT_INFO: u32 = 0xf000_0008;

/// Outcome of one FPGA configuration status poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FpgaConfigStatus {
    Done,
    /// The SDM is still configuring; poll again.
    Configuring,
}

/// Words in the RSU_GET_DEVICE_INFO response.
pub const DEVICE_INFO_WORDS: usize = 7;
/// Number of decision firmware copies.
pub const DCMF_COPIES: usize = 4;

bitfield! {
    /// Decision firmware version word.
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    pub struct DcmfVersion(u32);
    impl Debug;
    u32;
    pub update, set_update: 15, 8;
    pub minor, set_minor: 23, 16;
    pub major, set_major: 31, 24;
}

impl From<u32> for DcmfVersion {
    fn from(word: u32) -> Self {
        DcmfVersion(word)
    }
}

/// Decision firmware versions, corruption status and max retry count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub dcmf_version: [u32; DCMF_COPIES],
    pub dcmf_status: [u16; DCMF_COPIES],
    pub max_retry: u32,
}

impl DeviceInfo {
    pub fn from_words(words: &[u32; DEVICE_INFO_WORDS]) -> Self {
        Self {
            dcmf_version: [words[0], words[1], words[2], words[3]],
            dcmf_status: [
                words[4] as u16,
                (words[4] >> 16) as u16,
                words[5] as u16,
                (words[5] >> 16) as u16,
            ],
            max_retry: words[6],
        }
    }

    pub fn to_words(&self) -> [u32; DEVICE_INFO_WORDS] {
        let v = &self.dcmf_version;
        let s = &self.dcmf_status;
        [
            v[0],
            v[1],
            v[2],
            v[3],
            s[0] as u32 | (s[1] as u32) << 16,
            s[2] as u32 | (s[3] as u32) << 16,
            self.max_retry,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rsu_status_words() {
        let words = [0x0100_0000, 0, 0x0200_0000, 0x1, 0, 0x0000_0202, 0, 0, 2];
        let status = RsuStatusInfo::from_words(&words);
        assert_eq!(status.current_image, 0x0100_0000);
        assert_eq!(status.fail_image, 0x1_0200_0000);
        assert_eq!(status.version_fields().acmf(), 2);
        assert_eq!(status.version_fields().dcmf(), 2);
        assert!(status.has_retry_counter());
        assert_eq!(status.to_words(), words);
    }

    #[test]
    fn test_default_status_has_sentinel_retry_counter() {
        assert!(!RsuStatusInfo::default().has_retry_counter());
    }

    #[test]
    fn test_device_info_packing() {
        let info = DeviceInfo {
            dcmf_version: [0x0114_0200, 0x0114_0200, 0x0113_0000, 0x0114_0200],
            dcmf_status: [0, 1, 0, 0],
            max_retry: 3,
        };
        let words = info.to_words();
        assert_eq!(words[4], 0x0001_0000);
        assert_eq!(words[5], 0);
        assert_eq!(DeviceInfo::from_words(&words), info);

        let version = DcmfVersion(info.dcmf_version[0]);
        assert_eq!((version.major(), version.minor(), version.update()), (1, 20, 2));
    }

    #[test]
    fn test_response_code_values() {
        assert_eq!(u32::from(SdmResponseCode::DeviceBusy), 0x1ff);
        assert_eq!(u32::from(SdmResponseCode::Timeout), 0x1fe);
        assert!(matches!(
            SdmResponseCode::try_from(0x85u32),
            Ok(SdmResponseCode::NotAllowedUnderSecurity)
        ));
        assert!(SdmResponseCode::try_from(0x42u32).is_err());
    }
}
