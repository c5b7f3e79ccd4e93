// Licensed under the Apache-2.0 license

//! Error types shared by the SDM mailbox driver and the RSU layer.

#![no_std]

use thiserror::Error;

pub type MboxResult<T> = Result<T, MboxError>;
pub type RsuResult<T> = Result<T, RsuError>;

/// Failures of the SDM mailbox transport and command layer.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MboxError {
    #[error("mailbox timed out")]
    Timeout,
    #[error("urgent command was not acknowledged")]
    CommError,
    #[error("SDM is busy")]
    DeviceBusy,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("not supported by the SDM firmware")]
    Unsupported,
    #[error("response too short: expected {expected} words, got {actual}")]
    ResponseTooShort { expected: usize, actual: usize },
    #[error("SDM returned error code {0:#x}")]
    Sdm(u32),
    #[error("FPGA configuration hardware error")]
    HardwareError,
    #[error("FPGA configuration state {0:#x}")]
    ConfigError(u32),
}

/// Errors returned by a flash storage driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(usize)]
pub enum FlashDrvError {
    /// Generic failure condition
    FAIL = 1,
    /// Underlying system is busy; retry
    BUSY = 2,
    /// An invalid parameter was passed
    INVAL = 6,
    /// Parameter passed was too large
    SIZE = 7,
    /// Operation is not supported
    NOSUPPORT = 10,
    /// Device is not available
    NODEVICE = 11,
}

impl From<FlashDrvError> for usize {
    fn from(err: FlashDrvError) -> usize {
        err as usize
    }
}

/// Failures of the RSU metadata model and slot manager.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RsuError {
    #[error("mailbox timed out")]
    Timeout,
    #[error("mailbox communication error")]
    CommError,
    #[error("SDM is busy")]
    DeviceBusy,
    #[error("RSU metadata is corrupt")]
    CorruptMetadata,
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    AlreadyExists,
    #[error("not supported")]
    Unsupported,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("flash error {0:?}")]
    Flash(FlashDrvError),
    #[error("verify mismatch at byte offset {offset:#x}")]
    VerifyMismatch { offset: usize },
    #[error("SDM returned error code {0:#x}")]
    Sdm(u32),
    #[error("hardware error")]
    HardwareError,
}

impl From<MboxError> for RsuError {
    fn from(err: MboxError) -> Self {
        match err {
            MboxError::Timeout => RsuError::Timeout,
            MboxError::CommError => RsuError::CommError,
            MboxError::DeviceBusy => RsuError::DeviceBusy,
            MboxError::InvalidArgument => RsuError::InvalidArgument,
            MboxError::Unsupported => RsuError::Unsupported,
            MboxError::ResponseTooShort { .. } => RsuError::CommError,
            MboxError::Sdm(code) => RsuError::Sdm(code),
            MboxError::HardwareError => RsuError::HardwareError,
            MboxError::ConfigError(state) => RsuError::Sdm(state),
        }
    }
}

impl From<FlashDrvError> for RsuError {
    fn from(err: FlashDrvError) -> Self {
        RsuError::Flash(err)
    }
}
