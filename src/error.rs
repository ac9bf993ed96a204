//! Status codes returned by the virtual stores and their platform mapping.
//! Stores never fail for expected conditions (missing key, missing value, unknown
//! handle); they answer with a `StateCode` which the hook boundary maps to the
//! nearest platform error so the guest's own error handling keeps working.

use std::fmt::{Display, Formatter};
use thiserror::Error;

pub const ERROR_SUCCESS: u32 = 0;
pub const ERROR_FILE_NOT_FOUND: u32 = 2;
pub const ERROR_ACCESS_DENIED: u32 = 5;
pub const ERROR_INVALID_HANDLE: u32 = 6;

pub const REG_CREATED_NEW_KEY: u32 = 1;
pub const REG_OPENED_EXISTING_KEY: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateCode {
    Success,
    CreatedNew,
    OpenedExisting,
    /// The handle is unknown to the store that was asked. The caller should try
    /// the sibling store before giving up.
    InvalidHandle,
    AccessDenied,
    NotFound,
}

impl StateCode {
    pub fn is_success(&self) -> bool {
        matches!(self, StateCode::Success | StateCode::CreatedNew | StateCode::OpenedExisting)
    }

    /// Map to the platform error code seen by the guest.
    pub fn to_win32(&self) -> u32 {
        match self {
            StateCode::Success | StateCode::CreatedNew | StateCode::OpenedExisting => ERROR_SUCCESS,
            StateCode::NotFound => ERROR_FILE_NOT_FOUND,
            StateCode::AccessDenied => ERROR_ACCESS_DENIED,
            StateCode::InvalidHandle => ERROR_INVALID_HANDLE,
        }
    }

    /// Creation disposition reported by key-create calls.
    pub fn disposition(&self) -> Option<u32> {
        match self {
            StateCode::CreatedNew => Some(REG_CREATED_NEW_KEY),
            StateCode::OpenedExisting => Some(REG_OPENED_EXISTING_KEY),
            _ => None,
        }
    }
}

impl Display for StateCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StateCode::Success => "success",
            StateCode::CreatedNew => "created_new",
            StateCode::OpenedExisting => "opened_existing",
            StateCode::InvalidHandle => "invalid_handle",
            StateCode::AccessDenied => "access_denied",
            StateCode::NotFound => "not_found",
        };
        f.write_str(s)
    }
}

/// Failure reported by a host environment accessor (real registry or filesystem).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("host i/o failure: {0}")]
    Io(String),
}

impl HostError {
    /// Translation used on read paths: anything but a permission failure reads as absent.
    pub fn read_state(&self) -> StateCode {
        match self {
            HostError::AccessDenied(_) => StateCode::AccessDenied,
            HostError::NotFound(_) | HostError::Io(_) => StateCode::NotFound,
        }
    }

    /// Translation used on write paths: a failed write is reported as denied unless
    /// the target was genuinely missing.
    pub fn write_state(&self) -> StateCode {
        match self {
            HostError::NotFound(_) => StateCode::NotFound,
            HostError::AccessDenied(_) | HostError::Io(_) => StateCode::AccessDenied,
        }
    }
}

impl From<std::io::Error> for HostError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => HostError::AccessDenied(err.to_string()),
            std::io::ErrorKind::NotFound => HostError::NotFound(err.to_string()),
            _ => HostError::Io(err.to_string()),
        }
    }
}

pub type HostResult<T> = Result<T, HostError>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod error_tests;
