//! Engine status codes and the error type behind them.

use std::fmt;

use gpu_memory_manager::DeviceError;
use thiserror::Error;

/// Closed set of outcomes reported by the flat join API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum JoinStatus {
    Success = 0,
    InvalidJoinKind = 1,
    UnsupportedJoinCombination = 2,
    ColumnMismatch = 3,
    DeviceError = 4,
}

impl JoinStatus {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn is_success(self) -> bool {
        self == JoinStatus::Success
    }

    pub fn name(self) -> &'static str {
        match self {
            JoinStatus::Success => "SUCCESS",
            JoinStatus::InvalidJoinKind => "INVALID_JOIN_KIND",
            JoinStatus::UnsupportedJoinCombination => "UNSUPPORTED_JOIN_COMBINATION",
            JoinStatus::ColumnMismatch => "COLUMN_MISMATCH",
            JoinStatus::DeviceError => "DEVICE_ERROR",
        }
    }
}

impl fmt::Display for JoinStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JoinError {
    #[error("invalid join kind: {0}")]
    InvalidJoinKind(String),

    #[error("unsupported join: {0}")]
    UnsupportedJoinCombination(String),

    #[error("column mismatch: {0}")]
    ColumnMismatch(String),

    #[error("device error: {0}")]
    Device(#[from] DeviceError),
}

impl JoinError {
    pub fn status(&self) -> JoinStatus {
        match self {
            JoinError::InvalidJoinKind(_) => JoinStatus::InvalidJoinKind,
            JoinError::UnsupportedJoinCombination(_) => JoinStatus::UnsupportedJoinCombination,
            JoinError::ColumnMismatch(_) => JoinStatus::ColumnMismatch,
            JoinError::Device(_) => JoinStatus::DeviceError,
        }
    }
}

pub type Result<T, E = JoinError> = std::result::Result<T, E>;
