//! Device-level failures.
//!
//! Kernels never return errors to the host directly. A fault inside a launch
//! is parked on the stream's sticky error slot and only observed at the next
//! explicit check, which is where it becomes a [`DeviceError`].

use thiserror::Error;

/// Failure reported by the device runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// An allocation did not fit in the remaining device memory budget.
    #[error("out of device memory: requested {requested} bytes, {available} bytes available")]
    MemoryAllocation { requested: usize, available: usize },

    /// A kernel aborted while executing.
    #[error("kernel `{kernel}` failed: {reason}")]
    LaunchFailure { kernel: &'static str, reason: String },

    /// A kernel thread touched memory outside of a buffer.
    #[error("kernel `{kernel}` accessed out-of-bounds index {index}")]
    IllegalAddress { kernel: &'static str, index: usize },

    /// An argument passed to the runtime was rejected.
    #[error("invalid value: {0}")]
    InvalidValue(String),
}

impl DeviceError {
    /// Symbolic name of the error, stable across messages.
    pub fn name(&self) -> &'static str {
        match self {
            DeviceError::MemoryAllocation { .. } => "DEVICE_ERROR_MEMORY_ALLOCATION",
            DeviceError::LaunchFailure { .. } => "DEVICE_ERROR_LAUNCH_FAILURE",
            DeviceError::IllegalAddress { .. } => "DEVICE_ERROR_ILLEGAL_ADDRESS",
            DeviceError::InvalidValue(_) => "DEVICE_ERROR_INVALID_VALUE",
        }
    }

    /// Human readable rendering of the error.
    pub fn description(&self) -> String {
        self.to_string()
    }
}

pub type DeviceResult<T> = Result<T, DeviceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_symbolic() {
        let err = DeviceError::MemoryAllocation {
            requested: 64,
            available: 8,
        };
        assert_eq!(err.name(), "DEVICE_ERROR_MEMORY_ALLOCATION");
        assert!(err.description().contains("requested 64 bytes"));

        let err = DeviceError::IllegalAddress {
            kernel: "scatter_matches",
            index: 12,
        };
        assert_eq!(err.name(), "DEVICE_ERROR_ILLEGAL_ADDRESS");
        assert!(err.to_string().contains("scatter_matches"));
    }
}
