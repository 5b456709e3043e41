//! Translation of native Vulkan result codes into crate errors

use ash::vk;
use thiserror::Error;

/// Coarse classification of a failing `vk::Result`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    OutOfHostMemory,
    OutOfDeviceMemory,
    InitializationFailed,
    DeviceLost,
    ValidationFailed,
    /// A non-error status code where `SUCCESS` was required
    UnexpectedStatus,
    Unknown,
}

impl ErrorCategory {
    pub fn name(&self) -> &'static str {
        match self {
            ErrorCategory::OutOfHostMemory => "out of host memory",
            ErrorCategory::OutOfDeviceMemory => "out of device memory",
            ErrorCategory::InitializationFailed => "initialization failed",
            ErrorCategory::DeviceLost => "device lost",
            ErrorCategory::ValidationFailed => "validation failed",
            ErrorCategory::UnexpectedStatus => "unexpected status",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

impl From<vk::Result> for ErrorCategory {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_HOST_MEMORY => ErrorCategory::OutOfHostMemory,
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_POOL_MEMORY => {
                ErrorCategory::OutOfDeviceMemory
            }
            vk::Result::ERROR_INITIALIZATION_FAILED => ErrorCategory::InitializationFailed,
            vk::Result::ERROR_DEVICE_LOST => ErrorCategory::DeviceLost,
            vk::Result::ERROR_VALIDATION_FAILED_EXT => ErrorCategory::ValidationFailed,
            r if r.as_raw() > 0 => ErrorCategory::UnexpectedStatus,
            _ => ErrorCategory::Unknown,
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A failing status returned by a Vulkan entry point
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Vulkan call failed with {result} (code {}, {category})", self.code())]
pub struct NativeApiError {
    pub result: vk::Result,
    pub category: ErrorCategory,
}

impl NativeApiError {
    pub fn new(result: vk::Result) -> Self {
        Self {
            result,
            category: ErrorCategory::from(result),
        }
    }

    /// Raw numeric `VkResult` value
    pub fn code(&self) -> i32 {
        self.result.as_raw()
    }
}

impl From<vk::Result> for NativeApiError {
    fn from(result: vk::Result) -> Self {
        Self::new(result)
    }
}

/// Map `VK_SUCCESS` to `Ok`, anything else to a [`NativeApiError`]
pub fn check(result: vk::Result) -> Result<(), NativeApiError> {
    if result == vk::Result::SUCCESS {
        Ok(())
    } else {
        Err(NativeApiError::new(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_is_ok() {
        assert_eq!(check(vk::Result::SUCCESS), Ok(()));
    }

    #[test]
    fn error_codes_are_categorized() {
        let err = check(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY).unwrap_err();
        assert_eq!(err.category, ErrorCategory::OutOfDeviceMemory);
        assert_eq!(err.code(), -2);

        let err = check(vk::Result::ERROR_DEVICE_LOST).unwrap_err();
        assert_eq!(err.category, ErrorCategory::DeviceLost);

        let err = check(vk::Result::ERROR_FRAGMENTED_POOL).unwrap_err();
        assert_eq!(err.category, ErrorCategory::Unknown);
    }

    #[test]
    fn message_carries_raw_code() {
        let message = NativeApiError::new(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY).to_string();
        assert!(message.contains("code -2, out of device memory"), "{}", message);
    }

    #[test]
    fn non_success_status_is_rejected() {
        let err = check(vk::Result::NOT_READY).unwrap_err();
        assert_eq!(err.category, ErrorCategory::UnexpectedStatus);
        assert_eq!(err.result, vk::Result::NOT_READY);
    }
}
