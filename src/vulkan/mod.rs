//! Vulkan compute backend
//!
//! [`CommandRecorder`] is the piece everything else is built around: it drives
//! one pooled command buffer through begin/record/end/reset on every
//! benchmarking iteration. The remaining modules supply what it consumes.

mod commands;
mod handles;
mod recorder;
pub mod sim;
mod status;
mod timestamps;

#[cfg(feature = "loaded")]
mod context;
#[cfg(feature = "loaded")]
mod pipeline;

pub use ash::vk;
pub use commands::DeviceCommands;
pub use handles::{BoundDescriptorSet, Buffer, Pipeline, TimestampQueryPool};
pub use recorder::{CommandRecorder, RecorderError, RecorderState};
pub use status::{check, ErrorCategory, NativeApiError};
pub use timestamps::TimestampPeriod;

#[cfg(feature = "loaded")]
pub use context::VulkanContext;
#[cfg(feature = "loaded")]
pub use pipeline::ComputeKernel;
