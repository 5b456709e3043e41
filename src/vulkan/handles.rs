//! Non-owning views of the resources a recording references
//!
//! Whoever allocated the underlying Vulkan objects keeps ownership; these are
//! plain copies of the handles plus the metadata the recorder needs.

use ash::vk;

/// A device-memory-backed linear region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Buffer {
    pub raw: vk::Buffer,
    /// Size in bytes
    pub size: vk::DeviceSize,
}

impl Buffer {
    pub fn new(raw: vk::Buffer, size: vk::DeviceSize) -> Self {
        Self { raw, size }
    }
}

/// A compute pipeline together with the layout its descriptor sets bind against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pipeline {
    pub raw: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

impl Pipeline {
    pub fn new(raw: vk::Pipeline, layout: vk::PipelineLayout) -> Self {
        Self { raw, layout }
    }
}

/// A descriptor set and the set index it binds to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundDescriptorSet {
    pub index: u32,
    pub set: vk::DescriptorSet,
}

impl BoundDescriptorSet {
    pub fn new(index: u32, set: vk::DescriptorSet) -> Self {
        Self { index, set }
    }
}

/// A fixed-capacity pool of timestamp query slots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampQueryPool {
    pub raw: vk::QueryPool,
    pub query_count: u32,
}

impl TimestampQueryPool {
    pub fn new(raw: vk::QueryPool, query_count: u32) -> Self {
        Self { raw, query_count }
    }
}
