//! Vulkan instance, device and resource management

use std::cell::RefCell;
use std::ffi::CStr;

use ash::{vk, Device, Entry, Instance};

use super::handles::{Buffer, TimestampQueryPool};
use super::pipeline::KernelObjects;
use super::recorder::CommandRecorder;
use super::timestamps::TimestampPeriod;
use crate::bench::ComputeTarget;
use crate::BenchmarkError;

const APP_NAME: &[u8] = b"vk-compute-bench\0";

/// A host-visible buffer and the memory bound to it
#[derive(Debug, Clone, Copy)]
struct HostAllocation {
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
}

/// Everything created through the context, destroyed with it
#[derive(Default)]
pub(super) struct Resources {
    buffers: Vec<HostAllocation>,
    query_pools: Vec<vk::QueryPool>,
    pub(super) kernels: Vec<KernelObjects>,
}

/// Vulkan GPU context
///
/// Owns the device, one compute queue, a command pool whose buffers can be
/// reset individually, and every buffer, kernel and query pool created through
/// it. Callers get non-owning handles back.
pub struct VulkanContext {
    _entry: Entry,
    instance: Instance,
    pub(super) device: Device,
    queue: vk::Queue,
    queue_family_index: u32,
    command_pool: vk::CommandPool,
    fence: vk::Fence,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    device_name: String,
    timestamp_period: TimestampPeriod,
    pub(super) resources: RefCell<Resources>,
}

/// A physical device able to run timed compute work
struct Candidate {
    physical_device: vk::PhysicalDevice,
    queue_family_index: u32,
    timestamp_valid_bits: u32,
    rank: u32,
}

impl VulkanContext {
    /// Create a new Vulkan context on the best available compute device
    pub fn new() -> Result<Self, BenchmarkError> {
        let entry = unsafe { Entry::load() }.map_err(|e| BenchmarkError::Loader(e.to_string()))?;

        // SAFETY: APP_NAME is nul-terminated with no interior nul
        let app_name = unsafe { CStr::from_bytes_with_nul_unchecked(APP_NAME) };
        let app_info = vk::ApplicationInfo::builder()
            .application_name(app_name)
            .engine_name(app_name)
            .api_version(vk::API_VERSION_1_1);
        let instance_info = vk::InstanceCreateInfo::builder().application_info(&app_info);
        let instance = unsafe { entry.create_instance(&instance_info, None)? };

        let candidate = match select_physical_device(&instance) {
            Ok(candidate) => candidate,
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                return Err(e);
            }
        };

        let priorities = [1.0f32];
        let queue_infos = [vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(candidate.queue_family_index)
            .queue_priorities(&priorities)
            .build()];
        let device_info = vk::DeviceCreateInfo::builder().queue_create_infos(&queue_infos);
        let device = match unsafe {
            instance.create_device(candidate.physical_device, &device_info, None)
        } {
            Ok(device) => device,
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                return Err(e.into());
            }
        };

        let properties = unsafe { instance.get_physical_device_properties(candidate.physical_device) };
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(candidate.physical_device) };
        let device_name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();
        let queue = unsafe { device.get_device_queue(candidate.queue_family_index, 0) };

        log::info!(
            "using {} (queue family {}, {} valid timestamp bits, {} ns/tick)",
            device_name,
            candidate.queue_family_index,
            candidate.timestamp_valid_bits,
            properties.limits.timestamp_period
        );

        // From here on Drop tears down whatever was created
        let mut ctx = Self {
            _entry: entry,
            instance,
            device,
            queue,
            queue_family_index: candidate.queue_family_index,
            command_pool: vk::CommandPool::null(),
            fence: vk::Fence::null(),
            memory_properties,
            device_name,
            timestamp_period: TimestampPeriod::new(
                properties.limits.timestamp_period,
                candidate.timestamp_valid_bits,
            ),
            resources: RefCell::new(Resources::default()),
        };

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(ctx.queue_family_index)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        ctx.command_pool = unsafe { ctx.device.create_command_pool(&pool_info, None)? };
        ctx.fence = unsafe { ctx.device.create_fence(&vk::FenceCreateInfo::default(), None)? };

        Ok(ctx)
    }

    /// Get device name
    pub fn device_name(&self) -> String {
        self.device_name.clone()
    }

    /// Create a host-visible storage buffer usable as a copy source and target
    pub fn create_buffer(&self, size: vk::DeviceSize) -> Result<Buffer, BenchmarkError> {
        let info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(
                vk::BufferUsageFlags::STORAGE_BUFFER
                    | vk::BufferUsageFlags::TRANSFER_SRC
                    | vk::BufferUsageFlags::TRANSFER_DST,
            )
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { self.device.create_buffer(&info, None)? };

        let mut allocation = HostAllocation {
            buffer,
            memory: vk::DeviceMemory::null(),
            size,
        };
        let result = self.bind_host_memory(&mut allocation);
        self.resources.borrow_mut().buffers.push(allocation);
        result?;

        Ok(Buffer::new(buffer, size))
    }

    fn bind_host_memory(&self, allocation: &mut HostAllocation) -> Result<(), BenchmarkError> {
        let requirements = unsafe { self.device.get_buffer_memory_requirements(allocation.buffer) };
        let memory_type_index = self
            .find_memory_type(
                requirements.memory_type_bits,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            )
            .ok_or_else(|| {
                BenchmarkError::BufferCreation("no host-visible coherent memory type".to_string())
            })?;

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);
        allocation.memory = unsafe { self.device.allocate_memory(&alloc_info, None)? };
        unsafe {
            self.device
                .bind_buffer_memory(allocation.buffer, allocation.memory, 0)?
        };
        Ok(())
    }

    fn find_memory_type(&self, type_bits: u32, flags: vk::MemoryPropertyFlags) -> Option<u32> {
        (0..self.memory_properties.memory_type_count).find(|&i| {
            type_bits & (1 << i) != 0
                && self.memory_properties.memory_types[i as usize]
                    .property_flags
                    .contains(flags)
        })
    }

    fn allocation(&self, buffer: &Buffer) -> Result<HostAllocation, BenchmarkError> {
        self.resources
            .borrow()
            .buffers
            .iter()
            .find(|a| a.buffer == buffer.raw)
            .copied()
            .ok_or_else(|| {
                BenchmarkError::Execution(format!("{:?} was not created by this context", buffer.raw))
            })
    }

    /// Copy `data` into `buffer` at `offset` from the host
    pub fn write_buffer(&self, buffer: &Buffer, offset: u64, data: &[u8]) -> Result<(), BenchmarkError> {
        let allocation = self.allocation(buffer)?;
        if offset + data.len() as u64 > allocation.size {
            return Err(BenchmarkError::Execution(format!(
                "write of {} bytes at {} overruns a {} byte buffer",
                data.len(),
                offset,
                allocation.size
            )));
        }
        if data.is_empty() {
            return Ok(());
        }

        unsafe {
            let ptr = self.device.map_memory(
                allocation.memory,
                offset,
                data.len() as u64,
                vk::MemoryMapFlags::empty(),
            )? as *mut u8;
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr, data.len());
            self.device.unmap_memory(allocation.memory);
        }
        Ok(())
    }

    /// Read back the full contents of `buffer`
    pub fn read_buffer(&self, buffer: &Buffer) -> Result<Vec<u8>, BenchmarkError> {
        let allocation = self.allocation(buffer)?;
        let mut data = vec![0u8; allocation.size as usize];
        if data.is_empty() {
            return Ok(data);
        }

        unsafe {
            let ptr = self.device.map_memory(
                allocation.memory,
                0,
                allocation.size,
                vk::MemoryMapFlags::empty(),
            )? as *const u8;
            std::ptr::copy_nonoverlapping(ptr, data.as_mut_ptr(), data.len());
            self.device.unmap_memory(allocation.memory);
        }
        Ok(data)
    }

    pub fn create_query_pool(&self, query_count: u32) -> Result<TimestampQueryPool, BenchmarkError> {
        let info = vk::QueryPoolCreateInfo::builder()
            .query_type(vk::QueryType::TIMESTAMP)
            .query_count(query_count);
        let raw = unsafe { self.device.create_query_pool(&info, None)? };
        self.resources.borrow_mut().query_pools.push(raw);
        Ok(TimestampQueryPool::new(raw, query_count))
    }
}

impl ComputeTarget for VulkanContext {
    type Commands = vk::DeviceFnV1_0;

    fn device_name(&self) -> String {
        self.device_name.clone()
    }

    fn create_recorder(&self) -> Result<CommandRecorder<'_, Self::Commands>, BenchmarkError> {
        let info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let raw = unsafe { self.device.allocate_command_buffers(&info)? }
            .into_iter()
            .next()
            .ok_or_else(|| BenchmarkError::Execution("no command buffer allocated".to_string()))?;

        // SAFETY: freshly allocated primary buffer from a RESET_COMMAND_BUFFER
        // pool on this device; the pool lives as long as `self`.
        Ok(unsafe { CommandRecorder::new(self.device.handle(), raw, self.device.fp_v1_0()) })
    }

    fn submit_and_wait(&self, command_buffer: vk::CommandBuffer) -> Result<(), BenchmarkError> {
        let command_buffers = [command_buffer];
        let submit = vk::SubmitInfo::builder().command_buffers(&command_buffers);
        unsafe {
            self.device
                .queue_submit(self.queue, &[submit.build()], self.fence)?;
            self.device.wait_for_fences(&[self.fence], true, u64::MAX)?;
            self.device.reset_fences(&[self.fence])?;
        }
        Ok(())
    }

    fn read_timestamps(&self, pool: &TimestampQueryPool) -> Result<Vec<u64>, BenchmarkError> {
        let mut data = vec![0u64; pool.query_count as usize];
        unsafe {
            self.device.get_query_pool_results(
                pool.raw,
                0,
                pool.query_count,
                &mut data,
                vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WAIT,
            )?
        };
        Ok(data)
    }

    fn read_buffer(&self, buffer: &Buffer) -> Result<Vec<u8>, BenchmarkError> {
        VulkanContext::read_buffer(self, buffer)
    }

    fn timestamp_period(&self) -> TimestampPeriod {
        self.timestamp_period
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        let resources = std::mem::take(self.resources.get_mut());
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                log::warn!("device_wait_idle failed during teardown: {}", e);
            }
            for kernel in resources.kernels {
                kernel.destroy(&self.device);
            }
            for pool in resources.query_pools {
                self.device.destroy_query_pool(pool, None);
            }
            for allocation in resources.buffers {
                self.device.destroy_buffer(allocation.buffer, None);
                self.device.free_memory(allocation.memory, None);
            }
            self.device.destroy_fence(self.fence, None);
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

/// Pick a device with a compute queue that supports timestamps, discrete GPUs first
fn select_physical_device(instance: &Instance) -> Result<Candidate, BenchmarkError> {
    let physical_devices = unsafe { instance.enumerate_physical_devices()? };

    physical_devices
        .into_iter()
        .filter_map(|physical_device| {
            let properties = unsafe { instance.get_physical_device_properties(physical_device) };
            let families =
                unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

            let (index, family) = families.iter().enumerate().find(|(_, family)| {
                family.queue_flags.contains(vk::QueueFlags::COMPUTE)
                    && family.timestamp_valid_bits > 0
            })?;

            let rank = match properties.device_type {
                vk::PhysicalDeviceType::DISCRETE_GPU => 3,
                vk::PhysicalDeviceType::INTEGRATED_GPU => 2,
                vk::PhysicalDeviceType::VIRTUAL_GPU => 1,
                _ => 0,
            };

            Some(Candidate {
                physical_device,
                queue_family_index: index as u32,
                timestamp_valid_bits: family.timestamp_valid_bits,
                rank,
            })
        })
        .max_by_key(|candidate| candidate.rank)
        .ok_or(BenchmarkError::NoDevice)
}
