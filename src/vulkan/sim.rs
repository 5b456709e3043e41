//! A software stand-in for a Vulkan device
//!
//! [`SimulatedDevice`] implements [`DeviceCommands`] by appending every command
//! to a per-command-buffer log instead of calling a driver. It models the
//! command buffer lifecycle the way the validation layers would report it, and
//! can "execute" a submitted command buffer against host-side buffer memory and
//! query slots. This lets the benchmark loop and the recorder be exercised on
//! machines without a GPU.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use ash::vk::{self, Handle};

use super::commands::DeviceCommands;
use super::handles::{Buffer, Pipeline, TimestampQueryPool};
use super::recorder::CommandRecorder;
use super::status::{check, NativeApiError};
use super::timestamps::TimestampPeriod;
use crate::bench::ComputeTarget;
use crate::BenchmarkError;

/// Nominal duration of one simulated tick, in nanoseconds
pub const SIMULATED_TIMESTAMP_PERIOD: f32 = 1.0;

/// A command as it was appended to a simulated command buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimCommand {
    CopyBuffer {
        src: vk::Buffer,
        dst: vk::Buffer,
        src_offset: vk::DeviceSize,
        dst_offset: vk::DeviceSize,
        size: vk::DeviceSize,
    },
    BindPipeline {
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    },
    BindDescriptorSets {
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: Vec<vk::DescriptorSet>,
    },
    ResetQueryPool {
        pool: vk::QueryPool,
        first_query: u32,
        query_count: u32,
    },
    WriteTimestamp {
        stage: vk::PipelineStageFlags,
        pool: vk::QueryPool,
        query: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    PipelineBarrier {
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
    },
}

/// Lifecycle state of a simulated command buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimBufferState {
    Initial,
    Recording,
    Executable,
    Invalid,
}

/// The three fallible entry points, used to inject failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimCall {
    Begin,
    End,
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QuerySlot {
    Uninitialized,
    Unavailable,
    Available(u64),
}

#[derive(Debug)]
struct SimCommandBuffer {
    state: SimBufferState,
    one_time_submit: bool,
    commands: Vec<SimCommand>,
    begin_flags: Vec<vk::CommandBufferUsageFlags>,
    reset_flags: Vec<vk::CommandBufferResetFlags>,
    submissions: u64,
}

impl SimCommandBuffer {
    fn new() -> Self {
        Self {
            state: SimBufferState::Initial,
            one_time_submit: false,
            commands: Vec::new(),
            begin_flags: Vec::new(),
            reset_flags: Vec::new(),
            submissions: 0,
        }
    }
}

#[derive(Debug, Default)]
struct SimState {
    next_handle: u64,
    clock: u64,
    command_buffers: HashMap<vk::CommandBuffer, SimCommandBuffer>,
    buffers: HashMap<vk::Buffer, Vec<u8>>,
    query_pools: HashMap<vk::QueryPool, Vec<QuerySlot>>,
    pipelines: HashMap<vk::Pipeline, vk::PipelineLayout>,
    pending_failures: HashMap<SimCall, vk::Result>,
    violations: Vec<String>,
}

impl SimState {
    fn next_raw(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn take_failure(&mut self, call: SimCall) -> Option<vk::Result> {
        self.pending_failures.remove(&call)
    }

    fn violation(&mut self, message: String) {
        log::warn!("simulated device: {}", message);
        self.violations.push(message);
    }

    /// Append a command, flagging it if the buffer is not recording
    fn append(&mut self, command_buffer: vk::CommandBuffer, command: SimCommand) {
        let state = match self.command_buffers.get(&command_buffer) {
            Some(cb) => cb.state,
            None => {
                self.violation(format!("{:?} issued to unknown {:?}", command, command_buffer));
                return;
            }
        };
        if state != SimBufferState::Recording {
            self.violation(format!(
                "{:?} issued to {:?} in the {:?} state",
                command, command_buffer, state
            ));
            return;
        }
        if let Some(cb) = self.command_buffers.get_mut(&command_buffer) {
            cb.commands.push(command);
        }
    }

    fn execute(&mut self, commands: &[SimCommand]) {
        let mut pipeline_bound = false;
        // Slots reset earlier in this submission and not yet written
        let mut reset_slots: HashSet<(vk::QueryPool, u32)> = HashSet::new();
        for command in commands {
            self.clock = self.clock.saturating_add(1);
            match command {
                SimCommand::CopyBuffer {
                    src,
                    dst,
                    src_offset,
                    dst_offset,
                    size,
                } => self.copy(*src, *dst, *src_offset, *dst_offset, *size),
                SimCommand::BindPipeline { pipeline, .. } => {
                    if self.pipelines.contains_key(pipeline) {
                        pipeline_bound = true;
                    } else {
                        self.violation(format!("bound unknown {:?}", pipeline));
                    }
                }
                SimCommand::BindDescriptorSets { .. } => {}
                SimCommand::ResetQueryPool {
                    pool,
                    first_query,
                    query_count,
                } => match self.query_pools.get_mut(pool) {
                    Some(slots) => {
                        let first = *first_query as usize;
                        let end = first + *query_count as usize;
                        if end > slots.len() {
                            self.violation(format!("reset of {:?} past its slot count", pool));
                        } else {
                            for slot in &mut slots[first..end] {
                                *slot = QuerySlot::Unavailable;
                            }
                            reset_slots.extend((first..end).map(|query| (*pool, query as u32)));
                        }
                    }
                    None => self.violation(format!("reset of unknown {:?}", pool)),
                },
                SimCommand::WriteTimestamp { pool, query, .. } => {
                    let clock = self.clock;
                    let written = match self
                        .query_pools
                        .get_mut(pool)
                        .and_then(|slots| slots.get_mut(*query as usize))
                    {
                        Some(slot) => {
                            *slot = QuerySlot::Available(clock);
                            true
                        }
                        None => false,
                    };
                    if !written {
                        self.violation(format!("timestamp slot {} of {:?} is invalid", query, pool));
                    } else if !reset_slots.remove(&(*pool, *query)) {
                        self.violation(format!(
                            "timestamp written to slot {} of {:?} without a reset earlier in the same recording",
                            query, pool
                        ));
                    }
                }
                SimCommand::Dispatch { x, y, z } => {
                    if !pipeline_bound {
                        self.violation("dispatch without a bound compute pipeline".to_string());
                    }
                    let groups = (*x as u64)
                        .saturating_mul(*y as u64)
                        .saturating_mul(*z as u64);
                    self.clock = self.clock.saturating_add(groups);
                }
                SimCommand::PipelineBarrier { .. } => {}
            }
        }
    }

    fn copy(
        &mut self,
        src: vk::Buffer,
        dst: vk::Buffer,
        src_offset: vk::DeviceSize,
        dst_offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) {
        let (src_end, dst_end) = match (src_offset.checked_add(size), dst_offset.checked_add(size)) {
            (Some(src_end), Some(dst_end)) => (src_end, dst_end),
            _ => {
                self.violation(format!(
                    "copy of {} bytes from offset {} to offset {} overflows",
                    size, src_offset, dst_offset
                ));
                return;
            }
        };

        let bytes = match self.buffers.get(&src) {
            Some(data) if src_end <= data.len() as u64 => {
                data[src_offset as usize..src_end as usize].to_vec()
            }
            Some(_) => {
                self.violation(format!("copy reads past the end of {:?}", src));
                return;
            }
            None => {
                self.violation(format!("copy from unknown {:?}", src));
                return;
            }
        };
        match self.buffers.get_mut(&dst) {
            Some(data) if dst_end <= data.len() as u64 => {
                data[dst_offset as usize..dst_end as usize].copy_from_slice(&bytes)
            }
            Some(_) => self.violation(format!("copy writes past the end of {:?}", dst)),
            None => self.violation(format!("copy to unknown {:?}", dst)),
        }
    }
}

/// Software device that records and replays compute command buffers
#[derive(Debug, Default)]
pub struct SimulatedDevice {
    state: RefCell<SimState>,
}

impl SimulatedDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle standing in for the owning `VkDevice`
    pub fn device(&self) -> vk::Device {
        vk::Device::from_raw(0x5157)
    }

    pub fn allocate_command_buffer(&self) -> vk::CommandBuffer {
        let mut state = self.state.borrow_mut();
        let handle = vk::CommandBuffer::from_raw(state.next_raw());
        state.command_buffers.insert(handle, SimCommandBuffer::new());
        handle
    }

    /// Create a zero-filled buffer of `size` bytes
    pub fn create_buffer(&self, size: vk::DeviceSize) -> Buffer {
        let mut state = self.state.borrow_mut();
        let handle = vk::Buffer::from_raw(state.next_raw());
        state.buffers.insert(handle, vec![0; size as usize]);
        Buffer::new(handle, size)
    }

    pub fn create_pipeline(&self) -> Pipeline {
        let mut state = self.state.borrow_mut();
        let pipeline = vk::Pipeline::from_raw(state.next_raw());
        let layout = vk::PipelineLayout::from_raw(state.next_raw());
        state.pipelines.insert(pipeline, layout);
        Pipeline::new(pipeline, layout)
    }

    pub fn create_descriptor_set(&self) -> vk::DescriptorSet {
        let mut state = self.state.borrow_mut();
        vk::DescriptorSet::from_raw(state.next_raw())
    }

    pub fn create_query_pool(&self, query_count: u32) -> TimestampQueryPool {
        let mut state = self.state.borrow_mut();
        let handle = vk::QueryPool::from_raw(state.next_raw());
        state
            .query_pools
            .insert(handle, vec![QuerySlot::Uninitialized; query_count as usize]);
        TimestampQueryPool::new(handle, query_count)
    }

    /// Overwrite part of a buffer's contents from the host
    pub fn write_buffer(&self, buffer: &Buffer, offset: usize, data: &[u8]) {
        let mut state = self.state.borrow_mut();
        match state.buffers.get_mut(&buffer.raw) {
            Some(contents)
                if offset
                    .checked_add(data.len())
                    .map_or(false, |end| end <= contents.len()) =>
            {
                contents[offset..offset + data.len()].copy_from_slice(data)
            }
            _ => state.violation(format!("host write outside of {:?}", buffer.raw)),
        }
    }

    pub fn read_buffer(&self, buffer: &Buffer) -> Vec<u8> {
        self.state
            .borrow()
            .buffers
            .get(&buffer.raw)
            .cloned()
            .unwrap_or_default()
    }

    /// Current value of every slot, `None` for slots without a result
    pub fn query_results(&self, pool: &TimestampQueryPool) -> Vec<Option<u64>> {
        self.state
            .borrow()
            .query_pools
            .get(&pool.raw)
            .map(|slots| {
                slots
                    .iter()
                    .map(|slot| match slot {
                        QuerySlot::Available(value) => Some(*value),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Make the next call of the given kind return `result`
    pub fn fail_next(&self, call: SimCall, result: vk::Result) {
        self.state
            .borrow_mut()
            .pending_failures
            .insert(call, result);
    }

    pub fn recorded_commands(&self, command_buffer: vk::CommandBuffer) -> Vec<SimCommand> {
        self.state
            .borrow()
            .command_buffers
            .get(&command_buffer)
            .map(|cb| cb.commands.clone())
            .unwrap_or_default()
    }

    pub fn command_buffer_state(&self, command_buffer: vk::CommandBuffer) -> Option<SimBufferState> {
        self.state
            .borrow()
            .command_buffers
            .get(&command_buffer)
            .map(|cb| cb.state)
    }

    /// Usage flags passed to every begin on this command buffer
    pub fn begin_flags(&self, command_buffer: vk::CommandBuffer) -> Vec<vk::CommandBufferUsageFlags> {
        self.state
            .borrow()
            .command_buffers
            .get(&command_buffer)
            .map(|cb| cb.begin_flags.clone())
            .unwrap_or_default()
    }

    /// Flags passed to every explicit reset of this command buffer
    pub fn reset_flags(&self, command_buffer: vk::CommandBuffer) -> Vec<vk::CommandBufferResetFlags> {
        self.state
            .borrow()
            .command_buffers
            .get(&command_buffer)
            .map(|cb| cb.reset_flags.clone())
            .unwrap_or_default()
    }

    pub fn submission_count(&self, command_buffer: vk::CommandBuffer) -> u64 {
        self.state
            .borrow()
            .command_buffers
            .get(&command_buffer)
            .map(|cb| cb.submissions)
            .unwrap_or(0)
    }

    /// Usage errors observed so far, in the order they happened
    pub fn violations(&self) -> Vec<String> {
        self.state.borrow().violations.clone()
    }

    /// Execute an executable command buffer to completion
    pub fn submit(&self, command_buffer: vk::CommandBuffer) -> Result<(), NativeApiError> {
        let mut state = self.state.borrow_mut();
        let (commands, one_time_submit) = match state.command_buffers.get(&command_buffer) {
            Some(cb) if cb.state == SimBufferState::Executable => {
                (cb.commands.clone(), cb.one_time_submit)
            }
            Some(cb) => {
                let message = format!("submit of {:?} in the {:?} state", command_buffer, cb.state);
                state.violation(message);
                return check(vk::Result::ERROR_VALIDATION_FAILED_EXT);
            }
            None => return check(vk::Result::ERROR_VALIDATION_FAILED_EXT),
        };

        state.execute(&commands);

        if let Some(cb) = state.command_buffers.get_mut(&command_buffer) {
            cb.submissions += 1;
            if one_time_submit {
                cb.state = SimBufferState::Invalid;
            }
        }
        Ok(())
    }
}

impl DeviceCommands for SimulatedDevice {
    unsafe fn begin_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        begin_info: &vk::CommandBufferBeginInfo,
    ) -> vk::Result {
        let mut state = self.state.borrow_mut();
        if let Some(result) = state.take_failure(SimCall::Begin) {
            return result;
        }
        let current = match state.command_buffers.get(&command_buffer) {
            Some(cb) => cb.state,
            None => return vk::Result::ERROR_VALIDATION_FAILED_EXT,
        };
        if current == SimBufferState::Recording {
            state.violation(format!("begin of {:?} while recording", command_buffer));
            return vk::Result::ERROR_VALIDATION_FAILED_EXT;
        }
        if let Some(cb) = state.command_buffers.get_mut(&command_buffer) {
            // Beginning implicitly resets; the pool allows per-buffer resets
            cb.commands.clear();
            cb.state = SimBufferState::Recording;
            cb.one_time_submit = begin_info
                .flags
                .contains(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            cb.begin_flags.push(begin_info.flags);
        }
        vk::Result::SUCCESS
    }

    unsafe fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> vk::Result {
        let mut state = self.state.borrow_mut();
        let failure = state.take_failure(SimCall::End);
        let current = match state.command_buffers.get(&command_buffer) {
            Some(cb) => cb.state,
            None => return vk::Result::ERROR_VALIDATION_FAILED_EXT,
        };
        if current != SimBufferState::Recording {
            state.violation(format!("end of {:?} in the {:?} state", command_buffer, current));
            return vk::Result::ERROR_VALIDATION_FAILED_EXT;
        }
        if let Some(cb) = state.command_buffers.get_mut(&command_buffer) {
            cb.state = match failure {
                Some(_) => SimBufferState::Invalid,
                None => SimBufferState::Executable,
            };
        }
        failure.unwrap_or(vk::Result::SUCCESS)
    }

    unsafe fn reset_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        flags: vk::CommandBufferResetFlags,
    ) -> vk::Result {
        let mut state = self.state.borrow_mut();
        if let Some(result) = state.take_failure(SimCall::Reset) {
            return result;
        }
        match state.command_buffers.get_mut(&command_buffer) {
            Some(cb) => {
                cb.commands.clear();
                cb.state = SimBufferState::Initial;
                cb.reset_flags.push(flags);
                vk::Result::SUCCESS
            }
            None => vk::Result::ERROR_VALIDATION_FAILED_EXT,
        }
    }

    unsafe fn cmd_copy_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        src_buffer: vk::Buffer,
        dst_buffer: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) {
        let mut state = self.state.borrow_mut();
        for region in regions {
            state.append(
                command_buffer,
                SimCommand::CopyBuffer {
                    src: src_buffer,
                    dst: dst_buffer,
                    src_offset: region.src_offset,
                    dst_offset: region.dst_offset,
                    size: region.size,
                },
            );
        }
    }

    unsafe fn cmd_bind_pipeline(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) {
        self.state.borrow_mut().append(
            command_buffer,
            SimCommand::BindPipeline {
                bind_point,
                pipeline,
            },
        );
    }

    unsafe fn cmd_bind_descriptor_sets(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        descriptor_sets: &[vk::DescriptorSet],
        _dynamic_offsets: &[u32],
    ) {
        self.state.borrow_mut().append(
            command_buffer,
            SimCommand::BindDescriptorSets {
                bind_point,
                layout,
                first_set,
                sets: descriptor_sets.to_vec(),
            },
        );
    }

    unsafe fn cmd_reset_query_pool(
        &self,
        command_buffer: vk::CommandBuffer,
        query_pool: vk::QueryPool,
        first_query: u32,
        query_count: u32,
    ) {
        self.state.borrow_mut().append(
            command_buffer,
            SimCommand::ResetQueryPool {
                pool: query_pool,
                first_query,
                query_count,
            },
        );
    }

    unsafe fn cmd_write_timestamp(
        &self,
        command_buffer: vk::CommandBuffer,
        pipeline_stage: vk::PipelineStageFlags,
        query_pool: vk::QueryPool,
        query: u32,
    ) {
        self.state.borrow_mut().append(
            command_buffer,
            SimCommand::WriteTimestamp {
                stage: pipeline_stage,
                pool: query_pool,
                query,
            },
        );
    }

    unsafe fn cmd_dispatch(
        &self,
        command_buffer: vk::CommandBuffer,
        group_count_x: u32,
        group_count_y: u32,
        group_count_z: u32,
    ) {
        self.state.borrow_mut().append(
            command_buffer,
            SimCommand::Dispatch {
                x: group_count_x,
                y: group_count_y,
                z: group_count_z,
            },
        );
    }

    unsafe fn cmd_pipeline_barrier(
        &self,
        command_buffer: vk::CommandBuffer,
        src_stage_mask: vk::PipelineStageFlags,
        dst_stage_mask: vk::PipelineStageFlags,
        memory_barriers: &[vk::MemoryBarrier],
    ) {
        let mut state = self.state.borrow_mut();
        for barrier in memory_barriers {
            state.append(
                command_buffer,
                SimCommand::PipelineBarrier {
                    src_stage: src_stage_mask,
                    dst_stage: dst_stage_mask,
                    src_access: barrier.src_access_mask,
                    dst_access: barrier.dst_access_mask,
                },
            );
        }
    }
}

impl ComputeTarget for SimulatedDevice {
    type Commands = SimulatedDevice;

    fn device_name(&self) -> String {
        "Simulated Device".to_string()
    }

    fn create_recorder(&self) -> Result<CommandRecorder<'_, Self::Commands>, BenchmarkError> {
        let raw = self.allocate_command_buffer();
        // SAFETY: the simulated table only ever sees handles it allocated
        Ok(unsafe { CommandRecorder::new(self.device(), raw, self) })
    }

    fn submit_and_wait(&self, command_buffer: vk::CommandBuffer) -> Result<(), BenchmarkError> {
        self.submit(command_buffer)?;
        Ok(())
    }

    fn read_timestamps(&self, pool: &TimestampQueryPool) -> Result<Vec<u64>, BenchmarkError> {
        self.query_results(pool)
            .into_iter()
            .enumerate()
            .map(|(slot, value)| {
                value.ok_or_else(|| {
                    BenchmarkError::Execution(format!("timestamp slot {} is not available", slot))
                })
            })
            .collect()
    }

    fn read_buffer(&self, buffer: &Buffer) -> Result<Vec<u8>, BenchmarkError> {
        Ok(SimulatedDevice::read_buffer(self, buffer))
    }

    fn timestamp_period(&self) -> TimestampPeriod {
        TimestampPeriod::new(SIMULATED_TIMESTAMP_PERIOD, 64)
    }
}
