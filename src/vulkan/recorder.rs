//! Reusable compute command recording

use ash::vk;
use thiserror::Error;

use super::commands::DeviceCommands;
use super::handles::{BoundDescriptorSet, Buffer, Pipeline, TimestampQueryPool};
use super::status::{check, NativeApiError};

/// Where a [`CommandRecorder`] is in the command buffer lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecorderState {
    Initial,
    Recording,
    Executable,
    /// A native `end` failed; only `reset` is accepted
    Invalid,
}

impl RecorderState {
    pub fn name(&self) -> &'static str {
        match self {
            RecorderState::Initial => "initial",
            RecorderState::Recording => "recording",
            RecorderState::Executable => "executable",
            RecorderState::Invalid => "invalid",
        }
    }
}

impl std::fmt::Display for RecorderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderError {
    #[error("{operation} failed: {source}")]
    Native {
        operation: &'static str,
        #[source]
        source: NativeApiError,
    },

    #[error("cannot {operation} a command buffer in the {state} state")]
    InvalidState {
        operation: &'static str,
        state: RecorderState,
    },
}

impl RecorderError {
    /// The native status behind this error, if the driver reported one
    pub fn native(&self) -> Option<&NativeApiError> {
        match self {
            RecorderError::Native { source, .. } => Some(source),
            RecorderError::InvalidState { .. } => None,
        }
    }
}

/// Records compute work into one pooled command buffer, over and over
///
/// The recorder neither allocates nor frees its command buffer: a command pool
/// owned elsewhere hands out the handle and takes it back. Resources referenced
/// by recorded commands (buffers, pipelines, descriptor sets, query pools) are
/// likewise owned by the caller and must stay alive until execution of the
/// recording has completed.
///
/// A benchmarking iteration looks like:
///
/// ```text
/// begin -> reset_query_pool -> write_timestamp -> bind -> dispatch
///       -> write_timestamp -> end -> (submit, wait) -> reset
/// ```
///
/// `reset` keeps the command buffer's memory so that each iteration reuses the
/// same allocation instead of re-acquiring it.
pub struct CommandRecorder<'a, D: DeviceCommands + ?Sized> {
    raw: vk::CommandBuffer,
    device: vk::Device,
    commands: &'a D,
    state: RecorderState,
}

impl<'a, D: DeviceCommands + ?Sized> CommandRecorder<'a, D> {
    /// Wrap a freshly allocated (or reset) primary command buffer
    ///
    /// # Safety
    ///
    /// `raw` must be a primary command buffer allocated from `device` in the
    /// initial state, from a pool created with `RESET_COMMAND_BUFFER`, and
    /// `commands` must be the entry-point table loaded for `device`. The pool
    /// must not free or reset `raw` while this recorder exists.
    pub unsafe fn new(device: vk::Device, raw: vk::CommandBuffer, commands: &'a D) -> Self {
        Self {
            raw,
            device,
            commands,
            state: RecorderState::Initial,
        }
    }

    pub fn raw(&self) -> vk::CommandBuffer {
        self.raw
    }

    pub fn device(&self) -> vk::Device {
        self.device
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    /// Start recording a one-time-submit sequence
    pub fn begin(&mut self) -> Result<(), RecorderError> {
        self.require("begin", &[RecorderState::Initial, RecorderState::Executable])?;

        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        // SAFETY: handle and table are valid per `new`; the buffer is not
        // recording, which `require` just checked.
        let result = unsafe { self.commands.begin_command_buffer(self.raw, &begin_info) };
        check(result).map_err(|source| self.native_failure("begin", source))?;

        self.transition(RecorderState::Recording);
        Ok(())
    }

    /// Finish recording; the buffer becomes ready for submission
    pub fn end(&mut self) -> Result<(), RecorderError> {
        self.require("end", &[RecorderState::Recording])?;

        // SAFETY: see `begin`; the buffer is recording.
        let result = unsafe { self.commands.end_command_buffer(self.raw) };
        if let Err(source) = check(result) {
            // A failed end leaves the native command buffer invalid
            self.transition(RecorderState::Invalid);
            return Err(self.native_failure("end", source));
        }

        self.transition(RecorderState::Executable);
        Ok(())
    }

    /// Return to the initial state, keeping the command buffer's memory
    ///
    /// The caller must have waited for any submission of this recording to
    /// complete.
    pub fn reset(&mut self) -> Result<(), RecorderError> {
        self.require(
            "reset",
            &[
                RecorderState::Initial,
                RecorderState::Executable,
                RecorderState::Invalid,
            ],
        )?;

        // Never RELEASE_RESOURCES: the next iteration records the same commands
        // SAFETY: see `begin`; pending execution is ruled out by the caller.
        let result = unsafe {
            self.commands
                .reset_command_buffer(self.raw, vk::CommandBufferResetFlags::empty())
        };
        check(result).map_err(|source| self.native_failure("reset", source))?;

        self.transition(RecorderState::Initial);
        Ok(())
    }

    /// Copy `length` bytes from `src` at `src_offset` into `dst` at `dst_offset`
    ///
    /// Ranges are not checked against the buffer sizes.
    pub fn copy_buffer(
        &mut self,
        src: &Buffer,
        src_offset: vk::DeviceSize,
        dst: &Buffer,
        dst_offset: vk::DeviceSize,
        length: vk::DeviceSize,
    ) {
        self.debug_assert_recording("copy_buffer");
        log::trace!(
            "copy {} bytes {:?}+{} -> {:?}+{}",
            length,
            src.raw,
            src_offset,
            dst.raw,
            dst_offset
        );

        let region = vk::BufferCopy {
            src_offset,
            dst_offset,
            size: length,
        };
        // SAFETY: handles are valid per `new` and the caller's ownership of the
        // buffers; the buffer is recording.
        unsafe {
            self.commands
                .cmd_copy_buffer(self.raw, src.raw, dst.raw, std::slice::from_ref(&region))
        };
    }

    /// Bind `pipeline` at the compute bind point, then each descriptor set at
    /// its own index through the pipeline's layout
    ///
    /// One bind command is recorded per set, in the order given. Indices must
    /// be distinct.
    pub fn bind_pipeline_and_descriptor_sets(
        &mut self,
        pipeline: &Pipeline,
        bound_sets: &[BoundDescriptorSet],
    ) {
        self.debug_assert_recording("bind_pipeline_and_descriptor_sets");
        log::trace!(
            "bind {:?} with {} descriptor set(s)",
            pipeline.raw,
            bound_sets.len()
        );

        // SAFETY: see `copy_buffer`.
        unsafe {
            self.commands
                .cmd_bind_pipeline(self.raw, vk::PipelineBindPoint::COMPUTE, pipeline.raw);

            for bound in bound_sets {
                self.commands.cmd_bind_descriptor_sets(
                    self.raw,
                    vk::PipelineBindPoint::COMPUTE,
                    pipeline.layout,
                    bound.index,
                    std::slice::from_ref(&bound.set),
                    &[],
                );
            }
        }
    }

    /// Launch an `x * y * z` workgroup grid with the bound pipeline
    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.debug_assert_recording("dispatch");
        log::trace!("dispatch {}x{}x{}", x, y, z);

        // SAFETY: see `copy_buffer`.
        unsafe { self.commands.cmd_dispatch(self.raw, x, y, z) };
    }

    /// Make every slot of `pool` unavailable so it can be written again
    ///
    /// Must precede any [`write_timestamp`](Self::write_timestamp) into `pool`
    /// within the same recording.
    pub fn reset_query_pool(&mut self, pool: &TimestampQueryPool) {
        self.debug_assert_recording("reset_query_pool");
        log::trace!("reset {} queries of {:?}", pool.query_count, pool.raw);

        // SAFETY: see `copy_buffer`.
        unsafe {
            self.commands
                .cmd_reset_query_pool(self.raw, pool.raw, 0, pool.query_count)
        };
    }

    /// Latch the device timestamp into slot `query_index` of `pool` once
    /// execution reaches `stage`
    pub fn write_timestamp(
        &mut self,
        pool: &TimestampQueryPool,
        stage: vk::PipelineStageFlags,
        query_index: u32,
    ) {
        self.debug_assert_recording("write_timestamp");
        debug_assert!(
            query_index < pool.query_count,
            "query index {} out of range for a pool of {}",
            query_index,
            pool.query_count
        );
        log::trace!("timestamp {:?} -> slot {}", stage, query_index);

        // SAFETY: see `copy_buffer`.
        unsafe {
            self.commands
                .cmd_write_timestamp(self.raw, stage, pool.raw, query_index)
        };
    }

    /// Make `src_access` writes by earlier work at `src_stage` visible to
    /// `dst_access` at `dst_stage`
    ///
    /// Earlier work includes commands from previous submissions on the same
    /// queue, so a fence wait between two recordings does not replace this.
    pub fn memory_barrier(
        &mut self,
        src_stage: vk::PipelineStageFlags,
        src_access: vk::AccessFlags,
        dst_stage: vk::PipelineStageFlags,
        dst_access: vk::AccessFlags,
    ) {
        self.debug_assert_recording("memory_barrier");
        log::trace!(
            "barrier {:?}/{:?} -> {:?}/{:?}",
            src_stage,
            src_access,
            dst_stage,
            dst_access
        );

        let barrier = vk::MemoryBarrier::builder()
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .build();
        // SAFETY: see `copy_buffer`.
        unsafe {
            self.commands.cmd_pipeline_barrier(
                self.raw,
                src_stage,
                dst_stage,
                std::slice::from_ref(&barrier),
            )
        };
    }

    fn require(
        &self,
        operation: &'static str,
        allowed: &[RecorderState],
    ) -> Result<(), RecorderError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(RecorderError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn transition(&mut self, next: RecorderState) {
        log::debug!("{:?}: {} -> {}", self.raw, self.state, next);
        self.state = next;
    }

    fn native_failure(&self, operation: &'static str, source: NativeApiError) -> RecorderError {
        log::warn!("{:?}: {} failed: {}", self.raw, operation, source);
        RecorderError::Native { operation, source }
    }

    fn debug_assert_recording(&self, operation: &str) {
        debug_assert_eq!(
            self.state,
            RecorderState::Recording,
            "{} issued outside of recording",
            operation
        );
    }
}

impl<D: DeviceCommands + ?Sized> std::fmt::Debug for CommandRecorder<'_, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRecorder")
            .field("raw", &self.raw)
            .field("device", &self.device)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vulkan::sim::{SimCall, SimCommand, SimulatedDevice};

    fn recorder(sim: &SimulatedDevice) -> CommandRecorder<'_, SimulatedDevice> {
        let raw = sim.allocate_command_buffer();
        unsafe { CommandRecorder::new(sim.device(), raw, sim) }
    }

    #[test]
    fn lifecycle_transitions() {
        let sim = SimulatedDevice::new();
        let mut rec = recorder(&sim);
        assert_eq!(rec.state(), RecorderState::Initial);

        rec.begin().unwrap();
        assert_eq!(rec.state(), RecorderState::Recording);
        rec.end().unwrap();
        assert_eq!(rec.state(), RecorderState::Executable);
        rec.reset().unwrap();
        assert_eq!(rec.state(), RecorderState::Initial);
    }

    #[test]
    fn begin_uses_one_time_submit() {
        let sim = SimulatedDevice::new();
        let mut rec = recorder(&sim);
        rec.begin().unwrap();
        assert_eq!(
            sim.begin_flags(rec.raw()),
            vec![vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT]
        );
    }

    #[test]
    fn reset_keeps_resources() {
        let sim = SimulatedDevice::new();
        let mut rec = recorder(&sim);
        rec.begin().unwrap();
        rec.end().unwrap();
        rec.reset().unwrap();
        rec.reset().unwrap();
        assert_eq!(
            sim.reset_flags(rec.raw()),
            vec![vk::CommandBufferResetFlags::empty(); 2]
        );
    }

    #[test]
    fn begin_twice_is_rejected_without_native_call() {
        let sim = SimulatedDevice::new();
        let mut rec = recorder(&sim);
        rec.begin().unwrap();

        let err = rec.begin().unwrap_err();
        assert_eq!(
            err,
            RecorderError::InvalidState {
                operation: "begin",
                state: RecorderState::Recording,
            }
        );
        assert_eq!(sim.begin_flags(rec.raw()).len(), 1);
        assert_eq!(rec.state(), RecorderState::Recording);
    }

    #[test]
    fn end_and_reset_require_matching_state() {
        let sim = SimulatedDevice::new();
        let mut rec = recorder(&sim);
        assert!(matches!(
            rec.end(),
            Err(RecorderError::InvalidState { operation: "end", .. })
        ));

        rec.begin().unwrap();
        assert!(matches!(
            rec.reset(),
            Err(RecorderError::InvalidState {
                operation: "reset",
                state: RecorderState::Recording,
            })
        ));
    }

    #[test]
    fn native_begin_failure_is_reported() {
        let sim = SimulatedDevice::new();
        let mut rec = recorder(&sim);
        sim.fail_next(SimCall::Begin, vk::Result::ERROR_OUT_OF_HOST_MEMORY);

        let err = rec.begin().unwrap_err();
        assert_eq!(
            err.native().map(|e| e.result),
            Some(vk::Result::ERROR_OUT_OF_HOST_MEMORY)
        );
        assert_eq!(rec.state(), RecorderState::Initial);

        rec.begin().unwrap();
    }

    #[test]
    fn failed_end_requires_reset() {
        let sim = SimulatedDevice::new();
        let mut rec = recorder(&sim);
        rec.begin().unwrap();
        sim.fail_next(SimCall::End, vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);

        let err = rec.end().unwrap_err();
        assert!(matches!(err, RecorderError::Native { operation: "end", .. }));
        assert_eq!(rec.state(), RecorderState::Invalid);
        assert!(rec.begin().is_err());

        rec.reset().unwrap();
        rec.begin().unwrap();
    }

    #[test]
    fn native_reset_failure_keeps_state() {
        let sim = SimulatedDevice::new();
        let mut rec = recorder(&sim);
        rec.begin().unwrap();
        rec.end().unwrap();
        sim.fail_next(SimCall::Reset, vk::Result::ERROR_DEVICE_LOST);

        assert!(rec.reset().is_err());
        assert_eq!(rec.state(), RecorderState::Executable);
    }

    #[test]
    fn bind_records_one_set_per_call() {
        let sim = SimulatedDevice::new();
        let pipeline = sim.create_pipeline();
        let a = sim.create_descriptor_set();
        let b = sim.create_descriptor_set();
        let mut rec = recorder(&sim);

        rec.begin().unwrap();
        rec.bind_pipeline_and_descriptor_sets(
            &pipeline,
            &[BoundDescriptorSet::new(1, a), BoundDescriptorSet::new(0, b)],
        );
        rec.end().unwrap();

        let commands = sim.recorded_commands(rec.raw());
        assert_eq!(commands.len(), 3);
        assert_eq!(
            commands[1],
            SimCommand::BindDescriptorSets {
                bind_point: vk::PipelineBindPoint::COMPUTE,
                layout: pipeline.layout,
                first_set: 1,
                sets: vec![a],
            }
        );
        assert_eq!(
            commands[2],
            SimCommand::BindDescriptorSets {
                bind_point: vk::PipelineBindPoint::COMPUTE,
                layout: pipeline.layout,
                first_set: 0,
                sets: vec![b],
            }
        );
    }

    #[test]
    fn memory_barrier_records_one_global_barrier() {
        let sim = SimulatedDevice::new();
        let mut rec = recorder(&sim);

        rec.begin().unwrap();
        rec.memory_barrier(
            vk::PipelineStageFlags::COMPUTE_SHADER,
            vk::AccessFlags::SHADER_WRITE,
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_READ,
        );
        rec.end().unwrap();

        assert_eq!(
            sim.recorded_commands(rec.raw()),
            vec![SimCommand::PipelineBarrier {
                src_stage: vk::PipelineStageFlags::COMPUTE_SHADER,
                dst_stage: vk::PipelineStageFlags::TRANSFER,
                src_access: vk::AccessFlags::SHADER_WRITE,
                dst_access: vk::AccessFlags::TRANSFER_READ,
            }]
        );
    }

    #[test]
    fn reset_query_pool_covers_every_slot() {
        let sim = SimulatedDevice::new();
        let pool = sim.create_query_pool(6);
        let mut rec = recorder(&sim);

        rec.begin().unwrap();
        rec.reset_query_pool(&pool);
        rec.end().unwrap();

        assert_eq!(
            sim.recorded_commands(rec.raw()),
            vec![SimCommand::ResetQueryPool {
                pool: pool.raw,
                first_query: 0,
                query_count: 6,
            }]
        );
    }
}
