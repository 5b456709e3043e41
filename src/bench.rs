//! Timed benchmark loop over a reusable command recorder

use std::time::Duration;

use crate::config::BenchmarkConfig;
use crate::results::BenchmarkResult;
use crate::vulkan::{
    vk, BoundDescriptorSet, Buffer, CommandRecorder, DeviceCommands, Pipeline, RecorderError,
    TimestampPeriod, TimestampQueryPool,
};
use crate::{Backend, BenchmarkError};

/// Timestamp slots written around each dispatch
pub const TIMESTAMP_QUERIES: u32 = 2;
const QUERY_START: u32 = 0;
const QUERY_END: u32 = 1;

/// The collaborators a benchmark needs around the recorder: command buffer
/// allocation, queue submission with a host wait, and query readback
pub trait ComputeTarget {
    type Commands: DeviceCommands + ?Sized;

    fn device_name(&self) -> String;

    /// Allocate a command buffer and wrap it in a recorder
    fn create_recorder(&self) -> Result<CommandRecorder<'_, Self::Commands>, BenchmarkError>;

    /// Submit an executable command buffer and block until it has completed
    fn submit_and_wait(&self, command_buffer: vk::CommandBuffer) -> Result<(), BenchmarkError>;

    /// Raw tick values of every slot in `pool`
    fn read_timestamps(&self, pool: &TimestampQueryPool) -> Result<Vec<u64>, BenchmarkError>;

    fn read_buffer(&self, buffer: &Buffer) -> Result<Vec<u8>, BenchmarkError>;

    fn timestamp_period(&self) -> TimestampPeriod;
}

/// Copy of a kernel's output into a buffer the host inspects after timing
#[derive(Debug, Clone, Copy)]
pub struct Readback {
    pub src: Buffer,
    pub dst: Buffer,
    pub length: vk::DeviceSize,
}

/// One compute kernel ready to be benchmarked
#[derive(Debug, Clone)]
pub struct Workload {
    pub name: String,
    pub pipeline: Pipeline,
    pub descriptor_sets: Vec<BoundDescriptorSet>,
    pub timestamps: TimestampQueryPool,
    pub readback: Option<Readback>,
}

/// Record one timed dispatch: reset the pool, then bracket the dispatch with
/// top-of-pipe and bottom-of-pipe timestamps
pub fn record_timed_dispatch<D: DeviceCommands + ?Sized>(
    recorder: &mut CommandRecorder<'_, D>,
    workload: &Workload,
    groups: [u32; 3],
) -> Result<(), RecorderError> {
    recorder.begin()?;
    recorder.reset_query_pool(&workload.timestamps);
    recorder.write_timestamp(
        &workload.timestamps,
        vk::PipelineStageFlags::TOP_OF_PIPE,
        QUERY_START,
    );
    recorder.bind_pipeline_and_descriptor_sets(&workload.pipeline, &workload.descriptor_sets);
    recorder.dispatch(groups[0], groups[1], groups[2]);
    recorder.write_timestamp(
        &workload.timestamps,
        vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        QUERY_END,
    );
    recorder.end()
}

/// Run one iteration: record, submit and wait; the caller resets
fn run_iteration<T: ComputeTarget>(
    target: &T,
    recorder: &mut CommandRecorder<'_, T::Commands>,
    workload: &Workload,
    groups: [u32; 3],
) -> Result<(), BenchmarkError> {
    record_timed_dispatch(recorder, workload, groups)?;
    target.submit_and_wait(recorder.raw())?;
    Ok(())
}

fn measure<T: ComputeTarget>(
    target: &T,
    workload: &Workload,
    period: TimestampPeriod,
) -> Result<Duration, BenchmarkError> {
    let ticks = target.read_timestamps(&workload.timestamps)?;
    match (ticks.get(QUERY_START as usize), ticks.get(QUERY_END as usize)) {
        (Some(&start), Some(&end)) => Ok(period.elapsed(start, end)),
        _ => Err(BenchmarkError::Execution(format!(
            "expected {} timestamp slots, got {}",
            TIMESTAMP_QUERIES,
            ticks.len()
        ))),
    }
}

/// Record the output copy, ordered after the shader writes of earlier
/// submissions and before the host read
pub fn record_readback<D: DeviceCommands + ?Sized>(
    recorder: &mut CommandRecorder<'_, D>,
    readback: &Readback,
) -> Result<(), RecorderError> {
    recorder.begin()?;
    recorder.memory_barrier(
        vk::PipelineStageFlags::COMPUTE_SHADER,
        vk::AccessFlags::SHADER_WRITE,
        vk::PipelineStageFlags::TRANSFER,
        vk::AccessFlags::TRANSFER_READ,
    );
    recorder.copy_buffer(&readback.src, 0, &readback.dst, 0, readback.length);
    recorder.memory_barrier(
        vk::PipelineStageFlags::TRANSFER,
        vk::AccessFlags::TRANSFER_WRITE,
        vk::PipelineStageFlags::HOST,
        vk::AccessFlags::HOST_READ,
    );
    recorder.end()
}

/// Copy the kernel output once timing is over and return the copied bytes
fn run_readback<T: ComputeTarget>(
    target: &T,
    recorder: &mut CommandRecorder<'_, T::Commands>,
    readback: &Readback,
) -> Result<Vec<u8>, BenchmarkError> {
    record_readback(recorder, readback)?;
    target.submit_and_wait(recorder.raw())?;
    recorder.reset()?;

    let mut bytes = target.read_buffer(&readback.dst)?;
    bytes.truncate(readback.length as usize);
    Ok(bytes)
}

/// Benchmark `workload` on `target`
///
/// A single recorder is created up front and reset between iterations, so
/// every iteration records into the same command buffer memory.
pub fn run_benchmark<T: ComputeTarget>(
    target: &T,
    backend: Backend,
    workload: &Workload,
    config: &BenchmarkConfig,
) -> Result<BenchmarkResult, BenchmarkError> {
    let period = target.timestamp_period();
    let mut recorder = target.create_recorder()?;

    log::debug!(
        "{}: {} warmup + {} timed iterations of {:?} ({} invocations each)",
        workload.name,
        config.warmup_iterations,
        config.measurement_iterations,
        config.groups,
        config.total_invocations()
    );

    // Warmup runs
    for _ in 0..config.warmup_iterations {
        run_iteration(target, &mut recorder, workload, config.groups)?;
        recorder.reset()?;
    }

    // Timed runs
    let mut timings = Vec::with_capacity(config.measurement_iterations as usize);
    for _ in 0..config.measurement_iterations {
        run_iteration(target, &mut recorder, workload, config.groups)?;
        timings.push(measure(target, workload, period)?);
        recorder.reset()?;
    }

    let checksum = match &workload.readback {
        Some(readback) if config.readback => {
            let bytes = run_readback(target, &mut recorder, readback)?;
            Some(checksum(&bytes))
        }
        _ => None,
    };

    let mut result = BenchmarkResult::from_timings(
        backend,
        &workload.name,
        config.workgroup_size,
        config.total_workgroups(),
        &timings,
    );
    result.output_checksum = checksum;
    Ok(result)
}

/// Wrapping sum of the little-endian `u32` words in `bytes`
pub fn checksum(bytes: &[u8]) -> u32 {
    bytes
        .chunks_exact(4)
        .map(|word| u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
        .fold(0u32, |acc, word| acc.wrapping_add(word))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vulkan::sim::{SimCommand, SimulatedDevice};

    fn workload(sim: &SimulatedDevice) -> Workload {
        Workload {
            name: "sim".to_string(),
            pipeline: sim.create_pipeline(),
            descriptor_sets: vec![BoundDescriptorSet::new(0, sim.create_descriptor_set())],
            timestamps: sim.create_query_pool(TIMESTAMP_QUERIES),
            readback: None,
        }
    }

    #[test]
    fn timed_dispatch_order() {
        let sim = SimulatedDevice::new();
        let work = workload(&sim);
        let mut recorder = sim.create_recorder().unwrap();

        record_timed_dispatch(&mut recorder, &work, [8, 1, 1]).unwrap();

        let commands = sim.recorded_commands(recorder.raw());
        assert_eq!(commands.len(), 6);
        assert!(matches!(commands[0], SimCommand::ResetQueryPool { query_count: 2, .. }));
        assert!(matches!(
            commands[1],
            SimCommand::WriteTimestamp { query: 0, stage, .. } if stage == vk::PipelineStageFlags::TOP_OF_PIPE
        ));
        assert!(matches!(commands[2], SimCommand::BindPipeline { .. }));
        assert!(matches!(commands[3], SimCommand::BindDescriptorSets { .. }));
        assert_eq!(commands[4], SimCommand::Dispatch { x: 8, y: 1, z: 1 });
        assert!(matches!(
            commands[5],
            SimCommand::WriteTimestamp { query: 1, stage, .. } if stage == vk::PipelineStageFlags::BOTTOM_OF_PIPE
        ));
    }

    #[test]
    fn benchmark_reuses_one_command_buffer() {
        let sim = SimulatedDevice::new();
        let work = workload(&sim);
        let config = BenchmarkConfig::default()
            .with_groups([4, 2, 1])
            .with_iterations(5);

        let result = run_benchmark(&sim, Backend::Simulated, &work, &config).unwrap();

        assert_eq!(result.samples, 5);
        assert!(result.min_ns > 0);
        assert!(sim.violations().is_empty(), "{:?}", sim.violations());
    }

    #[test]
    fn readback_checksum_reflects_source() {
        let sim = SimulatedDevice::new();
        let src = sim.create_buffer(16);
        let dst = sim.create_buffer(16);
        let words: [u32; 4] = [1, 2, 3, 4];
        sim.write_buffer(&src, 0, bytemuck::cast_slice(&words));

        let mut work = workload(&sim);
        work.readback = Some(Readback {
            src,
            dst,
            length: 16,
        });
        let config = BenchmarkConfig::default().with_iterations(1);

        let result = run_benchmark(&sim, Backend::Simulated, &work, &config).unwrap();
        assert_eq!(result.output_checksum, Some(10));
    }

    #[test]
    fn readback_copy_sits_between_barriers() {
        let sim = SimulatedDevice::new();
        let readback = Readback {
            src: sim.create_buffer(8),
            dst: sim.create_buffer(8),
            length: 8,
        };
        let mut recorder = sim.create_recorder().unwrap();

        record_readback(&mut recorder, &readback).unwrap();

        let commands = sim.recorded_commands(recorder.raw());
        assert_eq!(commands.len(), 3);
        assert_eq!(
            commands[0],
            SimCommand::PipelineBarrier {
                src_stage: vk::PipelineStageFlags::COMPUTE_SHADER,
                dst_stage: vk::PipelineStageFlags::TRANSFER,
                src_access: vk::AccessFlags::SHADER_WRITE,
                dst_access: vk::AccessFlags::TRANSFER_READ,
            }
        );
        assert!(matches!(commands[1], SimCommand::CopyBuffer { size: 8, .. }));
        assert_eq!(
            commands[2],
            SimCommand::PipelineBarrier {
                src_stage: vk::PipelineStageFlags::TRANSFER,
                dst_stage: vk::PipelineStageFlags::HOST,
                src_access: vk::AccessFlags::TRANSFER_WRITE,
                dst_access: vk::AccessFlags::HOST_READ,
            }
        );
    }

    #[test]
    fn checksum_ignores_trailing_bytes() {
        assert_eq!(checksum(&[1, 0, 0, 0, 2, 0, 0, 0, 9]), 3);
    }
}
