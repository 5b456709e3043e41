//! End-to-end benchmark runs on the simulated device

use pretty_assertions::assert_eq;
use vk_compute_bench::bench::{run_benchmark, Readback, Workload, TIMESTAMP_QUERIES};
use vk_compute_bench::config::BenchmarkConfig;
use vk_compute_bench::reporter;
use vk_compute_bench::results::BenchmarkReport;
use vk_compute_bench::vulkan::sim::{SimCall, SimulatedDevice};
use vk_compute_bench::vulkan::{vk, BoundDescriptorSet};
use vk_compute_bench::{Backend, BenchmarkError};

fn workload(sim: &SimulatedDevice, sets: u32) -> Workload {
    Workload {
        name: "sim:main".to_string(),
        pipeline: sim.create_pipeline(),
        descriptor_sets: (0..sets)
            .map(|index| BoundDescriptorSet::new(index, sim.create_descriptor_set()))
            .collect(),
        timestamps: sim.create_query_pool(TIMESTAMP_QUERIES),
        readback: None,
    }
}

#[test]
fn timings_track_the_dispatch_grid() {
    let sim = SimulatedDevice::new();
    let work = workload(&sim, 2);
    let config = BenchmarkConfig::default()
        .with_groups([16, 4, 2])
        .with_warmup(2)
        .with_iterations(7)
        .with_readback(false);

    let result = run_benchmark(&sim, Backend::Simulated, &work, &config).unwrap();

    assert_eq!(result.samples, 7);
    assert_eq!(result.total_workgroups, 128);
    // Each simulated tick is one nanosecond and every sample does the same work
    assert_eq!(result.min_ns, result.max_ns);
    assert!(result.min_ns >= 128);
    assert_eq!(result.output_checksum, None);
    assert!(sim.violations().is_empty(), "{:?}", sim.violations());
}

#[test]
fn readback_and_csv_export() {
    let sim = SimulatedDevice::new();
    let src = sim.create_buffer(64);
    let dst = sim.create_buffer(64);
    sim.write_buffer(&src, 0, bytemuck::cast_slice(&[7u32; 16]));

    let mut work = workload(&sim, 1);
    work.readback = Some(Readback {
        src,
        dst,
        length: 64,
    });
    let config = BenchmarkConfig::default().with_iterations(3);

    let result = run_benchmark(&sim, Backend::Simulated, &work, &config).unwrap();
    assert_eq!(result.output_checksum, Some(7 * 16));

    let mut report = BenchmarkReport::new("Simulated Device".into(), "Simulated".into());
    report.add_result(result);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("results.csv");
    reporter::export(&report, &path).unwrap();

    let mut rows = csv::Reader::from_path(&path).unwrap();
    let records: Vec<_> = rows.records().collect::<Result<_, _>>().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(&records[0][1], "sim:main");
}

#[test]
fn driver_failure_stops_the_run() {
    let sim = SimulatedDevice::new();
    let work = workload(&sim, 1);
    sim.fail_next(SimCall::End, vk::Result::ERROR_DEVICE_LOST);

    let err = run_benchmark(&sim, Backend::Simulated, &work, &BenchmarkConfig::default())
        .unwrap_err();

    match err {
        BenchmarkError::Recording(e) => {
            assert_eq!(e.native().map(|n| n.result), Some(vk::Result::ERROR_DEVICE_LOST))
        }
        other => panic!("unexpected error {:?}", other),
    }
}
