use crate::Backend;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Result of a single benchmark run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkResult {
    /// Backend used
    pub backend: String,

    /// Kernel benchmarked
    pub kernel: String,

    /// Workgroup size used
    pub workgroup_size: u32,

    /// Workgroups per dispatch
    pub total_workgroups: u64,

    /// Shader invocations per dispatch
    pub total_invocations: u64,

    /// Number of timed dispatches
    pub samples: usize,

    /// GPU timing statistics between the bracketing timestamps (in nanoseconds)
    pub min_ns: u64,
    pub max_ns: u64,
    pub mean_ns: f64,
    pub std_dev_ns: f64,

    /// Derived metrics
    pub ginvocations_per_second: f64,

    /// Wrapping u32 sum of the read-back output, when a readback ran
    pub output_checksum: Option<u32>,
}

impl BenchmarkResult {
    /// Create a new result from timing measurements
    pub fn from_timings(
        backend: Backend,
        kernel: &str,
        workgroup_size: u32,
        total_workgroups: u64,
        timings: &[Duration],
    ) -> Self {
        let timings_ns: Vec<u64> = timings.iter().map(|d| d.as_nanos() as u64).collect();

        let min_ns = *timings_ns.iter().min().unwrap_or(&0);
        let max_ns = *timings_ns.iter().max().unwrap_or(&0);
        let sum: f64 = timings_ns.iter().map(|&t| t as f64).sum();
        let mean_ns = sum / timings_ns.len().max(1) as f64;

        let variance: f64 = timings_ns
            .iter()
            .map(|&t| (t as f64 - mean_ns).powi(2))
            .sum::<f64>()
            / timings_ns.len().max(1) as f64;
        let std_dev_ns = variance.sqrt();

        let total_invocations = total_workgroups.saturating_mul(workgroup_size as u64);

        // Throughput from the minimum time (best case)
        let ginvocations_per_second = if min_ns > 0 {
            (total_invocations as f64) / (min_ns as f64 / 1e9) / 1e9
        } else {
            0.0
        };

        Self {
            backend: backend.name().to_string(),
            kernel: kernel.to_string(),
            workgroup_size,
            total_workgroups,
            total_invocations,
            samples: timings.len(),
            min_ns,
            max_ns,
            mean_ns,
            std_dev_ns,
            ginvocations_per_second,
            output_checksum: None,
        }
    }

    /// Get minimum time in milliseconds
    pub fn min_ms(&self) -> f64 {
        self.min_ns as f64 / 1e6
    }

    /// Get mean time in milliseconds
    pub fn mean_ms(&self) -> f64 {
        self.mean_ns / 1e6
    }
}

/// Collection of benchmark results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkReport {
    /// Device information
    pub device_name: String,
    pub backend: String,

    /// All benchmark results
    pub results: Vec<BenchmarkResult>,

    /// Seconds since the Unix epoch when the report was created
    pub timestamp: String,
}

impl BenchmarkReport {
    pub fn new(device_name: String, backend: String) -> Self {
        Self {
            device_name,
            backend,
            results: Vec::new(),
            timestamp: unix_timestamp(),
        }
    }

    pub fn add_result(&mut self, result: BenchmarkResult) {
        self.results.push(result);
    }

    /// The result with the shortest minimum time
    pub fn fastest(&self) -> Option<&BenchmarkResult> {
        self.results
            .iter()
            .filter(|r| r.samples > 0)
            .min_by_key(|r| r.min_ns)
    }
}

fn unix_timestamp() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}", now.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statistics_from_timings() {
        let timings = [
            Duration::from_nanos(1000),
            Duration::from_nanos(3000),
            Duration::from_nanos(2000),
        ];
        let result = BenchmarkResult::from_timings(Backend::Simulated, "k", 64, 10, &timings);

        assert_eq!(result.samples, 3);
        assert_eq!(result.min_ns, 1000);
        assert_eq!(result.max_ns, 3000);
        assert_eq!(result.mean_ns, 2000.0);
        assert!((result.std_dev_ns - 816.496).abs() < 0.01);
        assert_eq!(result.total_invocations, 640);
        // 640 invocations in 1 us
        assert!((result.ginvocations_per_second - 0.64).abs() < 1e-9);
    }

    #[test]
    fn empty_timings_are_zeroed() {
        let result = BenchmarkResult::from_timings(Backend::Vulkan, "k", 64, 1, &[]);
        assert_eq!(result.min_ns, 0);
        assert_eq!(result.ginvocations_per_second, 0.0);
    }

    #[test]
    fn huge_timings_do_not_overflow() {
        let timings = [Duration::from_nanos(u64::MAX); 4];
        let result =
            BenchmarkResult::from_timings(Backend::Simulated, "k", u32::MAX, u64::MAX, &timings);
        assert_eq!(result.max_ns, u64::MAX);
        assert_eq!(result.total_invocations, u64::MAX);
        assert!(result.mean_ns > 1.8e19);
    }

    #[test]
    fn fastest_result() {
        let mut report = BenchmarkReport::new("dev".into(), "Simulated".into());
        report.add_result(BenchmarkResult::from_timings(
            Backend::Simulated,
            "slow",
            1,
            1,
            &[Duration::from_nanos(50)],
        ));
        report.add_result(BenchmarkResult::from_timings(
            Backend::Simulated,
            "fast",
            1,
            1,
            &[Duration::from_nanos(5)],
        ));
        assert_eq!(report.fastest().map(|r| r.kernel.as_str()), Some("fast"));
    }
}
