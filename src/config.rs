use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Backend, BenchmarkError};

/// Benchmark configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkConfig {
    /// Local workgroup size declared by the kernel (used for throughput only)
    pub workgroup_size: u32,

    /// Workgroup grid passed to each dispatch
    pub groups: [u32; 3],

    /// Size in bytes of the input and output storage buffers
    pub buffer_size: u64,

    /// Number of warmup iterations (not timed)
    pub warmup_iterations: u32,

    /// Number of measurement iterations
    pub measurement_iterations: u32,

    /// Random seed for input data
    pub seed: u64,

    /// Copy the output back after timing and report its checksum
    pub readback: bool,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            workgroup_size: 64,
            groups: [1024, 1, 1],
            buffer_size: 1 << 20,
            warmup_iterations: 3,
            measurement_iterations: 10,
            seed: 0x12345678,
            readback: true,
        }
    }
}

impl BenchmarkConfig {
    /// Load a config from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: &Path) -> Result<Self, BenchmarkError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Create a new config with the given workgroup size
    pub fn with_workgroup_size(mut self, size: u32) -> Self {
        self.workgroup_size = size;
        self
    }

    /// Create a new config with the given dispatch grid
    pub fn with_groups(mut self, groups: [u32; 3]) -> Self {
        self.groups = groups;
        self
    }

    /// Create a new config with the given buffer size
    pub fn with_buffer_size(mut self, bytes: u64) -> Self {
        self.buffer_size = bytes;
        self
    }

    /// Create a new config with the given warmup iterations
    pub fn with_warmup(mut self, iterations: u32) -> Self {
        self.warmup_iterations = iterations;
        self
    }

    /// Create a new config with the given measurement iterations
    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.measurement_iterations = iterations;
        self
    }

    /// Enable or disable the post-timing readback
    pub fn with_readback(mut self, enabled: bool) -> Self {
        self.readback = enabled;
        self
    }

    /// Total number of workgroups per dispatch
    pub fn total_workgroups(&self) -> u64 {
        self.groups
            .iter()
            .fold(1u64, |total, &g| total.saturating_mul(g as u64))
    }

    /// Total number of shader invocations per dispatch
    pub fn total_invocations(&self) -> u64 {
        self.total_workgroups()
            .saturating_mul(self.workgroup_size as u64)
    }
}

/// Parse a dispatch grid written as `x`, `x,y` or `x,y,z`
pub fn parse_groups(text: &str) -> Result<[u32; 3], String> {
    let parts: Vec<&str> = text.split(',').map(str::trim).collect();
    if parts.is_empty() || parts.len() > 3 {
        return Err(format!("expected 1 to 3 comma-separated counts, got {:?}", text));
    }

    let mut groups = [1u32; 3];
    for (slot, part) in groups.iter_mut().zip(&parts) {
        *slot = part
            .parse()
            .map_err(|e| format!("invalid workgroup count {:?}: {}", part, e))?;
        if *slot == 0 {
            return Err("workgroup counts must be non-zero".to_string());
        }
    }
    Ok(groups)
}

/// A benchmark run specification
#[derive(Debug, Clone)]
pub struct BenchmarkRun {
    pub backend: Backend,
    /// SPIR-V module to benchmark; required by backends that run shaders
    pub shader: Option<PathBuf>,
    pub entry_point: String,
    pub config: BenchmarkConfig,
}

impl BenchmarkRun {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            shader: None,
            entry_point: "main".to_string(),
            config: BenchmarkConfig::default(),
        }
    }

    pub fn with_shader(mut self, path: PathBuf, entry_point: &str) -> Self {
        self.shader = Some(path);
        self.entry_point = entry_point.to_string();
        self
    }

    pub fn with_config(mut self, config: BenchmarkConfig) -> Self {
        self.config = config;
        self
    }

    /// Name reported for this run's kernel
    pub fn kernel_name(&self) -> String {
        match &self.shader {
            Some(path) => {
                let stem = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "kernel".to_string());
                format!("{}:{}", stem, self.entry_point)
            }
            None => "empty_dispatch".to_string(),
        }
    }
}

/// Available workgroup sizes
pub const WORKGROUP_SIZES: [u32; 3] = [64, 128, 256];

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_partial_grids() {
        assert_eq!(parse_groups("64"), Ok([64, 1, 1]));
        assert_eq!(parse_groups("8, 4"), Ok([8, 4, 1]));
        assert_eq!(parse_groups("2,3,4"), Ok([2, 3, 4]));
    }

    #[test]
    fn rejects_bad_grids() {
        assert!(parse_groups("1,2,3,4").is_err());
        assert!(parse_groups("0").is_err());
        assert!(parse_groups("x").is_err());
    }

    #[test]
    fn totals() {
        let config = BenchmarkConfig::default()
            .with_groups([4, 2, 3])
            .with_workgroup_size(32);
        assert_eq!(config.total_workgroups(), 24);
        assert_eq!(config.total_invocations(), 768);
    }

    #[test]
    fn totals_saturate_on_the_largest_grid() {
        let groups = parse_groups("4294967295,4294967295,4294967295").unwrap();
        let config = BenchmarkConfig::default()
            .with_groups(groups)
            .with_workgroup_size(u32::MAX);
        assert_eq!(config.total_workgroups(), u64::MAX);
        assert_eq!(config.total_invocations(), u64::MAX);
    }

    #[test]
    fn json_file_fills_missing_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "groups": [16, 16, 1], "measurement_iterations": 50 }}"#).unwrap();

        let config = BenchmarkConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.groups, [16, 16, 1]);
        assert_eq!(config.measurement_iterations, 50);
        assert_eq!(config.warmup_iterations, BenchmarkConfig::default().warmup_iterations);
    }

    #[test]
    fn kernel_name_from_shader_path() {
        let run = BenchmarkRun::new(Backend::Vulkan).with_shader(PathBuf::from("k/saxpy.spv"), "go");
        assert_eq!(run.kernel_name(), "saxpy:go");
        assert_eq!(BenchmarkRun::new(Backend::Simulated).kernel_name(), "empty_dispatch");
    }
}
