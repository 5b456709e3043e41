use std::path::{Path, PathBuf};

use clap::Parser;
use console::Style;
use rand::{rngs::StdRng, Rng, SeedableRng};
use vk_compute_bench::{
    bench::{self, Readback, Workload, TIMESTAMP_QUERIES},
    config::{parse_groups, BenchmarkConfig, BenchmarkRun},
    reporter,
    results::BenchmarkReport,
    tui::InteractiveTui,
    vulkan::{sim::SimulatedDevice, BoundDescriptorSet},
    Backend, BenchmarkError,
};

#[derive(Parser, Debug)]
#[command(name = "vk-compute-bench")]
#[command(about = "Times SPIR-V compute dispatches with Vulkan timestamp queries")]
struct Args {
    /// Run in batch mode (non-interactive)
    #[arg(long)]
    batch: bool,

    /// Backend to use (vulkan, simulated)
    #[arg(long, short = 'b')]
    backend: Option<String>,

    /// Shorthand for --backend simulated
    #[arg(long, conflicts_with = "backend")]
    simulate: bool,

    /// SPIR-V module to benchmark
    #[arg(long)]
    shader: Option<PathBuf>,

    /// Shader entry point
    #[arg(long, default_value = "main")]
    entry: String,

    /// Workgroups per dispatch, as x[,y[,z]]
    #[arg(long, value_parser = parse_groups)]
    groups: Option<[u32; 3]>,

    /// Local workgroup size declared by the kernel
    #[arg(long, short = 'w')]
    workgroup: Option<u32>,

    /// Measurement iterations
    #[arg(long, short = 'i')]
    iterations: Option<u32>,

    /// Warmup iterations
    #[arg(long)]
    warmup: Option<u32>,

    /// Size of the input and output buffers in bytes
    #[arg(long)]
    buffer_size: Option<u64>,

    /// Skip the output readback and checksum
    #[arg(long)]
    no_readback: bool,

    /// JSON file with benchmark parameters; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output file for results (.json or .csv)
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();

    if args.batch {
        if let Err(e) = run_batch_mode(args) {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    } else {
        run_interactive_mode();
    }
}

fn run_interactive_mode() {
    let tui = InteractiveTui::new();

    if let Some(run) = tui.run() {
        println!();
        println!("Running {} on the {} backend...", run.kernel_name(), run.backend.name());
        println!(
            "Workgroups: {:?} ({} invocations)",
            run.config.groups,
            run.config.total_invocations()
        );
        println!("Iterations: {}", run.config.measurement_iterations);
        println!();

        let report = match run_benchmarks(&run) {
            Ok(report) => report,
            Err(e) => {
                eprintln!("Benchmark failed: {}", e);
                return;
            }
        };

        reporter::print_results(&report);

        if let Some(filename) = tui.ask_save_results() {
            if let Err(e) = reporter::export(&report, &filename) {
                eprintln!("Failed to save results: {}", e);
            } else {
                println!("Results saved to {}", filename.display());
            }
        }
    }
}

fn run_batch_mode(args: Args) -> Result<(), BenchmarkError> {
    let backend = if args.simulate {
        Backend::Simulated
    } else {
        match args.backend.as_deref() {
            Some(name) => Backend::from_name(name).ok_or_else(|| {
                let names: Vec<_> = Backend::all().iter().map(|b| b.name()).collect();
                BenchmarkError::BackendNotAvailable(format!(
                    "unknown backend {:?} (available: {})",
                    name,
                    names.join(", ")
                ))
            })?,
            None => Backend::available()
                .first()
                .copied()
                .ok_or(BenchmarkError::NoDevice)?,
        }
    };

    if !backend.is_available() {
        return Err(BenchmarkError::BackendNotAvailable(format!(
            "{} is not available in this build",
            backend.name()
        )));
    }

    let mut config = match &args.config {
        Some(path) => BenchmarkConfig::from_json_file(path)?,
        None => BenchmarkConfig::default(),
    };
    if let Some(groups) = args.groups {
        config = config.with_groups(groups);
    }
    if let Some(size) = args.workgroup {
        config = config.with_workgroup_size(size);
    }
    if let Some(iterations) = args.iterations {
        config = config.with_iterations(iterations);
    }
    if let Some(iterations) = args.warmup {
        config = config.with_warmup(iterations);
    }
    if let Some(bytes) = args.buffer_size {
        config = config.with_buffer_size(bytes);
    }
    if args.no_readback {
        config = config.with_readback(false);
    }

    let mut run = BenchmarkRun::new(backend).with_config(config);
    if let Some(shader) = args.shader {
        run = run.with_shader(shader, &args.entry);
    }

    let report = run_benchmarks(&run)?;
    reporter::print_results(&report);

    if let Some(output) = args.output {
        reporter::export(&report, &output)?;
        println!("Results saved to {}", output.display());
    }

    Ok(())
}

fn run_benchmarks(run: &BenchmarkRun) -> Result<BenchmarkReport, BenchmarkError> {
    let info_style = Style::new().dim();
    println!(
        "{}",
        info_style.apply_to(format!("  Running {}...", run.kernel_name()))
    );

    match run.backend {
        Backend::Vulkan => run_vulkan(run),
        Backend::Simulated => run_simulated(run),
    }
}

/// Seeded input words covering `bytes` bytes
fn random_words(bytes: u64, seed: u64) -> Vec<u32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..bytes / 4).map(|_| rng.gen()).collect()
}

#[cfg(feature = "loaded")]
fn run_vulkan(run: &BenchmarkRun) -> Result<BenchmarkReport, BenchmarkError> {
    use vk_compute_bench::vulkan::VulkanContext;

    let shader = run.shader.as_deref().ok_or_else(|| {
        BenchmarkError::ShaderLoad("the Vulkan backend needs a SPIR-V module (--shader)".into())
    })?;
    let spirv = read_shader(shader)?;

    let context = VulkanContext::new()?;
    let config = &run.config;

    let input = context.create_buffer(config.buffer_size)?;
    let output = context.create_buffer(config.buffer_size)?;
    let readback = context.create_buffer(config.buffer_size)?;
    let words = random_words(config.buffer_size, config.seed);
    context.write_buffer(&input, 0, bytemuck::cast_slice(&words))?;

    let kernel = context.create_kernel(&spirv, &run.entry_point, &[input, output])?;
    let workload = Workload {
        name: run.kernel_name(),
        pipeline: kernel.pipeline,
        descriptor_sets: vec![kernel.descriptor_set],
        timestamps: context.create_query_pool(TIMESTAMP_QUERIES)?,
        readback: Some(Readback {
            src: output,
            dst: readback,
            length: config.buffer_size,
        }),
    };

    let mut report = BenchmarkReport::new(context.device_name(), run.backend.name().to_string());
    report.add_result(bench::run_benchmark(&context, run.backend, &workload, config)?);
    Ok(report)
}

#[cfg(not(feature = "loaded"))]
fn run_vulkan(run: &BenchmarkRun) -> Result<BenchmarkReport, BenchmarkError> {
    Err(BenchmarkError::BackendNotAvailable(format!(
        "{} support was not compiled in",
        run.backend.name()
    )))
}

#[cfg_attr(not(feature = "loaded"), allow(dead_code))]
fn read_shader(path: &Path) -> Result<Vec<u8>, BenchmarkError> {
    std::fs::read(path)
        .map_err(|e| BenchmarkError::ShaderLoad(format!("{}: {}", path.display(), e)))
}

fn run_simulated(run: &BenchmarkRun) -> Result<BenchmarkReport, BenchmarkError> {
    let sim = SimulatedDevice::new();
    let config = &run.config;

    let input = sim.create_buffer(config.buffer_size);
    let readback = sim.create_buffer(config.buffer_size);
    let words = random_words(config.buffer_size, config.seed);
    sim.write_buffer(&input, 0, bytemuck::cast_slice(&words));

    // No kernel executes here, so the input itself is read back
    let workload = Workload {
        name: run.kernel_name(),
        pipeline: sim.create_pipeline(),
        descriptor_sets: vec![BoundDescriptorSet::new(0, sim.create_descriptor_set())],
        timestamps: sim.create_query_pool(TIMESTAMP_QUERIES),
        readback: Some(Readback {
            src: input,
            dst: readback,
            length: config.buffer_size,
        }),
    };

    let mut report = BenchmarkReport::new(
        bench::ComputeTarget::device_name(&sim),
        run.backend.name().to_string(),
    );
    report.add_result(bench::run_benchmark(&sim, run.backend, &workload, config)?);

    let violations = sim.violations();
    if !violations.is_empty() {
        return Err(BenchmarkError::Execution(violations.join("; ")));
    }
    Ok(report)
}
