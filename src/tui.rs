use crate::config::{parse_groups, BenchmarkConfig, BenchmarkRun, WORKGROUP_SIZES};
use crate::Backend;
use console::Style;
use dialoguer::{theme::ColorfulTheme, Confirm, Input, Select};
use std::path::PathBuf;

/// Interactive TUI for benchmark configuration
pub struct InteractiveTui {
    theme: ColorfulTheme,
}

impl Default for InteractiveTui {
    fn default() -> Self {
        Self::new()
    }
}

impl InteractiveTui {
    pub fn new() -> Self {
        Self {
            theme: ColorfulTheme::default(),
        }
    }

    /// Display the welcome banner
    pub fn show_banner(&self) {
        let header_style = Style::new().bold().cyan();
        let rule = "================================================================================";

        println!();
        println!("{}", header_style.apply_to(rule));
        println!(
            "{}",
            header_style.apply_to("                  VULKAN COMPUTE BENCHMARK - Interactive Mode")
        );
        println!("{}", header_style.apply_to(rule));
        println!();
    }

    /// Walk through backend, kernel and parameter selection
    pub fn run(&self) -> Option<BenchmarkRun> {
        self.show_banner();

        let backend = self.select_backend()?;
        let mut run = BenchmarkRun::new(backend);

        if backend.runs_shaders() {
            let (shader, entry_point) = self.select_kernel()?;
            run = run.with_shader(shader, &entry_point);
        }

        Some(run.with_config(self.configure_parameters()?))
    }

    /// Select the backend to run on
    pub fn select_backend(&self) -> Option<Backend> {
        let available = Backend::available();

        if available.is_empty() {
            println!("No backends available!");
            return None;
        }

        let items: Vec<String> = available
            .iter()
            .map(|b| format!("{} - {}", b.name(), b.description()))
            .collect();

        let selection = Select::with_theme(&self.theme)
            .with_prompt("Select backend")
            .items(&items)
            .default(0)
            .interact()
            .ok()?;

        available.get(selection).copied()
    }

    /// Ask for the SPIR-V module and its entry point
    pub fn select_kernel(&self) -> Option<(PathBuf, String)> {
        let path: String = Input::with_theme(&self.theme)
            .with_prompt("SPIR-V module (set 0: binding 0 input, binding 1 output)")
            .validate_with(|input: &String| -> Result<(), String> {
                if std::path::Path::new(input).is_file() {
                    Ok(())
                } else {
                    Err(format!("{} is not a file", input))
                }
            })
            .interact_text()
            .ok()?;

        let entry_point: String = Input::with_theme(&self.theme)
            .with_prompt("Entry point")
            .default("main".to_string())
            .interact_text()
            .ok()?;

        Some((PathBuf::from(path), entry_point))
    }

    /// Configure benchmark parameters
    pub fn configure_parameters(&self) -> Option<BenchmarkConfig> {
        let defaults = BenchmarkConfig::default();
        let use_defaults = Confirm::with_theme(&self.theme)
            .with_prompt(format!(
                "Use default parameters? ({:?} groups, {} iterations)",
                defaults.groups, defaults.measurement_iterations
            ))
            .default(true)
            .interact()
            .ok()?;

        if use_defaults {
            return Some(defaults);
        }

        // Workgroup size
        let wg_items: Vec<String> = WORKGROUP_SIZES.iter().map(|s| s.to_string()).collect();
        let wg_selection = Select::with_theme(&self.theme)
            .with_prompt("Select the kernel's local workgroup size")
            .items(&wg_items)
            .default(0)
            .interact()
            .ok()?;
        let workgroup_size = WORKGROUP_SIZES[wg_selection];

        // Dispatch grid
        let groups_text: String = Input::with_theme(&self.theme)
            .with_prompt("Workgroups per dispatch (x[,y[,z]])")
            .default("1024".to_string())
            .validate_with(|input: &String| parse_groups(input).map(|_| ()))
            .interact_text()
            .ok()?;
        let groups = parse_groups(&groups_text).ok()?;

        // Measurement iterations
        let iterations: u32 = Input::with_theme(&self.theme)
            .with_prompt("Measurement iterations")
            .default(100)
            .interact_text()
            .ok()?;

        Some(
            defaults
                .with_workgroup_size(workgroup_size)
                .with_groups(groups)
                .with_iterations(iterations),
        )
    }

    /// Ask whether to save results
    pub fn ask_save_results(&self) -> Option<PathBuf> {
        let save = Confirm::with_theme(&self.theme)
            .with_prompt("Save results? (.json or .csv)")
            .default(false)
            .interact()
            .ok()?;

        if save {
            let filename: String = Input::with_theme(&self.theme)
                .with_prompt("Filename")
                .default("results.json".to_string())
                .interact_text()
                .ok()?;
            Some(PathBuf::from(filename))
        } else {
            None
        }
    }
}
