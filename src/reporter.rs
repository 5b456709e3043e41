use crate::results::{BenchmarkReport, BenchmarkResult};
use crate::BenchmarkError;
use console::Style;
use std::path::Path;

const RULE: &str =
    "================================================================================";

/// Print benchmark results to console
pub fn print_results(report: &BenchmarkReport) {
    let header_style = Style::new().bold().cyan();
    let label_style = Style::new().bold();
    let value_style = Style::new().green();

    println!();
    println!("{}", header_style.apply_to(RULE));
    println!(
        "{}",
        header_style.apply_to("                       VULKAN COMPUTE BENCHMARK RESULTS")
    );
    println!("{}", header_style.apply_to(RULE));
    println!();

    println!(
        "{}: {} ({})",
        label_style.apply_to("Device"),
        value_style.apply_to(&report.device_name),
        &report.backend
    );
    println!();

    // Table header
    println!(
        "{:<25} {:>10} {:>12} {:>12} {:>12} {:>12}",
        label_style.apply_to("Kernel"),
        label_style.apply_to("WG Size"),
        label_style.apply_to("Min (ms)"),
        label_style.apply_to("Mean (ms)"),
        label_style.apply_to("GInv/s"),
        label_style.apply_to("Checksum"),
    );
    println!("{}", "-".repeat(88));

    for result in &report.results {
        print_result_line(result);
    }

    println!();

    if let Some(fastest) = report.fastest() {
        println!(
            "{} {} ({:.3} ms over {} samples)",
            label_style.apply_to("Fastest:"),
            fastest.kernel,
            fastest.min_ms(),
            fastest.samples
        );
    }

    println!("{}", header_style.apply_to(RULE));
    println!();
}

/// Print a single result line (for live updates)
pub fn print_result_line(result: &BenchmarkResult) {
    let checksum = result
        .output_checksum
        .map(|c| format!("{:08x}", c))
        .unwrap_or_else(|| "-".to_string());

    println!(
        "{:<25} {:>10} {:>12.3} {:>12.3} {:>12.2} {:>12}",
        result.kernel,
        result.workgroup_size,
        result.min_ms(),
        result.mean_ms(),
        result.ginvocations_per_second,
        checksum,
    );
}

/// Export results to JSON file
pub fn export_json(report: &BenchmarkReport, path: &Path) -> std::io::Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json)
}

/// Export results to CSV file, one row per result
pub fn export_csv(report: &BenchmarkReport, path: &Path) -> Result<(), BenchmarkError> {
    let mut writer = csv::Writer::from_path(path)?;
    for result in &report.results {
        writer.serialize(result)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write `report` as CSV when `path` ends in `.csv`, JSON otherwise
pub fn export(report: &BenchmarkReport, path: &Path) -> Result<(), BenchmarkError> {
    let is_csv = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("csv"))
        .unwrap_or(false);
    if is_csv {
        export_csv(report, path)
    } else {
        Ok(export_json(report, path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Backend;
    use std::time::Duration;

    fn report() -> BenchmarkReport {
        let mut report = BenchmarkReport::new("Test GPU".into(), "Simulated".into());
        let mut result = BenchmarkResult::from_timings(
            Backend::Simulated,
            "k:main",
            64,
            16,
            &[Duration::from_nanos(100), Duration::from_nanos(300)],
        );
        result.output_checksum = Some(42);
        report.add_result(result);
        report
    }

    #[test]
    fn json_export_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        export(&report(), &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let parsed: BenchmarkReport = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.device_name, "Test GPU");
        assert_eq!(parsed.results[0].min_ns, 100);
        assert_eq!(parsed.results[0].output_checksum, Some(42));
    }

    #[test]
    fn csv_export_has_header_and_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.CSV");
        export(&report(), &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        let header = lines.next().unwrap();
        assert!(header.starts_with("backend,kernel,workgroup_size"));
        assert!(header.ends_with("output_checksum"));
        let row = lines.next().unwrap();
        assert!(row.starts_with("Simulated,k:main,64,16,1024,2,100,300"));
        assert!(lines.next().is_none());
    }
}
