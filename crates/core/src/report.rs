use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::model::{BatchReport, DeviceEvidence, ProbeResult};

pub const REPORT_PREFIX: &str = "stripe-probe";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportOptions {
    pub json: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportArtifacts {
    pub text_path: PathBuf,
    pub json_path: Option<PathBuf>,
}

/// `Offset 0x00010000 (stripe 1): FULL SIGNATURE`
pub fn format_probe_line(probe: &ProbeResult) -> String {
    let mut line = format!(
        "Offset 0x{:08X} (stripe {}): {}",
        probe.offset,
        probe.stripe,
        probe.classification.label()
    );
    if let Some(percent) = probe.diversity_percent {
        line.push_str(&format!(" (diversity {percent}%)"));
    }
    if let Some(error) = &probe.error {
        line.push_str(&format!(" [{error}]"));
    }
    line
}

pub fn render_text_summary(report: &BatchReport) -> String {
    let mut out = String::new();
    out.push_str("STRIPE PROBE REPORT\n");
    out.push_str(&"=".repeat(60));
    out.push('\n');
    out.push_str(&format!(
        "Generated at: {}\nRun id: {}\nReport version: {}\nStripe size: {} bytes ({} KiB)\nStripes sampled: {}\n\n",
        report.generated_at,
        report.run_id,
        report.report_version,
        report.geometry.stripe_size_bytes,
        report.geometry.stripe_size_bytes / 1024,
        report.geometry.sample_count
    ));

    for (index, evidence) in report.device_evidences.iter().enumerate() {
        render_device(&mut out, index + 1, evidence);
    }

    let totals = report.totals();
    out.push_str("TOTALS\n");
    out.push_str(&"-".repeat(60));
    out.push('\n');
    out.push_str(&format!(
        "Devices listed: {}\nDevices scanned: {}\nLikely correct first member: {}\nNo pattern detected: {}\nErrors: {}\n",
        totals.total_devices,
        totals.scanned,
        totals.likely_first_member,
        totals.no_pattern,
        totals.errors
    ));
    if totals.not_reached > 0 {
        out.push_str(&format!("Not reached: {}\n", totals.not_reached));
    }

    let likely = report
        .likely_members()
        .map(|evidence| evidence.reference.as_str())
        .collect::<Vec<_>>();
    if !likely.is_empty() {
        out.push_str(&format!("Candidates: {}\n", likely.join(", ")));
    }
    if report.interrupted {
        out.push_str("Run was interrupted before all devices were scanned.\n");
    }

    if !report.warnings.is_empty() {
        out.push_str("\nWarnings:\n");
        for warning in &report.warnings {
            out.push_str(&format!("- {warning}\n"));
        }
    }

    out.push_str(
        "\nA signature hit is triage evidence only; confirm member order before assembling.\n",
    );
    out
}

fn render_device(out: &mut String, ordinal: usize, evidence: &DeviceEvidence) {
    out.push_str(&format!("[{}] {}\n", ordinal, evidence.reference));
    out.push_str(&format!(
        "  Resolved path: {}\n",
        evidence.resolved_path.as_deref().unwrap_or("-")
    ));
    if let Some(size) = evidence.device_size_bytes {
        out.push_str(&format!("  Device size: {size} bytes\n"));
    }
    for probe in &evidence.probes {
        out.push_str(&format!("  {}\n", format_probe_line(probe)));
        if let Some(sample) = &probe.sample_bytes {
            out.push_str(&format!("    sample: {}\n", hex::encode(sample)));
        }
    }
    out.push_str(&format!(
        "  Pattern hits: {}\n  Verdict: {}\n",
        evidence.pattern_hit_count,
        evidence.verdict.label()
    ));
    if let Some(error) = &evidence.error {
        out.push_str(&format!("  Error: {error}\n"));
    }
    out.push('\n');
}

/// `stripe-probe-20261018T101500Z`
pub fn report_stem(generated_at: &str) -> String {
    let stamp = DateTime::parse_from_rfc3339(generated_at)
        .map(|time| time.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());
    format!("{REPORT_PREFIX}-{}", stamp.format("%Y%m%dT%H%M%SZ"))
}

/// A taken artifact name gets a numeric suffix; nothing is overwritten.
pub fn write_report(
    report: &BatchReport,
    dir: impl AsRef<Path>,
    options: ReportOptions,
) -> Result<ReportArtifacts> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create report directory {}", dir.display()))?;

    let stem = report_stem(&report.generated_at);
    let (text_path, mut file) = create_unique(dir, &stem, "txt")?;
    file.write_all(render_text_summary(report).as_bytes())
        .with_context(|| format!("failed to write report to {}", text_path.display()))?;
    file.sync_all()
        .with_context(|| format!("failed to flush report {}", text_path.display()))?;

    let json_path = if options.json {
        let json_stem = text_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or(stem);
        let (path, mut file) = create_unique(dir, &json_stem, "json")?;
        let payload =
            serde_json::to_string_pretty(report).context("failed to serialize report")?;
        file.write_all(payload.as_bytes())
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        Some(path)
    } else {
        None
    };

    Ok(ReportArtifacts {
        text_path,
        json_path,
    })
}

pub fn load_report(path: impl AsRef<Path>) -> Result<BatchReport> {
    let path = path.as_ref();
    let data =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("failed to parse {}", path.display()))
}

fn create_unique(dir: &Path, stem: &str, extension: &str) -> Result<(PathBuf, File)> {
    for attempt in 0..1000u32 {
        let name = if attempt == 0 {
            format!("{stem}.{extension}")
        } else {
            format!("{stem}-{attempt}.{extension}")
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => {
                return Err(err).with_context(|| format!("failed to create {}", path.display()))
            }
        }
    }
    anyhow::bail!("no free report name for {stem} in {}", dir.display())
}
