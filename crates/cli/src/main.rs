use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::{Context, Result};
use clap::{ArgGroup, Args, Parser, Subcommand};
use stripe_probe_core::{
    collect_doctor_info, format_probe_line, load_reference_file, load_report, parse_sample_count,
    parse_stripe_size, render_text_summary, run_batch, write_report, BatchEvent, BatchOptions,
    FileDeviceOpener, ProbeOptions, RbdCli, ReportOptions, Resolver, ResolverOptions,
    StripeGeometry, Verdict,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "stripe-probe",
    version,
    about = "Find which members of a broken striped array carry the filesystem boot sector, without writing to them."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Probe candidate members at stripe boundaries and write a report.
    Scan(ScanArgs),
    /// Print the text summary of a saved JSON report.
    Summarize(SummarizeArgs),
    /// Show environment and remote-block tooling status.
    Doctor(DoctorArgs),
}

#[derive(Debug, Args)]
#[command(group(ArgGroup::new("input").required(true).args(["device", "list"])))]
struct ScanArgs {
    /// Single device reference: `/dev/sdg`, a bare name like `sdg`, or `rbd <pool>/<image>`.
    #[arg(long, value_name = "REF")]
    device: Option<String>,

    /// File with one device reference per line (`#` comments allowed).
    #[arg(long, value_name = "FILE")]
    list: Option<PathBuf>,

    /// Stripe (chunk) size of the array in bytes.
    #[arg(long, default_value = "65536", value_name = "BYTES", value_parser = stripe_size_arg)]
    stripe_size: u64,

    /// Number of stripe boundaries to probe after offset 0.
    #[arg(long, default_value = "10", value_name = "N", value_parser = sample_count_arg)]
    samples: u64,

    /// Marker-byte diversity percentage at or above which a sample is shown as random.
    #[arg(long, default_value_t = 50, value_name = "PERCENT", value_parser = clap::value_parser!(u32).range(1..=100))]
    threshold: u32,

    /// Directory receiving the timestamped report.
    #[arg(long, default_value = ".", value_name = "DIR")]
    output_dir: PathBuf,

    /// Also write a JSON copy of the report.
    #[arg(long)]
    json: bool,

    /// Keep the raw bytes read at each offset in the report.
    #[arg(long)]
    capture_samples: bool,

    /// Accept regular files (drive images) as well as block devices.
    #[arg(long)]
    allow_image_files: bool,

    /// Path or name of the rbd executable.
    #[arg(long, default_value = "rbd", value_name = "PATH")]
    rbd_binary: String,
}

#[derive(Debug, Args)]
struct SummarizeArgs {
    /// JSON report written by `scan --json`.
    #[arg(long, value_name = "FILE")]
    report: PathBuf,
}

#[derive(Debug, Args)]
struct DoctorArgs {
    /// Path or name of the rbd executable.
    #[arg(long, default_value = "rbd", value_name = "PATH")]
    rbd_binary: String,

    /// Print the collected information as JSON.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan(args) => run_scan_command(args),
        Commands::Summarize(args) => run_summarize_command(args),
        Commands::Doctor(args) => run_doctor_command(args),
    }
}

fn stripe_size_arg(raw: &str) -> Result<u64, String> {
    parse_stripe_size(raw).map_err(|err| err.to_string())
}

fn sample_count_arg(raw: &str) -> Result<u64, String> {
    parse_sample_count(raw).map_err(|err| err.to_string())
}

fn run_scan_command(args: ScanArgs) -> Result<()> {
    let references = match (&args.device, &args.list) {
        (Some(device), _) => vec![device.clone()],
        (None, Some(list)) => load_reference_file(list)?,
        (None, None) => anyhow::bail!("either --device or --list is required"),
    };

    let cancel_flag = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel_flag);
    ctrlc::set_handler(move || {
        if is_repeated_interrupt(&flag) {
            eprintln!("Second interrupt; aborting without releasing mappings.");
            std::process::exit(INTERRUPT_EXIT_CODE);
        }
        eprintln!("Interrupt received; finishing the current device. Press Ctrl+C again to abort.");
    })
    .context("failed to set Ctrl+C handler")?;

    let options = BatchOptions {
        geometry: StripeGeometry::new(args.stripe_size, args.samples)?,
        probe: ProbeOptions {
            threshold_percent: args.threshold,
            capture_samples: args.capture_samples,
            ..ProbeOptions::default()
        },
        cancel_flag: Some(cancel_flag),
    };
    let resolver = Resolver::new(
        RbdCli::new(args.rbd_binary),
        ResolverOptions {
            allow_image_files: args.allow_image_files,
        },
    );

    println!(
        "Probing {} device(s): stripe size {} bytes, {} stripe(s) after offset 0",
        references.len(),
        options.geometry.stripe_size_bytes,
        options.geometry.sample_count
    );
    info!("read-only scan; Ctrl+C stops after the current device");

    let report = run_batch(
        &references,
        &options,
        &resolver,
        &FileDeviceOpener,
        &mut print_event,
    )?;

    let artifacts = write_report(&report, &args.output_dir, ReportOptions { json: args.json })?;
    let totals = report.totals();
    println!();
    println!(
        "Scanned {} of {} device(s): {} likely first member(s), {} without pattern, {} error(s).",
        totals.scanned,
        totals.total_devices,
        totals.likely_first_member,
        totals.no_pattern,
        totals.errors
    );
    for evidence in report.likely_members() {
        println!(
            "  candidate: {} ({} hit(s))",
            evidence.reference, evidence.pattern_hit_count
        );
    }
    println!("Report written to {}", artifacts.text_path.display());
    if let Some(json_path) = &artifacts.json_path {
        println!("JSON report written to {}", json_path.display());
    }

    if report.interrupted {
        anyhow::bail!("scan interrupted; report contains partial results");
    }
    Ok(())
}

const INTERRUPT_EXIT_CODE: i32 = 130;

// First call requests a graceful stop; any later call means the user wants out now.
fn is_repeated_interrupt(flag: &AtomicBool) -> bool {
    flag.swap(true, Ordering::SeqCst)
}

fn print_event(event: BatchEvent<'_>) {
    match event {
        BatchEvent::DeviceStarted {
            index,
            total,
            reference,
        } => {
            println!();
            println!("[{}/{}] {}", index + 1, total, reference);
        }
        BatchEvent::Resolved {
            device_path,
            self_attached,
            ..
        } => {
            let origin = if self_attached {
                "mapped by this run"
            } else {
                "existing"
            };
            println!("  Device: {} ({origin})", device_path.display());
        }
        BatchEvent::Probe { probe, .. } => println!("  {}", format_probe_line(probe)),
        BatchEvent::DeviceFinished { evidence } => {
            if let Some(size) = evidence.device_size_bytes {
                println!("  Size: {}", human_bytes(size));
            }
            match evidence.verdict {
                Verdict::Error => println!(
                    "  ERROR: {}",
                    evidence.error.as_deref().unwrap_or("unknown failure")
                ),
                verdict => println!(
                    "  Pattern hits: {} -> {}",
                    evidence.pattern_hit_count,
                    verdict.label()
                ),
            }
        }
        BatchEvent::ReleaseWarning(warning) => eprintln!("  Warning: {warning}"),
        BatchEvent::Interrupted { processed, total } => {
            println!();
            println!("Interrupted after {processed} of {total} device(s); releasing mappings.");
        }
    }
}

fn run_summarize_command(args: SummarizeArgs) -> Result<()> {
    let report = load_report(&args.report)?;
    print!("{}", render_text_summary(&report));
    Ok(())
}

fn run_doctor_command(args: DoctorArgs) -> Result<()> {
    let info = collect_doctor_info(&RbdCli::new(args.rbd_binary));
    if args.json {
        let payload =
            serde_json::to_string_pretty(&info).context("failed to serialize doctor info")?;
        println!("{payload}");
        return Ok(());
    }

    println!("OS: {} ({})", info.os, info.arch);
    if let Some(current_dir) = info.current_dir {
        println!("Current directory: {}", current_dir);
    }
    println!("Read-only mode: {}", info.read_only_mode);
    match info.rbd_version {
        Some(version) => println!("rbd ({}): {}", info.rbd_program, version),
        None => println!("rbd ({}): not available", info.rbd_program),
    }
    println!("Mapped images: {}", info.mapped_images.len());
    for image in info.mapped_images {
        println!("- {}/{} -> {}", image.pool, image.name, image.device);
    }
    for note in info.notes {
        println!("Note: {}", note);
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn human_bytes(value: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if value == 0 {
        return "0 B".to_string();
    }
    let mut size = value as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.1} {}", UNITS[unit])
}
