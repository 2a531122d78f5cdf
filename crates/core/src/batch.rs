use std::fs;
use std::path::Path;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use chrono::{SecondsFormat, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{InputError, ReleaseWarning};
use crate::model::{BatchReport, DeviceEvidence, ProbeResult, StripeGeometry, REPORT_VERSION};
use crate::probe::{validate_probe_options, ProbeOptions};
use crate::reader::DeviceOpener;
use crate::reference::DeviceReference;
use crate::resolver::{AttachmentLayer, Resolver};
use crate::stripe::scan_device;

#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    pub geometry: StripeGeometry,
    pub probe: ProbeOptions,
    pub cancel_flag: Option<Arc<AtomicBool>>,
}

#[derive(Debug, Clone, Copy)]
pub enum BatchEvent<'a> {
    DeviceStarted {
        index: usize,
        total: usize,
        reference: &'a str,
    },
    Resolved {
        reference: &'a str,
        device_path: &'a Path,
        self_attached: bool,
    },
    Probe {
        reference: &'a str,
        probe: &'a ProbeResult,
    },
    DeviceFinished {
        evidence: &'a DeviceEvidence,
    },
    ReleaseWarning(&'a ReleaseWarning),
    Interrupted {
        processed: usize,
        total: usize,
    },
}

pub fn parse_reference_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

pub fn load_reference_file(path: impl AsRef<Path>) -> Result<Vec<String>, InputError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|source| InputError::ReferenceFile {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_reference_list(&text))
}

pub fn validate_batch(references: &[String], options: &BatchOptions) -> Result<(), InputError> {
    if references.is_empty() {
        return Err(InputError::NoReferences);
    }
    StripeGeometry::new(options.geometry.stripe_size_bytes, options.geometry.sample_count)?;
    validate_probe_options(&options.probe)
}

/// A failure on one entry is recorded as an `Error` verdict and the batch
/// moves on. Self-attached handles are released even when cancelled.
pub fn run_batch<A: AttachmentLayer>(
    references: &[String],
    options: &BatchOptions,
    resolver: &Resolver<A>,
    opener: &dyn DeviceOpener,
    on_event: &mut dyn FnMut(BatchEvent<'_>),
) -> Result<BatchReport, InputError> {
    validate_batch(references, options)?;

    let total = references.len();
    let mut evidences = Vec::with_capacity(total);
    let mut warnings = Vec::new();
    let mut interrupted = false;

    for (index, raw) in references.iter().enumerate() {
        if is_cancelled(options) {
            interrupted = true;
            warn!("batch interrupted after {index} of {total} device(s)");
            on_event(BatchEvent::Interrupted {
                processed: index,
                total,
            });
            warnings.push(format!(
                "batch interrupted after {index} of {total} device(s); remaining entries were not scanned"
            ));
            break;
        }

        on_event(BatchEvent::DeviceStarted {
            index,
            total,
            reference: raw,
        });
        let (evidence, release_warning) = process_entry(raw, options, resolver, opener, on_event);
        if let Some(warning) = release_warning {
            on_event(BatchEvent::ReleaseWarning(&warning));
            warnings.push(warning.to_string());
        }
        on_event(BatchEvent::DeviceFinished {
            evidence: &evidence,
        });
        evidences.push(evidence);
    }

    for warning in resolver.release_outstanding() {
        on_event(BatchEvent::ReleaseWarning(&warning));
        warnings.push(warning.to_string());
    }

    let report = BatchReport {
        report_version: REPORT_VERSION.to_string(),
        run_id: Uuid::new_v4().to_string(),
        generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        geometry: options.geometry,
        device_evidences: evidences,
        total_devices: total as u64,
        interrupted,
        warnings,
    };
    info!(
        "batch complete: {} of {} device(s) scanned, {} likely first member(s)",
        report.device_evidences.len(),
        total,
        report.likely_members().count()
    );
    Ok(report)
}

fn process_entry<A: AttachmentLayer>(
    raw: &str,
    options: &BatchOptions,
    resolver: &Resolver<A>,
    opener: &dyn DeviceOpener,
    on_event: &mut dyn FnMut(BatchEvent<'_>),
) -> (DeviceEvidence, Option<ReleaseWarning>) {
    let reference = match DeviceReference::parse(raw) {
        Ok(reference) => reference,
        Err(err) => {
            warn!("{err}");
            return (DeviceEvidence::failed(raw, None, err.to_string()), None);
        }
    };

    let guard = match resolver.acquire(&reference) {
        Ok(guard) => guard,
        Err(err) => {
            warn!("could not resolve {raw}: {err}");
            return (DeviceEvidence::failed(raw, None, err.to_string()), None);
        }
    };

    let handle = guard.handle();
    on_event(BatchEvent::Resolved {
        reference: raw,
        device_path: &handle.device_path,
        self_attached: handle.self_attached,
    });

    let evidence = scan_device(
        opener,
        raw,
        &handle.device_path,
        &options.geometry,
        &options.probe,
        &mut |probe| {
            on_event(BatchEvent::Probe {
                reference: raw,
                probe,
            })
        },
    );

    (evidence, guard.release())
}

fn is_cancelled(options: &BatchOptions) -> bool {
    options
        .cancel_flag
        .as_ref()
        .is_some_and(|flag| flag.load(Ordering::Relaxed))
}
