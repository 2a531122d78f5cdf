use std::cell::RefCell;
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Result;
use stripe_probe_core::{
    load_report, run_batch, write_report, AttachError, AttachmentLayer, BatchEvent, BatchOptions,
    Classification, FileDeviceOpener, RemoteImage, ReportOptions, Resolver, ResolverOptions,
    StripeGeometry, Verdict, NTFS_BOOT_PREFIX,
};
use tempfile::TempDir;

const STRIPE: u64 = 65_536;

/// Attachment layer fake that records every call.
#[derive(Default)]
struct RecordingLayer {
    existing: Option<PathBuf>,
    attach_to: Option<PathBuf>,
    attaches: RefCell<Vec<String>>,
    detaches: RefCell<Vec<PathBuf>>,
}

impl AttachmentLayer for RecordingLayer {
    fn find_mapping(&self, _image: &RemoteImage) -> Result<Option<PathBuf>, AttachError> {
        Ok(self.existing.clone())
    }

    fn attach(&self, image: &RemoteImage) -> Result<PathBuf, AttachError> {
        self.attaches.borrow_mut().push(image.qualified_name());
        self.attach_to
            .clone()
            .ok_or_else(|| AttachError::UnexpectedOutput {
                command: "rbd map".to_string(),
                message: "no device path printed".to_string(),
            })
    }

    fn detach(&self, device: &Path) -> Result<(), AttachError> {
        self.detaches.borrow_mut().push(device.to_path_buf());
        Ok(())
    }
}

fn make_image(dir: &TempDir, name: &str, stripes: u64, signature_stripes: &[u64]) -> PathBuf {
    let path = dir.path().join(name);
    let mut file = File::create(&path).expect("create image");
    file.set_len(stripes * STRIPE).expect("size image");
    for stripe in signature_stripes {
        file.seek(SeekFrom::Start(stripe * STRIPE)).expect("seek");
        file.write_all(&NTFS_BOOT_PREFIX).expect("write signature");
    }
    path
}

fn image_resolver(layer: RecordingLayer) -> Resolver<RecordingLayer> {
    Resolver::new(
        layer,
        ResolverOptions {
            allow_image_files: true,
        },
    )
}

fn options(samples: u64) -> BatchOptions {
    BatchOptions {
        geometry: StripeGeometry::new(STRIPE, samples).unwrap(),
        ..BatchOptions::default()
    }
}

fn reference(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

#[test]
fn eleven_member_array_flags_only_the_first_member() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let names = [
        "sda", "sdb", "sdc", "sdd", "sde", "sdf", "sdg", "sdh", "sdi", "sdj", "sdk",
    ];
    let references = names
        .iter()
        .map(|name| {
            let hits: &[u64] = if *name == "sdg" { &[0, 1, 2] } else { &[] };
            reference(&make_image(&dir, name, 11, hits))
        })
        .collect::<Vec<_>>();

    let resolver = image_resolver(RecordingLayer::default());
    let mut probe_lines = 0;
    let report = run_batch(
        &references,
        &options(10),
        &resolver,
        &FileDeviceOpener,
        &mut |event| {
            if let BatchEvent::Probe { .. } = event {
                probe_lines += 1;
            }
        },
    )?;

    assert_eq!(report.total_devices, 11);
    assert_eq!(report.device_evidences.len(), 11);
    assert_eq!(probe_lines, 11 * 11);
    for (name, evidence) in names.iter().zip(&report.device_evidences) {
        if *name == "sdg" {
            assert_eq!(evidence.pattern_hit_count, 3);
            assert_eq!(evidence.verdict, Verdict::LikelyCorrectFirstMember);
            let hit_offsets = evidence
                .probes
                .iter()
                .filter(|probe| probe.classification.is_signature())
                .map(|probe| probe.offset)
                .collect::<Vec<_>>();
            assert_eq!(hit_offsets, vec![0, 65_536, 131_072]);
        } else {
            assert_eq!(evidence.pattern_hit_count, 0, "{name}");
            assert_eq!(evidence.verdict, Verdict::NoPatternDetected, "{name}");
        }
    }
    Ok(())
}

#[test]
fn unresolvable_entry_does_not_stop_the_batch() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let references = vec![
        reference(&make_image(&dir, "first", 3, &[0])),
        reference(&dir.path().join("missing")),
        reference(&make_image(&dir, "third", 3, &[])),
    ];

    let resolver = image_resolver(RecordingLayer::default());
    let report = run_batch(
        &references,
        &options(2),
        &resolver,
        &FileDeviceOpener,
        &mut |_| {},
    )?;

    assert_eq!(report.device_evidences.len(), 3);
    let verdicts = report
        .device_evidences
        .iter()
        .map(|evidence| evidence.verdict)
        .collect::<Vec<_>>();
    assert_eq!(
        verdicts,
        vec![
            Verdict::LikelyCorrectFirstMember,
            Verdict::Error,
            Verdict::NoPatternDetected
        ]
    );
    assert!(report.device_evidences[1].probes.is_empty());
    assert_eq!(report.device_evidences[0].probes.len(), 3);
    assert_eq!(report.device_evidences[2].probes.len(), 3);
    assert_eq!(report.totals().errors, 1);
    Ok(())
}

#[test]
fn malformed_reference_is_recorded_in_order() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let image = reference(&make_image(&dir, "member", 2, &[1]));
    let references = vec!["rbd sdb".to_string(), image.clone(), image];

    let resolver = image_resolver(RecordingLayer::default());
    let report = run_batch(
        &references,
        &options(1),
        &resolver,
        &FileDeviceOpener,
        &mut |_| {},
    )?;

    assert_eq!(report.device_evidences.len(), 3);
    assert_eq!(report.device_evidences[0].verdict, Verdict::Error);
    assert!(report.device_evidences[0]
        .error
        .as_deref()
        .unwrap()
        .contains("unrecognized"));
    assert_eq!(report.device_evidences[1], report.device_evidences[2]);
    Ok(())
}

#[test]
fn self_attached_image_is_detached_once_even_when_scan_fails() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let vanished = dir.path().join("rbd0");
    let layer = RecordingLayer {
        attach_to: Some(vanished.clone()),
        ..RecordingLayer::default()
    };
    let resolver = image_resolver(layer);

    let report = run_batch(
        &["rbd recovery//sdg".to_string()],
        &options(4),
        &resolver,
        &FileDeviceOpener,
        &mut |_| {},
    )?;

    let evidence = &report.device_evidences[0];
    assert_eq!(evidence.verdict, Verdict::Error);
    assert_eq!(evidence.resolved_path.as_deref(), Some(vanished.to_str().unwrap()));
    assert_eq!(*resolver.layer().attaches.borrow(), vec!["recovery/sdg"]);
    assert_eq!(*resolver.layer().detaches.borrow(), vec![vanished]);
    assert_eq!(resolver.outstanding(), 0);
    Ok(())
}

#[test]
fn pre_existing_mapping_is_scanned_but_left_attached() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mapped = make_image(&dir, "rbd3", 3, &[0, 2]);
    let layer = RecordingLayer {
        existing: Some(mapped.clone()),
        ..RecordingLayer::default()
    };
    let resolver = image_resolver(layer);

    let report = run_batch(
        &["rbd recovery/sdg".to_string()],
        &options(2),
        &resolver,
        &FileDeviceOpener,
        &mut |_| {},
    )?;

    let evidence = &report.device_evidences[0];
    assert_eq!(evidence.pattern_hit_count, 2);
    assert_eq!(evidence.probes[1].classification, Classification::Random);
    assert!(resolver.layer().attaches.borrow().is_empty());
    assert!(resolver.layer().detaches.borrow().is_empty());
    Ok(())
}

#[test]
fn interruption_stops_the_batch_and_releases_mappings() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let attached = make_image(&dir, "rbd0", 2, &[]);
    let layer = RecordingLayer {
        attach_to: Some(attached.clone()),
        ..RecordingLayer::default()
    };
    let resolver = image_resolver(layer);
    let cancel = Arc::new(AtomicBool::new(false));
    let batch_options = BatchOptions {
        cancel_flag: Some(Arc::clone(&cancel)),
        ..options(1)
    };

    let references = vec![
        "rbd recovery/sda".to_string(),
        "rbd recovery/sdb".to_string(),
        "rbd recovery/sdc".to_string(),
    ];
    let mut interrupted_at = None;
    let report = run_batch(
        &references,
        &batch_options,
        &resolver,
        &FileDeviceOpener,
        &mut |event| match event {
            BatchEvent::DeviceFinished { .. } => cancel.store(true, Ordering::Relaxed),
            BatchEvent::Interrupted { processed, .. } => interrupted_at = Some(processed),
            _ => {}
        },
    )?;

    assert!(report.interrupted);
    assert_eq!(interrupted_at, Some(1));
    assert_eq!(report.device_evidences.len(), 1);
    assert_eq!(report.totals().not_reached, 2);
    assert_eq!(resolver.layer().attaches.borrow().len(), 1);
    assert_eq!(*resolver.layer().detaches.borrow(), vec![attached]);
    assert!(report
        .warnings
        .iter()
        .any(|warning| warning.contains("interrupted")));
    Ok(())
}

#[test]
fn repeated_runs_produce_identical_probes_and_separate_reports() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let out = tempfile::tempdir()?;
    let references = vec![reference(&make_image(&dir, "sdg", 4, &[0, 3]))];
    let resolver = image_resolver(RecordingLayer::default());

    let first = run_batch(&references, &options(3), &resolver, &FileDeviceOpener, &mut |_| {})?;
    let second = run_batch(&references, &options(3), &resolver, &FileDeviceOpener, &mut |_| {})?;
    assert_eq!(
        first.device_evidences[0].probes,
        second.device_evidences[0].probes
    );

    let a = write_report(&first, out.path(), ReportOptions { json: true })?;
    let b = write_report(&second, out.path(), ReportOptions { json: true })?;
    assert_ne!(a.text_path, b.text_path);
    assert_eq!(load_report(a.json_path.unwrap())?, first);
    assert_eq!(load_report(b.json_path.unwrap())?, second);
    Ok(())
}
