//! The verdict is binary: any signature hit marks the device as a likely
//! first member. It is a triage signal, not a proof of ordering. Parity
//! members come back negative and coincidental byte patterns can produce
//! false positives.

use std::path::Path;

use tracing::{debug, warn};

use crate::error::ReadError;
use crate::model::{DeviceEvidence, ProbeResult, StripeGeometry};
use crate::probe::{error_probe, probe_offset, ProbeOptions};
use crate::reader::{BlockReader, DeviceOpener};

pub fn scan_device(
    opener: &dyn DeviceOpener,
    reference: &str,
    resolved_path: &Path,
    geometry: &StripeGeometry,
    options: &ProbeOptions,
    on_probe: &mut dyn FnMut(&ProbeResult),
) -> DeviceEvidence {
    let resolved = resolved_path.to_string_lossy().to_string();
    let reader = match opener.open(resolved_path) {
        Ok(reader) => reader,
        Err(err) => {
            warn!("cannot open {} for scanning: {err}", resolved_path.display());
            return DeviceEvidence::failed(reference, Some(resolved), err.to_string());
        }
    };

    let probes = scan_reader(reader.as_ref(), geometry, options, on_probe);
    let evidence =
        DeviceEvidence::from_probes(reference, resolved, Some(reader.size()), probes);
    debug!(
        "{}: {} signature hit(s) across {} probe(s)",
        reference,
        evidence.pattern_hit_count,
        evidence.probes.len()
    );
    evidence
}

// Stripe 0 is offset 0 and is probed once.
pub fn scan_reader(
    reader: &dyn BlockReader,
    geometry: &StripeGeometry,
    options: &ProbeOptions,
    on_probe: &mut dyn FnMut(&ProbeResult),
) -> Vec<ProbeResult> {
    let mut probes = Vec::with_capacity(geometry.sample_count.min(1024) as usize + 1);
    for stripe in 0..=geometry.sample_count {
        let result = match geometry.offset_of(stripe) {
            Some(offset) => probe_offset(reader, offset, stripe, options),
            None => error_probe(u64::MAX, stripe, &ReadError::OffsetOverflow { stripe }),
        };
        on_probe(&result);
        probes.push(result);
    }
    probes
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;

    use super::*;
    use crate::model::{Classification, Verdict};
    use crate::reader::MemoryBlockReader;
    use crate::signature::NTFS_BOOT_PREFIX;

    struct MapOpener {
        devices: HashMap<PathBuf, MemoryBlockReader>,
    }

    impl MapOpener {
        fn single(path: &str, device: MemoryBlockReader) -> Self {
            let mut devices = HashMap::new();
            devices.insert(PathBuf::from(path), device);
            Self { devices }
        }
    }

    impl DeviceOpener for MapOpener {
        fn open(&self, path: &Path) -> Result<Box<dyn BlockReader>, ReadError> {
            self.devices
                .get(path)
                .cloned()
                .map(|device| Box::new(device) as Box<dyn BlockReader>)
                .ok_or_else(|| ReadError::Open {
                    path: path.to_path_buf(),
                    source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
                })
        }
    }

    fn geometry(stripe: u64, samples: u64) -> StripeGeometry {
        StripeGeometry::new(stripe, samples).unwrap()
    }

    fn device_with_signatures(stripe: usize, stripes: usize, at: &[usize]) -> MemoryBlockReader {
        let mut device = MemoryBlockReader::new(vec![0x41; stripe * stripes]);
        for index in at {
            device.write_at(index * stripe, &NTFS_BOOT_PREFIX);
        }
        device
    }

    #[test]
    fn signature_on_every_stripe_counts_each_offset_once() {
        let geometry = geometry(4096, 5);
        let device = device_with_signatures(4096, 6, &[0, 1, 2, 3, 4, 5]);
        let opener = MapOpener::single("/dev/sdx", device);

        let evidence = scan_device(
            &opener,
            "/dev/sdx",
            Path::new("/dev/sdx"),
            &geometry,
            &ProbeOptions::default(),
            &mut |_| {},
        );

        assert_eq!(evidence.probes.len(), 6);
        assert_eq!(evidence.pattern_hit_count, geometry.sample_count + 1);
        assert_eq!(evidence.verdict, Verdict::LikelyCorrectFirstMember);
    }

    #[test]
    fn offsets_are_probed_in_increasing_stripe_order() {
        let geometry = geometry(512, 4);
        let device = device_with_signatures(512, 5, &[]);
        let mut seen = Vec::new();
        scan_reader(&device, &geometry, &ProbeOptions::default(), &mut |probe| {
            seen.push((probe.stripe, probe.offset))
        });
        assert_eq!(seen, vec![(0, 0), (1, 512), (2, 1024), (3, 1536), (4, 2048)]);
    }

    #[test]
    fn no_signature_means_no_pattern_regardless_of_entropy() {
        let geometry = geometry(1024, 3);
        let mut device = MemoryBlockReader::new(vec![0x00; 4096]);
        device.write_at(1024, &[0x41; 64]);
        let opener = MapOpener::single("/dev/sdy", device);

        let evidence = scan_device(
            &opener,
            "/dev/sdy",
            Path::new("/dev/sdy"),
            &geometry,
            &ProbeOptions::default(),
            &mut |_| {},
        );
        assert_eq!(evidence.pattern_hit_count, 0);
        assert_eq!(evidence.verdict, Verdict::NoPatternDetected);
        assert_eq!(evidence.probes[0].classification, Classification::Random);
        assert_eq!(evidence.probes[1].classification, Classification::Structured);
    }

    #[test]
    fn unreadable_stripes_do_not_stop_the_scan() {
        let geometry = geometry(1024, 4);
        let device = device_with_signatures(1024, 2, &[0]);
        let probes = scan_reader(&device, &geometry, &ProbeOptions::default(), &mut |_| {});

        assert_eq!(probes.len(), 5);
        assert_eq!(probes[0].classification, Classification::FullSignature);
        assert!(probes[2..]
            .iter()
            .all(|probe| probe.classification == Classification::Error));
    }

    #[test]
    fn unopenable_device_short_circuits_with_error() {
        let opener = MapOpener::single("/dev/other", MemoryBlockReader::zeroed(16));
        let evidence = scan_device(
            &opener,
            "/dev/sdz",
            Path::new("/dev/sdz"),
            &StripeGeometry::default(),
            &ProbeOptions::default(),
            &mut |_| {},
        );
        assert_eq!(evidence.verdict, Verdict::Error);
        assert!(evidence.probes.is_empty());
        assert!(evidence.error.is_some());
    }

    #[test]
    fn repeated_scans_are_identical() {
        let geometry = geometry(2048, 6);
        let mut device = device_with_signatures(2048, 7, &[2]);
        device.write_at(4 * 2048, &[0xAA; 40]);

        let first = scan_reader(&device, &geometry, &ProbeOptions::default(), &mut |_| {});
        let second = scan_reader(&device, &geometry, &ProbeOptions::default(), &mut |_| {});
        assert_eq!(first, second);
    }

    #[test]
    fn overflowing_offsets_become_error_probes() {
        let geometry = geometry(u64::MAX, 2);
        let device = device_with_signatures(64, 1, &[0]);
        let probes = scan_reader(&device, &geometry, &ProbeOptions::default(), &mut |_| {});

        assert_eq!(probes[0].classification, Classification::FullSignature);
        assert_eq!(probes[1].classification, Classification::Error);
        assert_eq!(probes[2].classification, Classification::Error);
        assert!(probes[2].error.as_deref().unwrap().contains("overflow"));
    }
}
