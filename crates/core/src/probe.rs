use tracing::debug;

use crate::entropy::{classify_sample, EntropyClass, DEFAULT_SAMPLE_LEN, DEFAULT_THRESHOLD_PERCENT};
use crate::error::{InputError, ReadError};
use crate::model::{Classification, ProbeResult};
use crate::reader::BlockReader;
use crate::signature::{match_signature, SignatureMatch, SIGNATURE_WINDOW};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOptions {
    pub sample_len: usize,
    pub threshold_percent: u32,
    pub capture_samples: bool,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            sample_len: DEFAULT_SAMPLE_LEN,
            threshold_percent: DEFAULT_THRESHOLD_PERCENT,
            capture_samples: false,
        }
    }
}

pub fn validate_probe_options(options: &ProbeOptions) -> Result<(), InputError> {
    if options.threshold_percent == 0 || options.threshold_percent > 100 {
        return Err(InputError::InvalidThreshold(options.threshold_percent));
    }
    Ok(())
}

/// Classifies one offset of a device. Read failures become an `Error` probe
/// instead of propagating, so one bad offset never ends the scan.
pub fn probe_offset(
    reader: &dyn BlockReader,
    offset: u64,
    stripe: u64,
    options: &ProbeOptions,
) -> ProbeResult {
    match classify_offset(reader, offset, stripe, options) {
        Ok(result) => result,
        Err(err) => {
            debug!("probe at offset {offset:#x} failed: {err}");
            error_probe(offset, stripe, &err)
        }
    }
}

pub(crate) fn error_probe(offset: u64, stripe: u64, err: &ReadError) -> ProbeResult {
    ProbeResult {
        offset,
        stripe,
        classification: Classification::Error,
        diversity_percent: None,
        sample_bytes: None,
        error: Some(err.to_string()),
    }
}

fn classify_offset(
    reader: &dyn BlockReader,
    offset: u64,
    stripe: u64,
    options: &ProbeOptions,
) -> Result<ProbeResult, ReadError> {
    let window = reader.read_at(offset, SIGNATURE_WINDOW)?;
    let signature = match match_signature(&window) {
        SignatureMatch::FullSignature => Some(Classification::FullSignature),
        SignatureMatch::PartialSignature => Some(Classification::PartialSignature),
        SignatureMatch::NoMatch => None,
    };

    if let Some(classification) = signature {
        return Ok(ProbeResult {
            offset,
            stripe,
            classification,
            diversity_percent: None,
            sample_bytes: options.capture_samples.then_some(window),
            error: None,
        });
    }

    let sample = reader.read_at(offset, options.sample_len)?;
    let reading = classify_sample(&sample, options.threshold_percent);
    let classification = match reading.class {
        EntropyClass::Structured => Classification::Structured,
        EntropyClass::Random => Classification::Random,
    };

    Ok(ProbeResult {
        offset,
        stripe,
        classification,
        diversity_percent: Some(reading.diversity_percent),
        sample_bytes: options.capture_samples.then_some(sample),
        error: None,
    })
}
