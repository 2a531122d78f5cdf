//! Marker-byte diversity heuristic.
//!
//! This is not an entropy estimator. It counts how many bytes of a sample are
//! one of a handful of fill/test-pattern values and divides by half the
//! sample length. The result is a directional hint for the operator when no
//! signature is present; it never contributes to a verdict. The arithmetic is
//! kept exactly as-is so historical reports stay comparable, and any change
//! to it is a behavior change.

use serde::{Deserialize, Serialize};

pub const DEFAULT_SAMPLE_LEN: usize = 64;
pub const DEFAULT_THRESHOLD_PERCENT: u32 = 50;

pub const MARKER_BYTES: [u8; 6] = [0x00, 0xFF, 0xAA, 0x55, 0xCC, 0x33];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntropyClass {
    Structured,
    Random,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntropyReading {
    pub marker_count: u32,
    pub diversity_percent: u32,
    pub class: EntropyClass,
}

pub fn count_markers(sample: &[u8]) -> u32 {
    sample
        .iter()
        .filter(|byte| MARKER_BYTES.contains(byte))
        .count() as u32
}

/// Ratio of marker bytes to half the sample length, in whole percent.
///
/// Samples shorter than two bytes have no meaningful denominator and report 0.
pub fn diversity_percent(sample: &[u8]) -> u32 {
    let half = sample.len() / 2;
    if half == 0 {
        return 0;
    }
    let markers = u64::from(count_markers(sample));
    (markers * 100 / half as u64) as u32
}

pub fn classify_sample(sample: &[u8], threshold_percent: u32) -> EntropyReading {
    let marker_count = count_markers(sample);
    let diversity_percent = diversity_percent(sample);
    let class = if diversity_percent < threshold_percent {
        EntropyClass::Structured
    } else {
        EntropyClass::Random
    };

    EntropyReading {
        marker_count,
        diversity_percent,
        class,
    }
}
