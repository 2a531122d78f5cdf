use serde::{Deserialize, Serialize};

use crate::error::InputError;

pub const REPORT_VERSION: &str = "1.0.0";

pub const DEFAULT_STRIPE_SIZE_BYTES: u64 = 65_536;
pub const DEFAULT_SAMPLE_COUNT: u64 = 10;
pub const MAX_SAMPLE_COUNT: u64 = 4_096;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StripeGeometry {
    pub stripe_size_bytes: u64,
    pub sample_count: u64,
}

impl StripeGeometry {
    pub fn new(stripe_size_bytes: u64, sample_count: u64) -> Result<Self, InputError> {
        if stripe_size_bytes == 0 {
            return Err(InputError::InvalidStripeSize(stripe_size_bytes.to_string()));
        }
        if sample_count == 0 || sample_count > MAX_SAMPLE_COUNT {
            return Err(InputError::InvalidSampleCount(sample_count.to_string()));
        }
        Ok(Self {
            stripe_size_bytes,
            sample_count,
        })
    }

    pub fn offset_of(&self, stripe: u64) -> Option<u64> {
        stripe.checked_mul(self.stripe_size_bytes)
    }
}

impl Default for StripeGeometry {
    fn default() -> Self {
        Self {
            stripe_size_bytes: DEFAULT_STRIPE_SIZE_BYTES,
            sample_count: DEFAULT_SAMPLE_COUNT,
        }
    }
}

pub fn parse_stripe_size(raw: &str) -> Result<u64, InputError> {
    match raw.trim().parse::<u64>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(InputError::InvalidStripeSize(raw.to_string())),
    }
}

pub fn parse_sample_count(raw: &str) -> Result<u64, InputError> {
    match raw.trim().parse::<u64>() {
        Ok(value) if (1..=MAX_SAMPLE_COUNT).contains(&value) => Ok(value),
        _ => Err(InputError::InvalidSampleCount(raw.to_string())),
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    FullSignature,
    PartialSignature,
    Structured,
    Random,
    Error,
}

impl Classification {
    pub fn is_signature(self) -> bool {
        matches!(
            self,
            Classification::FullSignature | Classification::PartialSignature
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            Classification::FullSignature => "FULL SIGNATURE",
            Classification::PartialSignature => "PARTIAL SIGNATURE",
            Classification::Structured => "structured",
            Classification::Random => "random",
            Classification::Error => "READ ERROR",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProbeResult {
    pub offset: u64,
    pub stripe: u64,
    pub classification: Classification,
    #[serde(default)]
    pub diversity_percent: Option<u32>,
    #[serde(default)]
    pub sample_bytes: Option<Vec<u8>>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    LikelyCorrectFirstMember,
    NoPatternDetected,
    Error,
}

impl Verdict {
    pub fn label(self) -> &'static str {
        match self {
            Verdict::LikelyCorrectFirstMember => "likely correct first member",
            Verdict::NoPatternDetected => "no pattern detected",
            Verdict::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceEvidence {
    pub reference: String,
    pub resolved_path: Option<String>,
    #[serde(default)]
    pub device_size_bytes: Option<u64>,
    pub probes: Vec<ProbeResult>,
    pub pattern_hit_count: u64,
    pub verdict: Verdict,
    #[serde(default)]
    pub error: Option<String>,
}

impl DeviceEvidence {
    /// Finalizes the evidence for a completed scan. The hit count and verdict
    /// are derived from the probes and cannot disagree with them.
    pub fn from_probes(
        reference: impl Into<String>,
        resolved_path: impl Into<String>,
        device_size_bytes: Option<u64>,
        probes: Vec<ProbeResult>,
    ) -> Self {
        let pattern_hit_count = probes
            .iter()
            .filter(|probe| probe.classification.is_signature())
            .count() as u64;
        let verdict = if pattern_hit_count > 0 {
            Verdict::LikelyCorrectFirstMember
        } else {
            Verdict::NoPatternDetected
        };

        Self {
            reference: reference.into(),
            resolved_path: Some(resolved_path.into()),
            device_size_bytes,
            probes,
            pattern_hit_count,
            verdict,
            error: None,
        }
    }

    pub fn failed(
        reference: impl Into<String>,
        resolved_path: Option<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            reference: reference.into(),
            resolved_path,
            device_size_bytes: None,
            probes: Vec::new(),
            pattern_hit_count: 0,
            verdict: Verdict::Error,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchReport {
    pub report_version: String,
    #[serde(default = "default_run_id")]
    pub run_id: String,
    pub generated_at: String,
    pub geometry: StripeGeometry,
    pub device_evidences: Vec<DeviceEvidence>,
    pub total_devices: u64,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub warnings: Vec<String>,
}

fn default_run_id() -> String {
    "unknown".to_string()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct BatchTotals {
    pub total_devices: u64,
    pub scanned: u64,
    pub likely_first_member: u64,
    pub no_pattern: u64,
    pub errors: u64,
    pub not_reached: u64,
}

impl BatchReport {
    pub fn totals(&self) -> BatchTotals {
        let mut totals = BatchTotals {
            total_devices: self.total_devices,
            scanned: self.device_evidences.len() as u64,
            ..BatchTotals::default()
        };
        for evidence in &self.device_evidences {
            match evidence.verdict {
                Verdict::LikelyCorrectFirstMember => totals.likely_first_member += 1,
                Verdict::NoPatternDetected => totals.no_pattern += 1,
                Verdict::Error => totals.errors += 1,
            }
        }
        totals.not_reached = self.total_devices.saturating_sub(totals.scanned);
        totals
    }

    pub fn likely_members(&self) -> impl Iterator<Item = &DeviceEvidence> {
        self.device_evidences
            .iter()
            .filter(|evidence| evidence.verdict == Verdict::LikelyCorrectFirstMember)
    }
}
