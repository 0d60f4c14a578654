// Content-risk scanner models.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Highest risk score a verdict can carry.
pub const MAX_RISK: u8 = 10;

/// One heuristic (or classifier) finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum RiskReason {
    NearEmptyText,
    RepeatedCharacters { run: usize },
    ExcessiveCaps,
    SpamPhrase,
    ExplicitContent,
    ExcessiveLinks { count: usize },
    AudioBitrateAnomaly { bytes_per_sec: u64 },
    CorruptAudio,
    Classifier { label: String },
}

impl RiskReason {
    /// Short code stored on flags and audit details.
    pub fn code(&self) -> String {
        match self {
            RiskReason::NearEmptyText => "near_empty_text".to_string(),
            RiskReason::RepeatedCharacters { .. } => "repeated_characters".to_string(),
            RiskReason::ExcessiveCaps => "excessive_caps".to_string(),
            RiskReason::SpamPhrase => "spam_phrase".to_string(),
            RiskReason::ExplicitContent => "explicit_content".to_string(),
            RiskReason::ExcessiveLinks { .. } => "excessive_links".to_string(),
            RiskReason::AudioBitrateAnomaly { .. } => "audio_bitrate_anomaly".to_string(),
            RiskReason::CorruptAudio => "corrupt_audio".to_string(),
            RiskReason::Classifier { label } => format!("classifier:{}", label),
        }
    }

    /// Risk this finding contributes.
    pub fn weight(&self) -> u8 {
        match self {
            RiskReason::NearEmptyText
            | RiskReason::RepeatedCharacters { .. }
            | RiskReason::ExcessiveCaps => 2,
            RiskReason::SpamPhrase | RiskReason::ExplicitContent | RiskReason::ExcessiveLinks { .. } => 3,
            RiskReason::AudioBitrateAnomaly { .. } => 4,
            RiskReason::CorruptAudio => MAX_RISK,
            RiskReason::Classifier { .. } => 0,
        }
    }
}

impl fmt::Display for RiskReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Outcome of scanning one item.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ScanVerdict {
    pub should_flag: bool,
    /// The item is unusable (e.g. corrupt audio) and should be flagged at
    /// maximum risk.
    pub hard_reject: bool,
    /// 0..=10
    pub risk: u8,
    pub reasons: Vec<RiskReason>,
    pub classifier_used: bool,
}

impl ScanVerdict {
    pub fn reason_codes(&self) -> Vec<String> {
        self.reasons.iter().map(RiskReason::code).collect()
    }
}

/// What an external classifier said about an item.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClassifierVerdict {
    /// 0..=10; larger values are clamped.
    pub risk: u8,
    #[serde(default)]
    pub labels: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Trimmed text shorter than this (in chars) is near-empty.
    pub min_text_chars: usize,
    /// Longest allowed run of one repeated alphanumeric char.
    pub max_char_run: usize,
    /// Caps ratio is only judged on texts with at least this many letters.
    pub caps_min_letters: usize,
    pub caps_ratio: f64,
    pub max_links: usize,
    /// Risk at which an item is flagged.
    pub flag_threshold: u8,
    /// Plausible audio byte-rate envelope.
    pub min_audio_bytes_per_sec: u64,
    pub max_audio_bytes_per_sec: u64,
    /// A byte-rate this many times outside the envelope is treated as corrupt.
    pub hard_reject_factor: u64,
    pub classifier_timeout: Duration,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            min_text_chars: 3,
            max_char_run: 8,
            caps_min_letters: 20,
            caps_ratio: 0.7,
            max_links: 3,
            flag_threshold: 3,
            min_audio_bytes_per_sec: 2_000,
            max_audio_bytes_per_sec: 200_000,
            hard_reject_factor: 4,
            classifier_timeout: Duration::from_secs(2),
        }
    }
}
