// Content-risk scanner - heuristic scoring with an optional classifier.
//
// Heuristics are cheap and synchronous. The classifier is an external
// collaborator behind `RiskClassifier`; it runs under a timeout and any
// failure leaves the heuristic verdict in place.

use super::scanner_models::{ClassifierVerdict, RiskReason, ScanVerdict, ScannerConfig, MAX_RISK};
use crate::core::collaborators::{AudioInfo, ContentItem};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Classifier timed out after {0:?}")]
    Timeout(Duration),

    #[error("Classifier unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid classifier response: {0}")]
    InvalidResponse(String),
}

// ============================================================================
// CLASSIFIER TRAIT (PORT)
// ============================================================================

#[async_trait]
pub trait RiskClassifier: Send + Sync {
    async fn classify(&self, item: &ContentItem) -> Result<ClassifierVerdict, ScanError>;
}

/// Label recorded when the classifier raises the risk without saying why.
pub const UNLABELLED: &str = "unlabelled";

// Compiled once
static LINK_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:https?://|www\.)\S+").expect("link regex is valid")
});

static SPAM_PHRASES_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(free followers|buy followers|click here|buy now|dm me for|make money fast|limited offer|act fast|100% guaranteed|earn \$\d+|crypto giveaway|double your (?:money|crypto)|whatsapp only|contact me on telegram)",
    )
    .expect("spam phrase regex is valid")
});

// ============================================================================
// CORE SERVICE
// ============================================================================

pub struct ContentRiskScanner {
    config: ScannerConfig,
    classifier: Option<Arc<dyn RiskClassifier>>,
}

impl ContentRiskScanner {
    pub fn new(config: ScannerConfig) -> Self {
        Self {
            config,
            classifier: None,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn RiskClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Score an item, consulting the classifier when one is configured.
    ///
    /// The classifier can raise the risk but never lower it below what the
    /// heuristics found.
    pub async fn scan(&self, item: &ContentItem) -> ScanVerdict {
        let mut verdict = self.scan_heuristics(item);

        let Some(classifier) = &self.classifier else {
            return verdict;
        };

        let timeout = self.config.classifier_timeout;
        let result = match tokio::time::timeout(timeout, classifier.classify(item)).await {
            Ok(result) => result,
            Err(_) => Err(ScanError::Timeout(timeout)),
        };

        match result {
            Ok(classified) => {
                let classifier_risk = classified.risk.min(MAX_RISK);
                let raised = classifier_risk > verdict.risk;
                verdict.classifier_used = true;
                verdict.risk = verdict.risk.max(classifier_risk);
                if raised && classified.labels.is_empty() {
                    // Every raised score must be explainable on the flag.
                    verdict.reasons.push(RiskReason::Classifier {
                        label: UNLABELLED.to_string(),
                    });
                }
                verdict
                    .reasons
                    .extend(classified.labels.into_iter().map(|label| RiskReason::Classifier { label }));
                verdict.should_flag = verdict.hard_reject || verdict.risk >= self.config.flag_threshold;
            }
            Err(e) => {
                tracing::warn!(
                    content_ref = %item.content_ref,
                    "Classifier failed, using heuristic verdict: {}",
                    e
                );
            }
        }

        verdict
    }

    /// Score an item with the built-in heuristics only.
    pub fn scan_heuristics(&self, item: &ContentItem) -> ScanVerdict {
        let mut reasons = Vec::new();
        let mut hard_reject = false;

        match item.text.as_deref() {
            Some(text) => self.check_text(text, item.audio.is_some(), &mut reasons),
            None if item.audio.is_none() => reasons.push(RiskReason::NearEmptyText),
            None => {}
        }

        if item.explicit {
            reasons.push(RiskReason::ExplicitContent);
        }

        if let Some(audio) = &item.audio {
            if let Some(reason) = self.check_audio(audio) {
                hard_reject = reason == RiskReason::CorruptAudio;
                reasons.push(reason);
            }
        }

        let risk = if hard_reject {
            MAX_RISK
        } else {
            reasons
                .iter()
                .map(|r| r.weight() as u32)
                .sum::<u32>()
                .min(MAX_RISK as u32) as u8
        };

        ScanVerdict {
            should_flag: hard_reject || risk >= self.config.flag_threshold,
            hard_reject,
            risk,
            reasons,
            classifier_used: false,
        }
    }

    fn check_text(&self, text: &str, has_audio: bool, reasons: &mut Vec<RiskReason>) {
        let trimmed = text.trim();

        if !has_audio && trimmed.chars().count() < self.config.min_text_chars {
            reasons.push(RiskReason::NearEmptyText);
        }

        let run = longest_char_run(trimmed);
        if run > self.config.max_char_run {
            reasons.push(RiskReason::RepeatedCharacters { run });
        }

        if self.has_excessive_caps(trimmed) {
            reasons.push(RiskReason::ExcessiveCaps);
        }

        if SPAM_PHRASES_REGEX.is_match(trimmed) {
            reasons.push(RiskReason::SpamPhrase);
        }

        let links = LINK_REGEX.find_iter(trimmed).count();
        if links > self.config.max_links {
            reasons.push(RiskReason::ExcessiveLinks { count: links });
        }
    }

    fn has_excessive_caps(&self, text: &str) -> bool {
        let letters = text.chars().filter(|c| c.is_alphabetic()).count();
        if letters < self.config.caps_min_letters {
            return false;
        }
        let caps = text.chars().filter(|c| c.is_uppercase()).count();
        caps as f64 / letters as f64 > self.config.caps_ratio
    }

    fn check_audio(&self, audio: &AudioInfo) -> Option<RiskReason> {
        if audio.byte_size == 0 || !audio.duration_secs.is_finite() || audio.duration_secs <= 0.0 {
            return Some(RiskReason::CorruptAudio);
        }

        let bytes_per_sec = (audio.byte_size as f64 / audio.duration_secs) as u64;
        let factor = self.config.hard_reject_factor.max(1);

        if bytes_per_sec < self.config.min_audio_bytes_per_sec / factor
            || bytes_per_sec > self.config.max_audio_bytes_per_sec.saturating_mul(factor)
        {
            return Some(RiskReason::CorruptAudio);
        }

        if bytes_per_sec < self.config.min_audio_bytes_per_sec
            || bytes_per_sec > self.config.max_audio_bytes_per_sec
        {
            return Some(RiskReason::AudioBitrateAnomaly { bytes_per_sec });
        }

        None
    }
}

impl Default for ContentRiskScanner {
    fn default() -> Self {
        Self::new(ScannerConfig::default())
    }
}

/// Longest run of one repeated alphanumeric character, ignoring case.
fn longest_char_run(text: &str) -> usize {
    let mut longest = 0;
    let mut run = 0;
    let mut prev: Option<char> = None;

    for ch in text.chars().flat_map(char::to_lowercase) {
        if ch.is_alphanumeric() && Some(ch) == prev {
            run += 1;
        } else {
            run = 1;
            prev = Some(ch);
        }
        if ch.is_alphanumeric() {
            longest = longest.max(run);
        }
    }

    longest
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn text_item(text: &str) -> ContentItem {
        ContentItem {
            content_ref: "post-1".to_string(),
            author_id: Some("author-1".to_string()),
            text: Some(text.to_string()),
            explicit: false,
            audio: None,
            status: Default::default(),
            created_at: Utc::now(),
            last_checked: None,
        }
    }

    fn audio_item(byte_size: u64, duration_secs: f64) -> ContentItem {
        ContentItem {
            text: Some("Morning show, episode 12".to_string()),
            audio: Some(AudioInfo {
                byte_size,
                duration_secs,
            }),
            ..text_item("")
        }
    }

    struct FixedClassifier(Result<ClassifierVerdict, String>);

    #[async_trait]
    impl RiskClassifier for FixedClassifier {
        async fn classify(&self, _item: &ContentItem) -> Result<ClassifierVerdict, ScanError> {
            self.0.clone().map_err(ScanError::Unavailable)
        }
    }

    struct SlowClassifier;

    #[async_trait]
    impl RiskClassifier for SlowClassifier {
        async fn classify(&self, _item: &ContentItem) -> Result<ClassifierVerdict, ScanError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(ClassifierVerdict {
                risk: 10,
                labels: vec![],
            })
        }
    }

    #[test]
    fn test_ordinary_text_is_clean() {
        let scanner = ContentRiskScanner::default();
        let verdict = scanner.scan_heuristics(&text_item("Join us tonight for a chat about synths"));

        assert!(!verdict.should_flag);
        assert_eq!(verdict.risk, 0);
        assert!(verdict.reasons.is_empty());
    }

    #[test]
    fn test_near_empty_text_alone_is_below_threshold() {
        let scanner = ContentRiskScanner::default();
        let verdict = scanner.scan_heuristics(&text_item(" a "));

        assert_eq!(verdict.reasons, vec![RiskReason::NearEmptyText]);
        assert_eq!(verdict.risk, 2);
        assert!(!verdict.should_flag);
    }

    #[test]
    fn test_spam_phrase_flags() {
        let scanner = ContentRiskScanner::default();
        let verdict = scanner.scan_heuristics(&text_item("Get free followers, click here"));

        assert!(verdict.should_flag);
        assert!(verdict.reasons.contains(&RiskReason::SpamPhrase));
    }

    #[test]
    fn test_shouting_with_repeats_adds_up() {
        let scanner = ContentRiskScanner::default();
        let verdict =
            scanner.scan_heuristics(&text_item("THIS IS THE BEST ROOM EVER JOIN NOWWWWWWWWWWW"));

        assert!(verdict.reasons.contains(&RiskReason::ExcessiveCaps));
        assert!(verdict
            .reasons
            .iter()
            .any(|r| matches!(r, RiskReason::RepeatedCharacters { run } if *run > 8)));
        assert_eq!(verdict.risk, 4);
        assert!(verdict.should_flag);
    }

    #[test]
    fn test_link_farm() {
        let scanner = ContentRiskScanner::default();
        let verdict = scanner.scan_heuristics(&text_item(
            "a https://a.example b https://b.example c www.c.example d http://d.example",
        ));

        assert_eq!(verdict.reasons, vec![RiskReason::ExcessiveLinks { count: 4 }]);
        assert!(verdict.should_flag);
    }

    #[test]
    fn test_risk_is_capped() {
        let scanner = ContentRiskScanner::default();
        let mut item = text_item(
            "BUY NOW!!! FREE FOLLOWERS AAAAAAAAAAAA https://a.x https://b.x https://c.x https://d.x",
        );
        item.explicit = true;

        let verdict = scanner.scan_heuristics(&item);
        assert_eq!(verdict.risk, MAX_RISK);
        assert!(!verdict.hard_reject);
    }

    #[test]
    fn test_zero_length_audio_is_hard_reject() {
        let scanner = ContentRiskScanner::default();

        let verdict = scanner.scan_heuristics(&audio_item(0, 30.0));
        assert!(verdict.hard_reject);
        assert_eq!(verdict.risk, MAX_RISK);
        assert!(verdict.should_flag);

        let verdict = scanner.scan_heuristics(&audio_item(48_000, 0.0));
        assert!(verdict.hard_reject);
    }

    #[test]
    fn test_audio_bitrate_envelope() {
        let scanner = ContentRiskScanner::default();

        // 16 KB/s is a normal voice recording.
        let verdict = scanner.scan_heuristics(&audio_item(16_000 * 60, 60.0));
        assert!(verdict.reasons.is_empty());

        // 1 KB/s is suspicious but not impossible.
        let verdict = scanner.scan_heuristics(&audio_item(1_000 * 60, 60.0));
        assert_eq!(
            verdict.reasons,
            vec![RiskReason::AudioBitrateAnomaly { bytes_per_sec: 1_000 }]
        );
        assert!(verdict.should_flag);
        assert!(!verdict.hard_reject);

        // 10 MB in one second cannot be real audio.
        let verdict = scanner.scan_heuristics(&audio_item(10_000_000, 1.0));
        assert!(verdict.hard_reject);
    }

    #[tokio::test]
    async fn test_unlabelled_classifier_score_keeps_a_reason() {
        let scanner = ContentRiskScanner::default().with_classifier(Arc::new(FixedClassifier(Ok(
            ClassifierVerdict {
                risk: 8,
                labels: vec![],
            },
        ))));

        let verdict = scanner.scan(&text_item("Join us tonight for a chat about synths")).await;
        assert!(verdict.should_flag);
        assert_eq!(verdict.risk, 8);
        assert_eq!(verdict.reason_codes(), vec![format!("classifier:{}", UNLABELLED)]);

        // A label-less score that does not raise the risk adds nothing.
        let scanner = ContentRiskScanner::default().with_classifier(Arc::new(FixedClassifier(Ok(
            ClassifierVerdict {
                risk: 0,
                labels: vec![],
            },
        ))));
        let verdict = scanner.scan(&text_item("Join us tonight for a chat about synths")).await;
        assert!(verdict.reasons.is_empty());
        assert!(verdict.classifier_used);
    }

    #[tokio::test]
    async fn test_classifier_raises_risk() {
        let scanner = ContentRiskScanner::default().with_classifier(Arc::new(FixedClassifier(Ok(
            ClassifierVerdict {
                risk: 8,
                labels: vec!["harassment".to_string()],
            },
        ))));

        let verdict = scanner.scan(&text_item("you know what you did")).await;
        assert!(verdict.classifier_used);
        assert_eq!(verdict.risk, 8);
        assert!(verdict.should_flag);
        assert_eq!(verdict.reason_codes(), vec!["classifier:harassment".to_string()]);
    }

    #[tokio::test]
    async fn test_classifier_failure_keeps_heuristics() {
        let scanner = ContentRiskScanner::default()
            .with_classifier(Arc::new(FixedClassifier(Err("503".to_string()))));

        let verdict = scanner.scan(&text_item("click here to buy now")).await;
        assert!(!verdict.classifier_used);
        assert_eq!(verdict, scanner.scan_heuristics(&text_item("click here to buy now")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_classifier_timeout_falls_back() {
        let scanner = ContentRiskScanner::default().with_classifier(Arc::new(SlowClassifier));

        let verdict = scanner.scan(&text_item("hello there friends")).await;
        assert!(!verdict.classifier_used);
        assert_eq!(verdict.risk, 0);
    }
}
