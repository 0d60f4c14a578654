// Moderation domain models - flags, their lifecycle and visibility decisions.
//
// A flag moves pending -> in_review -> resolved, or straight from pending to
// resolved. Resolved is terminal.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type FlagId = i64;

/// Priority ceiling for the review queue.
pub const MAX_PRIORITY: u8 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagState {
    Pending,
    InReview,
    Resolved,
}

impl FlagState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlagState::Pending => "pending",
            FlagState::InReview => "in_review",
            FlagState::Resolved => "resolved",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(FlagState::Pending),
            "in_review" => Some(FlagState::InReview),
            "resolved" => Some(FlagState::Resolved),
            _ => None,
        }
    }

    pub fn is_open(&self) -> bool {
        !matches!(self, FlagState::Resolved)
    }
}

impl fmt::Display for FlagState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Who raised a flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagSource {
    /// The content scanner.
    Scanner,
    /// A user report.
    UserReport,
    /// A moderator raised it by hand.
    Moderator,
}

impl FlagSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlagSource::Scanner => "scanner",
            FlagSource::UserReport => "user_report",
            FlagSource::Moderator => "moderator",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "scanner" => Some(FlagSource::Scanner),
            "user_report" => Some(FlagSource::UserReport),
            "moderator" => Some(FlagSource::Moderator),
            _ => None,
        }
    }

    /// Automated sources dedupe per content; people dedupe per reporter.
    pub fn is_automated(&self) -> bool {
        matches!(self, FlagSource::Scanner)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModerationFlag {
    pub id: FlagId,
    pub content_ref: String,
    pub reasons: Vec<String>,
    /// 0..=10
    pub risk: u8,
    pub source: FlagSource,
    /// Set for user reports and moderator flags.
    pub reporter_id: Option<String>,
    /// 0..=100
    pub priority: u8,
    pub state: FlagState,
    pub created_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub reviewer_id: Option<String>,
    pub notes: Vec<String>,
}

/// A flag before the store assigns its id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewFlag {
    pub content_ref: String,
    pub reasons: Vec<String>,
    pub risk: u8,
    pub source: FlagSource,
    pub reporter_id: Option<String>,
    pub priority: u8,
    pub created_at: DateTime<Utc>,
}

/// Initial queue priority for a risk score.
pub fn priority_for_risk(risk: u8) -> u8 {
    (risk as u16 * 10).min(MAX_PRIORITY as u16) as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionOutcome {
    /// Nothing wrong with the content.
    Dismissed,
    /// The content violated policy and action was taken.
    ActionTaken,
}

impl ResolutionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionOutcome::Dismissed => "dismissed",
            ResolutionOutcome::ActionTaken => "action_taken",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanBatchSummary {
    pub scanned: usize,
    pub flagged: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueAutomationSummary {
    pub processed: usize,
    pub auto_resolved: usize,
    pub escalated: usize,
    pub errors: usize,
}

/// Why content is hidden, highest precedence first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HideReason {
    AuthorBanned,
    HighRiskFlag { risk: u8 },
    ContentHidden,
    ReportThreshold { open_reports: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VisibilityDecision {
    pub should_hide: bool,
    pub reason: Option<HideReason>,
}

impl VisibilityDecision {
    pub fn visible() -> Self {
        Self {
            should_hide: false,
            reason: None,
        }
    }

    pub fn hidden(reason: HideReason) -> Self {
        Self {
            should_hide: true,
            reason: Some(reason),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModerationConfig {
    /// Items scanned longer ago than this are scanned again.
    pub staleness: Duration,
    /// Pending flags below this risk may auto-resolve...
    pub auto_resolve_max_risk: u8,
    /// ...once they are at least this old.
    pub auto_resolve_min_age: Duration,
    /// Pending flags at or above this risk escalate...
    pub escalate_min_risk: u8,
    /// ...once they are at least this old.
    pub escalate_min_age: Duration,
    pub escalate_step: u8,
    /// Cap on each automation pass per run.
    pub automation_batch: usize,
    /// An open flag at or above this risk hides content.
    pub hide_min_risk: u8,
    /// This many open user reports hide content.
    pub hide_min_open_reports: usize,
    /// Risk given to a user report.
    pub user_report_risk: u8,
    /// How long resolved flags are kept.
    pub resolved_retention: Duration,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            staleness: Duration::hours(24),
            auto_resolve_max_risk: 3,
            auto_resolve_min_age: Duration::days(7),
            escalate_min_risk: 7,
            escalate_min_age: Duration::hours(12),
            escalate_step: 20,
            automation_batch: 50,
            hide_min_risk: 7,
            hide_min_open_reports: 3,
            user_report_risk: 2,
            resolved_retention: Duration::days(180),
        }
    }
}
