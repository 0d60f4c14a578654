// Audit domain models.
//
// Audit events are append-only and immutable. They are the only input the ban
// ladder counts, so the event types the ban engine writes about itself are
// listed here and excluded from that count.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type AuditEventId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "info" => Some(Severity::Info),
            "warning" => Some(Severity::Warning),
            "error" => Some(Severity::Error),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }

    /// Error and critical events make the ban engine re-evaluate the subject.
    pub fn triggers_ban_check(&self) -> bool {
        matches!(self, Severity::Error | Severity::Critical)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Well-known event types written by this crate.
pub mod event_types {
    pub const RATE_LIMIT_DENIED: &str = "rate_limit_denied";
    pub const RATE_LIMIT_ABUSE: &str = "rate_limit_abuse";

    pub const FLAG_CREATED: &str = "flag_created";
    pub const FLAG_DEDUPLICATED: &str = "flag_deduplicated";
    pub const FLAG_CLAIMED: &str = "flag_claimed";
    pub const FLAG_RESOLVED: &str = "flag_resolved";
    pub const FLAG_AUTO_RESOLVED: &str = "flag_auto_resolved";
    pub const FLAG_ESCALATED: &str = "flag_escalated";
    pub const FLAG_AUTOMATION_SKIPPED: &str = "flag_automation_skipped";
    pub const CONTENT_FLAGGED: &str = "content_flagged";
    pub const CONTENT_VIOLATION_CONFIRMED: &str = "content_violation_confirmed";

    pub const BAN_ISSUED: &str = "ban_issued";
    pub const BAN_SKIPPED: &str = "ban_skipped";
    pub const BAN_LIFTED: &str = "ban_lifted";
    pub const BAN_EXPIRED: &str = "ban_expired";
    pub const UNBAN_SKIPPED: &str = "unban_skipped";

    /// Escalation and ban-issuance bookkeeping. Counting these would let a ban
    /// feed the next, longer ban.
    pub const NON_COUNTING: &[&str] = &[
        FLAG_ESCALATED,
        BAN_ISSUED,
        BAN_SKIPPED,
        BAN_LIFTED,
        BAN_EXPIRED,
        UNBAN_SKIPPED,
    ];

    pub fn counts_toward_bans(event_type: &str) -> bool {
        !NON_COUNTING.contains(&event_type)
    }
}

/// A stored audit row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: AuditEventId,
    pub subject_id: String,
    pub event_type: String,
    pub severity: Severity,
    pub details: serde_json::Value,
    pub ip: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// An audit row before the store assigns its id.
#[derive(Debug, Clone)]
pub struct NewAuditEvent {
    pub subject_id: String,
    pub event_type: String,
    pub severity: Severity,
    pub details: serde_json::Value,
    pub ip: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// What to count when aggregating a subject's history.
#[derive(Debug, Clone)]
pub struct ViolationQuery<'a> {
    pub subject_id: &'a str,
    pub since: DateTime<Utc>,
    pub severities: &'a [Severity],
    pub excluded_types: &'a [&'a str],
}

/// How long each severity is kept. `None` keeps it forever.
#[derive(Debug, Clone)]
pub struct AuditRetention {
    pub info: Option<Duration>,
    pub warning: Option<Duration>,
    pub error: Option<Duration>,
    pub critical: Option<Duration>,
}

impl AuditRetention {
    pub fn for_severity(&self, severity: Severity) -> Option<Duration> {
        match severity {
            Severity::Info => self.info,
            Severity::Warning => self.warning,
            Severity::Error => self.error,
            Severity::Critical => self.critical,
        }
    }
}

impl Default for AuditRetention {
    fn default() -> Self {
        Self {
            info: Some(Duration::days(90)),
            warning: Some(Duration::days(90)),
            error: Some(Duration::days(365)),
            critical: None,
        }
    }
}
