// Ban domain models.
//
// A profile has at most one ban record. History rows are immutable except for
// `lifted_at`, which is filled in exactly once when the ban ends.

use crate::core::audit::Severity;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type BanHistoryId = i64;

/// Current ban state of a profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BanRecord {
    pub profile_id: String,
    pub is_banned: bool,
    pub banned_at: Option<DateTime<Utc>>,
    /// `None` while banned means permanent.
    pub banned_until: Option<DateTime<Utc>>,
    pub reason: Option<String>,
    /// Number of bans ever applied to this profile.
    pub ban_count: u32,
}

impl BanRecord {
    pub fn unbanned(profile_id: impl Into<String>) -> Self {
        Self {
            profile_id: profile_id.into(),
            is_banned: false,
            banned_at: None,
            banned_until: None,
            reason: None,
            ban_count: 0,
        }
    }

    /// Whether the ban is in force at `now`. Pure; never clears anything.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.is_banned && self.banned_until.map_or(true, |until| now < until)
    }

    /// A temporary ban whose end has passed but which nobody has cleared yet.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.is_banned && self.banned_until.map_or(false, |until| now >= until)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BanHistoryKind {
    TemporaryBan,
    PermanentBan,
    Unban,
}

impl BanHistoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BanHistoryKind::TemporaryBan => "temporary_ban",
            BanHistoryKind::PermanentBan => "permanent_ban",
            BanHistoryKind::Unban => "unban",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "temporary_ban" => Some(BanHistoryKind::TemporaryBan),
            "permanent_ban" => Some(BanHistoryKind::PermanentBan),
            "unban" => Some(BanHistoryKind::Unban),
            _ => None,
        }
    }

    /// Ban rows get a `lifted_at`; unban rows never do.
    pub fn is_ban(&self) -> bool {
        !matches!(self, BanHistoryKind::Unban)
    }

    pub fn for_duration(duration_hours: Option<i64>) -> Self {
        match duration_hours {
            Some(_) => BanHistoryKind::TemporaryBan,
            None => BanHistoryKind::PermanentBan,
        }
    }
}

impl fmt::Display for BanHistoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BanHistoryEntry {
    pub id: BanHistoryId,
    pub profile_id: String,
    pub kind: BanHistoryKind,
    pub reason: String,
    pub duration_hours: Option<i64>,
    /// `None` for automated bans.
    pub issuer_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub lifted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewBanHistory {
    pub profile_id: String,
    pub kind: BanHistoryKind,
    pub reason: String,
    pub duration_hours: Option<i64>,
    pub issuer_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One rung of the ban ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LadderRule {
    pub name: String,
    pub window_hours: i64,
    /// Inclusive: `count >= min_events` matches.
    pub min_events: u64,
    pub severities: Vec<Severity>,
    /// `None` means permanent.
    pub duration_hours: Option<i64>,
}

impl LadderRule {
    pub fn window(&self) -> Duration {
        Duration::hours(self.window_hours)
    }
}

/// Ladder rules, most severe first. The first matching rule wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanPolicy {
    pub rules: Vec<LadderRule>,
}

impl BanPolicy {
    /// Widest window any rule looks at.
    pub fn max_window(&self) -> Duration {
        self.rules
            .iter()
            .map(LadderRule::window)
            .max()
            .unwrap_or_else(Duration::zero)
    }
}

impl Default for BanPolicy {
    fn default() -> Self {
        let serious = vec![Severity::Error, Severity::Critical];
        Self {
            rules: vec![
                LadderRule {
                    name: "weekly_critical".to_string(),
                    window_hours: 24 * 7,
                    min_events: 100,
                    severities: serious.clone(),
                    duration_hours: None,
                },
                LadderRule {
                    name: "weekly_severe".to_string(),
                    window_hours: 24 * 7,
                    min_events: 50,
                    severities: serious.clone(),
                    duration_hours: Some(168),
                },
                LadderRule {
                    name: "daily_violations".to_string(),
                    window_hours: 24,
                    min_events: 10,
                    severities: serious,
                    duration_hours: Some(24),
                },
            ],
        }
    }
}

/// Result of an automatic threshold evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum AutoBanOutcome {
    /// No ladder rule matched.
    NoAction,
    /// Someone else (or an earlier event) already banned the profile.
    AlreadyBanned,
    Banned {
        rule: String,
        until: Option<DateTime<Utc>>,
        violations: u64,
    },
}

impl AutoBanOutcome {
    /// True when the profile is banned after the evaluation.
    pub fn is_banned(&self) -> bool {
        !matches!(self, AutoBanOutcome::NoAction)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UnbanOutcome {
    Lifted,
    NotBanned,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BanSweepSummary {
    pub evaluated: usize,
    pub banned: usize,
    pub errors: usize,
}
