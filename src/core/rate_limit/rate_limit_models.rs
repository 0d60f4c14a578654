// Rate-limit domain models.
//
// Every action is described by one `ActionLimit` row in a table that is loaded
// once. Counts are always trailing-window aggregates over append-only events,
// so there is no counter to reset.

use crate::core::context::KeyScope;
use crate::core::store_error::StoreError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// One completed action by one subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitEvent {
    pub subject_key: String,
    pub action: String,
    pub timestamp: DateTime<Utc>,
}

/// A rolling-window cap: at most `max_count` events in `window_secs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowLimit {
    pub window_secs: u64,
    pub max_count: u32,
}

impl WindowLimit {
    pub fn new(window_secs: u64, max_count: u32) -> Self {
        Self {
            window_secs,
            max_count,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::seconds(self.window_secs as i64)
    }
}

/// All thresholds for one action. Every threshold that is set must pass.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionLimit {
    pub key_scope: KeyScope,
    /// Minimum gap between two events, 0 to disable.
    pub cooldown_secs: u64,
    pub windows: Vec<WindowLimit>,
    /// Cap on resources held at once (e.g. one open room).
    pub max_concurrent: Option<u32>,
    /// Accounts younger than this are denied.
    pub min_account_age_secs: Option<u64>,
    /// Deny instead of allow when the store is unavailable. Set for identity
    /// and account-creation checks.
    pub fail_closed: bool,
}

impl ActionLimit {
    pub fn cooldown(&self) -> Duration {
        Duration::seconds(self.cooldown_secs as i64)
    }

    /// The widest window, used to fetch events once for every window check.
    pub fn max_window(&self) -> Option<Duration> {
        self.windows.iter().map(WindowLimit::window).max()
    }
}

/// Declarative `action -> limits` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitTable {
    actions: HashMap<String, ActionLimit>,
}

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

impl RateLimitTable {
    pub fn empty() -> Self {
        Self {
            actions: HashMap::new(),
        }
    }

    pub fn get(&self, action: &str) -> Option<&ActionLimit> {
        self.actions.get(action)
    }

    pub fn insert(&mut self, action: impl Into<String>, limit: ActionLimit) {
        self.actions.insert(action.into(), limit);
    }

    pub fn actions(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }

    /// Parse a JSON object of `action -> ActionLimit`, layered over the
    /// built-in defaults so a file only needs the actions it changes.
    pub fn from_json_str(json: &str) -> Result<Self, StoreError> {
        let overrides: HashMap<String, ActionLimit> = serde_json::from_str(json)?;
        let mut table = Self::default();
        for (action, limit) in overrides {
            if limit.windows.iter().any(|w| w.window_secs == 0) {
                return Err(StoreError::Corrupt(format!(
                    "action {} has a zero-length window",
                    action
                )));
            }
            table.insert(action, limit);
        }
        Ok(table)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }
}

impl Default for RateLimitTable {
    fn default() -> Self {
        let mut table = Self::empty();

        // Account creation is keyed by IP and fails closed.
        table.insert(
            "signup",
            ActionLimit {
                key_scope: KeyScope::Ip,
                cooldown_secs: MINUTE,
                windows: vec![WindowLimit::new(HOUR, 3), WindowLimit::new(DAY, 5)],
                fail_closed: true,
                ..Default::default()
            },
        );
        table.insert(
            "create_community",
            ActionLimit {
                cooldown_secs: 5 * MINUTE,
                windows: vec![WindowLimit::new(HOUR, 2), WindowLimit::new(DAY, 5)],
                min_account_age_secs: Some(DAY),
                ..Default::default()
            },
        );
        table.insert(
            "create_room",
            ActionLimit {
                cooldown_secs: MINUTE,
                windows: vec![WindowLimit::new(HOUR, 10)],
                max_concurrent: Some(1),
                ..Default::default()
            },
        );
        table.insert(
            "follow",
            ActionLimit {
                cooldown_secs: 1,
                windows: vec![WindowLimit::new(HOUR, 100), WindowLimit::new(DAY, 500)],
                ..Default::default()
            },
        );
        table.insert(
            "schedule_post",
            ActionLimit {
                cooldown_secs: 30,
                windows: vec![WindowLimit::new(HOUR, 10), WindowLimit::new(DAY, 50)],
                ..Default::default()
            },
        );
        table.insert(
            "execute_query",
            ActionLimit {
                windows: vec![WindowLimit::new(MINUTE, 30), WindowLimit::new(HOUR, 600)],
                ..Default::default()
            },
        );
        table.insert(
            "report_content",
            ActionLimit {
                cooldown_secs: 10,
                windows: vec![WindowLimit::new(HOUR, 20), WindowLimit::new(DAY, 100)],
                ..Default::default()
            },
        );

        table
    }
}

/// Why a check was denied.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Denial {
    Cooldown { cooldown_secs: u64 },
    Window { window_secs: u64, max_count: u32, count: u32 },
    Concurrent { max_concurrent: u32, active: u32 },
    AccountTooNew { min_account_age_secs: u64 },
    StoreUnavailable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// How long until a retry could pass. `None` when allowed, or when the
    /// wait depends on something other than time (e.g. releasing a room).
    pub retry_after: Option<Duration>,
    pub denials: Vec<Denial>,
}

impl RateLimitDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            retry_after: None,
            denials: Vec::new(),
        }
    }

    pub fn deny(denials: Vec<Denial>, retry_after: Option<Duration>) -> Self {
        Self {
            allowed: false,
            retry_after,
            denials,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Length of the fixed window used by weighted budgets.
    pub weighted_window_secs: u64,
    /// How long raw events are kept.
    pub event_retention: Duration,
    /// Denials per hour that count as abuse and emit an error-level event.
    pub abuse_denials_per_hour: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            weighted_window_secs: 60,
            event_retention: Duration::days(30),
            abuse_denials_per_hour: 10,
        }
    }
}
