// Ports for the systems this core only talks to: the content store, the
// identity store and the notification dispatcher.
//
// The core references content and profiles by opaque id and never edits their
// business fields. The only write is `mark_checked`, a derived scan timestamp.

use super::store_error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::error::Error;

// ============================================================================
// CONTENT
// ============================================================================

/// Publication status as reported by the content store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentStatus {
    #[default]
    Published,
    /// Hidden by the owner or an admin outside this core.
    Hidden,
    Removed,
}

impl ContentStatus {
    /// Hard-hidden content is never shown, whatever the flags say.
    pub fn is_hard_hidden(&self) -> bool {
        matches!(self, ContentStatus::Hidden | ContentStatus::Removed)
    }
}

/// Uploaded audio attached to a piece of content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioInfo {
    pub byte_size: u64,
    /// Duration claimed by the uploader.
    pub duration_secs: f64,
}

/// The slice of a content record the scanner and visibility checks need.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    pub content_ref: String,
    #[serde(default)]
    pub author_id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    /// Author-declared explicit rating.
    #[serde(default)]
    pub explicit: bool,
    #[serde(default)]
    pub audio: Option<AudioInfo>,
    #[serde(default)]
    pub status: ContentStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_checked: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait ContentDirectory: Send + Sync {
    /// Items never scanned, or last scanned before `stale_before`,
    /// most recently created first.
    async fn scan_candidates(
        &self,
        stale_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ContentItem>, StoreError>;

    async fn get(&self, content_ref: &str) -> Result<Option<ContentItem>, StoreError>;

    /// Record that the scanner looked at this item.
    async fn mark_checked(&self, content_ref: &str, at: DateTime<Utc>) -> Result<(), StoreError>;
}

// ============================================================================
// IDENTITY
// ============================================================================

#[async_trait]
pub trait AccountDirectory: Send + Sync {
    /// When the account was created, or `None` if it is unknown.
    async fn created_at(&self, subject_id: &str) -> Result<Option<DateTime<Utc>>, StoreError>;
}

// ============================================================================
// NOTIFICATIONS
// ============================================================================

/// Something a user (or the moderation team) should hear about.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    BanIssued {
        profile_id: String,
        until: Option<DateTime<Utc>>,
        reason: String,
    },
    BanLifted {
        profile_id: String,
    },
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notice: Notice) -> Result<(), Box<dyn Error + Send + Sync>>;
}
