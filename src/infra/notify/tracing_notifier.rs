// Notifier that writes notices to the log. Delivery to users belongs to an
// external dispatcher; this keeps the notices visible until one is wired in.

use crate::core::collaborators::{Notice, Notifier};
use async_trait::async_trait;
use std::error::Error;

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, notice: Notice) -> Result<(), Box<dyn Error + Send + Sync>> {
        match notice {
            Notice::BanIssued {
                profile_id,
                until,
                reason,
            } => {
                tracing::info!(profile_id = %profile_id, until = ?until, reason = %reason, "Notice: ban issued");
            }
            Notice::BanLifted { profile_id } => {
                tracing::info!(profile_id = %profile_id, "Notice: ban lifted");
            }
        }
        Ok(())
    }
}
