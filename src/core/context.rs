// Explicit "who is calling" information, threaded through every entry point
// instead of living in ambient per-request state.

use serde::{Deserialize, Serialize};

/// Subject id used for sweeps and other scheduler-driven calls.
pub const SYSTEM_SUBJECT: &str = "system";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Account or profile id of the caller.
    pub subject_id: String,
    pub ip: Option<String>,
    pub device_id: Option<String>,
}

/// Which part of the caller a rate limit is keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyScope {
    #[default]
    Subject,
    Ip,
    Device,
}

impl KeyScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyScope::Subject => "subject",
            KeyScope::Ip => "ip",
            KeyScope::Device => "device",
        }
    }
}

impl RequestContext {
    pub fn new(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            ip: None,
            device_id: None,
        }
    }

    pub fn system() -> Self {
        Self::new(SYSTEM_SUBJECT)
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    /// Build the rate-limit key for the given scope, e.g. `ip:10.0.0.1`.
    ///
    /// Returns `None` when the context lacks that component (or it is blank).
    pub fn subject_key(&self, scope: KeyScope) -> Option<String> {
        let value = match scope {
            KeyScope::Subject => Some(self.subject_id.as_str()),
            KeyScope::Ip => self.ip.as_deref(),
            KeyScope::Device => self.device_id.as_deref(),
        }?;

        let value = value.trim();
        if value.is_empty() {
            None
        } else {
            Some(format!("{}:{}", scope.as_str(), value))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_key_per_scope() {
        let ctx = RequestContext::new("user-1").with_ip("10.0.0.1");

        assert_eq!(ctx.subject_key(KeyScope::Subject).as_deref(), Some("subject:user-1"));
        assert_eq!(ctx.subject_key(KeyScope::Ip).as_deref(), Some("ip:10.0.0.1"));
        assert_eq!(ctx.subject_key(KeyScope::Device), None);
    }

    #[test]
    fn test_blank_subject_has_no_key() {
        let ctx = RequestContext::new("   ");
        assert_eq!(ctx.subject_key(KeyScope::Subject), None);
    }
}
