// Process-level settings read from the environment (`.env` is loaded first by
// `main`). Domain policies keep their own `Default` impls; this only covers
// where things live and how big each batch pass is.

use anyhow::{Context, Result};
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_DATABASE_URL: &str = "data/abuse_guard.db";
const DEFAULT_CONTENT_FILE: &str = "data/content.json";
const DEFAULT_CLASSIFIER_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_SCAN_BATCH_LIMIT: usize = 200;
const DEFAULT_BAN_SWEEP_LIMIT: usize = 500;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub content_file: String,
    /// JSON overrides for the built-in rate-limit table. Built-ins only when unset.
    pub rate_limit_table: Option<String>,
    /// Remote classifier endpoint. Heuristics only when unset.
    pub classifier_url: Option<String>,
    pub classifier_api_key: Option<String>,
    pub classifier_timeout: Duration,
    pub scan_batch_limit: usize,
    pub ban_sweep_limit: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
            content_file: std::env::var("CONTENT_FILE")
                .unwrap_or_else(|_| DEFAULT_CONTENT_FILE.to_string()),
            rate_limit_table: non_empty_var("RATE_LIMIT_TABLE"),
            classifier_url: non_empty_var("CLASSIFIER_URL"),
            classifier_api_key: non_empty_var("CLASSIFIER_API_KEY"),
            classifier_timeout: Duration::from_millis(parse_var(
                "CLASSIFIER_TIMEOUT_MS",
                DEFAULT_CLASSIFIER_TIMEOUT_MS,
            )?),
            scan_batch_limit: parse_var("SCAN_BATCH_LIMIT", DEFAULT_SCAN_BATCH_LIMIT)?,
            ban_sweep_limit: parse_var("BAN_SWEEP_LIMIT", DEFAULT_BAN_SWEEP_LIMIT)?,
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Missing means default; present but unparsable is an error.
fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match non_empty_var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a number, got {:?}", name, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_var_defaults_and_errors() {
        std::env::set_var("ABUSE_GUARD_TEST_LIMIT", "42");
        assert_eq!(parse_var("ABUSE_GUARD_TEST_LIMIT", 7usize).unwrap(), 42);

        std::env::set_var("ABUSE_GUARD_TEST_LIMIT", "lots");
        assert!(parse_var("ABUSE_GUARD_TEST_LIMIT", 7usize).is_err());

        std::env::remove_var("ABUSE_GUARD_TEST_LIMIT");
        assert_eq!(parse_var("ABUSE_GUARD_TEST_LIMIT", 7usize).unwrap(), 7);
    }

    #[test]
    fn test_blank_var_counts_as_unset() {
        std::env::set_var("ABUSE_GUARD_TEST_URL", "   ");
        assert_eq!(non_empty_var("ABUSE_GUARD_TEST_URL"), None);
        std::env::remove_var("ABUSE_GUARD_TEST_URL");
    }
}
