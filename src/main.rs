// Composition root for the abuse-mitigation batch jobs.
//
// This file's job is to:
// 1. Load configuration
// 2. Open the database and run migrations
// 3. Initialize services (dependency injection)
// 4. Run every batch entry point once and log what it did
//
// Scheduling the passes is left to whatever invokes the binary (cron, a job
// runner, ...).

use abuse_guard::config::AppConfig;
use abuse_guard::core::audit::AuditService;
use abuse_guard::core::ban::{BanService, BanStore};
use abuse_guard::core::clock::{Clock, SystemClock};
use abuse_guard::core::moderation::ModerationService;
use abuse_guard::core::rate_limit::{RateLimitService, RateLimitTable};
use abuse_guard::core::scanner::{ContentRiskScanner, ScannerConfig};
use abuse_guard::infra::audit::SqliteAuditStore;
use abuse_guard::infra::ban::SqliteBanStore;
use abuse_guard::infra::classifier::HttpClassifier;
use abuse_guard::infra::content::JsonContentDirectory;
use abuse_guard::infra::moderation::SqliteFlagStore;
use abuse_guard::infra::notify::TracingNotifier;
use abuse_guard::infra::rate_limit::SqliteRateLimitStore;
use abuse_guard::infra::sqlite;
use anyhow::Context;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging so we can see what's happening
    tracing_subscriber::fmt::init();

    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    let config = AppConfig::from_env()?;
    tracing::info!(database = %config.database_url, "Starting abuse_guard pass");

    let pool = sqlite::connect(&config.database_url)
        .await
        .with_context(|| format!("Failed to open database at {}", config.database_url))?;

    let audit_store = Arc::new(SqliteAuditStore::new(pool.clone()));
    audit_store.migrate().await.context("Failed to migrate audit tables")?;
    let ban_store = Arc::new(SqliteBanStore::new(pool.clone()));
    ban_store.migrate().await.context("Failed to migrate ban tables")?;
    let flag_store = SqliteFlagStore::new(pool.clone());
    flag_store.migrate().await.context("Failed to migrate flag tables")?;
    let rate_limit_store = SqliteRateLimitStore::new(pool);
    rate_limit_store
        .migrate()
        .await
        .context("Failed to migrate rate-limit tables")?;

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let content = Arc::new(
        JsonContentDirectory::open(&config.content_file)
            .with_context(|| format!("Failed to load content file {}", config.content_file))?,
    );

    let bans = Arc::new(
        BanService::new(ban_store.clone(), audit_store.clone(), clock.clone())
            .with_notifier(Arc::new(TracingNotifier)),
    );
    let audit = Arc::new(
        AuditService::new(audit_store, clock.clone()).with_violation_handler(bans.clone()),
    );

    let mut scanner = ContentRiskScanner::new(ScannerConfig {
        classifier_timeout: config.classifier_timeout,
        ..ScannerConfig::default()
    });
    if let Some(url) = &config.classifier_url {
        let classifier = HttpClassifier::new(
            url.clone(),
            config.classifier_api_key.clone(),
            config.classifier_timeout,
        )?;
        scanner = scanner.with_classifier(Arc::new(classifier));
        tracing::info!(url = %url, "Remote classifier enabled");
    }

    let ban_reader: Arc<dyn BanStore> = ban_store;
    let moderation = ModerationService::new(
        flag_store,
        content.clone(),
        ban_reader,
        scanner,
        audit.clone(),
        clock.clone(),
    );

    let table = match &config.rate_limit_table {
        Some(path) => RateLimitTable::from_json_file(path)
            .with_context(|| format!("Failed to load rate-limit table {}", path))?,
        None => RateLimitTable::default(),
    };
    let rate_limits = RateLimitService::new(rate_limit_store, table)
        .with_audit(audit.clone())
        .with_accounts(content);

    // ========================================================================
    // BATCH PASS
    // ========================================================================
    // Each step logs and carries on if it fails so one broken store does not
    // starve the rest.

    match moderation.scan_batch(config.scan_batch_limit).await {
        Ok(summary) => tracing::info!(?summary, "Content scan finished"),
        Err(e) => tracing::error!("Content scan failed: {}", e),
    }

    match moderation.run_queue_automation().await {
        Ok(summary) => tracing::info!(?summary, "Queue automation finished"),
        Err(e) => tracing::error!("Queue automation failed: {}", e),
    }

    match bans.auto_ban_sweep(config.ban_sweep_limit).await {
        Ok(summary) => tracing::info!(?summary, "Auto-ban sweep finished"),
        Err(e) => tracing::error!("Auto-ban sweep failed: {}", e),
    }

    match audit.purge_expired().await {
        Ok(purged) => tracing::info!(purged, "Audit retention applied"),
        Err(e) => tracing::error!("Audit purge failed: {}", e),
    }

    match moderation.purge_resolved().await {
        Ok(purged) => tracing::info!(purged, "Resolved flags purged"),
        Err(e) => tracing::error!("Flag purge failed: {}", e),
    }

    match rate_limits.purge_events(clock.now()).await {
        Ok(purged) => tracing::info!(purged, "Rate-limit events purged"),
        Err(e) => tracing::error!("Rate-limit purge failed: {}", e),
    }

    Ok(())
}
