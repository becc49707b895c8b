//! One-shot maintenance commands.

use anyhow::{Context, Result};
use mirror_index::SyncOutcome;
use mirror_metadata::MetadataStore;
use serde_json::json;
use tracing::info;

use crate::config::Config;
use crate::server::{build_coordinator, build_syncer};

/// One sync pass, optionally followed by a prefetch of every pending artifact.
pub async fn run_sync(config: &Config, prefetch: bool, concurrency: usize) -> Result<()> {
    let coordinator = build_coordinator(config).await?;
    let syncer = build_syncer(config, coordinator.metadata().clone());

    let outcome = syncer.sync_once().await.context("Index sync failed")?;
    if let SyncOutcome::Completed(report) = &outcome {
        println!("{}", serde_json::to_string_pretty(report)?);
    }

    if prefetch {
        let report = coordinator
            .prefetch_pending(concurrency)
            .await
            .context("Prefetch failed")?;
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    coordinator.metadata().close().await;
    Ok(())
}

pub async fn run_reconcile(config: &Config) -> Result<()> {
    let coordinator = build_coordinator(config).await?;
    let marked = coordinator
        .reconcile()
        .await
        .context("Reconcile failed")?;
    info!(marked, "Reconcile complete");
    println!("Marked {marked} cached artifacts as downloaded");

    coordinator.metadata().close().await;
    Ok(())
}

pub async fn run_status(config: &Config) -> Result<()> {
    let metadata = MetadataStore::open(&config.storage.db_path)
        .await
        .with_context(|| {
            format!(
                "Failed to open metadata store at {}",
                config.storage.db_path.display()
            )
        })?;
    let stats = metadata.stats().await?;
    let last_commit = metadata.last_applied_commit().await?;

    let status = json!({
        "db_path": config.storage.db_path,
        "cache_root": config.storage.cache_root,
        "total": stats.total,
        "downloaded": stats.downloaded,
        "yanked": stats.yanked,
        "forbidden": stats.forbidden,
        "last_commit": last_commit,
    });
    println!("{}", serde_json::to_string_pretty(&status)?);

    metadata.close().await;
    Ok(())
}
