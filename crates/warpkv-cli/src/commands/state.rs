//! `warpkv` subcommands. Each returns the JSON text to print.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde_json::json;
use tracing::info;
use warpgrid_kvstate::{
    Concurrency, Deadline, DeleteRequest, SetRequest, StateStore, StoreMetadata,
    TransactionalOperation,
};

/// Build store settings from `--config` or `--connection-string`.
///
/// One-shot invocations never run the background sweeper; `warpkv sweep`
/// does the same work on demand.
pub fn load_metadata(
    config: Option<&Path>,
    connection_string: Option<&str>,
    table: Option<&str>,
) -> Result<StoreMetadata> {
    let metadata = match (config, connection_string) {
        (Some(_), Some(_)) => bail!("--config and --connection-string are mutually exclusive"),
        (Some(path), None) => StoreMetadata::from_file(path)?,
        (None, Some(dsn)) => {
            let props = HashMap::from([("connectionString".to_string(), dsn.to_string())]);
            StoreMetadata::from_properties(&props)?
        }
        (None, None) => bail!("one of --config or --connection-string is required"),
    };

    let metadata = match table {
        Some(name) => metadata.with_table_name(name)?,
        None => metadata,
    };
    Ok(metadata.without_sweeper())
}

pub async fn get(store: &StateStore, key: &str) -> Result<String> {
    let record = store.get(key, Deadline::none()).await?;
    Ok(serde_json::to_string_pretty(&record)?)
}

pub async fn set(
    store: &StateStore,
    key: &str,
    value: &str,
    etag: Option<String>,
    ttl_secs: Option<u64>,
    first_write: bool,
) -> Result<String> {
    let mut req = SetRequest::new(key, value);
    if let Some(etag) = etag {
        req = req.with_etag(etag);
    }
    if let Some(secs) = ttl_secs {
        req = req.with_ttl(Duration::from_secs(secs));
    }
    if first_write {
        req = req.with_concurrency(Concurrency::FirstWrite);
    }
    store.set(&req, Deadline::none()).await?;

    let etag = store
        .get(key, Deadline::none())
        .await?
        .map(|record| record.etag);
    Ok(json!({ "key": key, "etag": etag }).to_string())
}

pub async fn delete(store: &StateStore, key: &str, etag: Option<String>) -> Result<String> {
    let mut req = DeleteRequest::new(key);
    if let Some(etag) = etag {
        req = req.with_etag(etag);
    }
    store.delete(&req, Deadline::none()).await?;
    Ok(json!({ "key": key, "deleted": true }).to_string())
}

pub async fn multi(store: &StateStore, file: &Path) -> Result<String> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let ops: Vec<TransactionalOperation> = serde_json::from_str(&content)
        .with_context(|| format!("parsing operations from {}", file.display()))?;

    store.execute_multi(&ops, Deadline::none()).await?;
    info!(operations = ops.len(), "transaction committed");
    Ok(json!({ "applied": ops.len() }).to_string())
}

pub async fn sweep(store: &StateStore) -> Result<String> {
    let removed = store.sweep_expired(Deadline::none()).await?;
    Ok(json!({ "removed": removed }).to_string())
}

pub async fn ping(store: &StateStore) -> Result<String> {
    store.ping(Deadline::none()).await?;
    Ok(json!({ "ok": true, "features": store.features() }).to_string())
}
