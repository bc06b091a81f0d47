//! Storage Bootstrap
//!
//! Applies the configured [`InitLevel`] to a store. For a given database the
//! work is done once per process, however many engines open it.

use std::collections::HashSet;

use chrono::{Duration, Utc};
use log::{info, warn};
use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::component::ComponentRegistry;
use crate::config::{EngineConfig, InitLevel};
use crate::error::{EngineError, Result};
use crate::store::Store;

/// Databases already bootstrapped by this process.
static BOOTSTRAPPED: Lazy<Mutex<HashSet<String>>> = Lazy::new(|| Mutex::new(HashSet::new()));

/// Creates the schema and loads seed data as the init level asks.
///
/// Returns `false` when this database was already bootstrapped.
pub fn bootstrap(
    config: &EngineConfig,
    store: &dyn Store,
    components: &ComponentRegistry,
) -> Result<bool> {
    if config.init_level == InitLevel::Skip {
        return Ok(false);
    }

    let key = config.data_source.bootstrap_key();
    let mut done = BOOTSTRAPPED.lock();
    if let Some(key) = &key {
        if done.contains(key) {
            return Ok(false);
        }
    }

    let infrastructure = |e: crate::error::StoreError| {
        EngineError::Infrastructure(format!("Schema bootstrap failed: {}", e))
    };

    if config.init_level == InitLevel::CreateAndSeed {
        store.create_schema().map_err(infrastructure)?;
        info!("Schema created");
    }
    store
        .load_seed_data(&components.definitions())
        .map_err(infrastructure)?;
    info!("Seed data loaded ({} components)", components.len());

    if let Some(key) = key {
        done.insert(key);
    }
    Ok(true)
}

/// Deletes executions older than the configured retention.
pub fn purge_expired(config: &EngineConfig, store: &dyn Store) {
    if config.data_reserve_days == 0 {
        return;
    }

    let cutoff = Utc::now() - Duration::days(i64::from(config.data_reserve_days));
    match store.purge_executions_before(cutoff) {
        Ok(0) => {}
        Ok(count) => info!(
            "Purged {} executions older than {} days",
            count, config.data_reserve_days
        ),
        Err(e) => warn!("Failed to purge old executions: {}", e),
    }
}
