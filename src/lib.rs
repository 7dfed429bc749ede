//! Convenience-store promotion crawler
//!
//! Crawls paginated promotion listings from several retail chains,
//! normalizes and classifies the products, deduplicates each batch and
//! synchronizes the result into a SQLite store using full-replace or
//! incremental-upsert semantics per source.

// Module declarations
pub mod application;
pub mod domain;
pub mod infrastructure;

use std::path::PathBuf;
use std::sync::Arc;

pub use application::{Orchestrator, RunReport, UnitReport};
pub use domain::error::SetupError;
pub use infrastructure::AppConfig;

use infrastructure::store::{ProductStore, SqliteProductStore};

/// Run one full crawl: load (or initialize) the configuration, open the
/// store and fan out all configured units.
///
/// Only setup failures surface as `Err`; per-unit failures are recorded in
/// the returned report.
pub async fn run(config_path: Option<PathBuf>) -> Result<RunReport, SetupError> {
    let path = config_path.unwrap_or_else(AppConfig::default_path);
    let config = AppConfig::load_or_init(&path).await?;

    infrastructure::logging::init_logging(&config.logging)
        .map_err(|e| SetupError::Logging {
            reason: e.to_string(),
        })?;

    let store = SqliteProductStore::connect(&config.database_url)
        .await
        .map_err(SetupError::StoreUnreachable)?;
    store.ping().await.map_err(SetupError::StoreUnreachable)?;

    let orchestrator = Orchestrator::new(Arc::new(config), Arc::new(store));
    let report = orchestrator.run().await;
    report.log_summary();
    Ok(report)
}
