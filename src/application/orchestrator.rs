//! Crawl orchestrator
//!
//! Iterates the configured sources and their units, running the
//! auth → fetch → dedupe → sync pipeline per unit on a bounded worker
//! pool. Per-unit failures are recorded and never abort sibling units; an
//! auth failure fails every unit of that source. A per-run deadline
//! cancels outstanding units through a shared `CancellationToken`.
//!
//! Units of different sources share no mutable state beyond the immutable
//! rule table and the store, and their write key spaces are disjoint, so
//! concurrent units do not race.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::application::report::{RunReport, UnitReport};
use crate::domain::classifier::CategoryClassifier;
use crate::domain::dedupe::{apply_exclusions, dedupe};
use crate::domain::product::{SyncMode, UnitKey};
use crate::infrastructure::config::{AppConfig, CategoryUnit, CrawlSettings, SourceProfile};
use crate::infrastructure::fetcher::PaginatedFetcher;
use crate::infrastructure::http_client::{HttpClient, HttpClientConfig, PageTransport};
use crate::infrastructure::normalizer::RecordNormalizer;
use crate::infrastructure::session::{Session, SessionProvider};
use crate::infrastructure::store::ProductStore;
use crate::infrastructure::sync::SyncEngine;

/// Builds one transport per source. Tests substitute scripted transports.
pub trait TransportFactory: Send + Sync {
    fn build(&self, profile: &SourceProfile) -> anyhow::Result<Arc<dyn PageTransport>>;
}

/// Default factory: one rate-limited HTTP client per source, carrying the
/// source's default headers and its own cookie store.
pub struct HttpTransportFactory {
    timeout_seconds: u64,
    max_requests_per_second: u32,
}

impl TransportFactory for HttpTransportFactory {
    fn build(&self, profile: &SourceProfile) -> anyhow::Result<Arc<dyn PageTransport>> {
        let client = HttpClient::new(HttpClientConfig {
            timeout_seconds: self.timeout_seconds,
            max_requests_per_second: self.max_requests_per_second,
            default_headers: profile.headers.clone(),
        })?;
        Ok(Arc::new(client))
    }
}

pub struct Orchestrator {
    config: Arc<AppConfig>,
    store: Arc<dyn ProductStore>,
    classifier: Arc<CategoryClassifier>,
    transports: Arc<dyn TransportFactory>,
}

impl Orchestrator {
    pub fn new(config: Arc<AppConfig>, store: Arc<dyn ProductStore>) -> Self {
        let transports = Arc::new(HttpTransportFactory {
            timeout_seconds: config.crawl.request_timeout_seconds,
            max_requests_per_second: config.crawl.max_requests_per_second,
        });
        Self {
            config,
            store,
            classifier: Arc::new(CategoryClassifier::with_default_rules()),
            transports,
        }
    }

    /// Substitute the transport factory (test seam).
    pub fn with_transport_factory(mut self, transports: Arc<dyn TransportFactory>) -> Self {
        self.transports = transports;
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<CategoryClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Run every configured unit. Always returns a report; setup failures
    /// are the caller's concern and happen before this point.
    pub async fn run(&self) -> RunReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, sources = self.config.sources.len(), "starting crawl run");

        let cancel = CancellationToken::new();
        let deadline_guard = self.config.crawl.run_deadline_seconds.map(|secs| {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(secs)).await;
                warn!("run deadline of {secs}s reached, cancelling outstanding units");
                cancel.cancel();
            })
        });

        let semaphore = Arc::new(Semaphore::new(
            self.config.crawl.max_concurrent_units.max(1),
        ));
        let mut tasks: JoinSet<UnitReport> = JoinSet::new();
        let mut units: Vec<UnitReport> = Vec::new();

        for profile in &self.config.sources {
            let profile = Arc::new(profile.clone());

            let transport = match self.transports.build(&profile) {
                Ok(transport) => transport,
                Err(e) => {
                    error!(source = %profile.id, error = %e, "transport setup failed");
                    units.extend(failed_source_reports(&profile, &e.to_string()));
                    continue;
                }
            };

            // One session per source; an auth failure is fatal for this
            // source's units only.
            let provider = SessionProvider::new(
                transport.clone(),
                self.config.crawl.auth_retry_count,
                Duration::from_millis(self.config.crawl.auth_retry_delay_ms),
            );
            let session = match provider.acquire(&profile).await {
                Ok(session) => Arc::new(session),
                Err(e) => {
                    error!(source = %profile.id, error = %e, "session acquisition failed");
                    units.extend(failed_source_reports(&profile, &e.to_string()));
                    continue;
                }
            };

            for unit in &profile.units {
                let permit_pool = semaphore.clone();
                let profile = profile.clone();
                let unit = unit.clone();
                let session = session.clone();
                let transport = transport.clone();
                let store = self.store.clone();
                let classifier = self.classifier.clone();
                let settings = self.config.crawl.clone();
                let cancel = cancel.clone();

                tasks.spawn(async move {
                    // The semaphore lives for the whole run and is never
                    // closed.
                    let _permit = permit_pool
                        .acquire_owned()
                        .await
                        .expect("worker pool semaphore closed");
                    run_unit(
                        profile, unit, session, transport, store, classifier, settings,
                        cancel,
                    )
                    .await
                });
            }
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => units.push(report),
                Err(e) => error!(error = %e, "unit task panicked"),
            }
        }

        if let Some(guard) = deadline_guard {
            guard.abort();
        }

        RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            units,
        }
    }
}

fn failed_source_reports(profile: &SourceProfile, reason: &str) -> Vec<UnitReport> {
    profile
        .units
        .iter()
        .map(|unit| UnitReport {
            source_id: profile.id.clone(),
            unit_code: unit.code.clone(),
            pages_fetched: 0,
            records_fetched: 0,
            records_synced: 0,
            items_dropped: 0,
            outcome: None,
            fetch_error: None,
            error: Some(reason.to_string()),
            duration_ms: 0,
        })
        .collect()
}

#[allow(clippy::too_many_arguments)]
async fn run_unit(
    profile: Arc<SourceProfile>,
    unit: CategoryUnit,
    session: Arc<Session>,
    transport: Arc<dyn PageTransport>,
    store: Arc<dyn ProductStore>,
    classifier: Arc<CategoryClassifier>,
    settings: CrawlSettings,
    cancel: CancellationToken,
) -> UnitReport {
    let started = Instant::now();
    let unit_key = UnitKey::new(&profile.id, &unit.code);
    let mut report = UnitReport {
        source_id: profile.id.clone(),
        unit_code: unit.code.clone(),
        pages_fetched: 0,
        records_fetched: 0,
        records_synced: 0,
        items_dropped: 0,
        outcome: None,
        fetch_error: None,
        error: None,
        duration_ms: 0,
    };

    // The incremental termination heuristic needs the stored cursor before
    // pagination starts.
    let cursor = if profile.sync_mode == SyncMode::Incremental {
        match store.max_external_id(&unit_key).await {
            Ok(cursor) => cursor,
            Err(e) => {
                report.error = Some(e.to_string());
                report.duration_ms = started.elapsed().as_millis() as u64;
                return report;
            }
        }
    } else {
        None
    };

    let normalizer = Arc::new(RecordNormalizer::new(classifier));
    let fetcher = PaginatedFetcher::new(transport, normalizer, &settings);
    let fetched = fetcher
        .fetch_unit(&profile, &unit, &session, profile.sync_mode, cursor, &cancel)
        .await;

    report.pages_fetched = fetched.pages_fetched;
    report.records_fetched = fetched.records.len();
    report.items_dropped = fetched.items_dropped;
    report.fetch_error = fetched.error.as_ref().map(|e| e.to_string());

    let filtered = apply_exclusions(
        fetched.records,
        &profile.excluded_promotions,
        &profile.excluded_native_categories,
    );
    let batch = dedupe(filtered);
    report.records_synced = batch.len();

    let engine = SyncEngine::new(store, settings.chunk_size);
    match engine.sync(&unit_key, &batch, profile.sync_mode).await {
        Ok(outcome) => report.outcome = Some(outcome),
        Err(e) => report.error = Some(e.to_string()),
    }

    report.duration_ms = started.elapsed().as_millis() as u64;
    report
}
