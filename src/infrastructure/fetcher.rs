//! Paginated listing fetcher
//!
//! Drives the page-by-page retrieval loop for one (source, unit) pair.
//! Pages are requested sequentially with a fixed inter-request delay; items
//! are extracted and normalized as each page lands, and the resulting
//! sequence is consumed exactly once.
//!
//! Termination:
//! - full mode stops at the first page with zero extracted items,
//! - incremental mode stops after two consecutive pages contribute zero
//!   items above the unit's cursor (a one-page false stop is tolerated
//!   because some sources interleave stale and fresh items across a page
//!   boundary),
//! - a hard page ceiling applies regardless, as a runaway-loop safety net.
//!
//! A transient request or page-parse failure ends pagination for this unit
//! only and keeps the pages already collected.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::domain::error::FetchError;
use crate::domain::product::{ProductRecord, SyncMode};
use crate::infrastructure::config::{CategoryUnit, CrawlSettings, SourceProfile};
use crate::infrastructure::http_client::PageTransport;
use crate::infrastructure::listing;
use crate::infrastructure::normalizer::{RecordNormalizer, SourceContext};
use crate::infrastructure::session::Session;

/// What one unit's pagination produced. `error` is set when a transient
/// failure ended the loop early; the collected records are still valid.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub records: Vec<ProductRecord>,
    pub pages_fetched: u32,
    pub items_dropped: u32,
    pub error: Option<FetchError>,
}

pub struct PaginatedFetcher {
    transport: Arc<dyn PageTransport>,
    normalizer: Arc<RecordNormalizer>,
    max_pages: u32,
    page_size: u32,
    request_delay: Duration,
}

impl PaginatedFetcher {
    pub fn new(
        transport: Arc<dyn PageTransport>,
        normalizer: Arc<RecordNormalizer>,
        settings: &CrawlSettings,
    ) -> Self {
        Self {
            transport,
            normalizer,
            max_pages: settings.max_pages.max(1),
            page_size: settings.page_size,
            request_delay: Duration::from_millis(settings.request_delay_ms),
        }
    }

    /// Crawl one unit. `cursor` is the unit's stored high-water mark and is
    /// only consulted by the incremental termination heuristic.
    pub async fn fetch_unit(
        &self,
        profile: &SourceProfile,
        unit: &CategoryUnit,
        session: &Session,
        mode: SyncMode,
        cursor: Option<i64>,
        cancel: &CancellationToken,
    ) -> FetchOutcome {
        let mut outcome = FetchOutcome::default();

        let base_url = match Url::parse(&profile.base_url) {
            Ok(url) => url,
            Err(e) => {
                outcome.error = Some(FetchError::Transport {
                    url: profile.base_url.clone(),
                    reason: format!("invalid base url: {e}"),
                });
                return outcome;
            }
        };

        let ctx = SourceContext {
            source_id: &profile.id,
            base_url: &base_url,
            source_url: &profile.source_url,
            native_category: unit.native_category.as_deref(),
            promo_label: unit.promo_label.as_deref(),
        };

        let listing_url = unit
            .listing_url
            .as_deref()
            .unwrap_or(profile.listing_url.as_str());
        let mut consecutive_stale = 0u32;

        for page in 1..=self.max_pages {
            if cancel.is_cancelled() {
                warn!(source = %profile.id, unit = %unit.code, page, "fetch cancelled");
                outcome.error = Some(FetchError::Cancelled);
                break;
            }
            if page > 1 {
                tokio::time::sleep(self.request_delay).await;
            }

            let params = self.page_params(profile, unit, session, page);
            let body = match self.transport.post_form(listing_url, &params).await {
                Ok(body) => body,
                Err(e) => {
                    warn!(source = %profile.id, unit = %unit.code, page, error = %e,
                        "page request failed, keeping {} collected records", outcome.records.len());
                    outcome.error = Some(e);
                    break;
                }
            };

            let raws = match listing::extract_items(&profile.payload, &body) {
                Ok(raws) => raws,
                Err(e) => {
                    warn!(source = %profile.id, unit = %unit.code, page, error = %e,
                        "page payload unparseable, ending pagination");
                    outcome.error = Some(FetchError::PageParse { page, source: e });
                    break;
                }
            };
            outcome.pages_fetched += 1;

            if raws.is_empty() {
                match mode {
                    SyncMode::FullReplace => {
                        debug!(source = %profile.id, unit = %unit.code, page, "empty page, done");
                        break;
                    }
                    SyncMode::Incremental => {
                        consecutive_stale += 1;
                        if consecutive_stale >= 2 {
                            break;
                        }
                        continue;
                    }
                }
            }

            let mut fresh_items = 0usize;
            for raw in &raws {
                match self.normalizer.normalize(raw, &ctx) {
                    Ok(record) => {
                        if cursor.is_none_or(|c| record.external_id > c) {
                            fresh_items += 1;
                        }
                        outcome.records.push(record);
                    }
                    Err(e) => {
                        outcome.items_dropped += 1;
                        debug!(source = %profile.id, unit = %unit.code, page, error = %e, "item dropped");
                    }
                }
            }

            if mode == SyncMode::Incremental {
                if fresh_items == 0 {
                    consecutive_stale += 1;
                    if consecutive_stale >= 2 {
                        debug!(source = %profile.id, unit = %unit.code, page,
                            "two consecutive stale pages, done");
                        break;
                    }
                } else {
                    consecutive_stale = 0;
                }
            }
        }

        outcome
    }

    fn page_params(
        &self,
        profile: &SourceProfile,
        unit: &CategoryUnit,
        session: &Session,
        page: u32,
    ) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if let (Some(field), Some(token)) = (&profile.token_field, &session.token) {
            params.push((field.clone(), token.clone()));
        }
        params.push((profile.params.page.clone(), page.to_string()));
        params.push((profile.params.size.clone(), self.page_size.to_string()));
        if let (Some(name), Some(value)) = (&profile.params.query, &unit.query) {
            params.push((name.clone(), value.clone()));
        }
        params.extend(profile.extra_params.iter().cloned());
        params.extend(unit.extra_params.iter().cloned());
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::classifier::CategoryClassifier;
    use crate::infrastructure::config::seed_sources;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Returns scripted page bodies in order; `Err` entries simulate a
    /// transient transport failure.
    struct ScriptedPages {
        bodies: Mutex<VecDeque<Result<String, FetchError>>>,
        last_params: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedPages {
        fn new(bodies: Vec<Result<String, FetchError>>) -> Self {
            Self {
                bodies: Mutex::new(bodies.into()),
                last_params: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PageTransport for ScriptedPages {
        async fn get_text(&self, url: &str) -> Result<String, FetchError> {
            Err(FetchError::Transport {
                url: url.to_string(),
                reason: "unexpected GET".to_string(),
            })
        }

        async fn post_form(
            &self,
            url: &str,
            params: &[(String, String)],
        ) -> Result<String, FetchError> {
            *self.last_params.lock().unwrap() = params.to_vec();
            self.bodies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(page_body(&[])))
                .map_err(|e| match e {
                    FetchError::Transport { reason, .. } => FetchError::Transport {
                        url: url.to_string(),
                        reason,
                    },
                    other => other,
                })
        }
    }

    /// GS25-shaped JSON page with one result per external id.
    fn page_body(ids: &[i64]) -> String {
        let results: Vec<String> = ids
            .iter()
            .map(|id| {
                format!(
                    r#"{{"goodsNm":"상품 {id}","price":1500,"attFileNm":"//img.test/{id}.jpg","attFileId":"GD_{id}"}}"#
                )
            })
            .collect();
        format!(r#"{{"results":[{}]}}"#, results.join(","))
    }

    fn json_profile() -> SourceProfile {
        seed_sources().into_iter().find(|s| s.id == "gs25").unwrap()
    }

    fn fetcher(transport: Arc<dyn PageTransport>, max_pages: u32) -> PaginatedFetcher {
        let settings = CrawlSettings {
            max_pages,
            request_delay_ms: 0,
            ..Default::default()
        };
        PaginatedFetcher::new(
            transport,
            Arc::new(RecordNormalizer::new(Arc::new(
                CategoryClassifier::with_default_rules(),
            ))),
            &settings,
        )
    }

    fn session(profile: &SourceProfile) -> Session {
        Session {
            source_id: profile.id.clone(),
            token: Some("tok".to_string()),
        }
    }

    #[tokio::test]
    async fn full_mode_stops_at_first_empty_page() {
        let ids1: Vec<i64> = (1..=10).collect();
        let ids2: Vec<i64> = (11..=20).collect();
        let transport = Arc::new(ScriptedPages::new(vec![
            Ok(page_body(&ids1)),
            Ok(page_body(&ids2)),
            Ok(page_body(&[])),
            Ok(page_body(&[99])),
        ]));
        let profile = json_profile();
        let outcome = fetcher(transport.clone(), 20)
            .fetch_unit(
                &profile,
                &profile.units[0],
                &session(&profile),
                SyncMode::FullReplace,
                None,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(outcome.records.len(), 20);
        assert_eq!(outcome.pages_fetched, 3);
        assert!(outcome.error.is_none());
        // Page 4 was scripted but never requested.
        assert_eq!(transport.bodies.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn incremental_mode_tolerates_one_stale_page() {
        // Page 2 is all-stale, page 3 carries fresh ids again, pages 4 and 5
        // are both stale and end the loop.
        let transport = Arc::new(ScriptedPages::new(vec![
            Ok(page_body(&[101, 102])),
            Ok(page_body(&[50, 60])),
            Ok(page_body(&[205])),
            Ok(page_body(&[70])),
            Ok(page_body(&[80])),
            Ok(page_body(&[999])),
        ]));
        let profile = json_profile();
        let outcome = fetcher(transport.clone(), 20)
            .fetch_unit(
                &profile,
                &profile.units[0],
                &session(&profile),
                SyncMode::Incremental,
                Some(100),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(outcome.pages_fetched, 5);
        assert_eq!(outcome.records.len(), 7);
        assert_eq!(transport.bodies.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn hard_page_ceiling_is_enforced() {
        let pages: Vec<Result<String, FetchError>> =
            (0..50).map(|i| Ok(page_body(&[1000 + i]))).collect();
        let transport = Arc::new(ScriptedPages::new(pages));
        let profile = json_profile();
        let outcome = fetcher(transport, 5)
            .fetch_unit(
                &profile,
                &profile.units[0],
                &session(&profile),
                SyncMode::FullReplace,
                None,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(outcome.pages_fetched, 5);
        assert_eq!(outcome.records.len(), 5);
    }

    #[tokio::test]
    async fn transient_failure_keeps_collected_pages() {
        let transport = Arc::new(ScriptedPages::new(vec![
            Ok(page_body(&[1, 2, 3])),
            Err(FetchError::Transport {
                url: String::new(),
                reason: "reset by peer".to_string(),
            }),
        ]));
        let profile = json_profile();
        let outcome = fetcher(transport, 20)
            .fetch_unit(
                &profile,
                &profile.units[0],
                &session(&profile),
                SyncMode::FullReplace,
                None,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(outcome.records.len(), 3);
        assert_eq!(outcome.pages_fetched, 1);
        assert!(matches!(outcome.error, Some(FetchError::Transport { .. })));
    }

    #[tokio::test]
    async fn unparseable_page_ends_pagination_keeping_records() {
        let transport = Arc::new(ScriptedPages::new(vec![
            Ok(page_body(&[1])),
            Ok("<html>maintenance</html>".to_string()),
        ]));
        let profile = json_profile();
        let outcome = fetcher(transport, 20)
            .fetch_unit(
                &profile,
                &profile.units[0],
                &session(&profile),
                SyncMode::FullReplace,
                None,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(outcome.records.len(), 1);
        assert!(matches!(
            outcome.error,
            Some(FetchError::PageParse { page: 2, .. })
        ));
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_the_first_request() {
        let transport = Arc::new(ScriptedPages::new(vec![Ok(page_body(&[1]))]));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let profile = json_profile();
        let outcome = fetcher(transport, 20)
            .fetch_unit(
                &profile,
                &profile.units[0],
                &session(&profile),
                SyncMode::FullReplace,
                None,
                &cancel,
            )
            .await;

        assert_eq!(outcome.pages_fetched, 0);
        assert!(matches!(outcome.error, Some(FetchError::Cancelled)));
    }

    #[tokio::test]
    async fn token_and_unit_query_travel_in_the_form_params() {
        let transport = Arc::new(ScriptedPages::new(vec![Ok(page_body(&[]))]));
        let profile = json_profile();
        fetcher(transport.clone(), 20)
            .fetch_unit(
                &profile,
                &profile.units[0],
                &session(&profile),
                SyncMode::FullReplace,
                None,
                &CancellationToken::new(),
            )
            .await;

        let params = transport.last_params.lock().unwrap().clone();
        assert!(params.contains(&("CSRFToken".to_string(), "tok".to_string())));
        assert!(params.contains(&("pageNum".to_string(), "1".to_string())));
        assert!(params.contains(&("parameterList".to_string(), "ONE_TO_ONE".to_string())));
    }
}
