//! Configuration infrastructure
//!
//! JSON configuration file with sensible defaults. The file carries three
//! groups of settings:
//! 1. crawl behavior (page ceiling, delays, concurrency, chunk size)
//! 2. logging
//! 3. source profiles - everything source-specific lives here: endpoint
//!    URLs, request parameter names, payload shape (selector set or JSON
//!    field map), crawl units, promo vocabulary and exclusions.
//!
//! The first run writes a default file seeded with the three supported
//! convenience-store chains so a deployment can be edited rather than
//! written from scratch.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::error::SetupError;
use crate::domain::product::SyncMode;

/// Complete application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,

    #[serde(default)]
    pub crawl: CrawlSettings,

    #[serde(default)]
    pub logging: LoggingSettings,

    #[serde(default = "seed_sources")]
    pub sources: Vec<SourceProfile>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            crawl: CrawlSettings::default(),
            logging: LoggingSettings::default(),
            sources: seed_sources(),
        }
    }
}

/// Crawl behavior settings shared by all sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlSettings {
    /// Hard page ceiling per unit, enforced regardless of termination
    /// heuristics (runaway-loop safety net).
    pub max_pages: u32,

    /// Requested page size.
    pub page_size: u32,

    /// Fixed delay between page requests in milliseconds.
    pub request_delay_ms: u64,

    /// Per-request timeout in seconds.
    pub request_timeout_seconds: u64,

    /// Upper bound for the shared rate limiter.
    pub max_requests_per_second: u32,

    /// Bounded worker pool width for concurrent units.
    pub max_concurrent_units: usize,

    /// Token acquisition attempts before giving up on a source.
    pub auth_retry_count: u32,

    /// Base delay between token acquisition attempts in milliseconds.
    pub auth_retry_delay_ms: u64,

    /// Records per store write chunk.
    pub chunk_size: usize,

    /// Whole-run deadline in seconds. `None` disables the deadline.
    pub run_deadline_seconds: Option<u64>,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            max_pages: 20,
            page_size: 50,
            request_delay_ms: 300,
            request_timeout_seconds: 15,
            max_requests_per_second: 3,
            max_concurrent_units: 4,
            auth_retry_count: 3,
            auth_retry_delay_ms: 500,
            chunk_size: 100,
            run_deadline_seconds: Some(1800),
        }
    }
}

/// Logging configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub level: String,

    /// Enable JSON formatted logs.
    pub json_format: bool,

    /// Enable console output.
    pub console_output: bool,

    /// Enable file output.
    pub file_output: bool,

    /// Log directory. Defaults to `logs/` next to the executable.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            console_output: true,
            file_output: false,
            directory: None,
        }
    }
}

/// Everything the pipeline needs to know about one retail source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceProfile {
    /// Stable source identifier, persisted on every record.
    pub id: String,

    /// Base URL used to resolve root-relative asset links.
    pub base_url: String,

    /// Listing endpoint receiving the paginated form POSTs.
    pub listing_url: String,

    /// Canonical listing page recorded as each product's `source_url`.
    pub source_url: String,

    /// Landing page fetched for token acquisition, when required.
    pub landing_url: Option<String>,

    /// Anti-forgery token field name. `None` means no token handshake.
    pub token_field: Option<String>,

    /// Default request headers (User-Agent, Referer, XHR marker).
    #[serde(default)]
    pub headers: Vec<(String, String)>,

    /// Payload shape: selector set for markup, field map for JSON.
    pub payload: PayloadShape,

    /// Pagination parameter names used by this source.
    pub params: ParamNames,

    /// Fixed parameters sent with every page request.
    #[serde(default)]
    pub extra_params: Vec<(String, String)>,

    /// Crawl units (promo tabs, fixed listing codes).
    pub units: Vec<CategoryUnit>,

    pub sync_mode: SyncMode,

    /// Promotion labels whose records are dropped before dedup.
    #[serde(default)]
    pub excluded_promotions: Vec<String>,

    /// Native categories whose records are dropped before dedup.
    #[serde(default)]
    pub excluded_native_categories: Vec<String>,
}

impl SourceProfile {
    pub fn requires_token(&self) -> bool {
        self.token_field.is_some()
    }
}

/// Names of the pagination parameters a source expects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamNames {
    pub page: String,
    pub size: String,
    /// Category/query code parameter, when the source takes one.
    pub query: Option<String>,
}

/// How one source's listing response is shaped.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PayloadShape {
    Json(JsonFieldMap),
    Markup(MarkupSelectors),
}

/// Field names inside a JSON listing payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonFieldMap {
    /// Name of the results array.
    pub results_field: String,
    pub title_field: String,
    pub price_field: String,
    pub image_field: String,
    /// Explicit numeric id field, when the payload has one.
    pub id_field: Option<String>,
    /// Identifier-like field used as the last id fallback.
    pub id_hint_field: Option<String>,
}

/// CSS selectors inside a server-rendered listing fragment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkupSelectors {
    pub item: String,
    pub title: String,
    pub price: String,
    pub image: String,
    pub link: String,
    pub promo_tag: String,
    /// Sentinel text marking an empty listing block.
    pub no_data_marker: Option<String>,
}

/// One crawl unit of a source: a listing axis such as a promo tab.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryUnit {
    /// Unit code persisted alongside each row for cursor and delete scoping.
    pub code: String,

    /// Value for the source's query parameter.
    pub query: Option<String>,

    /// Listing endpoint override, when the unit has its own endpoint.
    pub listing_url: Option<String>,

    /// Fixed parameters specific to this unit (e.g. a tab index).
    #[serde(default)]
    pub extra_params: Vec<(String, String)>,

    /// Source-declared category for every item in this unit.
    pub native_category: Option<String>,

    /// Fixed promotion label overriding per-item tag text.
    pub promo_label: Option<String>,
}

impl AppConfig {
    /// Load the configuration, creating a default file on first run.
    pub async fn load_or_init(path: &Path) -> Result<Self, SetupError> {
        if path.exists() {
            let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
                SetupError::Config {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                }
            })?;
            serde_json::from_str(&raw).map_err(|e| SetupError::Config {
                path: path.display().to_string(),
                reason: e.to_string(),
            })
        } else {
            let config = Self::default();
            config.save(path).await?;
            info!("wrote default configuration to {}", path.display());
            Ok(config)
        }
    }

    pub async fn save(&self, path: &Path) -> Result<(), SetupError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                SetupError::Config {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                }
            })?;
        }
        let raw = serde_json::to_string_pretty(self).map_err(|e| SetupError::Config {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        tokio::fs::write(path, raw)
            .await
            .map_err(|e| SetupError::Config {
                path: path.display().to_string(),
                reason: e.to_string(),
            })
    }

    /// Default config file location under the platform config directory.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cvs-promo-crawler")
            .join("config.json")
    }
}

fn default_database_url() -> String {
    let dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("./data"))
        .join("cvs-promo-crawler");
    format!("sqlite:{}", dir.join("products.db").display())
}

const DESKTOP_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
(KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Profiles for the three supported chains, matching their observed
/// endpoints and payload shapes.
pub fn seed_sources() -> Vec<SourceProfile> {
    vec![gs25_profile(), seven_eleven_profile(), cu_profile()]
}

fn gs25_profile() -> SourceProfile {
    SourceProfile {
        id: "gs25".to_string(),
        base_url: "https://gs25.gsretail.com".to_string(),
        listing_url: "https://gs25.gsretail.com/gscvs/ko/products/event-goods-search"
            .to_string(),
        source_url: "https://gs25.gsretail.com/gscvs/ko/products/event-goods".to_string(),
        landing_url: Some(
            "https://gs25.gsretail.com/gscvs/ko/products/event-goods".to_string(),
        ),
        token_field: Some("CSRFToken".to_string()),
        headers: vec![
            ("User-Agent".to_string(), DESKTOP_UA.to_string()),
            (
                "Referer".to_string(),
                "https://gs25.gsretail.com/gscvs/ko/products/event-goods".to_string(),
            ),
            (
                "Accept".to_string(),
                "application/json, text/javascript, */*; q=0.01".to_string(),
            ),
            ("X-Requested-With".to_string(), "XMLHttpRequest".to_string()),
        ],
        payload: PayloadShape::Json(JsonFieldMap {
            results_field: "results".to_string(),
            title_field: "goodsNm".to_string(),
            price_field: "price".to_string(),
            image_field: "attFileNm".to_string(),
            id_field: None,
            id_hint_field: Some("attFileId".to_string()),
        }),
        params: ParamNames {
            page: "pageNum".to_string(),
            size: "pageSize".to_string(),
            query: Some("parameterList".to_string()),
        },
        extra_params: vec![],
        units: vec![
            CategoryUnit {
                code: "one-plus-one".to_string(),
                query: Some("ONE_TO_ONE".to_string()),
                listing_url: None,
                extra_params: vec![],
                native_category: None,
                promo_label: Some("1+1".to_string()),
            },
            CategoryUnit {
                code: "two-plus-one".to_string(),
                query: Some("TWO_TO_ONE".to_string()),
                listing_url: None,
                extra_params: vec![],
                native_category: None,
                promo_label: Some("2+1".to_string()),
            },
            CategoryUnit {
                code: "gift".to_string(),
                query: Some("GIFT".to_string()),
                listing_url: None,
                extra_params: vec![],
                native_category: None,
                promo_label: Some("덤증정".to_string()),
            },
        ],
        sync_mode: SyncMode::Incremental,
        excluded_promotions: vec![],
        excluded_native_categories: vec![],
    }
}

fn seven_eleven_profile() -> SourceProfile {
    SourceProfile {
        id: "seven-eleven".to_string(),
        base_url: "https://www.7-eleven.co.kr".to_string(),
        listing_url: "https://www.7-eleven.co.kr/product/listMoreAjax.asp".to_string(),
        source_url: "https://www.7-eleven.co.kr/product/presentList.asp".to_string(),
        landing_url: None,
        token_field: None,
        headers: vec![
            ("User-Agent".to_string(), DESKTOP_UA.to_string()),
            (
                "Origin".to_string(),
                "https://www.7-eleven.co.kr".to_string(),
            ),
            (
                "Referer".to_string(),
                "https://www.7-eleven.co.kr/product/presentList.asp".to_string(),
            ),
            ("Accept".to_string(), "*/*".to_string()),
            ("X-Requested-With".to_string(), "XMLHttpRequest".to_string()),
        ],
        payload: PayloadShape::Markup(MarkupSelectors {
            item: "li".to_string(),
            title: "div.tit_product".to_string(),
            price: "div.price span".to_string(),
            image: "div.pic_product img".to_string(),
            link: "a[href]".to_string(),
            promo_tag: "ul.tag_list_01 li".to_string(),
            no_data_marker: Some("데이터가 없습니다".to_string()),
        }),
        params: ParamNames {
            page: "intCurrPage".to_string(),
            size: "intPageSize".to_string(),
            query: None,
        },
        extra_params: vec![],
        units: vec![
            CategoryUnit {
                code: "dosirak".to_string(),
                query: None,
                listing_url: Some(
                    "https://www.7-eleven.co.kr/product/dosirakNewMoreAjax.asp".to_string(),
                ),
                extra_params: vec![],
                native_category: Some("간편식사".to_string()),
                promo_label: None,
            },
            CategoryUnit {
                code: "one-plus-one".to_string(),
                query: None,
                listing_url: None,
                extra_params: vec![("pTab".to_string(), "1".to_string())],
                native_category: None,
                promo_label: Some("1+1".to_string()),
            },
            CategoryUnit {
                code: "two-plus-one".to_string(),
                query: None,
                listing_url: None,
                extra_params: vec![("pTab".to_string(), "2".to_string())],
                native_category: None,
                promo_label: Some("2+1".to_string()),
            },
        ],
        sync_mode: SyncMode::Incremental,
        excluded_promotions: vec![],
        excluded_native_categories: vec![],
    }
}

fn cu_profile() -> SourceProfile {
    SourceProfile {
        id: "cu".to_string(),
        base_url: "https://cu.bgfretail.com".to_string(),
        listing_url: "https://cu.bgfretail.com/product/productAjax.do".to_string(),
        source_url: "https://cu.bgfretail.com/product/product.do?category=product&depth2=4&depth3=1"
            .to_string(),
        landing_url: None,
        token_field: None,
        headers: vec![
            ("User-Agent".to_string(), DESKTOP_UA.to_string()),
            (
                "Referer".to_string(),
                "https://cu.bgfretail.com/product/product.do".to_string(),
            ),
            ("X-Requested-With".to_string(), "XMLHttpRequest".to_string()),
        ],
        payload: PayloadShape::Markup(MarkupSelectors {
            item: ".prodListWrap li".to_string(),
            title: ".prodName".to_string(),
            price: ".prodPrice span".to_string(),
            image: ".photo img".to_string(),
            link: "a[href]".to_string(),
            promo_tag: ".tag".to_string(),
            no_data_marker: None,
        }),
        params: ParamNames {
            page: "pageIndex".to_string(),
            size: "listCount".to_string(),
            query: Some("searchMainCategory".to_string()),
        },
        extra_params: vec![("searchCondition".to_string(), "setA".to_string())],
        units: vec![CategoryUnit {
            code: "pb-goods".to_string(),
            query: Some("4".to_string()),
            listing_url: None,
            extra_params: vec![],
            native_category: None,
            promo_label: None,
        }],
        sync_mode: SyncMode::FullReplace,
        excluded_promotions: vec![],
        excluded_native_categories: vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_json() {
        let config = AppConfig::default();
        let raw = serde_json::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.sources.len(), config.sources.len());
        assert_eq!(parsed.crawl.max_pages, 20);
        assert_eq!(parsed.crawl.chunk_size, 100);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let parsed: AppConfig = serde_json::from_str(r#"{ "database_url": "sqlite::memory:" }"#).unwrap();
        assert_eq!(parsed.database_url, "sqlite::memory:");
        assert_eq!(parsed.crawl.max_pages, 20);
        assert_eq!(parsed.sources.len(), 3);
    }

    #[test]
    fn seeded_token_source_is_flagged() {
        let sources = seed_sources();
        let gs25 = sources.iter().find(|s| s.id == "gs25").unwrap();
        assert!(gs25.requires_token());
        let seven = sources.iter().find(|s| s.id == "seven-eleven").unwrap();
        assert!(!seven.requires_token());
    }

    #[tokio::test]
    async fn load_or_init_writes_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = AppConfig::load_or_init(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(config.sources.len(), 3);

        // Second load reads the file it just wrote.
        let reloaded = AppConfig::load_or_init(&path).await.unwrap();
        assert_eq!(reloaded.crawl.page_size, config.crawl.page_size);
    }
}
