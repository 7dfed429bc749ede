//! Raw item normalization
//!
//! Maps one extracted `RawItem` into a canonical `ProductRecord`. An item
//! without a stable numeric external id cannot be deduplicated or synced
//! incrementally, so the id fallback chain failing drops the item.

use std::sync::Arc;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::domain::classifier::CategoryClassifier;
use crate::domain::error::ParseError;
use crate::domain::product::{ProductRecord, RawItem};

/// Numeric argument of a script handler call, e.g. `fncGoView('8123')`.
static HANDLER_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(\s*'?(\d+)'?\s*\)").unwrap());

static DIGIT_RUN_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());

/// Per-unit context handed to the normalizer by the fetcher.
#[derive(Debug, Clone)]
pub struct SourceContext<'a> {
    pub source_id: &'a str,
    pub base_url: &'a Url,
    pub source_url: &'a str,
    /// Source-declared category for every item of the unit.
    pub native_category: Option<&'a str>,
    /// Fixed promotion label of the unit, overriding per-item tag text.
    pub promo_label: Option<&'a str>,
}

pub struct RecordNormalizer {
    classifier: Arc<CategoryClassifier>,
}

impl RecordNormalizer {
    pub fn new(classifier: Arc<CategoryClassifier>) -> Self {
        Self { classifier }
    }

    pub fn normalize(
        &self,
        raw: &RawItem,
        ctx: &SourceContext<'_>,
    ) -> Result<ProductRecord, ParseError> {
        let title = raw
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(ParseError::MissingTitle)?;

        let external_id =
            extract_external_id(raw).ok_or_else(|| ParseError::MissingExternalId {
                title: title.to_string(),
            })?;

        let price = raw.price_text.as_deref().map(parse_price).unwrap_or(0);
        let image_url = raw
            .image
            .as_deref()
            .and_then(|src| normalize_image_url(src, ctx.base_url));

        let native_category = raw.native_category.as_deref().or(ctx.native_category);
        let category = self.classifier.classify(title, native_category);

        let promotion_tag = ctx
            .promo_label
            .map(str::to_string)
            .or_else(|| raw.promo_text.as_deref().and_then(promo_from_text));

        let now = Utc::now();
        Ok(ProductRecord {
            source_id: ctx.source_id.to_string(),
            external_id,
            title: title.to_string(),
            normalized_title: normalize_title(title),
            price,
            image_url,
            category,
            native_category: native_category.map(str::to_string),
            promotion_tag,
            source_url: ctx.source_url.to_string(),
            is_active: true,
            collected_at: now,
            updated_at: now,
        })
    }
}

/// Ordered external-id fallback chain: explicit id field, script handler
/// argument, first digit run of an identifier-like field (truncated to the
/// trailing 18 digits so attachment-file ids fit an i64).
fn extract_external_id(raw: &RawItem) -> Option<i64> {
    if let Some(id) = raw.structured_id {
        return Some(id);
    }

    if let Some(link) = raw.link.as_deref() {
        if let Some(captures) = HANDLER_ID_PATTERN.captures(link) {
            if let Ok(id) = captures[1].parse() {
                return Some(id);
            }
        }
    }

    if let Some(hint) = raw.id_hint.as_deref() {
        if let Some(run) = DIGIT_RUN_PATTERN.find(hint) {
            let digits = run.as_str();
            let tail = if digits.len() > 18 {
                &digits[digits.len() - 18..]
            } else {
                digits
            };
            if let Ok(id) = tail.parse() {
                return Some(id);
            }
        }
    }

    None
}

/// Currency-stripped integer price. `"1,234원"` → 1234; absent or
/// unparseable text → 0.
pub fn parse_price(text: &str) -> i64 {
    let cleaned: String = text
        .trim()
        .trim_end_matches('원')
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect();
    cleaned.parse::<i64>().ok().filter(|p| *p >= 0).unwrap_or(0)
}

/// Case-folded title key: alphanumerics (any script) upper-cased, every
/// non-alphanumeric run collapsed to a single space. Idempotent.
pub fn normalize_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut pending_gap = false;
    for c in title.chars() {
        if c.is_alphanumeric() {
            if pending_gap && !out.is_empty() {
                out.push(' ');
            }
            pending_gap = false;
            out.extend(c.to_uppercase());
        } else {
            pending_gap = true;
        }
    }
    out
}

/// Absolute image URL: protocol-relative gets https, root-relative gets the
/// source base, placeholder assets become `None`, anything else stays as-is.
pub fn normalize_image_url(src: &str, base: &Url) -> Option<String> {
    let src = src.trim();
    if src.is_empty() || src.contains("no_img") {
        return None;
    }
    if let Some(rest) = src.strip_prefix("//") {
        return Some(format!("https://{rest}"));
    }
    if src.starts_with('/') {
        return base.join(src).ok().map(|url| url.to_string());
    }
    Some(src.to_string())
}

/// Promotion label from badge/tag text, in the chains' vocabulary.
fn promo_from_text(text: &str) -> Option<String> {
    if text.contains("1+1") {
        Some("1+1".to_string())
    } else if text.contains("2+1") {
        Some("2+1".to_string())
    } else if text.contains("증정") {
        Some("덤증정".to_string())
    } else if text.contains("신상품") {
        Some("NEW".to_string())
    } else {
        None
    }
}
