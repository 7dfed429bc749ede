//! Product records and batch-level value types
//!
//! A `ProductRecord` is the canonical form of one crawled listing item.
//! Records are created by the normalizer, enriched by the classifier and
//! finally written by the sync engine; they are never mutated after being
//! committed to the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fixed target taxonomy. Every record carries exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CanonicalCategory {
    ReadyMeal,
    Snack,
    Frozen,
    Food,
    Beverage,
    Household,
    Other,
}

impl CanonicalCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadyMeal => "ready-meal",
            Self::Snack => "snack",
            Self::Frozen => "frozen",
            Self::Food => "food",
            Self::Beverage => "beverage",
            Self::Household => "household",
            Self::Other => "other",
        }
    }

    /// Parse a stored label back into the enum. Unknown labels collapse to
    /// `Other` so that old rows never poison a read path.
    pub fn from_label(label: &str) -> Self {
        match label {
            "ready-meal" => Self::ReadyMeal,
            "snack" => Self::Snack,
            "frozen" => Self::Frozen,
            "food" => Self::Food,
            "beverage" => Self::Beverage,
            "household" => Self::Household,
            _ => Self::Other,
        }
    }

    pub const ALL: [CanonicalCategory; 7] = [
        Self::ReadyMeal,
        Self::Snack,
        Self::Frozen,
        Self::Food,
        Self::Beverage,
        Self::Household,
        Self::Other,
    ];
}

impl std::fmt::Display for CanonicalCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical, normalized representation of one crawled item.
///
/// `external_id` is the source-native numeric identifier and is unique
/// within `source_id` inside any synchronized batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductRecord {
    pub source_id: String,
    pub external_id: i64,
    pub title: String,
    pub normalized_title: String,
    /// Currency-stripped integer price. Unparseable source text becomes 0.
    pub price: i64,
    /// Absolute image URL. Sources serving a known placeholder yield `None`.
    pub image_url: Option<String>,
    pub category: CanonicalCategory,
    pub native_category: Option<String>,
    pub promotion_tag: Option<String>,
    pub source_url: String,
    pub is_active: bool,
    #[serde(rename = "collectedAt")]
    pub collected_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

/// One extracted listing block before normalization.
///
/// Markup and JSON payloads both collapse into this shape; the normalizer
/// decides which of the candidate id fields actually yields an external id.
#[derive(Debug, Clone, Default)]
pub struct RawItem {
    pub title: Option<String>,
    pub price_text: Option<String>,
    pub image: Option<String>,
    /// Item link href; may embed the id in a script handler call.
    pub link: Option<String>,
    /// Explicit numeric id field, when the payload has one.
    pub structured_id: Option<i64>,
    /// Identifier-like text field used as the last id fallback.
    pub id_hint: Option<String>,
    pub native_category: Option<String>,
    pub promo_text: Option<String>,
}

/// Synchronization strategy for one crawl unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Replace the unit's stored rows with the fresh batch.
    FullReplace,
    /// Upsert only records above the unit's stored cursor.
    Incremental,
}

/// Store scope of one crawl unit: a source plus its listing axis
/// (promo tab, fixed listing code).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnitKey {
    pub source_id: String,
    pub unit_code: String,
}

impl UnitKey {
    pub fn new(source_id: impl Into<String>, unit_code: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            unit_code: unit_code.into(),
        }
    }
}

impl std::fmt::Display for UnitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.source_id, self.unit_code)
    }
}

/// Write counts reported by the sync engine for one unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub inserted: u64,
    pub updated: u64,
    pub skipped: u64,
    pub deleted: u64,
}

impl SyncOutcome {
    pub fn written(&self) -> u64 {
        self.inserted + self.updated
    }
}
