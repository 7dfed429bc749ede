//! Batch deduplication and exclusion filters
//!
//! A fetched batch may carry the same `(source_id, external_id)` more than
//! once when a listing moves across a page boundary mid-crawl. Later pages
//! are assumed to carry the most current view, so the last occurrence in
//! fetch order wins. First-seen position is kept so batch order stays
//! stable for chunked writes.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::domain::product::ProductRecord;

/// Collapse a batch to at most one record per `(source_id, external_id)`.
pub fn dedupe(records: Vec<ProductRecord>) -> Vec<ProductRecord> {
    let mut out: Vec<ProductRecord> = Vec::with_capacity(records.len());
    let mut seen: HashMap<(String, i64), usize> = HashMap::with_capacity(records.len());

    for record in records {
        let key = (record.source_id.clone(), record.external_id);
        match seen.entry(key) {
            Entry::Occupied(slot) => out[*slot.get()] = record,
            Entry::Vacant(slot) => {
                slot.insert(out.len());
                out.push(record);
            }
        }
    }
    out
}

/// Pure pre-dedup filter: drop records tagged with a disallowed promotion
/// label or belonging to an explicitly excluded native category.
pub fn apply_exclusions(
    records: Vec<ProductRecord>,
    excluded_promotions: &[String],
    excluded_native_categories: &[String],
) -> Vec<ProductRecord> {
    if excluded_promotions.is_empty() && excluded_native_categories.is_empty() {
        return records;
    }

    records
        .into_iter()
        .filter(|record| {
            let promo_blocked = record
                .promotion_tag
                .as_deref()
                .is_some_and(|tag| excluded_promotions.iter().any(|e| e == tag));
            let native_blocked = record
                .native_category
                .as_deref()
                .is_some_and(|native| excluded_native_categories.iter().any(|e| e == native));
            !promo_blocked && !native_blocked
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::product::CanonicalCategory;
    use chrono::Utc;

    fn record(source: &str, id: i64, title: &str) -> ProductRecord {
        let now = Utc::now();
        ProductRecord {
            source_id: source.to_string(),
            external_id: id,
            title: title.to_string(),
            normalized_title: title.to_uppercase(),
            price: 1000,
            image_url: None,
            category: CanonicalCategory::Other,
            native_category: None,
            promotion_tag: None,
            source_url: "https://example.test/list".to_string(),
            is_active: true,
            collected_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn last_occurrence_wins() {
        let batch = vec![
            record("cu", 1, "first"),
            record("cu", 2, "other"),
            record("cu", 1, "second"),
            record("cu", 1, "third"),
        ];
        let deduped = dedupe(batch);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].external_id, 1);
        assert_eq!(deduped[0].title, "third");
        assert_eq!(deduped[1].external_id, 2);
    }

    #[test]
    fn same_id_different_source_is_not_a_duplicate() {
        let batch = vec![record("cu", 7, "a"), record("gs25", 7, "b")];
        assert_eq!(dedupe(batch).len(), 2);
    }

    #[test]
    fn exclusion_is_a_pure_filter() {
        let mut promoted = record("cu", 1, "a");
        promoted.promotion_tag = Some("덤증정".to_string());
        let mut native = record("cu", 2, "b");
        native.native_category = Some("주류".to_string());
        let plain = record("cu", 3, "c");

        let kept = apply_exclusions(
            vec![promoted, native, plain],
            &["덤증정".to_string()],
            &["주류".to_string()],
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].external_id, 3);
    }

    #[test]
    fn empty_exclusion_lists_keep_everything() {
        let batch = vec![record("cu", 1, "a"), record("cu", 2, "b")];
        assert_eq!(apply_exclusions(batch, &[], &[]).len(), 2);
    }
}
