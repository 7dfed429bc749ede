//! Canonical category rule engine
//!
//! Maps a product title (plus the source's own category label, when one is
//! exposed) to the fixed canonical taxonomy. Pure and total: same inputs
//! always produce the same output, and the output is always a member of
//! `CanonicalCategory`.
//!
//! Resolution order:
//! 1. authoritative 1:1 lookup of the source's native category label,
//! 2. ordered keyword rules, first match wins,
//! 3. `Other`.
//!
//! Rule ordering encodes precedence. Household keywords are evaluated before
//! frozen-dessert keywords because short tokens like a trailing "바" are
//! ambiguous between confectionery and hygiene products.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::product::CanonicalCategory;

/// "바 45g"-style product-weight tokens mark packaged food bars, not ice bars.
static WEIGHT_BAR_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"바\s*\d+g").unwrap());

/// One ordered `(keyword set, category)` rule.
///
/// A rule matches when any keyword occurs in the title, or when its optional
/// pattern/suffix heuristic fires. Rules are immutable configuration data.
#[derive(Debug, Clone)]
pub struct ClassificationRule {
    category: CanonicalCategory,
    keywords: Vec<String>,
    pattern: Option<Regex>,
    suffix: Option<String>,
}

impl ClassificationRule {
    pub fn new(category: CanonicalCategory, keywords: &[&str]) -> Self {
        Self {
            category,
            keywords: keywords.iter().map(|k| (*k).to_string()).collect(),
            pattern: None,
            suffix: None,
        }
    }

    pub fn with_pattern(mut self, pattern: Regex) -> Self {
        self.pattern = Some(pattern);
        self
    }

    /// Also match titles ending in the given token (e.g. ice bars named
    /// "...바" with no other frozen keyword).
    pub fn with_suffix(mut self, suffix: &str) -> Self {
        self.suffix = Some(suffix.to_string());
        self
    }

    pub fn category(&self) -> CanonicalCategory {
        self.category
    }

    fn matches(&self, title: &str) -> bool {
        if self.keywords.iter().any(|k| title.contains(k.as_str())) {
            return true;
        }
        if let Some(pattern) = &self.pattern {
            if pattern.is_match(title) {
                return true;
            }
        }
        if let Some(suffix) = &self.suffix {
            if title.trim_end().ends_with(suffix.as_str()) {
                return true;
            }
        }
        false
    }
}

/// Rule engine over an authoritative native-label map and an ordered rule
/// list. Construct once, share read-only.
#[derive(Debug, Clone)]
pub struct CategoryClassifier {
    native_map: HashMap<String, CanonicalCategory>,
    rules: Vec<ClassificationRule>,
}

impl CategoryClassifier {
    pub fn new(
        native_map: HashMap<String, CanonicalCategory>,
        rules: Vec<ClassificationRule>,
    ) -> Self {
        Self { native_map, rules }
    }

    /// Classifier with the built-in native map and rule table.
    pub fn with_default_rules() -> Self {
        Self::new(default_native_map(), default_rules())
    }

    /// Resolve a canonical category. Total: always returns a member of the
    /// taxonomy, defaulting to `Other`.
    pub fn classify(
        &self,
        title: &str,
        native_category: Option<&str>,
    ) -> CanonicalCategory {
        // A source's own taxonomy is ground truth when it maps 1:1.
        if let Some(native) = native_category {
            if let Some(category) = self.native_map.get(native.trim()) {
                return *category;
            }
        }

        self.rules
            .iter()
            .find(|rule| rule.matches(title))
            .map(|rule| rule.category)
            .unwrap_or(CanonicalCategory::Other)
    }
}

/// Authoritative mapping of the source chains' own category labels.
pub fn default_native_map() -> HashMap<String, CanonicalCategory> {
    use CanonicalCategory::*;
    [
        ("간편식사", ReadyMeal),
        ("도시락", ReadyMeal),
        ("과자류", Snack),
        ("과자", Snack),
        ("아이스", Frozen),
        ("아이스크림", Frozen),
        ("식품", Food),
        ("라면", Food),
        ("음료", Beverage),
        ("생활용품", Household),
        ("기타", Other),
    ]
    .into_iter()
    .map(|(label, category)| (label.to_string(), category))
    .collect()
}

/// Built-in keyword rules, in precedence order:
/// household → ready-meal → food → snack → frozen → beverage.
pub fn default_rules() -> Vec<ClassificationRule> {
    use CanonicalCategory::*;
    vec![
        ClassificationRule::new(
            Household,
            &[
                "치약", "칫솔", "가글", "생리대", "샴푸", "린스", "면도기", "물티슈",
                "마스크", "스타킹", "건전지", "비누", "로션", "립케어", "세제", "락스",
                "우산", "양말", "휴지",
            ],
        ),
        ClassificationRule::new(
            ReadyMeal,
            &[
                "도시락", "김밥", "삼각", "주먹밥", "샌드위치", "햄버거", "버거", "샐러드",
            ],
        ),
        ClassificationRule::new(
            Food,
            &[
                "라면", "우동", "국수", "햇반", "핫바", "후랑크", "소시지", "만두",
                "치킨", "육개장", "죽", "탕", "찌개",
            ],
        )
        .with_pattern(WEIGHT_BAR_PATTERN.clone()),
        ClassificationRule::new(
            Snack,
            &[
                "스낵", "젤리", "사탕", "껌", "초코", "쿠키", "칩", "빵", "약과",
                "양갱", "팝콘", "아몬드",
            ],
        ),
        ClassificationRule::new(
            Frozen,
            &[
                "하겐", "소르베", "나뚜루", "아이스", "콘", "파인트", "설레임",
                "폴라포", "스크류", "돼지바", "빙수", "구슬", "빵빠레",
            ],
        )
        .with_suffix("바"),
        ClassificationRule::new(
            Beverage,
            &[
                "우유", "커피", "라떼", "콜라", "사이다", "에이드", "주스", "보리차",
                "비타", "박카스", "두유", "요거트", "워터", "맥주", "하이볼",
            ],
        ),
    ]
}
