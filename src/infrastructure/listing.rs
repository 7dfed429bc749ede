//! Listing payload extraction
//!
//! Turns one page response into raw items. Two payload shapes exist in the
//! wild: server-rendered markup fragments with repeated item blocks, and
//! JSON with a results array. Some JSON endpoints double-encode the body
//! (a JSON string containing JSON), so structured parsing falls back to a
//! string-wrapped parse before giving up.

use scraper::{ElementRef, Html, Selector};
use serde_json::Value;

use crate::domain::error::ParseError;
use crate::domain::product::RawItem;
use crate::infrastructure::config::{JsonFieldMap, MarkupSelectors, PayloadShape};

/// Extract the raw items of one page payload.
pub fn extract_items(shape: &PayloadShape, body: &str) -> Result<Vec<RawItem>, ParseError> {
    match shape {
        PayloadShape::Json(map) => extract_from_json(map, body),
        PayloadShape::Markup(selectors) => extract_from_markup(selectors, body),
    }
}

fn extract_from_json(map: &JsonFieldMap, body: &str) -> Result<Vec<RawItem>, ParseError> {
    let payload = parse_json_payload(body)?;

    // A missing results array means an empty page, not a malformed one.
    let Some(results) = payload.get(&map.results_field).and_then(Value::as_array) else {
        return Ok(Vec::new());
    };

    let items = results
        .iter()
        .map(|entry| RawItem {
            title: string_field(entry, &map.title_field),
            price_text: scalar_field(entry, &map.price_field),
            image: string_field(entry, &map.image_field),
            structured_id: map
                .id_field
                .as_deref()
                .and_then(|field| numeric_field(entry, field)),
            id_hint: map
                .id_hint_field
                .as_deref()
                .and_then(|field| scalar_field(entry, field)),
            ..Default::default()
        })
        .collect();
    Ok(items)
}

/// Structured parse first, then the string-wrapped variant.
fn parse_json_payload(body: &str) -> Result<Value, ParseError> {
    let value: Value =
        serde_json::from_str(body.trim()).map_err(|e| ParseError::MalformedPayload {
            reason: format!("not JSON: {e}"),
        })?;

    match value {
        Value::String(inner) => {
            serde_json::from_str(&inner).map_err(|e| ParseError::MalformedPayload {
                reason: format!("string-wrapped payload is not JSON: {e}"),
            })
        }
        other => Ok(other),
    }
}

fn string_field(entry: &Value, field: &str) -> Option<String> {
    entry
        .get(field)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// String or number, rendered as text for the normalizer's parsers.
fn scalar_field(entry: &Value, field: &str) -> Option<String> {
    match entry.get(field)? {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn numeric_field(entry: &Value, field: &str) -> Option<i64> {
    match entry.get(field)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn extract_from_markup(
    selectors: &MarkupSelectors,
    body: &str,
) -> Result<Vec<RawItem>, ParseError> {
    let item_selector =
        Selector::parse(&selectors.item).map_err(|e| ParseError::MalformedPayload {
            reason: format!("invalid item selector '{}': {e}", selectors.item),
        })?;

    let fragment = Html::parse_fragment(body);
    let mut items = Vec::new();

    for element in fragment.select(&item_selector) {
        if let Some(marker) = &selectors.no_data_marker {
            let text: String = element.text().collect();
            if text.contains(marker.as_str()) {
                break;
            }
        }

        // Blocks without a title match are navigation/decoration, not items.
        let Some(title) = select_text(&element, &selectors.title) else {
            continue;
        };

        items.push(RawItem {
            title: Some(title),
            price_text: select_text(&element, &selectors.price),
            image: select_attr(&element, &selectors.image, "src"),
            link: select_attr(&element, &selectors.link, "href"),
            promo_text: select_all_text(&element, &selectors.promo_tag),
            ..Default::default()
        });
    }
    Ok(items)
}

fn select_text(element: &ElementRef, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    element
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|text| !text.is_empty())
}

/// All matches joined, for multi-tag fields like promo badges.
fn select_all_text(element: &ElementRef, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    let joined = element
        .select(&selector)
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    (!joined.is_empty()).then_some(joined)
}

fn select_attr(element: &ElementRef, selector: &str, attr: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    element
        .select(&selector)
        .next()
        .and_then(|el| el.value().attr(attr))
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::{JsonFieldMap, MarkupSelectors};

    fn markup_selectors() -> MarkupSelectors {
        MarkupSelectors {
            item: "li".to_string(),
            title: "div.tit_product".to_string(),
            price: "div.price span".to_string(),
            image: "div.pic_product img".to_string(),
            link: "a[href]".to_string(),
            promo_tag: "ul.tag_list_01 li".to_string(),
            no_data_marker: Some("데이터가 없습니다".to_string()),
        }
    }

    fn json_map() -> JsonFieldMap {
        JsonFieldMap {
            results_field: "results".to_string(),
            title_field: "goodsNm".to_string(),
            price_field: "price".to_string(),
            image_field: "attFileNm".to_string(),
            id_field: None,
            id_hint_field: Some("attFileId".to_string()),
        }
    }

    const LISTING_FRAGMENT: &str = r#"
        <ul>
          <li>
            <div class="pic_product"><img src="/upload/product/8123.jpg"/></div>
            <div class="tit_product">불닭 김밥</div>
            <div class="price"><span>2,500</span></div>
            <ul class="tag_list_01"><li>1+1</li><li>행사</li></ul>
            <a href="javascript:fncGoView('8123');">보기</a>
          </li>
          <li class="banner">no product here</li>
        </ul>
    "#;

    #[test]
    fn markup_items_are_extracted_with_fields() {
        let items =
            extract_items(&PayloadShape::Markup(markup_selectors()), LISTING_FRAGMENT).unwrap();
        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert_eq!(item.title.as_deref(), Some("불닭 김밥"));
        assert_eq!(item.price_text.as_deref(), Some("2,500"));
        assert_eq!(item.image.as_deref(), Some("/upload/product/8123.jpg"));
        assert_eq!(item.link.as_deref(), Some("javascript:fncGoView('8123');"));
        assert_eq!(item.promo_text.as_deref(), Some("1+1 행사"));
    }

    #[test]
    fn no_data_marker_terminates_the_item_list() {
        let body = r#"
            <ul>
              <li><div class="tit_product">first</div></li>
              <li>데이터가 없습니다</li>
              <li><div class="tit_product">after marker</div></li>
            </ul>
        "#;
        let items = extract_items(&PayloadShape::Markup(markup_selectors()), body).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title.as_deref(), Some("first"));
    }

    #[test]
    fn json_results_are_extracted() {
        let body = r#"{"results":[
            {"goodsNm":" 바나나맛 우유 ", "price": 1700, "attFileNm":"//img.test/1.jpg", "attFileId":"GD_20240105_000042"}
        ]}"#;
        let items = extract_items(&PayloadShape::Json(json_map()), body).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title.as_deref(), Some("바나나맛 우유"));
        assert_eq!(items[0].price_text.as_deref(), Some("1700"));
        assert_eq!(items[0].id_hint.as_deref(), Some("GD_20240105_000042"));
    }

    #[test]
    fn string_wrapped_json_is_unwrapped() {
        let body = r#""{\"results\":[{\"goodsNm\":\"커피\",\"price\":\"1,500\"}]}""#;
        let items = extract_items(&PayloadShape::Json(json_map()), body).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title.as_deref(), Some("커피"));
        assert_eq!(items[0].price_text.as_deref(), Some("1,500"));
    }

    #[test]
    fn missing_results_array_is_an_empty_page() {
        let items = extract_items(&PayloadShape::Json(json_map()), r#"{"count": 0}"#).unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn non_json_body_is_malformed() {
        let err = extract_items(&PayloadShape::Json(json_map()), "<html>busy</html>").unwrap_err();
        assert!(matches!(err, ParseError::MalformedPayload { .. }));
    }
}
