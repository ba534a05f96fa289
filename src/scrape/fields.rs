//! Structured-field extraction for product pages.
//!
//! Different storefronts use incompatible markup, so every field is backed by
//! an ordered chain of CSS-selector strategies tried in sequence until one
//! yields text. Adding support for a new site means registering selectors,
//! not editing control flow; a field with no match is simply omitted.

use regex::Regex;
use scraper::{Html, Selector};
use std::sync::LazyLock;

/// Longest value kept per field so the header chunk stays within one window.
const FIELD_VALUE_MAX_CHARS: usize = 160;

static LEADING_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[0-9][0-9.,]*").unwrap_or_else(|err| panic!("leading-number regex: {err}"))
});

/// How a matched element's text is reduced to the field value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Refine {
    /// Whole (whitespace-normalized) text content.
    Verbatim,
    /// First numeric token, for ratings and review counts buried in prose.
    LeadingNumber,
}

/// One field's ordered strategy chain.
#[derive(Clone, Debug)]
pub struct FieldRule {
    pub label: &'static str,
    pub selectors: Vec<String>,
    pub refine: Refine,
}

impl FieldRule {
    pub fn new<I, S>(label: &'static str, selectors: I, refine: Refine) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            label,
            selectors: selectors.into_iter().map(Into::into).collect(),
            refine,
        }
    }
}

/// Ordered table of field rules applied to full-mode scrapes.
#[derive(Clone, Debug)]
pub struct FieldRegistry {
    rules: Vec<FieldRule>,
}

impl FieldRegistry {
    pub fn new(rules: Vec<FieldRule>) -> Self {
        Self { rules }
    }

    /// Registers an additional rule after the defaults.
    pub fn register(&mut self, rule: FieldRule) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[FieldRule] {
        &self.rules
    }

    /// Builds the pipe-delimited header from whichever fields matched.
    /// Returns `None` when no strategy matched anything.
    pub fn extract_header(&self, doc: &Html) -> Option<String> {
        let mut parts = Vec::new();
        for rule in &self.rules {
            if let Some(value) = extract_field(doc, rule) {
                parts.push(format!("{}: {}", rule.label, value));
            }
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" | "))
        }
    }
}

impl Default for FieldRegistry {
    fn default() -> Self {
        Self::new(vec![
            FieldRule::new(
                "TITLE",
                ["#productTitle", "h1[itemprop=name]", "h1.product-title", "h1"],
                Refine::Verbatim,
            ),
            FieldRule::new(
                "PRICE",
                [
                    ".a-price .a-offscreen",
                    "#priceblock_ourprice",
                    "[itemprop=price]",
                    "[class*=selling-price]",
                    ".price",
                    "[class*=price]",
                ],
                Refine::Verbatim,
            ),
            FieldRule::new(
                "DISCOUNT",
                [".savingsPercentage", "[class*=discount]"],
                Refine::Verbatim,
            ),
            FieldRule::new(
                "MRP",
                [
                    ".a-price.a-text-price .a-offscreen",
                    "[class*=mrp]",
                    "del",
                    "s",
                ],
                Refine::Verbatim,
            ),
            FieldRule::new(
                "RATING",
                [
                    "[itemprop=ratingValue]",
                    "#acrPopover .a-icon-alt",
                    ".a-icon-alt",
                    "[class*=rating-value]",
                    "[class*=rating]",
                ],
                Refine::LeadingNumber,
            ),
            FieldRule::new(
                "REVIEWS",
                [
                    "#acrCustomerReviewText",
                    "[class*=review-count]",
                    "[class*=ratings-count]",
                ],
                Refine::LeadingNumber,
            ),
            FieldRule::new(
                "FEATURES",
                ["#feature-bullets", "ul.product-features", "[class*=feature]"],
                Refine::Verbatim,
            ),
            FieldRule::new(
                "DESCRIPTION",
                [
                    "#productDescription",
                    "[itemprop=description]",
                    "[class*=description]",
                ],
                Refine::Verbatim,
            ),
            FieldRule::new(
                "AVAILABILITY",
                [
                    "#availability",
                    "[itemprop=availability]",
                    "[class*=availability]",
                    "[class*=stock]",
                ],
                Refine::Verbatim,
            ),
        ])
    }
}

fn extract_field(doc: &Html, rule: &FieldRule) -> Option<String> {
    for raw in &rule.selectors {
        // An unparsable selector is just a strategy miss.
        let Ok(selector) = Selector::parse(raw) else {
            continue;
        };
        for element in doc.select(&selector) {
            let text = normalize(&element.text().collect::<String>());
            if text.is_empty() {
                continue;
            }
            let value = match rule.refine {
                Refine::Verbatim => text,
                Refine::LeadingNumber => match LEADING_NUMBER.find(&text) {
                    Some(found) => found.as_str().to_string(),
                    None => continue,
                },
            };
            return Some(truncate_chars(&value, FIELD_VALUE_MAX_CHARS));
        }
    }
    None
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(html: &str) -> Html {
        Html::parse_document(html)
    }

    #[test]
    fn first_matching_strategy_wins() {
        let html = r#"
            <html><body>
                <h1>Generic Heading</h1>
                <span id="productTitle">  Blue   Cotton Shirt </span>
            </body></html>"#;
        let header = FieldRegistry::default().extract_header(&doc(html)).unwrap();
        assert!(header.starts_with("TITLE: Blue Cotton Shirt"));
    }

    #[test]
    fn missing_fields_are_omitted_not_errors() {
        let html = r#"<html><body><p class="price">$19.99</p></body></html>"#;
        let header = FieldRegistry::default().extract_header(&doc(html)).unwrap();
        assert!(header.contains("PRICE: $19.99"));
        assert!(!header.contains("TITLE"));
        assert!(!header.contains("RATING"));
    }

    #[test]
    fn rating_reduces_to_leading_number() {
        let html = r#"<html><body>
            <span class="a-icon-alt">4.1 out of 5 stars</span>
        </body></html>"#;
        let header = FieldRegistry::default().extract_header(&doc(html)).unwrap();
        assert!(header.contains("RATING: 4.1"), "got {header}");
    }

    #[test]
    fn no_matches_yields_none() {
        let html = "<html><body><script>var x = 1;</script></body></html>";
        assert!(FieldRegistry::default().extract_header(&doc(html)).is_none());
    }

    #[test]
    fn registry_is_extensible() {
        let mut registry = FieldRegistry::new(Vec::new());
        registry.register(FieldRule::new("COLOR", ["span.swatch"], Refine::Verbatim));
        let html = r#"<html><body><span class="swatch">Navy</span></body></html>"#;
        let header = registry.extract_header(&doc(html)).unwrap();
        assert_eq!(header, "COLOR: Navy");
    }
}
