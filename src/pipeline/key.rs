use crate::feed::Offer;
use crate::feed::model::fold;
use std::fmt;

/// Vendor article number parameter, the preferred matching key.
pub const ARTICLE_PARAM: &str = "Артикул";

/// Matching identifier for cross-feed reconciliation. Never written to output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProductKey(String);

impl ProductKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ProductKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `Артикул` param, then `vendorCode`, then the offer id; trimmed, case preserved.
pub fn resolve_raw_id(offer: &Offer) -> &str {
    if let Some(article) = offer.param_value(ARTICLE_PARAM) {
        return article;
    }
    let vendor_code = offer.vendor_code();
    if !vendor_code.is_empty() {
        return vendor_code;
    }
    offer.id.trim()
}

pub fn resolve_key(offer: &Offer) -> ProductKey {
    ProductKey(fold(resolve_raw_id(offer)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{Element, Param};

    fn offer(id: &str, vendor_code: Option<&str>, article: Option<&str>) -> Offer {
        let mut offer = Offer::new(id);
        if let Some(code) = vendor_code {
            offer.fields.push(Element::with_text("vendorCode", code));
        }
        if let Some(article) = article {
            offer.params.push(Param::new(ARTICLE_PARAM, article));
        }
        offer
    }

    #[test]
    fn article_param_wins_over_everything() {
        let o = offer("100", Some("VC-1"), Some(" Ab-9 "));
        assert_eq!(resolve_raw_id(&o), "Ab-9");
        assert_eq!(resolve_key(&o).as_str(), "ab-9");
    }

    #[test]
    fn falls_back_to_vendor_code_then_id() {
        assert_eq!(resolve_key(&offer("100", Some("VC-1"), Some("  "))).as_str(), "vc-1");
        assert_eq!(resolve_key(&offer("X100", Some(""), None)).as_str(), "x100");
    }

    #[test]
    fn article_param_name_is_case_insensitive() {
        let mut o = Offer::new("1");
        o.params.push(Param::new("артикул", "K-1"));
        assert_eq!(resolve_key(&o).as_str(), "k-1");
    }

    #[test]
    fn keys_fold_cyrillic_case() {
        let a = offer("1", None, Some("МД-7"));
        let b = offer("2", None, Some("мд-7"));
        assert_eq!(resolve_key(&a), resolve_key(&b));
    }
}
