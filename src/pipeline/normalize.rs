use crate::config::{IdPolicy, LocaleMapping, SchemaRules};
use crate::feed::model::parse_amount;
use crate::feed::{Element, Feed, Offer};
use crate::pipeline::key::resolve_raw_id;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::LazyLock;

static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("html tag pattern"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    InvalidId,
    MissingField(String),
    MissingPicture,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::InvalidId => f.write_str("invalid_id"),
            DropReason::MissingField(name) => write!(f, "missing_{name}"),
            DropReason::MissingPicture => f.write_str("missing_picture"),
        }
    }
}

#[derive(Debug, Default)]
pub struct Normalized {
    pub offers: Vec<Offer>,
    pub removed_invalid: usize,
    /// Drop counts keyed by reason, for the stage report.
    pub reasons: BTreeMap<String, usize>,
}

pub fn normalize_offers(
    offers: Vec<Offer>,
    locales: &[LocaleMapping],
    rules: &SchemaRules,
) -> Normalized {
    let mut result = Normalized {
        offers: Vec::with_capacity(offers.len()),
        ..Normalized::default()
    };
    for offer in offers {
        match normalize_offer(offer, locales, rules) {
            Ok(offer) => result.offers.push(offer),
            Err(reason) => {
                result.removed_invalid += 1;
                *result.reasons.entry(reason.to_string()).or_default() += 1;
            }
        }
    }
    result
}

/// Reshapes one offer for the marketplace, or says why it cannot be published.
///
/// Offers are never repaired beyond the fixed rules below: anything still
/// missing a mandatory field afterwards is rejected.
pub fn normalize_offer(
    mut offer: Offer,
    locales: &[LocaleMapping],
    rules: &SchemaRules,
) -> Result<Offer, DropReason> {
    offer.id = normalized_id(resolve_raw_id(&offer), rules.id_policy)?;
    map_locales(&mut offer, locales);
    normalize_old_price(&mut offer);
    offer
        .params
        .retain(|param| !param.name.trim().is_empty() && !param.value.trim().is_empty());
    limit_pictures(&mut offer, rules.max_pictures);
    check_required(&offer, rules)?;
    Ok(offer)
}

fn normalized_id(raw: &str, policy: IdPolicy) -> Result<String, DropReason> {
    let clean: String = raw.chars().filter(|ch| ch.is_ascii_alphanumeric()).collect();
    if clean.is_empty() || (policy == IdPolicy::Strict && clean.len() != raw.len()) {
        return Err(DropReason::InvalidId);
    }
    Ok(clean)
}

fn map_locales(offer: &mut Offer, locales: &[LocaleMapping]) {
    let mut values: Vec<String> = locales
        .iter()
        .map(|mapping| {
            mapping
                .sources
                .iter()
                .map(|source| clean_text(offer.field_text(source), mapping.strip_html))
                .find(|value| !value.is_empty())
                .unwrap_or_default()
        })
        .collect();

    // fallbacks read the directly mapped values only, never another fallback
    let direct = values.clone();
    for (idx, mapping) in locales.iter().enumerate() {
        if !values[idx].is_empty() {
            continue;
        }
        let Some(fallback) = &mapping.fallback else {
            continue;
        };
        if let Some(pos) = locales.iter().position(|m| &m.target == fallback) {
            values[idx] = direct[pos].clone();
        }
    }

    let consumed: HashSet<&str> = locales
        .iter()
        .flat_map(|mapping| {
            mapping
                .sources
                .iter()
                .map(String::as_str)
                .chain(std::iter::once(mapping.target.as_str()))
        })
        .collect();
    offer
        .fields
        .retain(|field| !consumed.contains(field.name.as_str()));
    for (mapping, value) in locales.iter().zip(values) {
        if !value.is_empty() {
            offer
                .fields
                .push(Element::with_text(mapping.target.as_str(), value));
        }
    }
}

fn clean_text(raw: &str, strip_html: bool) -> String {
    if strip_html {
        HTML_TAG.replace_all(raw, "").trim().to_string()
    } else {
        raw.trim().to_string()
    }
}

/// Keeps `old_price` only when it is a real discount (strictly above `price`).
fn normalize_old_price(offer: &mut Offer) {
    let keep = match (offer.old_price_amount(), offer.price_amount()) {
        (Some(old), Some(price)) => old > price,
        _ => false,
    };
    if !keep {
        offer.old_price = None;
    }
}

fn limit_pictures(offer: &mut Offer, max: usize) {
    let mut kept = 0usize;
    offer.fields.retain(|field| {
        if field.name != "picture" {
            return true;
        }
        if field.text.trim().is_empty() || kept >= max {
            return false;
        }
        kept += 1;
        true
    });
}

fn check_required(offer: &Offer, rules: &SchemaRules) -> Result<(), DropReason> {
    for name in &rules.required_fields {
        let present = match name.as_str() {
            "price" => offer.price.as_deref().and_then(parse_amount).is_some(),
            "id" => !offer.id.is_empty(),
            other => !offer.field_text(other).is_empty(),
        };
        if !present {
            return Err(DropReason::MissingField(name.clone()));
        }
    }
    if rules.require_picture && !offer.has_field("picture") {
        return Err(DropReason::MissingPicture);
    }
    Ok(())
}

/// Feed-level fixes: a `date` on the root and a `<categories>` block in the shop.
pub fn finalize_feed(feed: &mut Feed, fallback_date: impl FnOnce() -> String) {
    if feed.date().is_none() {
        feed.set_date(fallback_date());
    }
    ensure_categories(feed);
}

fn ensure_categories(feed: &mut Feed) {
    if feed.shop.head.iter().any(|el| el.name == "categories")
        || feed.shop.tail.iter().any(|el| el.name == "categories")
    {
        return;
    }
    let mut categories = Element::new("categories");
    let mut known = HashSet::new();
    for offer in &feed.shop.offers {
        let id = offer.field_text("categoryId");
        if id.is_empty() || !known.insert(id.to_string()) {
            continue;
        }
        let mut category = Element::with_text("category", id);
        category.set_attribute("id", id);
        categories.children.push(category);
    }
    feed.shop.head.insert(0, categories);
}
