use crate::feed::model::fold;
use crate::feed::{Feed, Offer};
use crate::pipeline::key::{ProductKey, resolve_key};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Vendors whose offers survive even when the reference feed lacks them.
#[derive(Debug, Clone, Default)]
pub struct VendorExceptions(HashSet<String>);

impl VendorExceptions {
    pub fn new<I, S>(vendors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            vendors
                .into_iter()
                .map(|vendor| fold(vendor.as_ref()))
                .filter(|vendor| !vendor.is_empty())
                .collect(),
        )
    }

    pub fn contains(&self, vendor: &str) -> bool {
        self.0.contains(&fold(vendor))
    }
}

/// The three fields a reference offer contributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overlay {
    pub price: Option<String>,
    pub old_price: Option<String>,
    pub available: bool,
}

impl Overlay {
    fn from_offer(offer: &Offer) -> Self {
        Self {
            price: offer.price.clone(),
            old_price: offer.old_price.clone(),
            available: offer.available,
        }
    }
}

/// Reference-feed lookup. The first offer seen for a key wins.
#[derive(Debug, Default)]
pub struct ReferenceIndex {
    entries: HashMap<ProductKey, Overlay>,
    duplicates: usize,
}

impl ReferenceIndex {
    pub fn build(reference: &Feed) -> Self {
        let mut index = Self::default();
        for offer in &reference.shop.offers {
            let key = resolve_key(offer);
            if key.is_empty() {
                continue;
            }
            if index.entries.contains_key(&key) {
                index.duplicates += 1;
                continue;
            }
            index.entries.insert(key, Overlay::from_offer(offer));
        }
        index
    }

    pub fn get(&self, key: &ProductKey) -> Option<&Overlay> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reference offers ignored because an earlier one had the same key.
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OverlayChanges {
    pub price: bool,
    pub old_price: bool,
    pub available: bool,
}

/// Copies price, old price and availability from the reference offer.
pub fn apply_overlay(mut offer: Offer, overlay: &Overlay) -> (Offer, OverlayChanges) {
    let changes = OverlayChanges {
        price: offer.price != overlay.price,
        old_price: offer.old_price != overlay.old_price,
        available: offer.available != overlay.available,
    };
    offer.price = overlay.price.clone();
    offer.old_price = overlay.old_price.clone();
    offer.available = overlay.available;
    (offer, changes)
}

#[derive(Debug, Default)]
pub struct Reconciled {
    pub offers: Vec<Offer>,
    pub matched: usize,
    pub exempted: usize,
    pub removed_missing: usize,
    pub price_updates: usize,
    /// Old price and availability changes, counted per field.
    pub other_updates: usize,
}

/// Drops primary offers unknown to the reference feed (unless their vendor is
/// exempt) and overlays reference values onto the matched ones. Order is kept.
pub fn reconcile(
    primary: Vec<Offer>,
    index: &ReferenceIndex,
    exceptions: &VendorExceptions,
) -> Reconciled {
    let mut result = Reconciled {
        offers: Vec::with_capacity(primary.len()),
        ..Reconciled::default()
    };

    for offer in primary {
        let key = resolve_key(&offer);
        match index.get(&key) {
            Some(overlay) => {
                let (offer, changes) = apply_overlay(offer, overlay);
                result.matched += 1;
                result.price_updates += usize::from(changes.price);
                result.other_updates +=
                    usize::from(changes.old_price) + usize::from(changes.available);
                result.offers.push(offer);
            }
            None if exceptions.contains(offer.vendor()) => {
                result.exempted += 1;
                result.offers.push(offer);
            }
            None => result.removed_missing += 1,
        }
    }

    result
}
