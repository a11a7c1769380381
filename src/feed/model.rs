use serde::Serialize;

/// Tag aliases vendors use for the pre-discount price, in priority order.
pub const OLD_PRICE_TAGS: &[&str] = &["old_price", "oldprice", "price_old", "old", "priceold"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Generic XML element used for everything the pipeline passes through untouched.
///
/// Mixed content is flattened: text segments are concatenated into `text` and
/// child elements are kept in document order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<Attribute>,
    pub text: String,
    pub children: Vec<Element>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_text(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|attr| attr.name == name)
            .map(|attr| attr.value.as_str())
    }

    pub fn set_attribute(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|attr| attr.name == name) {
            Some(existing) => existing.value = value,
            None => self.attributes.push(Attribute::new(name, value)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Param {
    pub name: String,
    pub value: String,
    /// Attributes besides `name`, e.g. `unit`.
    pub attributes: Vec<Attribute>,
}

impl Param {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            attributes: Vec::new(),
        }
    }
}

/// One product listing.
///
/// The fields the pipeline reads or rewrites are lifted out of the element;
/// every other child (`url`, `categoryId`, `picture`, locale texts, ...) stays
/// in `fields` in source order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Offer {
    pub id: String,
    pub available: bool,
    /// Offer attributes other than `id` and `available`.
    pub attributes: Vec<Attribute>,
    pub price: Option<String>,
    pub old_price: Option<String>,
    pub params: Vec<Param>,
    pub fields: Vec<Element>,
}

impl Offer {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            available: false,
            attributes: Vec::new(),
            price: None,
            old_price: None,
            params: Vec::new(),
            fields: Vec::new(),
        }
    }

    /// Trimmed text of the first field with `name`, or `""`.
    pub fn field_text(&self, name: &str) -> &str {
        self.fields
            .iter()
            .find(|field| field.name == name)
            .map(|field| field.text.trim())
            .unwrap_or("")
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|field| field.name == name)
    }

    /// Replaces the first field with `name` or appends a new one; extra
    /// duplicates are removed.
    pub fn set_field(&mut self, name: &str, text: impl Into<String>) {
        let text = text.into();
        match self.fields.iter().position(|field| field.name == name) {
            Some(idx) => {
                self.fields[idx].text = text;
                self.fields[idx].children.clear();
                let mut seen = 0usize;
                self.fields.retain(|field| {
                    if field.name != name {
                        return true;
                    }
                    seen += 1;
                    seen == 1
                });
            }
            None => self.fields.push(Element::with_text(name, text)),
        }
    }

    pub fn remove_fields(&mut self, name: &str) {
        self.fields.retain(|field| field.name != name);
    }

    pub fn vendor(&self) -> &str {
        self.field_text("vendor")
    }

    pub fn vendor_code(&self) -> &str {
        self.field_text("vendorCode")
    }

    /// First non-blank value of a parameter, matching the name trimmed and case-folded.
    pub fn param_value(&self, name: &str) -> Option<&str> {
        let target = fold(name);
        self.params
            .iter()
            .filter(|param| fold(&param.name) == target)
            .map(|param| param.value.trim())
            .find(|value| !value.is_empty())
    }

    pub fn price_amount(&self) -> Option<f64> {
        self.price.as_deref().and_then(parse_amount)
    }

    pub fn old_price_amount(&self) -> Option<f64> {
        self.old_price.as_deref().and_then(parse_amount)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Shop {
    /// Shop children before `<offers>`: name, company, currencies, categories...
    pub head: Vec<Element>,
    pub offers: Vec<Offer>,
    /// Shop children after `<offers>`.
    pub tail: Vec<Element>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Feed {
    pub root: String,
    pub attributes: Vec<Attribute>,
    pub shop: Shop,
}

impl Feed {
    pub fn date(&self) -> Option<&str> {
        self.attributes
            .iter()
            .find(|attr| attr.name == "date")
            .map(|attr| attr.value.trim())
            .filter(|value| !value.is_empty())
    }

    pub fn set_date(&mut self, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|attr| attr.name == "date") {
            Some(attr) => attr.value = value,
            None => self.attributes.push(Attribute::new("date", value)),
        }
    }
}

pub fn fold(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Parses a price like `1299`, `1299.50` or `1 299,50`.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|ch| !ch.is_whitespace())
        .map(|ch| if ch == ',' { '.' } else { ch })
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|value| value.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_lookup_is_case_insensitive_and_skips_blank() {
        let mut offer = Offer::new("1");
        offer.params.push(Param::new(" артикул ", "   "));
        offer.params.push(Param::new("АРТИКУЛ", " AB-1 "));
        assert_eq!(offer.param_value("Артикул"), Some("AB-1"));
        assert_eq!(offer.param_value("Колір"), None);
    }

    #[test]
    fn set_field_replaces_and_dedupes() {
        let mut offer = Offer::new("1");
        offer.fields.push(Element::with_text("name", "a"));
        offer.fields.push(Element::with_text("url", "u"));
        offer.fields.push(Element::with_text("name", "b"));
        offer.set_field("name", "c");
        let names: Vec<_> = offer.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["name", "url"]);
        assert_eq!(offer.field_text("name"), "c");
    }

    #[test]
    fn amounts_accept_comma_and_spaces() {
        assert_eq!(parse_amount("1 299,50"), Some(1299.5));
        assert_eq!(parse_amount(" 100 "), Some(100.0));
        assert_eq!(parse_amount("n/a"), None);
        assert_eq!(parse_amount(""), None);
    }
}
