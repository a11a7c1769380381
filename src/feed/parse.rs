use crate::feed::FeedError;
use crate::feed::model::{Attribute, Element, Feed, OLD_PRICE_TAGS, Offer, Param, Shop};
use quick_xml::Reader;
use quick_xml::events::{BytesDecl, BytesStart, Event};

/// Parses a YML-style catalog (`<root><shop>...<offers><offer/>...</offers></shop></root>`).
///
/// Element names are matched without namespace prefixes. Root children other
/// than `<shop>` are not retained.
pub fn parse_feed(bytes: &[u8]) -> Result<Feed, FeedError> {
    let root = parse_tree(bytes)?;
    feed_from_root(root)
}

pub(crate) fn parse_tree(bytes: &[u8]) -> Result<Element, FeedError> {
    std::str::from_utf8(bytes)
        .map_err(|err| FeedError::Malformed(format!("feed is not valid UTF-8: {err}")))?;
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Decl(ref decl)) => check_encoding(decl)?,
            Ok(Event::Start(ref e)) => stack.push(start_element(e)?),
            Ok(Event::Empty(ref e)) => {
                let element = start_element(e)?;
                attach(&mut stack, &mut root, element)?;
            }
            Ok(Event::End(_)) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| FeedError::Malformed("unbalanced closing tag".into()))?;
                attach(&mut stack, &mut root, element)?;
            }
            Ok(Event::Text(ref e)) => {
                if let Some(current) = stack.last_mut() {
                    let text = match e.unescape() {
                        Ok(text) => text.into_owned(),
                        // unknown HTML entities such as &nbsp; are kept verbatim
                        Err(_) => String::from_utf8_lossy(e).into_owned(),
                    };
                    current.text.push_str(&text);
                }
            }
            Ok(Event::CData(e)) => {
                if let Some(current) = stack.last_mut() {
                    current
                        .text
                        .push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Ok(Event::Eof) => break,
            Err(err) => {
                return Err(FeedError::Xml {
                    position: reader.buffer_position() as u64,
                    message: err.to_string(),
                });
            }
            _ => {}
        }
        buf.clear();
    }

    if let Some(open) = stack.last() {
        return Err(FeedError::Malformed(format!(
            "element <{}> is never closed",
            open.name
        )));
    }
    root.ok_or_else(|| FeedError::Malformed("document has no root element".into()))
}

/// Only UTF-8 documents are accepted; a declared legacy encoding is an error
/// even when the bytes happen to be valid UTF-8.
fn check_encoding(decl: &BytesDecl<'_>) -> Result<(), FeedError> {
    let Some(encoding) = decl.encoding() else {
        return Ok(());
    };
    let encoding = encoding.map_err(|err| FeedError::Malformed(err.to_string()))?;
    let name = String::from_utf8_lossy(&encoding);
    if name.eq_ignore_ascii_case("utf-8") || name.eq_ignore_ascii_case("utf8") {
        Ok(())
    } else {
        Err(FeedError::Malformed(format!(
            "unsupported encoding `{name}`, expected UTF-8"
        )))
    }
}

fn start_element(start: &BytesStart<'_>) -> Result<Element, FeedError> {
    let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|err| FeedError::Malformed(format!("<{name}>: {err}")))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = match attr.unescape_value() {
            Ok(value) => value.into_owned(),
            Err(_) => String::from_utf8_lossy(&attr.value).into_owned(),
        };
        attributes.push(Attribute::new(key, value));
    }
    Ok(Element {
        name,
        attributes,
        ..Element::default()
    })
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
) -> Result<(), FeedError> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(element);
            Ok(())
        }
        None if root.is_none() => {
            *root = Some(element);
            Ok(())
        }
        None => Err(FeedError::Malformed(format!(
            "second root element <{}>",
            element.name
        ))),
    }
}

fn feed_from_root(root: Element) -> Result<Feed, FeedError> {
    let Element {
        name,
        attributes,
        children,
        ..
    } = root;
    let shop = children
        .into_iter()
        .find(|child| child.name == "shop")
        .ok_or_else(|| FeedError::Malformed(format!("<{name}> has no <shop> element")))?;

    Ok(Feed {
        root: name,
        attributes,
        shop: shop_from_element(shop),
    })
}

fn shop_from_element(shop: Element) -> Shop {
    let mut result = Shop::default();
    let mut seen_offers = false;
    for child in shop.children {
        if child.name == "offers" && !seen_offers {
            seen_offers = true;
            result.offers = child
                .children
                .into_iter()
                .filter(|item| item.name == "offer")
                .map(offer_from_element)
                .collect();
        } else if seen_offers {
            result.tail.push(child);
        } else {
            result.head.push(child);
        }
    }
    result
}

pub(crate) fn offer_from_element(element: Element) -> Offer {
    let mut offer = Offer::new("");
    for attr in element.attributes {
        match attr.name.as_str() {
            "id" => offer.id = attr.value.trim().to_string(),
            "available" => offer.available = attr.value.trim() == "true",
            _ => offer.attributes.push(attr),
        }
    }

    let mut old_prices: Vec<(usize, String)> = Vec::new();
    for child in element.children {
        let text = child.text.trim();
        if child.name == "price" {
            if offer.price.is_none() && !text.is_empty() {
                offer.price = Some(text.to_string());
            }
        } else if let Some(rank) = OLD_PRICE_TAGS.iter().position(|tag| *tag == child.name) {
            if !text.is_empty() {
                old_prices.push((rank, text.to_string()));
            }
        } else if child.name == "param" {
            let mut param = Param::new("", child.text.clone());
            for attr in child.attributes {
                if attr.name == "name" {
                    param.name = attr.value;
                } else {
                    param.attributes.push(attr);
                }
            }
            offer.params.push(param);
        } else {
            offer.fields.push(child);
        }
    }
    // stable sort keeps document order among equal tags
    old_prices.sort_by_key(|(rank, _)| *rank);
    offer.old_price = old_prices.into_iter().next().map(|(_, value)| value);
    offer
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<yml_catalog date="2024-05-01 10:00">
  <shop>
    <name>Aqua</name>
    <currencies><currency id="UAH" rate="1"/></currencies>
    <offers>
      <offer id="101" available="true" group_id="7">
        <price>1200</price>
        <oldprice>1500</oldprice>
        <old_price></old_price>
        <price_old>1400</price_old>
        <name>Змішувач &amp; кран</name>
        <description><![CDATA[<p>Опис</p>]]></description>
        <vendor>Мойдодыр</vendor>
        <param name="Артикул">MD-1</param>
        <param name="Вага" unit="кг">2</param>
      </offer>
      <offer id="102"><price>10</price></offer>
    </offers>
    <delivery>none</delivery>
  </shop>
</yml_catalog>"#;

    #[test]
    fn parses_shop_layout() {
        let feed = parse_feed(SAMPLE.as_bytes()).expect("parse");
        assert_eq!(feed.root, "yml_catalog");
        assert_eq!(feed.date(), Some("2024-05-01 10:00"));
        let head: Vec<_> = feed.shop.head.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(head, vec!["name", "currencies"]);
        assert_eq!(feed.shop.tail.len(), 1);
        assert_eq!(feed.shop.offers.len(), 2);
    }

    #[test]
    fn lifts_offer_fields() {
        let feed = parse_feed(SAMPLE.as_bytes()).expect("parse");
        let offer = &feed.shop.offers[0];
        assert_eq!(offer.id, "101");
        assert!(offer.available);
        assert_eq!(offer.attributes, vec![Attribute::new("group_id", "7")]);
        assert_eq!(offer.price.as_deref(), Some("1200"));
        // `oldprice` outranks `price_old`, the empty `old_price` is ignored
        assert_eq!(offer.old_price.as_deref(), Some("1500"));
        assert_eq!(offer.field_text("name"), "Змішувач & кран");
        assert_eq!(offer.field_text("description"), "<p>Опис</p>");
        assert_eq!(offer.vendor(), "Мойдодыр");
        assert_eq!(offer.params.len(), 2);
        assert_eq!(offer.params[1].attributes, vec![Attribute::new("unit", "кг")]);
        assert!(!feed.shop.offers[1].available);
    }

    #[test]
    fn rejects_truncated_document() {
        let err = parse_feed(b"<yml_catalog><shop><offers>").expect_err("truncated");
        assert!(matches!(err, FeedError::Malformed(_) | FeedError::Xml { .. }));
    }

    #[test]
    fn rejects_windows_1251_bytes() {
        let mut bytes = b"<yml_catalog><shop><name>".to_vec();
        // "При" in windows-1251
        bytes.extend_from_slice(&[0xcf, 0xf0, 0xe8]);
        bytes.extend_from_slice(b"</name></shop></yml_catalog>");
        let err = parse_feed(&bytes).expect_err("cp1251");
        assert!(matches!(err, FeedError::Malformed(ref message) if message.contains("UTF-8")));
    }

    #[test]
    fn rejects_declared_legacy_encoding() {
        let xml = r#"<?xml version="1.0" encoding="windows-1251"?>
<yml_catalog><shop><offers/></shop></yml_catalog>"#;
        let err = parse_feed(xml.as_bytes()).expect_err("declared cp1251");
        assert!(err.to_string().contains("windows-1251"));

        let lower = SAMPLE.replace("UTF-8", "utf-8");
        assert!(parse_feed(lower.as_bytes()).is_ok());
    }

    #[test]
    fn keeps_unknown_entities_verbatim() {
        let xml = "<yml_catalog><shop><name>Aqua&nbsp;Shop</name></shop></yml_catalog>";
        let feed = parse_feed(xml.as_bytes()).expect("parse");
        assert_eq!(feed.shop.head[0].text, "Aqua&nbsp;Shop");
    }

    #[test]
    fn rejects_missing_shop() {
        let err = parse_feed(b"<yml_catalog/>").expect_err("no shop");
        assert!(err.to_string().contains("<shop>"));
    }
}
