use crate::feed::FeedError;
use crate::feed::model::{Attribute, Element, Feed, Offer};
use quick_xml::Writer;
use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event};

type XmlWriter = Writer<Vec<u8>>;

/// Serialises a feed as indented UTF-8 XML.
///
/// Output depends only on the `Feed` value: attributes and children keep their
/// stored order and offers always emit `id`, `available`, `price`,
/// `old_price`, the remaining fields, then params.
pub fn write_feed(feed: &Feed) -> Result<Vec<u8>, FeedError> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    emit(
        &mut writer,
        Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)),
    )?;

    emit(&mut writer, Event::Start(start(&feed.root, &feed.attributes)))?;
    emit(&mut writer, Event::Start(BytesStart::new("shop")))?;
    for element in &feed.shop.head {
        write_element(&mut writer, element)?;
    }
    emit(&mut writer, Event::Start(BytesStart::new("offers")))?;
    for offer in &feed.shop.offers {
        write_offer(&mut writer, offer)?;
    }
    emit(&mut writer, Event::End(BytesEnd::new("offers")))?;
    for element in &feed.shop.tail {
        write_element(&mut writer, element)?;
    }
    emit(&mut writer, Event::End(BytesEnd::new("shop")))?;
    emit(&mut writer, Event::End(BytesEnd::new(feed.root.as_str())))?;

    let mut bytes = writer.into_inner();
    bytes.push(b'\n');
    Ok(bytes)
}

fn write_offer(writer: &mut XmlWriter, offer: &Offer) -> Result<(), FeedError> {
    let mut tag = BytesStart::new("offer");
    tag.push_attribute(("id", offer.id.as_str()));
    tag.push_attribute(("available", if offer.available { "true" } else { "false" }));
    for attr in &offer.attributes {
        tag.push_attribute((attr.name.as_str(), attr.value.as_str()));
    }
    emit(writer, Event::Start(tag))?;

    if let Some(price) = &offer.price {
        write_text(writer, "price", &[], price)?;
    }
    if let Some(old_price) = &offer.old_price {
        write_text(writer, "old_price", &[], old_price)?;
    }
    for field in &offer.fields {
        write_element(writer, field)?;
    }
    for param in &offer.params {
        let mut attributes = Vec::with_capacity(param.attributes.len() + 1);
        attributes.push(Attribute::new("name", param.name.as_str()));
        attributes.extend(param.attributes.iter().cloned());
        write_text(writer, "param", &attributes, &param.value)?;
    }

    emit(writer, Event::End(BytesEnd::new("offer")))
}

fn write_element(writer: &mut XmlWriter, element: &Element) -> Result<(), FeedError> {
    if element.children.is_empty() {
        return write_text(writer, &element.name, &element.attributes, &element.text);
    }
    emit(writer, Event::Start(start(&element.name, &element.attributes)))?;
    if !element.text.trim().is_empty() {
        emit_text(writer, element.text.trim())?;
    }
    for child in &element.children {
        write_element(writer, child)?;
    }
    emit(writer, Event::End(BytesEnd::new(element.name.as_str())))
}

fn write_text(
    writer: &mut XmlWriter,
    name: &str,
    attributes: &[Attribute],
    text: &str,
) -> Result<(), FeedError> {
    if text.is_empty() {
        return emit(writer, Event::Empty(start(name, attributes)));
    }
    emit(writer, Event::Start(start(name, attributes)))?;
    emit_text(writer, text)?;
    emit(writer, Event::End(BytesEnd::new(name)))
}

/// Markup-bearing text (HTML descriptions) goes out as CDATA, everything else escaped.
fn emit_text(writer: &mut XmlWriter, text: &str) -> Result<(), FeedError> {
    if text.contains('<') && !text.contains("]]>") {
        emit(writer, Event::CData(BytesCData::new(text)))
    } else {
        emit(writer, Event::Text(BytesText::new(text)))
    }
}

fn start<'a>(name: &'a str, attributes: &'a [Attribute]) -> BytesStart<'a> {
    let mut tag = BytesStart::new(name);
    for attr in attributes {
        tag.push_attribute((attr.name.as_str(), attr.value.as_str()));
    }
    tag
}

fn emit(writer: &mut XmlWriter, event: Event<'_>) -> Result<(), FeedError> {
    writer
        .write_event(event)
        .map_err(|err| FeedError::Write(err.to_string()))
}
