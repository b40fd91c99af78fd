//! Wrapped XML syntax (`.cat`, `.gst`).
//!
//! Reading builds a small element tree first and then maps it onto the
//! schema, so unknown elements are dropped in one place and nesting errors
//! carry the parent element name.

use super::{FormatError, Record, attribute_text, coerce_attribute};
use crate::catalog::identity::NodeKind;
use crate::catalog::schema;
use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use serde_json::{Map, Value};

#[derive(Debug, Default)]
struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Element>,
    text: String,
}

impl Element {
    fn open(start: &BytesStart<'_>) -> Result<Self, FormatError> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(quick_xml::Error::from)?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            if key == "xmlns" || key.starts_with("xmlns:") {
                continue;
            }
            let value = attr.unescape_value()?.into_owned();
            attributes.push((key, value));
        }
        Ok(Self {
            name,
            attributes,
            ..Default::default()
        })
    }
}

pub(super) fn parse(bytes: &[u8]) -> Result<Record, FormatError> {
    let root = read_tree(bytes)?;
    let kind = NodeKind::from_root_key(&root.name).ok_or(FormatError::MissingRoot)?;
    let mut out = Map::new();
    out.insert(root.name.clone(), Value::Object(element_record(kind, &root)?));
    Ok(Value::Object(out))
}

fn read_tree(bytes: &[u8]) -> Result<Element, FormatError> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(start) => stack.push(Element::open(&start)?),
            Event::Empty(start) => {
                let element = Element::open(&start)?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| FormatError::malformed("document", "unbalanced end tag"))?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::Text(text) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text.unescape()?);
                }
            }
            Event::CData(data) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if let Some(open) = stack.last() {
        return Err(FormatError::malformed(&open.name, "element is never closed"));
    }
    root.ok_or(FormatError::MissingRoot)
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
) -> Result<(), FormatError> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => return Err(FormatError::malformed("document", "multiple root elements")),
    }
    Ok(())
}

fn element_record(kind: NodeKind, element: &Element) -> Result<Map<String, Value>, FormatError> {
    let mut out = Map::new();
    for (key, value) in &element.attributes {
        out.insert(key.clone(), coerce_attribute(key, value));
    }
    if !element.text.is_empty() {
        out.insert(
            schema::TEXT_CONTENT_KEY.to_string(),
            Value::String(element.text.clone()),
        );
    }

    for child in &element.children {
        if schema::is_text_key(&child.name) {
            if !child.children.is_empty() {
                return Err(FormatError::malformed(
                    &element.name,
                    format!("<{}> must only hold text", child.name),
                ));
            }
            out.insert(
                child.name.clone(),
                Value::Array(vec![Value::String(child.text.clone())]),
            );
            continue;
        }
        let Some(container) = schema::container_for_key(&child.name) else {
            continue;
        };
        let Some(item_kind) = schema::child_kind(kind, &child.name) else {
            continue;
        };
        let mut items = Vec::with_capacity(child.children.len());
        for item in &child.children {
            if item.name != container.wrapper {
                return Err(FormatError::malformed(
                    &child.name,
                    format!("expected <{}>, found <{}>", container.wrapper, item.name),
                ));
            }
            items.push(Value::Object(element_record(item_kind, item)?));
        }
        match out.get_mut(&child.name) {
            Some(Value::Array(existing)) => existing.extend(items),
            _ => {
                out.insert(child.name.clone(), Value::Array(items));
            }
        }
    }
    Ok(out)
}

pub(super) fn serialize(record: &Record) -> Result<Vec<u8>, FormatError> {
    let (kind, root) = super::root_of(record).ok_or(FormatError::MissingRoot)?;
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    write(
        &mut writer,
        Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))),
    )?;
    write_element(&mut writer, kind.as_str(), kind, root, schema::root_namespace(kind))?;
    Ok(writer.into_inner())
}

fn write_element(
    writer: &mut Writer<Vec<u8>>,
    name: &str,
    kind: NodeKind,
    obj: &Map<String, Value>,
    namespace: Option<&str>,
) -> Result<(), FormatError> {
    let mut start = BytesStart::new(name);
    if let Some(ns) = namespace {
        start.push_attribute(("xmlns", ns));
    }
    for (key, value) in obj {
        if schema::is_text_key(key) || key == schema::TEXT_CONTENT_KEY {
            continue;
        }
        if let Some(text) = attribute_text(value) {
            start.push_attribute((key.as_str(), text.as_str()));
        }
    }

    let text = obj
        .get(schema::TEXT_CONTENT_KEY)
        .and_then(attribute_text)
        .unwrap_or_default();
    let text_children: Vec<(&str, &str)> = schema::TEXT_KEYS
        .iter()
        .filter_map(|key| Some((*key, super::text_of(obj.get(*key)?)?)))
        .collect();
    let containers: Vec<(&str, &str, NodeKind, &Vec<Value>)> = schema::allowed_children(kind)
        .iter()
        .filter_map(|key| {
            let items = obj.get(*key)?.as_array()?;
            let container = schema::container_for_key(key)?;
            Some((*key, container.wrapper, container.kind, items))
        })
        .collect();

    if text.is_empty() && text_children.is_empty() && containers.is_empty() {
        return write(writer, Event::Empty(start));
    }

    write(writer, Event::Start(start))?;
    for (key, value) in text_children {
        write(writer, Event::Start(BytesStart::new(key)))?;
        write(writer, Event::Text(BytesText::new(value)))?;
        write(writer, Event::End(BytesEnd::new(key)))?;
    }
    for (key, wrapper, item_kind, items) in containers {
        write(writer, Event::Start(BytesStart::new(key)))?;
        for item in items {
            if let Some(item) = item.as_object() {
                write_element(writer, wrapper, item_kind, item, None)?;
            }
        }
        write(writer, Event::End(BytesEnd::new(key)))?;
    }
    if !text.is_empty() {
        write(writer, Event::Text(BytesText::new(&text)))?;
    }
    write(writer, Event::End(BytesEnd::new(name)))
}

fn write(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), FormatError> {
    writer
        .write_event(event)
        .map_err(|err| FormatError::Write(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<catalogue id="cat-1" name="Sample &amp; Co" revision="2" gameSystemId="gs-1" library="false"
           xmlns="http://www.battlescribe.net/schema/catalogueSchema">
  <comment>first line</comment>
  <selectionEntries>
    <selectionEntry id="u1" name="Unit" type="unit" hidden="false">
      <profiles>
        <profile id="p1" name="Unit" typeId="pt1" typeName="Stats">
          <characteristics>
            <characteristic name="M" typeId="ct1">6&quot;</characteristic>
          </characteristics>
        </profile>
      </profiles>
      <bogus><thing/></bogus>
    </selectionEntry>
  </selectionEntries>
</catalogue>"#;

    #[test]
    fn unwraps_containers_and_unescapes_text() {
        let record = parse(SAMPLE.as_bytes()).unwrap();
        let cat = &record["catalogue"];
        assert_eq!(cat["name"], json!("Sample & Co"));
        assert_eq!(cat["revision"], json!(2));
        assert_eq!(cat["comment"], json!(["first line"]));
        assert!(cat.get("xmlns").is_none());
        let entry = &cat["selectionEntries"][0];
        assert!(entry.get("bogus").is_none());
        let characteristic = &entry["profiles"][0]["characteristics"][0];
        assert_eq!(characteristic["$text"], json!("6\""));
    }

    #[test]
    fn rejects_items_with_the_wrong_wrapper() {
        let xml = r#"<gameSystem id="g" name="g"><sharedRules><profile id="x"/></sharedRules></gameSystem>"#;
        assert!(matches!(
            parse(xml.as_bytes()),
            Err(FormatError::Malformed { .. })
        ));
    }

    #[test]
    fn rejects_unknown_roots_and_mismatched_tags() {
        assert!(matches!(
            parse(b"<roster id=\"r\"/>"),
            Err(FormatError::MissingRoot)
        ));
        assert!(parse(b"<catalogue id=\"c\"><rules></catalogue>").is_err());
    }

    #[test]
    fn serialized_xml_reparses_to_the_same_record() {
        let record = parse(SAMPLE.as_bytes()).unwrap();
        let bytes = serialize(&record).unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.contains("<selectionEntries>"));
        assert!(text.contains("xmlns=\"http://www.battlescribe.net/schema/catalogueSchema\""));
        assert_eq!(parse(&bytes).unwrap(), record);
    }
}
