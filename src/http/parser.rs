//! Resolves a response format from content-type or explicit override, then
//! parses the body accordingly.

use std::collections::HashMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use scraper::{Html, Selector};
use serde_json::{Map, Value};

/// Resolved body format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Json,
    Xml,
    Html,
    Text,
    Binary,
}

/// Resolve the format: explicit override wins, else content-type mapping,
/// else JSON.
pub fn resolve_format(content_type: Option<&str>, explicit: Option<ResponseFormat>) -> ResponseFormat {
    if let Some(f) = explicit {
        return f;
    }
    let Some(ct) = content_type else {
        return ResponseFormat::Json;
    };
    let ct = ct.split(';').next().unwrap_or(ct).trim().to_lowercase();

    match ct.as_str() {
        "application/json" | "text/json" => ResponseFormat::Json,
        "application/xml" | "text/xml" => ResponseFormat::Xml,
        "text/html" => ResponseFormat::Html,
        "application/octet-stream" | "application/pdf" => ResponseFormat::Binary,
        other => {
            if other.starts_with("text/") {
                ResponseFormat::Text
            } else if other.starts_with("image/") || other.starts_with("audio/") || other.starts_with("video/") {
                ResponseFormat::Binary
            } else {
                ResponseFormat::Json
            }
        }
    }
}

/// Optional CSS-selector-keyed extraction for HTML bodies. Each selector
/// yields a single trimmed string for one match, or an array for many.
pub type SelectorMap = HashMap<String, String>;

/// Schema validation hook: returns `Ok(())` or a human-readable mismatch
/// description.
pub trait SchemaValidator: Send + Sync {
    fn validate(&self, value: &Value) -> Result<(), String>;
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("PARSE_ERROR: {0}")]
    Parse(String),

    #[error("SCHEMA_VALIDATION_FAILED: {0}")]
    SchemaValidation(String),
}

/// JSON parsing accepts an already-parsed value, a string, or raw bytes.
pub fn parse_json(body: &[u8]) -> Result<Value, ParseError> {
    serde_json::from_slice(body).map_err(|e| ParseError::Parse(e.to_string()))
}

pub fn parse_json_str(body: &str) -> Result<Value, ParseError> {
    serde_json::from_str(body).map_err(|e| ParseError::Parse(e.to_string()))
}

/// Whitespace-trimming, attribute-merging XML-to-JSON conversion built on
/// `quick-xml`'s pull parser. Element arrays are not forced -- a single
/// child becomes a scalar object, repeated children become an array.
/// Attributes land under an `@`-prefixed key; text alongside attributes or
/// children lands under `#text`.
pub fn parse_xml(body: &str) -> Result<Value, ParseError> {
    let mut reader = Reader::from_str(body);
    reader.trim_text(true);
    let mut buf = Vec::new();

    loop {
        let event = reader.read_event_into(&mut buf).map_err(|e| ParseError::Parse(e.to_string()))?;
        match event {
            Event::Start(start) => {
                let name = element_name(&start)?;
                let attrs = read_attrs(&start)?;
                drop(start);
                buf.clear();
                let value = read_element_body(&mut reader, &mut buf, &name, attrs)?;
                let mut wrapper = Map::new();
                wrapper.insert(name, value);
                return Ok(Value::Object(wrapper));
            }
            Event::Empty(start) => {
                let name = element_name(&start)?;
                let attrs = read_attrs(&start)?;
                let mut wrapper = Map::new();
                wrapper.insert(name, if attrs.is_empty() { Value::Null } else { Value::Object(attrs) });
                return Ok(Value::Object(wrapper));
            }
            Event::Eof => return Err(ParseError::Parse("empty xml document".to_string())),
            _ => buf.clear(),
        }
    }
}

fn element_name(start: &BytesStart) -> Result<String, ParseError> {
    std::str::from_utf8(start.name().as_ref())
        .map(str::to_string)
        .map_err(|e| ParseError::Parse(e.to_string()))
}

fn read_attrs(start: &BytesStart) -> Result<Map<String, Value>, ParseError> {
    let mut attrs = Map::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| ParseError::Parse(e.to_string()))?;
        let key = std::str::from_utf8(attr.key.as_ref())
            .map_err(|e| ParseError::Parse(e.to_string()))?
            .to_string();
        let value = attr.unescape_value().map_err(|e| ParseError::Parse(e.to_string()))?.into_owned();
        attrs.insert(format!("@{key}"), Value::String(value));
    }
    Ok(attrs)
}

/// Reads everything up to and including the matching end tag for an
/// already-opened element, given its name and attribute map.
fn read_element_body(
    reader: &mut Reader<&[u8]>,
    buf: &mut Vec<u8>,
    name: &str,
    mut obj: Map<String, Value>,
) -> Result<Value, ParseError> {
    let mut children: Vec<(String, Value)> = Vec::new();
    let mut text = String::new();

    loop {
        let event = reader.read_event_into(buf).map_err(|e| ParseError::Parse(e.to_string()))?;
        match event {
            Event::Start(child_start) => {
                let child_name = element_name(&child_start)?;
                let child_attrs = read_attrs(&child_start)?;
                drop(child_start);
                buf.clear();
                let child_value = read_element_body(reader, buf, &child_name, child_attrs)?;
                children.push((child_name, child_value));
            }
            Event::Empty(child_start) => {
                let child_name = element_name(&child_start)?;
                let child_attrs = read_attrs(&child_start)?;
                let child_value = if child_attrs.is_empty() { Value::Null } else { Value::Object(child_attrs) };
                children.push((child_name, child_value));
                buf.clear();
            }
            Event::Text(t) | Event::CData(t) => {
                let decoded = t.unescape().map_err(|e| ParseError::Parse(e.to_string()))?;
                text.push_str(decoded.trim());
                buf.clear();
            }
            Event::End(_) => break,
            Event::Eof => return Err(ParseError::Parse(format!("unterminated element '{name}'"))),
            _ => buf.clear(),
        }
    }

    if children.is_empty() {
        return Ok(if obj.is_empty() {
            if text.is_empty() {
                Value::Null
            } else {
                Value::String(text)
            }
        } else {
            if !text.is_empty() {
                obj.insert("#text".to_string(), Value::String(text));
            }
            Value::Object(obj)
        });
    }

    for (key, value) in children {
        match obj.get_mut(&key) {
            Some(Value::Array(arr)) => arr.push(value),
            Some(existing) => {
                let prev = existing.clone();
                obj.insert(key, Value::Array(vec![prev, value]));
            }
            None => {
                obj.insert(key, value);
            }
        }
    }

    Ok(Value::Object(obj))
}

/// Parse an HTML body into `{html, text, title}`, or apply a CSS-selector
/// map to extract specific fields, via `scraper`.
pub fn parse_html(body: &str, selectors: Option<&SelectorMap>) -> Result<Value, ParseError> {
    let document = Html::parse_document(body);

    match selectors {
        None => {
            let title = Selector::parse("title")
                .ok()
                .and_then(|sel| document.select(&sel).next())
                .map(|el| el.text().collect::<String>().trim().to_string());
            let text = document.root_element().text().collect::<Vec<_>>().join(" ");
            let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
            Ok(serde_json::json!({
                "html": body,
                "text": text,
                "title": title,
            }))
        }
        Some(selectors) => {
            let mut out = Map::new();
            for (name, selector) in selectors {
                let parsed = Selector::parse(selector).map_err(|e| ParseError::Parse(format!("invalid selector '{selector}': {e:?}")))?;
                let matches: Vec<String> = document
                    .select(&parsed)
                    .map(|el| el.text().collect::<String>().trim().to_string())
                    .collect();
                let value = match matches.len() {
                    0 => Value::Null,
                    1 => Value::String(matches[0].clone()),
                    _ => Value::Array(matches.into_iter().map(Value::String).collect()),
                };
                out.insert(name.clone(), value);
            }
            Ok(Value::Object(out))
        }
    }
}

/// Validate a parsed value against an optional schema validator.
pub fn validate(value: &Value, validator: Option<&dyn SchemaValidator>) -> Result<(), ParseError> {
    if let Some(v) = validator {
        v.validate(value).map_err(ParseError::SchemaValidation)?;
    }
    Ok(())
}
