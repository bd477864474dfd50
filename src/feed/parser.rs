use std::borrow::Cow;

use chrono::{DateTime, Utc};
use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

use crate::util::{clean_text, clean_url, parse_date};

/// Placeholder used when a feed item lacks a usable title, link or id.
pub const UNKNOWN: &str = "UNKNOWN";

/// Maximum element nesting accepted before the document is rejected.
/// Real feeds rarely exceed depth 6.
const MAX_FEED_DEPTH: usize = 64;

/// Longest entity name considered when expanding `&name;`.
const MAX_ENTITY_LEN: usize = 32;

/// Errors that can occur while parsing a feed document.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The bytes are not well-formed XML.
    #[error("Malformed feed XML: {0}")]
    Malformed(String),

    /// Element nesting exceeds the safety limit.
    #[error("Feed nesting depth exceeds maximum of {0} levels")]
    TooDeep(usize),

    /// An item was located but failed validation after normalization.
    #[error("Feed item {index} failed validation: {reason}")]
    Validation { index: usize, reason: &'static str },
}

/// A single entry extracted from an RSS, Atom or RDF feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    pub title: String,
    /// Article URL with tracking parameters removed, or [`UNKNOWN`].
    pub link: String,
    /// `guid` (RSS) or `id` (Atom), or [`UNKNOWN`].
    pub external_id: String,
    pub published_at: Option<DateTime<Utc>>,
}

impl FeedItem {
    /// Whether the link is usable as an article URL.
    pub fn has_link(&self) -> bool {
        self.link != UNKNOWN && crate::util::validate_url(&self.link).is_ok()
    }
}

// ============================================================================
// Element tree
// ============================================================================

/// Minimal element tree. Feeds are small enough that building the whole
/// document is cheaper to reason about than a streaming state machine
/// covering four shapes.
#[derive(Debug, Default)]
struct XmlNode {
    name: String,
    attrs: Vec<(String, String)>,
    text: String,
    children: Vec<XmlNode>,
}

impl XmlNode {
    fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Trimmed text content, `None` when empty.
    fn text_value(&self) -> Option<&str> {
        let text = self.text.trim();
        (!text.is_empty()).then_some(text)
    }

    fn append_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if !self.text.is_empty() {
            self.text.push(' ');
        }
        self.text.push_str(text);
    }
}

/// Named character references that show up in feeds despite not being XML.
fn resolve_html_entity(entity: &str) -> Option<&'static str> {
    Some(match entity {
        "nbsp" => "\u{a0}",
        "ndash" => "\u{2013}",
        "mdash" => "\u{2014}",
        "hellip" => "\u{2026}",
        "lsquo" => "\u{2018}",
        "rsquo" => "\u{2019}",
        "ldquo" => "\u{201c}",
        "rdquo" => "\u{201d}",
        "laquo" => "\u{ab}",
        "raquo" => "\u{bb}",
        "copy" => "\u{a9}",
        "reg" => "\u{ae}",
        "trade" => "\u{2122}",
        "euro" => "\u{20ac}",
        _ => return None,
    })
}

fn element_from(e: &BytesStart<'_>, reader: &Reader<&[u8]>) -> XmlNode {
    let attrs = e
        .attributes()
        .flatten()
        .map(|attr| {
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = unescape_lenient(&decode_text(reader, &attr.value)).into_owned();
            (key, value)
        })
        .collect();

    XmlNode {
        name: String::from_utf8_lossy(e.name().as_ref()).into_owned(),
        attrs,
        ..XmlNode::default()
    }
}

/// Decodes raw bytes with the encoding the document declared (or its BOM),
/// falling back to lossy UTF-8 for malformed sequences.
fn decode_text(reader: &Reader<&[u8]>, raw: &[u8]) -> String {
    reader
        .decoder()
        .decode(raw)
        .map(Cow::into_owned)
        .unwrap_or_else(|_| String::from_utf8_lossy(raw).into_owned())
}

fn resolve_entity(name: &str) -> Option<String> {
    if let Some(number) = name.strip_prefix('#') {
        let code = match number.strip_prefix(|c| c == 'x' || c == 'X') {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => number.parse::<u32>().ok()?,
        };
        return char::from_u32(code)
            .filter(|c| *c != '\0')
            .map(String::from);
    }
    resolve_predefined_entity(name)
        .or_else(|| resolve_html_entity(name))
        .map(str::to_string)
}

/// Expands character references, the XML entities and common HTML
/// entities. An entity that cannot be resolved is kept as written.
fn unescape_lenient(raw: &str) -> Cow<'_, str> {
    if !raw.contains('&') {
        return Cow::Borrowed(raw);
    }

    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let resolved = tail[1..]
            .find(';')
            .filter(|&end| end > 0 && end <= MAX_ENTITY_LEN)
            .and_then(|end| resolve_entity(&tail[1..1 + end]).map(|text| (text, end + 2)));
        match resolved {
            Some((text, consumed)) => {
                out.push_str(&text);
                rest = &tail[consumed..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

/// Builds the element tree. The returned node is a synthetic document node
/// whose children are the top-level elements.
fn build_tree(bytes: &[u8]) -> Result<XmlNode, ParseError> {
    // quick-xml never expands external entities or DTD-declared entities;
    // DocType events are skipped below, so the document cannot pull in
    // anything beyond its own bytes.
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<XmlNode> = vec![XmlNode::default()];
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if stack.len() > MAX_FEED_DEPTH {
                    return Err(ParseError::TooDeep(MAX_FEED_DEPTH));
                }
                stack.push(element_from(&e, &reader));
            }
            Ok(Event::Empty(e)) => {
                let node = element_from(&e, &reader);
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(node);
                }
            }
            Ok(Event::End(_)) => {
                // quick-xml checks that end tags match their start tags
                if stack.len() < 2 {
                    return Err(ParseError::Malformed("unexpected closing tag".into()));
                }
                if let Some(node) = stack.pop() {
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(node);
                    }
                }
            }
            Ok(Event::Text(e)) => {
                let text = decode_text(&reader, &e);
                if let Some(node) = stack.last_mut() {
                    node.append_text(&unescape_lenient(&text));
                }
            }
            Ok(Event::CData(e)) => {
                let text = decode_text(&reader, &e);
                if let Some(node) = stack.last_mut() {
                    node.append_text(text.trim());
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(ParseError::Malformed(format!(
                    "error at position {}: {e}",
                    reader.buffer_position()
                )));
            }
        }
        buf.clear();
    }

    if stack.len() != 1 {
        let open = stack.last().map(|n| n.name.clone()).unwrap_or_default();
        return Err(ParseError::Malformed(format!("unclosed element <{open}>")));
    }

    let document = stack.pop().unwrap_or_default();
    if document.children.is_empty() {
        return Err(ParseError::Malformed("document has no root element".into()));
    }
    Ok(document)
}

// ============================================================================
// Item location and field resolution
// ============================================================================

/// Finds the item list in the first matching shape:
/// RSS 2.0 `rss > channel > item`, Atom `feed > entry`, a bare list of
/// top-level `item` elements, then RSS 1.0 `rdf:RDF > item`.
fn locate_items(document: &XmlNode) -> Vec<&XmlNode> {
    let rss: Vec<&XmlNode> = document
        .child("rss")
        .and_then(|rss| rss.child("channel"))
        .map(|channel| channel.children_named("item").collect())
        .unwrap_or_default();
    if !rss.is_empty() {
        return rss;
    }

    let atom: Vec<&XmlNode> = document
        .child("feed")
        .map(|feed| feed.children_named("entry").collect())
        .unwrap_or_default();
    if !atom.is_empty() {
        return atom;
    }

    let bare: Vec<&XmlNode> = document.children_named("item").collect();
    if !bare.is_empty() {
        return bare;
    }

    document
        .child("rdf:RDF")
        .map(|rdf| rdf.children_named("item").collect())
        .unwrap_or_default()
}

/// A plain `<title>` keeps its text even when empty (and then fails
/// validation). A title element that carries attributes or markup but no
/// text resolves to [`UNKNOWN`].
fn resolve_title(item: &XmlNode) -> String {
    match item.child("title") {
        Some(node) if node.attrs.is_empty() && node.children.is_empty() => node.text.clone(),
        Some(node) => node.text_value().unwrap_or(UNKNOWN).to_string(),
        None => UNKNOWN.to_string(),
    }
}

/// Link text, then an `href` attribute (alternate links first), then the
/// guid, then [`UNKNOWN`].
fn resolve_link(item: &XmlNode) -> String {
    let links: Vec<&XmlNode> = item.children_named("link").collect();

    if let Some(text) = links.iter().find_map(|l| l.text_value()) {
        return text.to_string();
    }

    let href = links
        .iter()
        .filter(|l| matches!(l.attr("rel"), None | Some("alternate")))
        .find_map(|l| l.attr("href"))
        .or_else(|| links.iter().find_map(|l| l.attr("href")))
        .map(str::trim)
        .filter(|h| !h.is_empty());
    if let Some(href) = href {
        return href.to_string();
    }

    item.child("guid")
        .and_then(XmlNode::text_value)
        .unwrap_or(UNKNOWN)
        .to_string()
}

fn resolve_external_id(item: &XmlNode) -> String {
    item.child("guid")
        .and_then(XmlNode::text_value)
        .or_else(|| item.child("id").and_then(XmlNode::text_value))
        .unwrap_or(UNKNOWN)
        .to_string()
}

fn resolve_published(item: &XmlNode) -> Option<DateTime<Utc>> {
    ["pubDate", "published", "updated", "dc:date"]
        .iter()
        .find_map(|name| item.child(name).and_then(XmlNode::text_value))
        .and_then(parse_date)
}

/// Parses RSS 2.0, Atom, RSS 1.0 (RDF) or a bare `<item>` list into
/// normalized feed items.
///
/// Titles and ids are whitespace-normalized; links additionally lose their
/// tracking parameters. A document whose root matches none of the known
/// shapes yields an empty list.
///
/// # Errors
///
/// - [`ParseError::Malformed`] when the bytes are not well-formed XML
/// - [`ParseError::TooDeep`] when nesting exceeds the safety limit
/// - [`ParseError::Validation`] when a located item normalizes to an empty
///   title or link
pub fn parse_feed(bytes: &[u8]) -> Result<Vec<FeedItem>, ParseError> {
    let document = build_tree(bytes)?;

    locate_items(&document)
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            let title = clean_text(&resolve_title(item));
            let link = clean_url(&clean_text(&resolve_link(item)));
            let external_id = clean_text(&resolve_external_id(item));

            if title.is_empty() {
                return Err(ParseError::Validation {
                    index,
                    reason: "title is empty",
                });
            }
            if link.is_empty() {
                return Err(ParseError::Validation {
                    index,
                    reason: "link is empty",
                });
            }

            Ok(FeedItem {
                title,
                link,
                external_id,
                published_at: resolve_published(item),
            })
        })
        .collect()
}
