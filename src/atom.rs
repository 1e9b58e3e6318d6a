//! Atom tag document and tag index parsing
//!
//! A tag is published as an Atom 1.0 feed augmented with the
//! `http://peerworks.org/classifier` namespace. The feed carries the tag's
//! identity, its training and taggings URLs, timestamps, the classifier
//! bias, and one entry per training example. An entry with a category is a
//! positive example; an entry with a negative-example link is a negative
//! example.

use crate::error::{Result, SiftError};
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

/// Atom rel of the link carrying the taggings submission URL.
pub const EDIT_LINK_REL: &str = "http://peerworks.org/classifier/edit";
/// Atom rel marking an entry as a negative training example.
pub const NEGATIVE_EXAMPLE_REL: &str = "http://peerworks.org/classifier/negative-example";

/// A parsed tag training document.
#[derive(Debug, Clone, Default)]
pub struct TagDocument {
    pub tag_id: Option<String>,
    pub training_url: Option<String>,
    pub taggings_url: Option<String>,
    pub updated: Option<DateTime<Utc>>,
    pub last_classified: Option<DateTime<Utc>>,
    pub bias: f64,
    pub positive_examples: Vec<String>,
    pub negative_examples: Vec<String>,
}

/// A parsed tag index: the tag service's ordered list of training URLs.
#[derive(Debug, Clone, Default)]
pub struct TagIndex {
    pub updated: Option<DateTime<Utc>>,
    pub tag_urls: Vec<String>,
}

fn rel_and_href(start: &BytesStart) -> (Option<String>, Option<String>) {
    let mut rel = None;
    let mut href = None;
    for attr in start.attributes().flatten() {
        match attr.key.local_name().as_ref() {
            b"rel" => rel = Some(attr.unescape_value().unwrap_or_default().to_string()),
            b"href" => href = Some(attr.unescape_value().unwrap_or_default().to_string()),
            _ => {}
        }
    }
    (rel, href)
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[derive(Default)]
struct EntryState {
    id: Option<String>,
    positive: bool,
    negative: bool,
}

/// Parse a tag training document. Fails on malformed XML or when the
/// document is not an Atom feed.
pub fn parse_tag_document(xml: &str) -> Result<TagDocument> {
    let mut doc = TagDocument {
        bias: 1.0,
        ..TagDocument::default()
    };

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut path: Vec<String> = Vec::new();
    let mut saw_feed = false;
    let mut entry: Option<EntryState> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                let name = String::from_utf8_lossy(start.local_name().as_ref()).to_string();
                path.push(name.clone());
                match path.join("/").as_str() {
                    "feed" => saw_feed = true,
                    "feed/id" => {
                        doc.tag_id = Some(read_text(&mut reader, &start)?);
                        path.pop();
                    }
                    "feed/updated" => {
                        doc.updated = parse_timestamp(&read_text(&mut reader, &start)?);
                        path.pop();
                    }
                    "feed/classified" => {
                        doc.last_classified = parse_timestamp(&read_text(&mut reader, &start)?);
                        path.pop();
                    }
                    "feed/bias" => {
                        if let Ok(bias) = read_text(&mut reader, &start)?.trim().parse() {
                            doc.bias = bias;
                        }
                        path.pop();
                    }
                    "feed/link" => {
                        feed_link(&start, &mut doc);
                    }
                    "feed/entry" => {
                        entry = Some(EntryState::default());
                    }
                    "feed/entry/id" => {
                        if let Some(state) = entry.as_mut() {
                            state.id = Some(read_text(&mut reader, &start)?);
                        }
                        path.pop();
                    }
                    "feed/entry/category" => {
                        if let Some(state) = entry.as_mut() {
                            state.positive = true;
                        }
                    }
                    "feed/entry/link" => {
                        let (rel, _) = rel_and_href(&start);
                        if rel.as_deref() == Some(NEGATIVE_EXAMPLE_REL) {
                            if let Some(state) = entry.as_mut() {
                                state.negative = true;
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Empty(start)) => {
                let name = String::from_utf8_lossy(start.local_name().as_ref()).to_string();
                match (path.join("/").as_str(), name.as_str()) {
                    ("feed", "link") => feed_link(&start, &mut doc),
                    ("feed/entry", "category") => {
                        if let Some(state) = entry.as_mut() {
                            state.positive = true;
                        }
                    }
                    ("feed/entry", "link") => {
                        let (rel, _) = rel_and_href(&start);
                        if rel.as_deref() == Some(NEGATIVE_EXAMPLE_REL) {
                            if let Some(state) = entry.as_mut() {
                                state.negative = true;
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::End(_)) => {
                if path.join("/") == "feed/entry" {
                    if let Some(state) = entry.take() {
                        if let Some(id) = state.id {
                            if state.positive {
                                doc.positive_examples.push(id.clone());
                            }
                            if state.negative {
                                doc.negative_examples.push(id);
                            }
                        }
                    }
                }
                path.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(SiftError::parse(format!("bad tag document: {e}"))),
            _ => {}
        }
    }

    if !saw_feed {
        return Err(SiftError::parse("tag document has no feed element"));
    }

    Ok(doc)
}

fn feed_link(start: &BytesStart, doc: &mut TagDocument) {
    let (rel, href) = rel_and_href(start);
    match rel.as_deref() {
        Some("self") => doc.training_url = href,
        Some(EDIT_LINK_REL) => doc.taggings_url = href,
        _ => {}
    }
}

fn read_text(reader: &mut Reader<&[u8]>, start: &BytesStart) -> Result<String> {
    reader
        .read_text(start.name())
        .map(|t| t.to_string())
        .map_err(|e| SiftError::parse(format!("bad element text: {e}")))
}

/// Parse the tag index: an Atom feed whose entries each link to one tag's
/// training document.
pub fn parse_tag_index(xml: &str) -> Result<TagIndex> {
    let mut index = TagIndex::default();

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut path: Vec<String> = Vec::new();
    let mut saw_feed = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                let name = String::from_utf8_lossy(start.local_name().as_ref()).to_string();
                path.push(name.clone());
                match path.join("/").as_str() {
                    "feed" => saw_feed = true,
                    "feed/updated" => {
                        index.updated = parse_timestamp(&read_text(&mut reader, &start)?);
                        path.pop();
                    }
                    "feed/entry/link" => index_link(&start, &mut index),
                    _ => {}
                }
            }
            Ok(Event::Empty(start)) => {
                let name = String::from_utf8_lossy(start.local_name().as_ref()).to_string();
                if name == "link" && path.join("/") == "feed/entry" {
                    index_link(&start, &mut index);
                }
            }
            Ok(Event::End(_)) => {
                path.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(SiftError::parse(format!("bad tag index: {e}"))),
            _ => {}
        }
    }

    if !saw_feed {
        return Err(SiftError::parse("tag index has no feed element"));
    }

    Ok(index)
}

fn index_link(start: &BytesStart, index: &mut TagIndex) {
    let (rel, href) = rel_and_href(start);
    if rel.as_deref() == Some("self") {
        if let Some(href) = href {
            index.tag_urls.push(href);
        }
    }
}
