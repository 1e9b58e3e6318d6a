//! HTML and Atom entry tokenization
//!
//! Turns content into the string features the classifier trains on:
//! `t:<word>` for text tokens and `URLSeg:<component>` for link targets.
//! The item cache's feature dictionary maps these onto stable token ids.

use crate::error::{Result, SiftError};
use quick_xml::escape::unescape;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;
use url::Url;

/// Feature name → occurrence count.
pub type FeatureMap = HashMap<String, u32>;

struct Patterns {
    entity: Regex,
    non_alnum: Regex,
    leading_dashes: Regex,
    trailing_dashes: Regex,
    whitespace: Regex,
    script_block: Regex,
    markup: Regex,
    link_attr: Regex,
    www: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        entity: Regex::new(r"&[^;\s]+;").unwrap(),
        non_alnum: Regex::new(r"[^a-zA-Z0-9\-]").unwrap(),
        leading_dashes: Regex::new(r"\s+\-+").unwrap(),
        trailing_dashes: Regex::new(r"\-+\s+").unwrap(),
        whitespace: Regex::new(r"\s+").unwrap(),
        script_block: Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>").unwrap(),
        markup: Regex::new(r"<[^>]*>").unwrap(),
        link_attr: Regex::new(r#"(?i)(?:href|src)\s*=\s*["']([^"']+)["']"#).unwrap(),
        www: Regex::new(r"^www\.").unwrap(),
    })
}

fn add_token(token: &str, features: &mut FeatureMap) {
    *features.entry(format!("t:{token}")).or_insert(0) += 1;
}

fn add_url_component(component: &str, features: &mut FeatureMap) {
    if !component.is_empty() {
        *features.entry(format!("URLSeg:{component}")).or_insert(0) += 1;
    }
}

/// Normalize a run of text and fold its words into the feature map.
/// Words shorter than two characters carry no signal and are dropped.
fn tokenize_text(text: &str, features: &mut FeatureMap) {
    let p = patterns();
    let text = p.entity.replace_all(text, " ");
    let text = p.non_alnum.replace_all(&text, " ");
    let text = p.leading_dashes.replace_all(&text, " ");
    let text = p.trailing_dashes.replace_all(&text, " ");
    let text = p.whitespace.replace_all(&text, " ");
    let text = text.to_lowercase();

    for token in text.split(' ') {
        if token.len() >= 2 {
            add_token(token, features);
        }
    }
}

/// Fold a link target's path and host into the feature map.
fn tokenize_uri(uri: &str, features: &mut FeatureMap) {
    match Url::parse(uri) {
        Ok(url) => {
            add_url_component(url.path(), features);
            if let Some(host) = url.host_str() {
                let host = patterns().www.replace(host, "");
                add_url_component(&host, features);
            }
        }
        Err(_) => {
            // Relative reference: the part before any query or fragment
            // is its path.
            let path = uri.split(['?', '#']).next().unwrap_or("");
            add_url_component(path, features);
        }
    }
}

/// Tokenize an HTML fragment into text and link features.
pub fn tokenize_html(html: &str) -> FeatureMap {
    let mut features = FeatureMap::new();
    tokenize_html_into(html, &mut features);
    features
}

fn tokenize_html_into(html: &str, features: &mut FeatureMap) {
    let p = patterns();

    for capture in p.link_attr.captures_iter(html) {
        tokenize_uri(&capture[1], features);
    }

    let text = p.script_block.replace_all(html, " ");
    let text = p.markup.replace_all(&text, " ");
    tokenize_text(&text, features);
}

/// Tokenize an Atom entry document: content as HTML, title as text, the
/// author name as a single feature, and the alternate link's target.
pub fn tokenize_entry(atom: &str) -> Result<FeatureMap> {
    let mut features = FeatureMap::new();
    let mut reader = Reader::from_str(atom);
    reader.config_mut().trim_text(true);

    let mut path: Vec<String> = Vec::new();
    let mut saw_entry = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                let name = String::from_utf8_lossy(start.local_name().as_ref()).to_string();
                path.push(name.clone());
                match path_str(&path).as_str() {
                    "entry" => saw_entry = true,
                    "entry/content" => {
                        let raw = reader
                            .read_text(start.name())
                            .map_err(|e| SiftError::parse(format!("bad entry content: {e}")))?;
                        let html = unescape(&raw).map(|c| c.to_string()).unwrap_or_else(|_| raw.to_string());
                        tokenize_html_into(&html, &mut features);
                        path.pop();
                    }
                    "entry/title" => {
                        let raw = reader
                            .read_text(start.name())
                            .map_err(|e| SiftError::parse(format!("bad entry title: {e}")))?;
                        tokenize_text(&raw, &mut features);
                        path.pop();
                    }
                    "entry/author/name" => {
                        let raw = reader
                            .read_text(start.name())
                            .map_err(|e| SiftError::parse(format!("bad author name: {e}")))?;
                        let name = raw.trim();
                        if !name.is_empty() {
                            add_token(name, &mut features);
                        }
                        path.pop();
                    }
                    "entry/link" => alternate_link(&start, &mut features),
                    _ => {}
                }
            }
            Ok(Event::Empty(start)) => {
                let name = String::from_utf8_lossy(start.local_name().as_ref()).to_string();
                if name == "link" && path_str(&path) == "entry" {
                    alternate_link(&start, &mut features);
                }
            }
            Ok(Event::End(_)) => {
                path.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(SiftError::parse(format!("bad entry document: {e}"))),
            _ => {}
        }
    }

    if !saw_entry {
        return Err(SiftError::parse("document has no entry element"));
    }

    Ok(features)
}

fn path_str(path: &[String]) -> String {
    path.join("/")
}

fn alternate_link(start: &quick_xml::events::BytesStart, features: &mut FeatureMap) {
    let mut rel = None;
    let mut href = None;
    for attr in start.attributes().flatten() {
        match attr.key.local_name().as_ref() {
            b"rel" => rel = Some(attr.unescape_value().unwrap_or_default().to_string()),
            b"href" => href = Some(attr.unescape_value().unwrap_or_default().to_string()),
            _ => {}
        }
    }
    if rel.as_deref() == Some("alternate") {
        if let Some(href) = href {
            tokenize_uri(&href, features);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_become_prefixed_features() {
        let features = tokenize_html("<p>The Quick brown fox</p>");
        assert_eq!(features.get("t:the"), Some(&1));
        assert_eq!(features.get("t:quick"), Some(&1));
        assert_eq!(features.get("t:brown"), Some(&1));
        assert_eq!(features.get("t:fox"), Some(&1));
    }

    #[test]
    fn repeated_words_accumulate() {
        let features = tokenize_html("<p>spam and spam and spam</p>");
        assert_eq!(features.get("t:spam"), Some(&3));
        assert_eq!(features.get("t:and"), Some(&2));
    }

    #[test]
    fn entities_and_short_tokens_are_dropped() {
        let features = tokenize_html("<p>a &amp; b &mdash; ok</p>");
        assert!(features.get("t:a").is_none());
        assert!(features.get("t:amp").is_none());
        assert_eq!(features.get("t:ok"), Some(&1));
    }

    #[test]
    fn case_is_folded() {
        let features = tokenize_html("HELLO Hello hello");
        assert_eq!(features.get("t:hello"), Some(&3));
    }

    #[test]
    fn script_blocks_are_ignored() {
        let features = tokenize_html("<script>var hidden = true;</script><b>visible</b>");
        assert!(features.get("t:hidden").is_none());
        assert_eq!(features.get("t:visible"), Some(&1));
    }

    #[test]
    fn links_become_url_segment_features() {
        let features =
            tokenize_html(r#"<a href="http://www.example.org/posts/42">a post</a>"#);
        assert_eq!(features.get("URLSeg:/posts/42"), Some(&1));
        assert_eq!(features.get("URLSeg:example.org"), Some(&1));
    }

    #[test]
    fn relative_links_keep_their_path() {
        let features = tokenize_html(r#"<img src="images/cat.png?size=2">"#);
        assert_eq!(features.get("URLSeg:images/cat.png"), Some(&1));
    }

    #[test]
    fn atom_entries_contribute_content_title_author_and_link() {
        let atom = r#"<?xml version="1.0"?>
<entry xmlns="http://www.w3.org/2005/Atom">
  <id>urn:peerworks.org:entry#1</id>
  <title>Harvest season</title>
  <author><name>Mavis Reed</name></author>
  <link rel="alternate" href="http://example.org/harvest"/>
  <content type="html">&lt;p&gt;threshing floor&lt;/p&gt;</content>
</entry>"#;

        let features = tokenize_entry(atom).unwrap();
        assert_eq!(features.get("t:threshing"), Some(&1));
        assert_eq!(features.get("t:floor"), Some(&1));
        assert_eq!(features.get("t:harvest"), Some(&1));
        assert_eq!(features.get("t:season"), Some(&1));
        assert_eq!(features.get("t:Mavis Reed"), Some(&1));
        assert_eq!(features.get("URLSeg:/harvest"), Some(&1));
        assert_eq!(features.get("URLSeg:example.org"), Some(&1));
    }

    #[test]
    fn non_entry_documents_are_rejected() {
        assert!(tokenize_entry("<feed></feed>").is_err());
        assert!(tokenize_entry("not xml at all").is_err());
    }
}
