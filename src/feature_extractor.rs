//! Feature extraction for entries awaiting tokenization
//!
//! Insertion workers hand pending entries here. When a tokenizer service
//! is configured the entry document is posted to it and the returned
//! feature document is read back; otherwise the built-in tokenizer runs
//! locally. Either way the features are resolved to token ids through
//! the item cache's dictionary.

use crate::error::{Result, SiftError};
use crate::item::{Item, ItemCache, ItemEntry};
use crate::tokenizer;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

/// Tokenizes entry documents into items.
pub struct FeatureExtractor {
    tokenizer_url: Option<String>,
    client: reqwest::blocking::Client,
}

impl FeatureExtractor {
    /// `tokenizer_url` names the remote tokenizer service; without one
    /// the local tokenizer is used.
    pub fn new(tokenizer_url: Option<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            tokenizer_url,
            client,
        })
    }

    /// Tokenize one entry into an item.
    pub fn extract(&self, entry: &ItemEntry, dictionary: &dyn ItemCache) -> Result<Item> {
        let document = entry
            .document
            .as_deref()
            .ok_or_else(|| SiftError::other(format!("entry {} has no document", entry.id)))?;

        let features = match &self.tokenizer_url {
            Some(url) => {
                info!(entry = entry.id.as_str(), url = url.as_str(), "tokenizing entry");
                self.remote_features(url, document)?
            }
            None => tokenizer::tokenize_entry(document)?,
        };

        let mut item = Item::new(entry.id.clone());
        for (feature, count) in features {
            item.add_token(dictionary.feature_id(&feature), count);
        }
        Ok(item)
    }

    fn remote_features(&self, url: &str, document: &str) -> Result<HashMap<String, u32>> {
        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/atom+xml")
            .body(document.to_string())
            .send()?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(SiftError::other(format!(
                "tokenizer returned {status}, expected 200"
            )));
        }

        parse_feature_document(&response.text()?)
    }
}

/// Parse the tokenizer service's feature document:
/// `<features><feature key="t:word" count="2"/>...</features>`.
fn parse_feature_document(xml: &str) -> Result<HashMap<String, u32>> {
    let mut features = HashMap::new();
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) | Ok(Event::Empty(start)) => {
                if start.local_name().as_ref() == b"feature" {
                    let mut key = None;
                    let mut count = 1u32;
                    for attr in start.attributes().flatten() {
                        match attr.key.local_name().as_ref() {
                            b"key" => {
                                key = Some(attr.unescape_value().unwrap_or_default().to_string())
                            }
                            b"count" => {
                                count = attr
                                    .unescape_value()
                                    .ok()
                                    .and_then(|v| v.parse().ok())
                                    .unwrap_or(1)
                            }
                            _ => {}
                        }
                    }
                    if let Some(key) = key {
                        *features.entry(key).or_insert(0) += count;
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(SiftError::parse(format!("bad feature document: {e}"))),
            _ => {}
        }
    }

    Ok(features)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::MemoryItemCache;

    const ENTRY: &str = r#"<?xml version="1.0"?>
<entry xmlns="http://www.w3.org/2005/Atom">
  <id>urn:peerworks.org:entry#7</id>
  <title>Sorting grain</title>
  <content type="html">&lt;p&gt;grain and grain again&lt;/p&gt;</content>
</entry>"#;

    #[test]
    fn local_extraction_tokenizes_the_entry() {
        let extractor = FeatureExtractor::new(None).unwrap();
        let cache = MemoryItemCache::new();
        let entry = ItemEntry {
            id: "urn:peerworks.org:entry#7".into(),
            document: Some(ENTRY.into()),
        };

        let item = extractor.extract(&entry, &cache).unwrap();
        assert_eq!(item.id(), "urn:peerworks.org:entry#7");
        // Two occurrences in the content plus one in the title.
        assert_eq!(item.token_count(cache.feature_id("t:grain")), 3);
        assert_eq!(item.token_count(cache.feature_id("t:sorting")), 1);
    }

    #[test]
    fn entries_without_documents_are_rejected() {
        let extractor = FeatureExtractor::new(None).unwrap();
        let cache = MemoryItemCache::new();
        let entry = ItemEntry {
            id: "urn:x".into(),
            document: None,
        };
        assert!(extractor.extract(&entry, &cache).is_err());
    }

    #[test]
    fn feature_documents_parse_keys_and_counts() {
        let xml = r#"<features>
  <feature key="t:grain" count="3"/>
  <feature key="URLSeg:/mill"/>
</features>"#;
        let features = parse_feature_document(xml).unwrap();
        assert_eq!(features.get("t:grain"), Some(&3));
        assert_eq!(features.get("URLSeg:/mill"), Some(&1));
    }
}
