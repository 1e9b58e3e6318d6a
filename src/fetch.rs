//! Fetching documents from the tag service
//!
//! The cache talks to the tag service through the [`TagRetriever`] seam:
//! a conditional GET that reports not-modified, not-found, and transport
//! failure as distinct outcomes. [`HttpTagRetriever`] is the production
//! implementation; tests substitute scripted retrievers.

use crate::error::Result;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

/// Credential pair forwarded with every tag service request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub access_id: String,
    pub secret_key: String,
}

impl Credentials {
    /// Authorization header value for a request: the access id and an
    /// HMAC-SHA256 signature over the method, date, and path.
    pub fn authorization(&self, method: &str, date: &str, path: &str) -> String {
        let canonical = format!("{method}\n{date}\n{path}");
        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .expect("hmac accepts any key length");
        mac.update(canonical.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());
        format!("AuthHMAC {}:{}", self.access_id, signature)
    }
}

/// Outcome of a conditional document fetch.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// A document body was returned.
    Ok(String),
    /// The document has not changed since `if_modified_since`.
    NotModified,
    /// The URL does not name a document.
    NotFound(String),
    /// Transport or server failure.
    Fail(String),
}

/// Conditional document retrieval from the tag service.
pub trait TagRetriever: Send + Sync {
    fn fetch(
        &self,
        url: &str,
        if_modified_since: Option<DateTime<Utc>>,
        credentials: Option<&Credentials>,
    ) -> FetchOutcome;
}

/// Blocking HTTP retriever.
pub struct HttpTagRetriever {
    client: reqwest::blocking::Client,
}

impl HttpTagRetriever {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client })
    }
}

impl TagRetriever for HttpTagRetriever {
    fn fetch(
        &self,
        url: &str,
        if_modified_since: Option<DateTime<Utc>>,
        credentials: Option<&Credentials>,
    ) -> FetchOutcome {
        debug!(url, "fetching tag document");

        let mut request = self.client.get(url);

        if let Some(since) = if_modified_since {
            request = request.header(
                reqwest::header::IF_MODIFIED_SINCE,
                since.format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
            );
        }

        if let Some(credentials) = credentials {
            let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
            let path = url::Url::parse(url)
                .map(|u| u.path().to_string())
                .unwrap_or_else(|_| "/".to_string());
            request = request
                .header(reqwest::header::DATE, date.clone())
                .header(
                    reqwest::header::AUTHORIZATION,
                    credentials.authorization("GET", &date, &path),
                );
        }

        let response = match request.send() {
            Ok(response) => response,
            Err(e) => {
                warn!(url, error = %e, "tag document fetch failed");
                return FetchOutcome::Fail(e.to_string());
            }
        };

        match response.status() {
            reqwest::StatusCode::OK => match response.text() {
                Ok(body) => FetchOutcome::Ok(body),
                Err(e) => FetchOutcome::Fail(e.to_string()),
            },
            reqwest::StatusCode::NOT_MODIFIED => FetchOutcome::NotModified,
            reqwest::StatusCode::NOT_FOUND => {
                FetchOutcome::NotFound(format!("{url} could not be found"))
            }
            status => FetchOutcome::Fail(format!("{url} returned {status}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorization_header_is_deterministic() {
        let credentials = Credentials {
            access_id: "collector".into(),
            secret_key: "sesame".into(),
        };
        let a = credentials.authorization("GET", "Thu, 11 Feb 2010 10:20:30 GMT", "/tags.atom");
        let b = credentials.authorization("GET", "Thu, 11 Feb 2010 10:20:30 GMT", "/tags.atom");
        assert_eq!(a, b);
        assert!(a.starts_with("AuthHMAC collector:"));
    }

    #[test]
    fn authorization_covers_the_path() {
        let credentials = Credentials {
            access_id: "collector".into(),
            secret_key: "sesame".into(),
        };
        let date = "Thu, 11 Feb 2010 10:20:30 GMT";
        assert_ne!(
            credentials.authorization("GET", date, "/a.atom"),
            credentials.authorization("GET", date, "/b.atom")
        );
    }
}
