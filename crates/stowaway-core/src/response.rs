//! Whole responses as served to the client and stored in a cache.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

/// How much of the response the caching layer is allowed to trust.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// Same-origin response, fully inspectable
    Basic,
    /// Cross-origin response obtained with CORS
    Cors,
    /// Cross-origin no-cors response; status and body are unverified
    Opaque,
    /// Network error placeholder
    Error,
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResponseType::Basic => "basic",
            ResponseType::Cors => "cors",
            ResponseType::Opaque => "opaque",
            ResponseType::Error => "error",
        };
        write!(f, "{}", name)
    }
}

/// A complete response. Cloning copies the body, which is what write-back
/// relies on to hand one copy to the caller and one to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,
    #[serde(default)]
    pub status_text: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(skip)]
    pub body: Vec<u8>,
    pub response_type: ResponseType,
    #[serde(default)]
    pub url: Option<Url>,
}

impl Response {
    pub fn new(status: u16, response_type: ResponseType, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            status_text: String::new(),
            headers: Vec::new(),
            body: body.into(),
            response_type,
            url: None,
        }
    }

    /// A synthesized same-origin HTML document
    pub fn html(body: impl Into<String>) -> Self {
        let mut response = Self::new(200, ResponseType::Basic, body.into().into_bytes());
        response.status_text = "OK".to_string();
        response
            .headers
            .push(("Content-Type".to_string(), "text/html".to_string()));
        response
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    /// Status in the 2xx range
    pub fn ok(&self) -> bool {
        (200..=299).contains(&self.status)
    }

    /// Case-insensitive header lookup, first match wins
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    pub fn body_len(&self) -> u64 {
        self.body.len() as u64
    }

    /// Body decoded as UTF-8, lossy
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
