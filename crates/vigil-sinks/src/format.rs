//! Webhook payload formats.

use std::fmt;
use std::str::FromStr;

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::json;
use url::form_urlencoded;
use vigil_audit::AuditRecord;

use crate::error::{Result, SinkError};

/// How a record is encoded for the webhook endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WebhookFormat {
    /// Record fields as query parameters on a GET request.
    UrlParameterGet,
    /// Record fields as query parameters on a POST with an empty body.
    UrlParameterPost,
    /// `Label: value` lines as a plain-text body.
    Text,
    /// The record's JSON object as the body.
    Json,
    /// `{"text": ...}` wrapping the plain-text rendering.
    Slack,
}

impl WebhookFormat {
    /// All formats.
    pub const ALL: [Self; 5] = [
        Self::UrlParameterGet,
        Self::UrlParameterPost,
        Self::Text,
        Self::Json,
        Self::Slack,
    ];

    /// Returns the configuration name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::UrlParameterGet => "URL_PARAMETER_GET",
            Self::UrlParameterPost => "URL_PARAMETER_POST",
            Self::Text => "TEXT",
            Self::Json => "JSON",
            Self::Slack => "SLACK",
        }
    }

    /// Returns the HTTP method used to deliver this format.
    #[must_use]
    pub fn method(&self) -> Method {
        match self {
            Self::UrlParameterGet => Method::GET,
            _ => Method::POST,
        }
    }

    /// Returns the body content type, if the format sends a body.
    #[must_use]
    pub const fn content_type(&self) -> Option<&'static str> {
        match self {
            Self::UrlParameterGet | Self::UrlParameterPost => None,
            Self::Text => Some("text/plain; charset=utf-8"),
            Self::Json | Self::Slack => Some("application/json"),
        }
    }

    /// Encodes `record` for delivery.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Serialization`] if the JSON body cannot be built.
    pub fn render(&self, record: &AuditRecord) -> Result<Payload> {
        let payload = match self {
            Self::UrlParameterGet | Self::UrlParameterPost => Payload {
                query: Some(url_parameters(record)),
                body: None,
            },
            Self::Text => Payload {
                query: None,
                body: Some(record.to_text()),
            },
            Self::Json => Payload {
                query: None,
                body: Some(serde_json::to_string(&record.to_json_value())?),
            },
            Self::Slack => Payload {
                query: None,
                body: Some(serde_json::to_string(&json!({ "text": record.to_text() }))?),
            },
        };
        Ok(payload)
    }
}

impl fmt::Display for WebhookFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WebhookFormat {
    type Err = SinkError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|f| f.as_str() == normalized)
            .ok_or_else(|| SinkError::UnknownFormat {
                name: s.to_string(),
            })
    }
}

/// An encoded record: an optional query string and an optional body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    /// Form-encoded query parameters appended to the endpoint URL.
    pub query: Option<String>,
    /// Request body.
    pub body: Option<String>,
}

fn url_parameters(record: &AuditRecord) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (field, value) in record.iter_strings() {
        if !value.is_empty() {
            serializer.append_pair(field.key(), &value);
        }
    }
    serializer.finish()
}
