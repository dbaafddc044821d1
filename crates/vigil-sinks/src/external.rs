//! External storage sink: writes audit documents to a remote document
//! store over HTTP.

use std::sync::Arc;

use reqwest::header::{HeaderName, HeaderValue};
use reqwest::Method;
use tracing::{trace, warn};
use url::Url;
use vigil_audit::sink::{DEFAULT_DOC_TYPE, DEFAULT_INDEX};
use vigil_audit::{
    AuditError, AuditSink, DocumentStore, IndexDocument, SinkContext, SinkSettings, StorageSink,
};

use crate::client::{ClientOptions, HttpClient};
use crate::error::{Result, SinkError};

/// Registry key of the external storage sink.
pub const EXTERNAL_STORAGE_SINK: &str = "external_elasticsearch";

/// Basic-auth credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// User name.
    pub username: String,
    /// Password; may be empty.
    pub password: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// A [`DocumentStore`] that POSTs each document to
/// `{base_url}/{index}/{doc_type}`.
///
/// Any 2xx response counts as stored.
#[derive(Debug)]
pub struct HttpDocumentStore {
    base_url: Url,
    credentials: Option<Credentials>,
    client: HttpClient,
}

impl HttpDocumentStore {
    /// Creates a store for `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::InvalidUrl`] if the URL does not parse or cannot
    /// carry path segments, and client construction errors.
    pub fn new(base_url: &str, options: &ClientOptions) -> Result<Self> {
        let invalid = |source| SinkError::InvalidUrl {
            url: base_url.to_string(),
            source,
        };
        let base_url = Url::parse(base_url.trim()).map_err(invalid)?;
        if base_url.cannot_be_a_base() {
            return Err(invalid(url::ParseError::RelativeUrlWithCannotBeABaseBase));
        }
        Ok(Self {
            base_url,
            credentials: None,
            client: options.build()?,
        })
    }

    /// Authenticates requests with basic auth.
    #[must_use]
    pub fn with_credentials(mut self, username: impl Into<String>, password: Option<String>) -> Self {
        self.credentials = Some(Credentials {
            username: username.into(),
            password,
        });
        self
    }

    /// Returns the base URL.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Returns the URL a document is posted to.
    #[must_use]
    pub fn document_url(&self, index: &str, doc_type: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(index).push(doc_type);
        }
        url
    }

    fn post(&self, document: &IndexDocument) -> Result<()> {
        let url = self.document_url(&document.index, &document.doc_type);
        let mut request = self
            .client
            .request(Method::POST, url.clone())
            .json(&document.body);
        for (key, value) in &document.headers {
            match (
                HeaderName::from_bytes(key.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => request = request.header(name, value),
                _ => warn!(target: "vigil_audit", header = %key, "skipping header not valid in http"),
            }
        }
        if let Some(credentials) = &self.credentials {
            request = request.basic_auth(&credentials.username, credentials.password.as_ref());
        }

        let status = self.client.send(request)?;
        if !status.is_success() {
            return Err(SinkError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        trace!(target: "vigil_audit", %url, status = status.as_u16(), "document stored");
        Ok(())
    }
}

impl DocumentStore for HttpDocumentStore {
    fn index(&self, document: IndexDocument) -> vigil_audit::Result<()> {
        self.post(&document)
            .map_err(|e| e.into_delivery(EXTERNAL_STORAGE_SINK))
    }
}

/// Builds the external storage sink from `external.*` settings.
///
/// `external.url` is required; `external.index` and `external.doc_type`
/// default like the internal storage sink, and `external.username` /
/// `external.password` enable basic auth.
///
/// # Errors
///
/// Returns [`AuditError::Config`] if the URL is missing or invalid or the
/// HTTP client cannot be built.
pub fn external_sink(
    settings: &SinkSettings,
    _ctx: &SinkContext,
) -> vigil_audit::Result<Arc<dyn AuditSink>> {
    let url = settings
        .get_str("external.url")
        .ok_or_else(|| AuditError::config("external.url is required"))?;
    let mut store = HttpDocumentStore::new(url, &ClientOptions::from_settings(settings, "external"))?;
    if let Some(username) = settings.get_str("external.username") {
        store = store.with_credentials(
            username,
            settings.get_str("external.password").map(str::to_string),
        );
    }

    let index = settings.get_str("external.index").unwrap_or(DEFAULT_INDEX);
    let doc_type = settings.get_str("external.doc_type").unwrap_or(DEFAULT_DOC_TYPE);
    let sink = StorageSink::new(Arc::new(store), index, doc_type).with_name(EXTERNAL_STORAGE_SINK);
    Ok(Arc::new(sink))
}
