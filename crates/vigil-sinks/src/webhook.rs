//! Webhook sink: delivers each record to a single HTTP endpoint.

use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use tracing::debug;
use url::Url;
use vigil_audit::{AuditRecord, AuditSink, SinkSettings};

use crate::client::{ClientOptions, HttpClient};
use crate::error::{Result, SinkError};
use crate::format::WebhookFormat;

/// Registry key of the webhook sink.
pub const WEBHOOK_SINK: &str = "webhook";

/// Configuration for a [`WebhookSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookConfig {
    /// Diagnostic name of the sink.
    pub name: String,
    /// The endpoint receiving records.
    pub url: Url,
    /// Payload encoding.
    pub format: WebhookFormat,
    /// HTTP client options.
    pub client: ClientOptions,
}

impl WebhookConfig {
    /// Creates a configuration for `url` using `format`.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Config`] if the URL is empty and
    /// [`SinkError::InvalidUrl`] if it does not parse.
    pub fn new(url: &str, format: WebhookFormat) -> Result<Self> {
        let url = url.trim();
        if url.is_empty() {
            return Err(SinkError::config("webhook URL cannot be empty"));
        }
        let url = Url::parse(url).map_err(|source| SinkError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
        Ok(Self {
            name: WEBHOOK_SINK.to_string(),
            url,
            format,
            client: ClientOptions::default(),
        })
    }

    /// Reads `webhook.url`, `webhook.format` and the `webhook.ssl.*` options.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Config`] if the URL or format is missing, and
    /// the errors of [`WebhookConfig::new`] and [`WebhookFormat::from_str`].
    ///
    /// [`WebhookFormat::from_str`]: std::str::FromStr::from_str
    pub fn from_settings(settings: &SinkSettings) -> Result<Self> {
        let url = settings
            .get_str("webhook.url")
            .ok_or_else(|| SinkError::config("webhook.url is required"))?;
        let format = settings
            .get_str("webhook.format")
            .ok_or_else(|| SinkError::config("webhook.format is required"))?
            .parse()?;
        Ok(Self::new(url, format)?.with_client(ClientOptions::from_settings(settings, "webhook")))
    }

    /// Overrides the diagnostic name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Replaces the client options.
    #[must_use]
    pub fn with_client(mut self, client: ClientOptions) -> Self {
        self.client = client;
        self
    }
}

/// Delivers records to a webhook, one request per record, without retries.
///
/// Any status other than `200 OK` fails the delivery.
#[derive(Debug)]
pub struct WebhookSink {
    config: WebhookConfig,
    client: HttpClient,
}

impl WebhookSink {
    /// Creates the sink and its HTTP client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: WebhookConfig) -> Result<Self> {
        let client = config.client.build()?;
        debug!(
            target: "vigil_audit",
            sink = %config.name,
            url = %config.url,
            format = %config.format,
            "webhook sink ready"
        );
        Ok(Self { config, client })
    }

    /// Builds the sink from its settings.
    ///
    /// # Errors
    ///
    /// See [`WebhookConfig::from_settings`] and [`WebhookSink::new`].
    pub fn from_settings(settings: &SinkSettings) -> Result<Self> {
        Self::new(WebhookConfig::from_settings(settings)?)
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &WebhookConfig {
        &self.config
    }

    /// Returns the URL a record is delivered to, query included.
    #[must_use]
    pub fn target_url(&self, query: Option<&str>) -> Url {
        let mut url = self.config.url.clone();
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            let joined = match url.query() {
                Some(existing) if !existing.is_empty() => format!("{existing}&{query}"),
                _ => query.to_string(),
            };
            url.set_query(Some(&joined));
        }
        url
    }

    fn send(&self, record: &AuditRecord) -> Result<()> {
        let format = self.config.format;
        let payload = format.render(record)?;
        let url = self.target_url(payload.query.as_deref());

        let mut request = self.client.request(format.method(), url);
        if let Some(body) = payload.body {
            if let Some(content_type) = format.content_type() {
                request = request.header(CONTENT_TYPE, content_type);
            }
            request = request.body(body);
        }

        let status = self.client.send(request)?;
        if status != StatusCode::OK {
            return Err(SinkError::Status {
                status: status.as_u16(),
                url: self.config.url.to_string(),
            });
        }
        Ok(())
    }
}

impl AuditSink for WebhookSink {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn store(&self, record: &AuditRecord) -> vigil_audit::Result<()> {
        self.send(record)
            .map_err(|e| e.into_delivery(&self.config.name))?;
        debug!(
            target: "vigil_audit",
            sink = %self.config.name,
            category = %record.category(),
            "delivered audit record to webhook"
        );
        Ok(())
    }
}
