//! HTTP client shared by the sinks.
//!
//! Sink delivery is synchronous: it runs on the caller's thread or on a
//! dispatcher worker's blocking thread, and that thread may belong to the
//! host's tokio runtime. [`HttpClient`] therefore runs its requests on a
//! dedicated executor thread with its own current-thread runtime and waits
//! for the response over a channel. Building, using and dropping it is safe
//! from both sync and async contexts.

use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

use reqwest::{Certificate, Client, Method, Request, RequestBuilder, StatusCode};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};
use url::Url;
use vigil_audit::SinkSettings;

use crate::error::{Result, SinkError};

/// Connect and read timeout for sink requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Extra time a caller waits past the request timeout before giving up on
/// the executor.
const EXECUTOR_GRACE: Duration = Duration::from_secs(1);

/// TLS and timeout options for a sink's HTTP client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// Per-request timeout, applied to connect and to the whole exchange.
    pub timeout: Duration,
    /// Whether server certificates are verified.
    pub verify_tls: bool,
    /// Extra PEM-encoded root certificates to trust.
    pub trusted_cas: Option<PathBuf>,
    /// Whether proxies from the environment (`HTTP_PROXY`, ...) apply.
    pub system_proxy: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            verify_tls: true,
            trusted_cas: None,
            system_proxy: true,
        }
    }
}

impl ClientOptions {
    /// Reads `<prefix>.ssl.verify`, `<prefix>.ssl.pem_trustedcas_filepath`
    /// and `<prefix>.use_system_proxy`.
    #[must_use]
    pub fn from_settings(settings: &SinkSettings, prefix: &str) -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            verify_tls: settings
                .get_bool(&format!("{prefix}.ssl.verify"))
                .unwrap_or(true),
            trusted_cas: settings
                .get_str(&format!("{prefix}.ssl.pem_trustedcas_filepath"))
                .map(PathBuf::from),
            system_proxy: settings
                .get_bool(&format!("{prefix}.use_system_proxy"))
                .unwrap_or(true),
        }
    }

    /// Sets the timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets certificate verification.
    #[must_use]
    pub const fn with_verify_tls(mut self, verify: bool) -> Self {
        self.verify_tls = verify;
        self
    }

    /// Sets whether environment proxies apply.
    #[must_use]
    pub const fn with_system_proxy(mut self, enabled: bool) -> Self {
        self.system_proxy = enabled;
        self
    }

    /// Adds a PEM file of trusted root certificates.
    #[must_use]
    pub fn with_trusted_cas(mut self, path: impl Into<PathBuf>) -> Self {
        self.trusted_cas = Some(path.into());
        self
    }

    /// Builds the client and starts its executor thread.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Certificate`] if the trusted CA file cannot be
    /// read or parsed, [`SinkError::Transport`] if the TLS backend fails
    /// to initialize, and [`SinkError::Executor`] if the executor thread
    /// cannot be started.
    pub fn build(&self) -> Result<HttpClient> {
        let mut builder = Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.timeout)
            .danger_accept_invalid_certs(!self.verify_tls);
        if !self.system_proxy {
            builder = builder.no_proxy();
        }

        if let Some(path) = &self.trusted_cas {
            let certificate_error = |reason: String| SinkError::Certificate {
                path: path.display().to_string(),
                reason,
            };
            let pem = fs::read(path).map_err(|e| certificate_error(e.to_string()))?;
            let certificates =
                Certificate::from_pem_bundle(&pem).map_err(|e| certificate_error(e.to_string()))?;
            if certificates.is_empty() {
                return Err(certificate_error("no certificates found".to_string()));
            }
            for certificate in certificates {
                builder = builder.add_root_certificate(certificate);
            }
        }

        if !self.verify_tls {
            tracing::warn!(target: "vigil_audit", "tls certificate verification disabled for audit sink");
        }

        HttpClient::start(builder.build()?, self.timeout)
    }
}

struct Job {
    request: Request,
    reply: mpsc::SyncSender<reqwest::Result<StatusCode>>,
}

/// An HTTP client whose requests run on a dedicated executor thread.
///
/// Dropping the client stops the executor; requests still in flight are
/// abandoned.
pub struct HttpClient {
    client: Client,
    jobs: Option<UnboundedSender<Job>>,
    worker: Option<JoinHandle<()>>,
    timeout: Duration,
}

impl HttpClient {
    fn start(client: Client, timeout: Duration) -> Result<Self> {
        let executor_error = |reason: String| SinkError::Executor { reason };
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| executor_error(e.to_string()))?;
        let (jobs, queue) = unbounded_channel();
        let executor = client.clone();
        let worker = std::thread::Builder::new()
            .name("vigil-audit-http".to_string())
            .spawn(move || runtime.block_on(execute(executor, queue)))
            .map_err(|e| executor_error(e.to_string()))?;
        debug!(target: "vigil_audit", timeout_ms = timeout.as_millis(), "http executor started");

        Ok(Self {
            client,
            jobs: Some(jobs),
            worker: Some(worker),
            timeout,
        })
    }

    /// Starts a request to `url`.
    #[must_use]
    pub fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client.request(method, url)
    }

    /// Sends `request` and waits for the response status.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Transport`] if the request cannot be built or
    /// fails on the wire, and [`SinkError::Executor`] if the executor is gone
    /// or does not answer within the timeout.
    pub fn send(&self, request: RequestBuilder) -> Result<StatusCode> {
        let request = request.build()?;
        let (reply, response) = mpsc::sync_channel(1);
        let stopped = || SinkError::Executor {
            reason: "executor stopped".to_string(),
        };
        self.jobs
            .as_ref()
            .ok_or_else(stopped)?
            .send(Job { request, reply })
            .map_err(|_| stopped())?;

        match response.recv_timeout(self.timeout + EXECUTOR_GRACE) {
            Ok(result) => Ok(result?),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(SinkError::Executor {
                reason: format!("no response within {}ms", self.timeout.as_millis()),
            }),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(stopped()),
        }
    }
}

async fn execute(client: Client, mut queue: UnboundedReceiver<Job>) {
    while let Some(Job { request, reply }) = queue.recv().await {
        let client = client.clone();
        tokio::spawn(async move {
            let result = client.execute(request).await.map(|response| response.status());
            let _ = reply.send(result);
        });
    }
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("timeout", &self.timeout)
            .field("running", &self.jobs.is_some())
            .finish_non_exhaustive()
    }
}

impl Drop for HttpClient {
    fn drop(&mut self) {
        self.jobs.take();
        if self.worker.take().is_some_and(|worker| worker.join().is_err()) {
            warn!(target: "vigil_audit", "http executor thread panicked");
        }
    }
}
