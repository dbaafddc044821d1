//! The public logging operations.
//!
//! Every operation follows the same path: drop sink self-writes, resolve
//! identity from the [`RequestContext`], ask the filter, build the records,
//! submit them. Nothing here ever returns an error to the caller.

use std::sync::Arc;

use crate::category::{Category, CategoryFlags};
use crate::config::AuditConfig;
use crate::context::RequestContext;
use crate::dispatcher::{DispatchConfig, DispatchStats, Dispatcher};
use crate::filter::{FilterEngine, FilterSubject};
use crate::record::{AuditRecord, Field, Origin};
use crate::request::{AuditRequest, RestRequest};
use crate::resolver::{RequestResolver, ResolveParams};
use crate::sink::{AuditSink, SinkContext, SinkRegistry, SinkSettings};
use crate::source::source_to_text;
use crate::wildcard::WildcardPattern;

/// Per-operation data that differs between the logging calls.
#[derive(Debug, Clone, Copy)]
struct Event<'a> {
    category: Category,
    user: Option<&'a str>,
    initiating_user: Option<&'a str>,
    is_admin: Option<bool>,
    privilege: Option<&'a str>,
    exception: Option<&'a str>,
}

impl Event<'_> {
    const fn new(category: Category) -> Self {
        Self {
            category,
            user: None,
            initiating_user: None,
            is_admin: None,
            privilege: None,
            exception: None,
        }
    }
}

/// Builder for [`AuditLog`].
#[derive(Debug)]
pub struct AuditLogBuilder {
    config: AuditConfig,
    registry: Option<SinkRegistry>,
    context: SinkContext,
    flags: Option<Arc<CategoryFlags>>,
    sink: Option<Arc<dyn AuditSink>>,
}

impl AuditLogBuilder {
    /// Sets the registry used to build the configured sink. Defaults to the
    /// built-in sinks.
    #[must_use]
    pub fn registry(mut self, registry: SinkRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Sets the host collaborators.
    #[must_use]
    pub fn context(mut self, context: SinkContext) -> Self {
        self.context = context;
        self
    }

    /// Uses private category flags instead of the process-wide ones.
    #[must_use]
    pub fn category_flags(mut self, flags: Arc<CategoryFlags>) -> Self {
        self.flags = Some(flags);
        self
    }

    /// Uses `sink` directly, bypassing the configured selector.
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Builds the pipeline.
    ///
    /// Invalid configuration or a sink that cannot be built is logged and
    /// leaves audit logging disabled.
    #[must_use]
    pub fn build(self) -> AuditLog {
        let config = self.config;
        let filter_config = Arc::new(config.filter_config());
        let filter = match self.flags {
            Some(flags) => FilterEngine::with_flags(filter_config, flags),
            None => FilterEngine::new(filter_config),
        };

        let mut resolver =
            RequestResolver::new(config.config_index.clone()).resolve_indices(config.resolve_indices);
        if let Some(index_resolver) = &self.context.index_resolver {
            resolver = resolver.with_index_resolver(Arc::clone(index_resolver), self.context.cluster.clone());
        }

        let sink = match config.validate() {
            Ok(()) => self.sink.or_else(|| {
                let registry = self.registry.unwrap_or_else(SinkRegistry::with_builtins);
                select_sink(&config, &registry, &self.context)
            }),
            Err(e) => {
                tracing::error!(target: "vigil_audit", error = %e, "audit logging disabled");
                None
            }
        };

        AuditLog {
            filter,
            resolver,
            dispatcher: Dispatcher::new(sink, DispatchConfig::from_config(&config)),
        }
    }
}

fn select_sink(
    config: &AuditConfig,
    registry: &SinkRegistry,
    ctx: &SinkContext,
) -> Option<Arc<dyn AuditSink>> {
    let Some(key) = config.sink_type.as_deref() else {
        tracing::debug!(target: "vigil_audit", "no audit sink configured, audit logging disabled");
        return None;
    };
    let settings = SinkSettings::new(config.sink.clone());
    match registry.create(key, &settings, ctx) {
        Ok(sink) => {
            tracing::info!(target: "vigil_audit", sink = sink.name(), "audit logging enabled");
            Some(sink)
        }
        Err(e) => {
            tracing::error!(
                target: "vigil_audit",
                sink = key,
                error = %e,
                "audit sink unavailable, audit logging disabled"
            );
            None
        }
    }
}

/// Returns true if any segment of `path` names `config_index`.
fn path_targets_index(path: &str, config_index: &str) -> bool {
    let protected = WildcardPattern::new(config_index);
    path.split('/')
        .flat_map(|segment| segment.split(','))
        .filter(|name| !name.is_empty() && !name.starts_with('_'))
        .any(|name| protected.matches(name) || WildcardPattern::new(name).matches(config_index))
}

/// The audit pipeline entry point.
#[derive(Debug)]
pub struct AuditLog {
    filter: FilterEngine,
    resolver: RequestResolver,
    dispatcher: Dispatcher,
}

impl AuditLog {
    /// Starts building a pipeline from `config`.
    #[must_use]
    pub fn builder(config: AuditConfig) -> AuditLogBuilder {
        AuditLogBuilder {
            config,
            registry: None,
            context: SinkContext::default(),
            flags: None,
            sink: None,
        }
    }

    /// Builds a pipeline from `config` with the built-in sinks.
    #[must_use]
    pub fn new(config: AuditConfig, context: SinkContext) -> Self {
        Self::builder(config).context(context).build()
    }

    /// Creates a pipeline that records nothing.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            filter: FilterEngine::new(Arc::default()),
            resolver: RequestResolver::new(crate::config::DEFAULT_CONFIG_INDEX),
            dispatcher: Dispatcher::disabled(),
        }
    }

    /// Returns true if a sink is active.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.dispatcher.is_enabled()
    }

    /// Returns the filter engine.
    #[must_use]
    pub const fn filter(&self) -> &FilterEngine {
        &self.filter
    }

    /// Returns the dispatcher.
    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Returns the dispatch counters.
    #[must_use]
    pub fn stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    /// Records a failed authentication attempt by `user`.
    pub fn log_failed_login(&self, user: &str, request: &AuditRequest<'_>, ctx: &RequestContext) {
        let event = Event {
            user: Some(user),
            ..Event::new(Category::FailedLogin)
        };
        self.log(event, request, ctx);
    }

    /// Records a successful authentication.
    ///
    /// `effective_user` is set when `user` impersonates someone; the record
    /// then carries both names.
    pub fn log_succeeded_login(
        &self,
        user: &str,
        is_admin: bool,
        effective_user: Option<&str>,
        request: &AuditRequest<'_>,
        ctx: &RequestContext,
    ) {
        let event = match effective_user {
            Some(effective) if effective != user => Event {
                user: Some(effective),
                initiating_user: Some(user),
                is_admin: Some(is_admin),
                ..Event::new(Category::Authenticated)
            },
            _ => Event {
                user: Some(user),
                is_admin: Some(is_admin),
                ..Event::new(Category::Authenticated)
            },
        };
        self.log(event, request, ctx);
    }

    /// Records a request denied for lack of `privilege`.
    pub fn log_missing_privileges(
        &self,
        privilege: &str,
        request: &AuditRequest<'_>,
        ctx: &RequestContext,
    ) {
        let event = Event {
            privilege: Some(privilege),
            ..Event::new(Category::MissingPrivileges)
        };
        self.log(event, request, ctx);
    }

    /// Records a request allowed by `privilege`.
    pub fn log_granted_privileges(
        &self,
        privilege: &str,
        request: &AuditRequest<'_>,
        ctx: &RequestContext,
    ) {
        let event = Event {
            privilege: Some(privilege),
            ..Event::new(Category::GrantedPrivileges)
        };
        self.log(event, request, ctx);
    }

    /// Records a request carrying forbidden internal headers.
    pub fn log_bad_headers(&self, request: &AuditRequest<'_>, ctx: &RequestContext) {
        self.log(Event::new(Category::BadHeaders), request, ctx);
    }

    /// Records a write attempt against the configuration index.
    pub fn log_sg_index_attempt(&self, request: &AuditRequest<'_>, ctx: &RequestContext) {
        self.log(Event::new(Category::SgIndexAttempt), request, ctx);
    }

    /// Records a TLS failure.
    pub fn log_ssl_exception(&self, request: &AuditRequest<'_>, error: &str, ctx: &RequestContext) {
        let event = Event {
            exception: Some(error),
            ..Event::new(Category::SslException)
        };
        self.log(event, request, ctx);
    }

    /// Shuts the dispatcher down and closes the sink. Safe to call more
    /// than once.
    pub fn close(&self) {
        self.dispatcher.shutdown();
    }

    fn log(&self, event: Event<'_>, request: &AuditRequest<'_>, ctx: &RequestContext) {
        if !self.dispatcher.is_enabled() {
            return;
        }
        if ctx.is_internal_write() {
            tracing::trace!(target: "vigil_audit", category = %event.category, "skipped sink self-write");
            return;
        }

        let user = ctx.resolve_user(event.user);
        let records = match *request {
            AuditRequest::Transport { action, request } => {
                let subject = FilterSubject::transport(
                    event.category,
                    Some(action),
                    user.as_deref(),
                    Some(request.type_name()),
                );
                if !self.filter.should_audit(&subject) {
                    return;
                }
                let config = self.filter.config();
                let headers = ctx.audit_headers();
                let remote_address = ctx.resolve_remote_address();
                self.resolver.resolve(&ResolveParams {
                    category: event.category,
                    origin: ctx.resolve_origin(None).unwrap_or(Origin::Transport),
                    action: Some(action),
                    privilege: event.privilege,
                    effective_user: user.as_deref(),
                    is_admin: event.is_admin,
                    initiating_user: event.initiating_user,
                    remote_address: remote_address.as_deref(),
                    request,
                    headers: &headers,
                    task: ctx.task.as_ref(),
                    with_details: config.include_details,
                    resolve_bulk: config.resolve_bulk,
                    exception: event.exception,
                })
            }
            AuditRequest::Rest(rest) => {
                let subject = FilterSubject::rest(event.category, Some(rest.path.as_str()), user.as_deref());
                if !self.filter.should_audit(&subject) {
                    return;
                }
                vec![self.rest_record(&event, rest, user.as_deref(), ctx)]
            }
        };

        for record in records {
            self.dispatcher.submit(record);
        }
    }

    fn rest_record(
        &self,
        event: &Event<'_>,
        rest: &RestRequest,
        user: Option<&str>,
        ctx: &RequestContext,
    ) -> AuditRecord {
        let config = self.filter.config();
        let body = rest
            .body
            .as_deref()
            .filter(|_| config.include_details)
            .filter(|_| !path_targets_index(&rest.path, &config.config_index))
            .map(source_to_text);

        AuditRecord::builder(event.category)
            .origin(Origin::Rest)
            .effective_user(user)
            .text(Field::InitiatingUser, event.initiating_user)
            .flag(Field::EffectiveUserIsAdmin, event.is_admin)
            .remote_address(ctx.resolve_remote_address().as_deref())
            .text(Field::Privilege, event.privilege)
            .text(Field::RestPath, Some(&rest.path))
            .map(Field::RestParams, &rest.params)
            .text(Field::RequestBody, body)
            .map(Field::Headers, &ctx.audit_headers())
            .exception(event.exception)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{INTERNAL_WRITE_MARKER, USER_HEADER};
    use crate::error::Result;
    use crate::request::{DocRequest, OperationRequest};
    use parking_lot::Mutex;

    #[derive(Debug, Default)]
    struct RecordingSink {
        records: Mutex<Vec<AuditRecord>>,
    }

    impl AuditSink for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }

        fn store(&self, record: &AuditRecord) -> Result<()> {
            self.records.lock().push(record.clone());
            Ok(())
        }
    }

    fn sync_config() -> AuditConfig {
        AuditConfig {
            threadpool_size: 0,
            ..AuditConfig::default()
        }
    }

    fn audit_log(config: AuditConfig) -> (AuditLog, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let log = AuditLog::builder(config)
            .category_flags(Arc::new(CategoryFlags::new()))
            .sink(sink.clone())
            .build();
        (log, sink)
    }

    #[test]
    fn failed_login_over_rest() {
        let (log, sink) = audit_log(sync_config());
        let rest = RestRequest::new("POST", "/_login").with_param("pretty", "true");
        let ctx = RequestContext::new()
            .with_remote_address("198.51.100.4")
            .with_header("X-Forwarded-For", "10.1.1.1");

        log.log_failed_login("mallory", &AuditRequest::Rest(&rest), &ctx);

        let records = sink.records.lock();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.category(), Category::FailedLogin);
        assert_eq!(record.get_str(Field::Origin), Some("rest"));
        assert_eq!(record.get_str(Field::EffectiveUser), Some("mallory"));
        assert_eq!(record.get_str(Field::RemoteAddress), Some("198.51.100.4"));
        assert_eq!(record.get_str(Field::RestPath), Some("/_login"));
        assert_eq!(record.get(Field::RestParams), Some(&serde_json::json!({"pretty": "true"})));
        assert_eq!(record.get(Field::Headers), Some(&serde_json::json!({"X-Forwarded-For": "10.1.1.1"})));
    }

    #[test]
    fn impersonated_login_records_both_users() {
        let (log, sink) = audit_log(sync_config());
        let rest = RestRequest::new("GET", "/_auth");
        log.log_succeeded_login("admin", true, Some("alice"), &AuditRequest::Rest(&rest), &RequestContext::new());

        let records = sink.records.lock();
        assert_eq!(records[0].get_str(Field::EffectiveUser), Some("alice"));
        assert_eq!(records[0].get_str(Field::InitiatingUser), Some("admin"));
        assert_eq!(records[0].get(Field::EffectiveUserIsAdmin), Some(&serde_json::json!(true)));
    }

    #[test]
    fn transport_user_from_propagated_header() {
        let (log, sink) = audit_log(sync_config());
        let op = OperationRequest::Get(DocRequest::new("movies").with_id("1"));
        let request = AuditRequest::Transport {
            action: "indices:data/read/get",
            request: &op,
        };
        let ctx = RequestContext::new()
            .with_header(USER_HEADER, r#"{"name":"bob"}"#)
            .with_header("_vigil_origin", "\"rest\"");

        log.log_missing_privileges("indices:data/read/get", &request, &ctx);

        let records = sink.records.lock();
        let record = &records[0];
        assert_eq!(record.get_str(Field::EffectiveUser), Some("bob"));
        assert_eq!(record.get_str(Field::Origin), Some("rest"));
        assert_eq!(record.get_str(Field::Privilege), Some("indices:data/read/get"));
        assert!(!record.contains(Field::Headers));
    }

    #[test]
    fn self_writes_are_never_audited() {
        let (log, sink) = audit_log(sync_config());
        let op = OperationRequest::Index(DocRequest::new("auditlog"));
        let request = AuditRequest::Transport {
            action: "indices:data/write/index",
            request: &op,
        };
        let ctx = RequestContext::new().with_header(INTERNAL_WRITE_MARKER, "true");
        log.log_granted_privileges("indices:data/write/index", &request, &ctx);
        assert!(sink.records.lock().is_empty());
    }

    #[test]
    fn filtered_events_produce_nothing() {
        let (log, sink) = audit_log(sync_config());
        let rest = RestRequest::new("GET", "/");
        log.log_failed_login("kibanaserver", &AuditRequest::Rest(&rest), &RequestContext::new());
        assert!(sink.records.lock().is_empty());
    }

    #[test]
    fn rest_body_excluded_for_config_index() {
        let (log, sink) = audit_log(sync_config());
        let ctx = RequestContext::new().with_user("eve");

        let protected = RestRequest::new("PUT", "/searchguard/_doc/internalusers").with_body(br#"{"hash":"x"}"#.to_vec());
        log.log_sg_index_attempt(&AuditRequest::Rest(&protected), &ctx);

        let other = RestRequest::new("PUT", "/movies/_doc/1").with_body(br#"{"title":"Dune"}"#.to_vec());
        log.log_bad_headers(&AuditRequest::Rest(&other), &ctx);

        let records = sink.records.lock();
        assert!(!records[0].contains(Field::RequestBody));
        assert_eq!(records[1].get_str(Field::RequestBody), Some(r#"{"title":"Dune"}"#));
    }

    #[test]
    fn ssl_exception_carries_detail() {
        let (log, sink) = audit_log(sync_config());
        let rest = RestRequest::new("GET", "/");
        log.log_ssl_exception(&AuditRequest::Rest(&rest), "handshake failed: bad certificate", &RequestContext::new());
        let records = sink.records.lock();
        assert_eq!(records[0].get_str(Field::Exception), Some("handshake failed: bad certificate"));
    }

    #[test]
    fn unknown_sink_type_disables_logging() {
        let config = AuditConfig {
            sink_type: Some("com.example.KafkaSink".to_string()),
            ..sync_config()
        };
        let log = AuditLog::new(config, SinkContext::default());
        assert!(!log.is_enabled());
        let rest = RestRequest::new("GET", "/");
        log.log_failed_login("x", &AuditRequest::Rest(&rest), &RequestContext::new());
        log.close();
        log.close();
        assert_eq!(log.stats(), DispatchStats::default());
    }

    #[test]
    fn invalid_config_disables_logging() {
        let config = AuditConfig {
            sink_type: Some("debug".to_string()),
            threadpool_max_queue_len: 0,
            ..sync_config()
        };
        assert!(!AuditLog::new(config, SinkContext::default()).is_enabled());
    }

    #[test]
    fn oversized_threadpool_disables_logging() {
        let config = AuditConfig {
            sink_type: Some("debug".to_string()),
            threadpool_size: 1_000_000,
            ..sync_config()
        };
        let log = AuditLog::new(config, SinkContext::default());
        assert!(!log.is_enabled());
        assert!(!log.dispatcher().is_async());
        log.close();
    }

    #[test]
    fn path_target_detection() {
        assert!(path_targets_index("/searchguard/_doc/1", "searchguard"));
        assert!(path_targets_index("/movies,searchguard/_search", "searchguard"));
        assert!(path_targets_index("/search*/_search", "searchguard"));
        assert!(!path_targets_index("/movies/_doc/1", "searchguard"));
        assert!(!path_targets_index("/_cluster/settings", "searchguard"));
    }
}
