use std::sync::Arc;
use std::time::Duration;

use kube::{Resource, ResourceExt};
use tokio_util::sync::CancellationToken;

use crate::logging::{Severity, StatusSink, TracingSink};
use crate::metadata;

/// How often awaiters that aggregate diagnostics report what they know.
pub(crate) const AGGREGATE_REPORT_PERIOD: Duration = Duration::from_secs(10);

/// How long Endpoints must stay unchanged before they are trusted.
pub(crate) const SETTLE_DELAY: Duration = Duration::from_secs(10);

/// Everything an awaiter needs to know about the object it is waiting on.
#[derive(Clone)]
pub struct AwaitConfig<K> {
    /// The object as it was after the create or update.
    pub object: K,
    /// The object as it was recorded before the update, if any.
    pub last: Option<K>,
    /// The apiVersion the user wrote the object with, which may be older
    /// than the typed representation.
    pub initial_api_version: Option<String>,
    pub cancel: CancellationToken,
    /// Takes precedence over the timeout annotation.
    pub timeout: Option<Duration>,
    pub sink: Arc<dyn StatusSink>,
}

impl<K: Resource> AwaitConfig<K> {
    pub fn new(object: K) -> Self {
        Self {
            object,
            last: None,
            initial_api_version: None,
            cancel: CancellationToken::new(),
            timeout: None,
            sink: Arc::new(TracingSink),
        }
    }

    pub fn with_last(mut self, last: Option<K>) -> Self {
        self.last = last;
        self
    }

    pub fn with_initial_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.initial_api_version = Some(api_version.into());
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn name(&self) -> String {
        self.object.name_any()
    }

    pub fn namespace(&self) -> String {
        self.object
            .namespace()
            .unwrap_or_else(|| "default".to_string())
    }

    /// The effective timeout: the explicit option, then the timeout
    /// annotation, then `default`.
    pub fn timeout_or(&self, default: Duration) -> Duration {
        metadata::timeout_duration(self.timeout, self.object.meta()).unwrap_or(default)
    }

    pub fn log(&self, severity: Severity, message: &str) {
        self.sink.log(severity, message);
    }
}
