use std::collections::HashSet;
use std::fmt;

use kube::api::DynamicObject;
use kube::{Resource, ResourceExt};
use serde::Serialize;
use tracing::{event, Level};

use crate::cluster::ServerVersion;
use crate::kinds::{suggested_api_version, upstream_docs_link, Gvk};

/// The object an [`AwaitError`] is about.
///
/// Kinds that are awaited before any object has been observed (polling
/// awaiters, deletions) only know the name.
#[derive(Debug, Clone)]
pub enum Target {
    Object(Box<DynamicObject>),
    Name(String),
}

impl Target {
    /// Captures a typed object as the target, falling back to its name if
    /// the object cannot be represented dynamically.
    pub fn from_resource<K>(obj: &K) -> Self
    where
        K: Resource + Serialize,
    {
        let converted = serde_json::to_value(obj).and_then(serde_json::from_value);
        match converted {
            Ok(dynamic) => Target::Object(Box::new(dynamic)),
            Err(err) => {
                event!(
                    Level::DEBUG,
                    err = %err,
                    "failed to convert object into a dynamic object"
                );
                Target::Name(obj.meta().name.clone().unwrap_or_default())
            }
        }
    }

    pub fn name(&self) -> String {
        match self {
            Target::Object(obj) => obj.name_any(),
            Target::Name(name) => name.clone(),
        }
    }

    pub fn object(&self) -> Option<&DynamicObject> {
        match self {
            Target::Object(obj) => Some(obj),
            Target::Name(_) => None,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.name())
    }
}

/// Everything known about why an await did not succeed.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    pub target: Target,
    pub sub_errors: Vec<String>,
}

impl Diagnostics {
    /// Builds diagnostics, dropping empty and repeated sub-errors while
    /// keeping first-seen order.
    pub fn new(target: Target, sub_errors: impl IntoIterator<Item = String>) -> Self {
        let mut seen = HashSet::new();
        let sub_errors = sub_errors
            .into_iter()
            .filter(|e| !e.is_empty() && seen.insert(e.clone()))
            .collect();
        Self { target, sub_errors }
    }
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum AwaitError {
    #[error("resource operation was cancelled for {}", .0.target)]
    Cancelled(Diagnostics),
    #[error("{} timed out waiting to be ready", .0.target)]
    TimedOut(Diagnostics),
    #[error("resource {} was created but failed to initialize", .0.target)]
    Initialization(Diagnostics),
    #[error("resource {} failed", .0.target)]
    Failed(Diagnostics),
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),
    #[error("{0}")]
    RemovedApi(#[from] RemovedApiError),
}

impl AwaitError {
    pub fn cancelled(target: Target, sub_errors: impl IntoIterator<Item = String>) -> Self {
        AwaitError::Cancelled(Diagnostics::new(target, sub_errors))
    }

    pub fn timed_out(target: Target, sub_errors: impl IntoIterator<Item = String>) -> Self {
        AwaitError::TimedOut(Diagnostics::new(target, sub_errors))
    }

    pub fn initialization(target: Target, sub_errors: impl IntoIterator<Item = String>) -> Self {
        AwaitError::Initialization(Diagnostics::new(target, sub_errors))
    }

    pub fn failed(target: Target, sub_errors: impl IntoIterator<Item = String>) -> Self {
        AwaitError::Failed(Diagnostics::new(target, sub_errors))
    }

    fn diagnostics(&self) -> Option<&Diagnostics> {
        match self {
            AwaitError::Cancelled(d)
            | AwaitError::TimedOut(d)
            | AwaitError::Initialization(d)
            | AwaitError::Failed(d) => Some(d),
            AwaitError::Kube(_) | AwaitError::RemovedApi(_) => None,
        }
    }

    /// The ordered, deduplicated list of problems known at failure time.
    pub fn sub_errors(&self) -> &[String] {
        self.diagnostics()
            .map(|d| d.sub_errors.as_slice())
            .unwrap_or_default()
    }

    /// The object which failed to become ready.
    pub fn target(&self) -> Option<&Target> {
        self.diagnostics().map(|d| &d.target)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AwaitError::Kube(err) if is_not_found(err))
    }
}

pub(crate) fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == 404)
}

/// Returned when an object uses an apiVersion that the target cluster no
/// longer serves.
#[derive(Debug, Clone, thiserror::Error)]
pub struct RemovedApiError {
    pub gvk: Gvk,
    pub version: Option<ServerVersion>,
}

impl fmt::Display for RemovedApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(version) = &self.version else {
            return write!(
                f,
                "apiVersion {:?} was removed in a previous version of Kubernetes",
                self.gvk.to_string()
            );
        };
        write!(
            f,
            "apiVersion {:?} was removed in Kubernetes {}. Use {:?} instead.",
            self.gvk.to_string(),
            version,
            suggested_api_version(&self.gvk)
        )?;
        if let Some(link) = upstream_docs_link(version) {
            write!(f, "\nSee {} for more information.", link)?;
        }
        Ok(())
    }
}
