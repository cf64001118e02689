//! Per-kind readiness awaiters and the entry points that pick one for an
//! arbitrary object.
//!
//! Each awaiter multiplexes a watch on the object it waits for, watches on
//! the objects it depends on, a timeout, and the caller's cancellation
//! token. Kinds with a simple phase-based status are polled instead; see
//! [`polling`].

use std::sync::Arc;

use k8s_openapi::api::core::v1::{
    Namespace, PersistentVolume, PersistentVolumeClaim, ReplicationController, ResourceQuota,
    Secret, ServiceAccount,
};
use kube::api::{Api, ListParams};
use kube::core::DynamicObject;
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use tracing::{event, Level};

use crate::aggregator::EventAggregator;
use crate::cluster;
use crate::config::AwaitConfig;
use crate::error::{AwaitError, RemovedApiError};
use crate::kinds::{removed_api_version, removed_in_version, Gvk};
use crate::logging::Severity;
use crate::metadata;

pub mod daemonset;
pub mod deployment;
pub mod ingress;
pub mod job;
pub mod pod;
pub mod polling;
pub mod service;
pub mod serviceaccount;
pub mod statefulset;

pub use daemonset::DaemonSetAwaiter;
pub use deployment::DeploymentAwaiter;
pub use ingress::IngressAwaiter;
pub use job::JobAwaiter;
pub use pod::PodAwaiter;
pub use service::ServiceAwaiter;
pub use statefulset::StatefulSetAwaiter;

/// Waits for one object to become ready.
#[async_trait::async_trait]
pub trait Awaiter: Send {
    /// Watches the object and its dependents until it is ready, the
    /// timeout elapses, or the operation is cancelled.
    async fn await_ready(&mut self, client: &Client) -> Result<(), AwaitError>;

    /// Checks the object's current state once, without waiting.
    async fn read(&mut self, client: &Client) -> Result<(), AwaitError>;
}

/// The kinds with a dedicated awaiter, by canonical group/version/kind.
enum Kind {
    DaemonSet,
    Deployment,
    StatefulSet,
    Service,
    Ingress,
    Pod,
    Job,
    PersistentVolume,
    PersistentVolumeClaim,
    ReplicationController,
    ResourceQuota,
    Namespace,
    Secret,
    ServiceAccount,
    Other,
}

impl Kind {
    fn of(gvk: &Gvk) -> Self {
        let canonical = gvk.canonical();
        match canonical.to_string().as_str() {
            "apps/v1/DaemonSet" => Kind::DaemonSet,
            "apps/v1/Deployment" => Kind::Deployment,
            "apps/v1/StatefulSet" => Kind::StatefulSet,
            "v1/Service" => Kind::Service,
            "networking.k8s.io/v1/Ingress" => Kind::Ingress,
            "v1/Pod" => Kind::Pod,
            "batch/v1/Job" => Kind::Job,
            "v1/PersistentVolume" => Kind::PersistentVolume,
            "v1/PersistentVolumeClaim" => Kind::PersistentVolumeClaim,
            "v1/ReplicationController" => Kind::ReplicationController,
            "v1/ResourceQuota" => Kind::ResourceQuota,
            "v1/Namespace" => Kind::Namespace,
            "v1/Secret" => Kind::Secret,
            "v1/ServiceAccount" => Kind::ServiceAccount,
            _ => Kind::Other,
        }
    }
}

fn gvk_of(obj: &DynamicObject) -> Option<Gvk> {
    obj.types
        .as_ref()
        .map(|types| Gvk::from_api_version(&types.api_version, &types.kind))
}

/// Converts a dynamic object into its typed form. Objects written against
/// a renamed apiVersion are read as the canonical type.
fn convert<K>(obj: &DynamicObject) -> Result<K, kube::Error>
where
    K: k8s_openapi::Resource + DeserializeOwned,
{
    let mut value = serde_json::to_value(obj).map_err(kube::Error::SerdeError)?;
    if let Some(map) = value.as_object_mut() {
        map.insert("apiVersion".into(), K::API_VERSION.into());
        map.insert("kind".into(), K::KIND.into());
    }
    serde_json::from_value(value).map_err(kube::Error::SerdeError)
}

fn typed<K>(config: &AwaitConfig<DynamicObject>) -> Result<AwaitConfig<K>, AwaitError>
where
    K: k8s_openapi::Resource + DeserializeOwned,
{
    let last = config.last.as_ref().map(convert::<K>).transpose()?;
    Ok(AwaitConfig {
        object: convert(&config.object)?,
        last,
        initial_api_version: config
            .object
            .types
            .as_ref()
            .map(|types| types.api_version.clone()),
        cancel: config.cancel.clone(),
        timeout: config.timeout,
        sink: config.sink.clone(),
    })
}

async fn check_api_version(client: &Client, gvk: &Gvk) -> Result<(), AwaitError> {
    if removed_in_version(gvk).is_none() {
        return Ok(());
    }
    let version = cluster::server_version(client).await;
    match removed_api_version(gvk, &version) {
        (true, removed_in) => Err(RemovedApiError {
            gvk: gvk.clone(),
            version: removed_in,
        }
        .into()),
        _ => Ok(()),
    }
}

fn should_skip(config: &AwaitConfig<DynamicObject>) -> bool {
    if metadata::skip_await(config.object.meta()) {
        event!(
            Level::DEBUG,
            resource_name = %config.name(),
            "skipping readiness checks"
        );
        return true;
    }
    false
}

/// Lists the dependents of an object for a one-shot readiness check. A
/// failed list is logged and read as an empty one.
pub(crate) async fn list_or_empty<K>(api: Api<K>, params: &ListParams) -> Vec<K>
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug,
{
    match api.list(params).await {
        Ok(list) => list.items,
        Err(err) => {
            event!(Level::DEBUG, err = %err, "failed to list dependents");
            Vec::new()
        }
    }
}

/// Waits for a newly created object to become ready.
///
/// Kinds without readiness semantics are ready as soon as they exist, so
/// they return immediately. While a wait is in progress, Warning Events
/// recorded against the object are narrated to the sink.
pub async fn creation(
    client: &Client,
    config: &AwaitConfig<DynamicObject>,
) -> Result<(), AwaitError> {
    if should_skip(config) {
        return Ok(());
    }
    let Some(gvk) = gvk_of(&config.object) else {
        return Ok(());
    };
    check_api_version(client, &gvk).await?;

    let kind = Kind::of(&gvk);
    if let Kind::Namespace | Kind::Other = kind {
        return Ok(());
    }
    let _events = EventAggregator::start(client, &config.object, Arc::clone(&config.sink));

    match kind {
        Kind::DaemonSet => DaemonSetAwaiter::new(typed(config)?).await_ready(client).await,
        Kind::Deployment => {
            DeploymentAwaiter::new(typed(config)?)
                .await_ready(client)
                .await
        }
        Kind::StatefulSet => {
            StatefulSetAwaiter::new(typed(config)?)
                .await_ready(client)
                .await
        }
        Kind::Service => ServiceAwaiter::new(typed(config)?).await_ready(client).await,
        Kind::Ingress => IngressAwaiter::new(typed(config)?).await_ready(client).await,
        Kind::Pod => PodAwaiter::new(typed(config)?).await_ready(client).await,
        Kind::Job => JobAwaiter::new(typed(config)?).await_ready(client).await,
        Kind::PersistentVolume => {
            polling::await_persistent_volume(client, &typed::<PersistentVolume>(config)?).await
        }
        Kind::PersistentVolumeClaim => {
            polling::await_persistent_volume_claim(
                client,
                &typed::<PersistentVolumeClaim>(config)?,
            )
            .await
        }
        Kind::ReplicationController => {
            polling::await_replication_controller(
                client,
                &typed::<ReplicationController>(config)?,
            )
            .await
        }
        Kind::ResourceQuota => {
            polling::await_resource_quota(client, &typed::<ResourceQuota>(config)?).await
        }
        Kind::Secret => serviceaccount::await_secret(client, &typed::<Secret>(config)?).await,
        Kind::ServiceAccount => {
            serviceaccount::await_service_account(client, &typed::<ServiceAccount>(config)?).await
        }
        Kind::Namespace | Kind::Other => Ok(()),
    }
}

/// Waits for an updated object to become ready. `config.last` should hold
/// the object as it was before the update.
pub async fn update(
    client: &Client,
    config: &AwaitConfig<DynamicObject>,
) -> Result<(), AwaitError> {
    creation(client, config).await
}

/// Checks whether an existing object is ready, without waiting.
///
/// An unready object carrying the replace-unready annotation is reported
/// as due for replacement; the error is still returned.
pub async fn read(client: &Client, config: &AwaitConfig<DynamicObject>) -> Result<(), AwaitError> {
    let Some(gvk) = gvk_of(&config.object) else {
        return Ok(());
    };
    let result = match Kind::of(&gvk) {
        Kind::DaemonSet => DaemonSetAwaiter::new(typed(config)?).read(client).await,
        Kind::Deployment => DeploymentAwaiter::new(typed(config)?).read(client).await,
        Kind::StatefulSet => StatefulSetAwaiter::new(typed(config)?).read(client).await,
        Kind::Service => ServiceAwaiter::new(typed(config)?).read(client).await,
        Kind::Ingress => IngressAwaiter::new(typed(config)?).read(client).await,
        Kind::Pod => PodAwaiter::new(typed(config)?).read(client).await,
        Kind::Job => JobAwaiter::new(typed(config)?).read(client).await,
        _ => return Ok(()),
    };
    if let Err(AwaitError::Initialization(_)) = &result {
        if metadata::replace_unready(config.object.meta()) {
            config.log(
                Severity::Warning,
                &format!(
                    "{} {:?} is not ready and will be replaced",
                    gvk.kind,
                    config.name()
                ),
            );
        }
    }
    result
}

/// Waits for a deleted object to disappear from the cluster.
pub async fn deletion(
    client: &Client,
    config: &AwaitConfig<DynamicObject>,
) -> Result<(), AwaitError> {
    if should_skip(config) {
        return Ok(());
    }
    let Some(gvk) = gvk_of(&config.object) else {
        return Ok(());
    };
    match Kind::of(&gvk) {
        Kind::Namespace => {
            polling::await_namespace_deleted(client, &typed::<Namespace>(config)?).await
        }
        _ => polling::await_deleted(client, config).await,
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
    use k8s_openapi::api::batch::v1::Job;
    use k8s_openapi::api::core::v1::{Pod, Service};
    use k8s_openapi::api::networking::v1::Ingress;
    use serde_json::json;

    use super::*;

    fn dynamic(value: serde_json::Value) -> DynamicObject {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn kinds_are_matched_after_canonicalization() {
        assert!(matches!(
            Kind::of(&Gvk::new("extensions", "v1beta1", "Deployment")),
            Kind::Deployment
        ));
        assert!(matches!(
            Kind::of(&Gvk::new("networking.k8s.io", "v1beta1", "Ingress")),
            Kind::Ingress
        ));
        assert!(matches!(Kind::of(&Gvk::new("", "v1", "ConfigMap")), Kind::Other));
    }

    #[test]
    fn daemonsets_and_token_kinds_are_dispatched() {
        for api_version in ["apps/v1", "apps/v1beta2", "extensions/v1beta1"] {
            assert!(matches!(
                Kind::of(&Gvk::from_api_version(api_version, "DaemonSet")),
                Kind::DaemonSet
            ));
        }
        assert!(matches!(Kind::of(&Gvk::new("", "v1", "Secret")), Kind::Secret));
        assert!(matches!(
            Kind::of(&Gvk::new("", "v1", "ServiceAccount")),
            Kind::ServiceAccount
        ));
    }

    #[test]
    fn legacy_objects_convert_to_canonical_types() {
        let obj = dynamic(json!({
            "apiVersion": "extensions/v1beta1",
            "kind": "Deployment",
            "metadata": { "name": "web", "namespace": "apps" },
            "spec": {
                "replicas": 2,
                "selector": { "matchLabels": { "app": "web" } },
                "template": { "metadata": { "labels": { "app": "web" } } },
            },
        }));
        let config = typed::<Deployment>(&AwaitConfig::new(obj)).unwrap();
        assert_eq!(config.name(), "web");
        assert_eq!(config.namespace(), "apps");
        assert_eq!(config.object.spec.unwrap().replicas, Some(2));
        assert_eq!(
            config.initial_api_version.as_deref(),
            Some("extensions/v1beta1")
        );
    }

    #[test]
    fn skip_await_annotation_is_honored() {
        let obj = dynamic(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {
                "name": "web",
                "annotations": { "kubeawait.dev/skipAwait": "true" },
            },
        }));
        assert!(should_skip(&AwaitConfig::new(obj)));
    }

    #[test]
    fn untyped_objects_have_no_kind() {
        let mut obj = dynamic(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": { "name": "web" },
        }));
        assert_eq!(gvk_of(&obj), Some(Gvk::new("", "v1", "Pod")));
        obj.types = None;
        assert_eq!(gvk_of(&obj), None);
    }

    #[test]
    fn malformed_objects_fail_conversion() {
        let obj = dynamic(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": { "name": "web" },
        }));
        let pod = convert::<Pod>(&obj).unwrap();
        assert_eq!(pod.metadata.name.as_deref(), Some("web"));
        assert!(convert::<Job>(&dynamic(json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": { "name": "migrate" },
            "spec": "not a spec",
        })))
        .is_err());
    }

    #[test]
    fn typed_kinds_are_resources() {
        // Every awaited kind must be addressable without discovery.
        assert_eq!(Gvk::of::<StatefulSet>().to_string(), "apps/v1/StatefulSet");
        assert_eq!(Gvk::of::<Service>().to_string(), "v1/Service");
        assert_eq!(Gvk::of::<Ingress>().to_string(), "networking.k8s.io/v1/Ingress");
    }
}
