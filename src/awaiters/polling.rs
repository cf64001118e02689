//! Readiness and deletion waits for kinds whose status is a single phase
//! or a simple comparison, driven by periodic refreshes instead of watches.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::{
    Namespace, PersistentVolume, PersistentVolumeClaim, Pod, ReplicationController,
    ResourceQuota, Service,
};
use k8s_openapi::api::storage::v1::StorageClass;
use kube::api::Api;
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;

use crate::config::AwaitConfig;
use crate::error::AwaitError;
use crate::kinds::Gvk;
use crate::logging::Severity;
use crate::poll::{StateWait, STATE_DELETED};
use crate::states::pod::PodChecker;

/// Default timeout for phase-based readiness waits.
pub const POLL_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Default timeout for deletion waits.
pub const DELETION_TIMEOUT: Duration = Duration::from_secs(10 * 60);

pub const READY: &str = "Ready";
pub const WAITING: &str = "Waiting";
pub const EXISTS: &str = "Exists";

const WAIT_FOR_FIRST_CONSUMER: &str = "WaitForFirstConsumer";

fn phase_or_empty(phase: Option<&String>) -> String {
    phase.cloned().unwrap_or_default()
}

fn ready_if(ready: bool) -> String {
    let label = if ready { READY } else { WAITING };
    label.to_string()
}

/// A Namespace with no phase is as good as gone.
pub fn namespace_state(namespace: &Namespace) -> String {
    match namespace.status.as_ref().and_then(|s| s.phase.as_ref()) {
        Some(phase) if !phase.is_empty() => phase.clone(),
        _ => STATE_DELETED.to_string(),
    }
}

pub fn persistent_volume_state(pv: &PersistentVolume) -> String {
    phase_or_empty(pv.status.as_ref().and_then(|s| s.phase.as_ref()))
}

pub fn persistent_volume_claim_state(pvc: &PersistentVolumeClaim) -> String {
    phase_or_empty(pvc.status.as_ref().and_then(|s| s.phase.as_ref()))
}

pub fn pod_state(pod: &Pod) -> String {
    let mut checker = PodChecker::new();
    checker.update(pod);
    ready_if(checker.ready())
}

pub fn replication_controller_state(rc: &ReplicationController) -> String {
    let desired = rc.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let available = rc.status.as_ref().and_then(|s| s.available_replicas);
    ready_if(available == Some(desired))
}

pub fn resource_quota_state(quota: &ResourceQuota) -> String {
    let hard = quota.spec.as_ref().and_then(|s| s.hard.as_ref());
    let observed = quota.status.as_ref().and_then(|s| s.hard.as_ref());
    ready_if(hard.is_some() && hard == observed)
}

pub fn service_ip_state(service: &Service) -> String {
    let assigned = service
        .status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .map_or(false, |ingress| !ingress.is_empty());
    ready_if(assigned)
}

/// Describes an object that has not gone away yet, including replica
/// counts for kinds that have them.
pub fn still_exists(obj: &DynamicObject) -> String {
    let kind = obj
        .types
        .as_ref()
        .map_or("Resource", |types| types.kind.as_str());
    let name = obj.name_any();
    let desired = obj.data.pointer("/spec/replicas").and_then(|v| v.as_i64());
    let current = obj.data.pointer("/status/replicas").and_then(|v| v.as_i64());
    match desired {
        Some(desired) => format!(
            "{} {:?} still exists ({} / {} replicas exist)",
            kind,
            name,
            current.unwrap_or_default(),
            desired
        ),
        None => format!("{} {:?} still exists", kind, name),
    }
}

fn deletion_timeout<K: Resource>(config: &AwaitConfig<K>) -> Duration {
    config.timeout_or(DELETION_TIMEOUT)
}

fn qualified_name<K: Resource>(config: &AwaitConfig<K>) -> String {
    match config.object.meta().namespace.as_deref() {
        Some(namespace) => format!("{}/{}", namespace, config.name()),
        None => config.name(),
    }
}

/// Polls `api` for the configured object until `state` reports one of
/// `target`.
async fn poll_until<K>(
    api: Api<K>,
    config: &AwaitConfig<K>,
    timeout: Duration,
    pending: &[&str],
    target: &[&str],
    state: fn(&K) -> String,
) -> Result<Option<K>, AwaitError>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    let name = config.name();
    let wait = StateWait::new(qualified_name(config), timeout, config.cancel.clone())
        .pending(pending.iter().copied())
        .target(target.iter().copied());
    wait.wait(|| {
        let api = api.clone();
        let name = name.clone();
        async move {
            let obj = api.get(&name).await?;
            let label = state(&obj);
            Ok((obj, label))
        }
    })
    .await
}

pub async fn await_persistent_volume(
    client: &Client,
    config: &AwaitConfig<PersistentVolume>,
) -> Result<(), AwaitError> {
    let pv = poll_until(
        Api::all(client.clone()),
        config,
        config.timeout_or(POLL_TIMEOUT),
        &["", "Pending"],
        &["Available", "Bound"],
        persistent_volume_state,
    )
    .await?;
    match pv.as_ref().map(persistent_volume_state).as_deref() {
        Some("Bound") => config.log(Severity::Info, "✅ PV has been bound"),
        _ => config.log(Severity::Info, "✅ PV marked available"),
    }
    Ok(())
}

/// Claims whose StorageClass binds on first consumer stay `Pending` until a
/// Pod uses them, so for those `Pending` counts as ready.
pub async fn await_persistent_volume_claim(
    client: &Client,
    config: &AwaitConfig<PersistentVolumeClaim>,
) -> Result<(), AwaitError> {
    let mut target = vec!["Bound"];
    if binds_on_first_consumer(client, config).await {
        target.push("Pending");
    }
    poll_until(
        Api::namespaced(client.clone(), &config.namespace()),
        config,
        config.timeout_or(POLL_TIMEOUT),
        &["", "Pending"],
        &target,
        persistent_volume_claim_state,
    )
    .await
    .map(|_| ())
}

async fn binds_on_first_consumer(
    client: &Client,
    config: &AwaitConfig<PersistentVolumeClaim>,
) -> bool {
    let class = config
        .object
        .spec
        .as_ref()
        .and_then(|s| s.storage_class_name.clone());
    let Some(class) = class else {
        return false;
    };
    match Api::<StorageClass>::all(client.clone()).get(&class).await {
        Ok(sc) => sc.volume_binding_mode.as_deref() == Some(WAIT_FOR_FIRST_CONSUMER),
        Err(err) => {
            config.log(
                Severity::Warning,
                &format!("getting storageclass {:?}: {}", class, err),
            );
            false
        }
    }
}

/// Polls a Pod until the Pod checker considers it ready. An alternative to
/// [`super::pod::PodAwaiter`] for callers that cannot watch Pods.
pub async fn await_pod_polled(client: &Client, config: &AwaitConfig<Pod>) -> Result<(), AwaitError> {
    poll_until(
        Api::namespaced(client.clone(), &config.namespace()),
        config,
        config.timeout_or(POLL_TIMEOUT),
        &[WAITING],
        &[READY],
        pod_state,
    )
    .await
    .map(|_| ())
}

pub async fn await_replication_controller(
    client: &Client,
    config: &AwaitConfig<ReplicationController>,
) -> Result<(), AwaitError> {
    poll_until(
        Api::namespaced(client.clone(), &config.namespace()),
        config,
        config.timeout_or(POLL_TIMEOUT),
        &[WAITING],
        &[READY],
        replication_controller_state,
    )
    .await
    .map(|_| ())
}

/// Waits for the quota controller to publish the requested limits. An
/// update that leaves `spec` unchanged has nothing to wait for.
pub async fn await_resource_quota(
    client: &Client,
    config: &AwaitConfig<ResourceQuota>,
) -> Result<(), AwaitError> {
    if let Some(last) = &config.last {
        if last.spec == config.object.spec {
            return Ok(());
        }
    }
    poll_until(
        Api::namespaced(client.clone(), &config.namespace()),
        config,
        config.timeout_or(POLL_TIMEOUT),
        &[WAITING],
        &[READY],
        resource_quota_state,
    )
    .await
    .map(|_| ())
}

pub async fn await_service_ip(
    client: &Client,
    config: &AwaitConfig<Service>,
) -> Result<(), AwaitError> {
    poll_until(
        Api::namespaced(client.clone(), &config.namespace()),
        config,
        config.timeout_or(POLL_TIMEOUT),
        &[WAITING],
        &[READY],
        service_ip_state,
    )
    .await
    .map(|_| ())
}

pub async fn await_namespace_deleted(
    client: &Client,
    config: &AwaitConfig<Namespace>,
) -> Result<(), AwaitError> {
    poll_until(
        Api::all(client.clone()),
        config,
        deletion_timeout(config),
        &["Active", "Terminating"],
        &[STATE_DELETED],
        namespace_state,
    )
    .await
    .map(|_| ())
}

/// Polls until the object is gone, narrating what is left of it. Works for
/// any kind; objects without a namespace are treated as cluster-scoped.
pub async fn await_deleted(
    client: &Client,
    config: &AwaitConfig<DynamicObject>,
) -> Result<(), AwaitError> {
    let Some(types) = &config.object.types else {
        return Ok(());
    };
    let gvk = Gvk::from_api_version(&types.api_version, &types.kind);
    let resource = ApiResource::from_gvk(&GroupVersionKind::gvk(
        &gvk.group,
        &gvk.version,
        &gvk.kind,
    ));
    let api: Api<DynamicObject> = match config.object.metadata.namespace.as_deref() {
        Some(namespace) => Api::namespaced_with(client.clone(), namespace, &resource),
        None => Api::all_with(client.clone(), &resource),
    };

    let name = config.name();
    let sink = Arc::clone(&config.sink);
    let wait = StateWait::new(
        qualified_name(config),
        deletion_timeout(config),
        config.cancel.clone(),
    )
    .pending([EXISTS])
    .target([STATE_DELETED]);
    wait.wait(|| {
        let api = api.clone();
        let name = name.clone();
        let sink = Arc::clone(&sink);
        async move {
            let obj = api.get(&name).await?;
            sink.log(Severity::Info, &still_exists(&obj));
            Ok((obj, EXISTS.to_string()))
        }
    })
    .await
    .map(|_| ())
}
