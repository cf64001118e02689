use std::collections::BTreeMap;
use std::time::Duration;

use futures::stream::{BoxStream, StreamExt};
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use kube::api::{Api, ListParams};
use kube::{Client, ResourceExt};
use tokio::time::{interval_at, Instant};
use tracing::{event, Level};

use super::{list_or_empty, Awaiter};
use crate::config::{AwaitConfig, AGGREGATE_REPORT_PERIOD};
use crate::error::{AwaitError, Target};
use crate::logging::{Messages, Severity};
use crate::ownership::{is_owned_by, ResourceId};
use crate::states::pod::PodChecker;
use crate::watch::{self, Event};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

const REVISION_ANNOTATION: &str = "deployment.kubernetes.io/revision";
const EXTENSIONS_V1BETA1: &str = "extensions/v1beta1";

fn revision_of(deployment: &Deployment) -> Option<&str> {
    deployment
        .annotations()
        .get(REVISION_ANNOTATION)
        .map(String::as_str)
        .filter(|r| !r.is_empty())
}

fn replica_set_revision(rs: &ReplicaSet) -> Option<&str> {
    rs.annotations().get(REVISION_ANNOTATION).map(String::as_str)
}

/// Waits for a Deployment to finish rolling out.
///
/// A Deployment is ready once:
///
/// 1. a ReplicaSet exists for the Deployment's current revision,
/// 2. the `Available` condition is true,
/// 3. the `Progressing` condition is true with reason
///    `NewReplicaSetAvailable` (the first revision has nothing to roll
///    forward from and skips this),
/// 4. the current ReplicaSet has as many ready replicas as it asked for,
/// 5. every PersistentVolumeClaim the pod template mounts is bound.
pub struct DeploymentAwaiter {
    config: AwaitConfig<Deployment>,
    reconciled: bool,
    deployment_available: bool,
    replica_set_available: bool,
    updated_replica_set_ready: bool,
    revision: String,
    deployment_errors: BTreeMap<String, String>,
    deployment: Option<Deployment>,
    replica_sets: BTreeMap<String, ReplicaSet>,
    pods: BTreeMap<String, Pod>,
    pvcs: BTreeMap<String, PersistentVolumeClaim>,
}

impl DeploymentAwaiter {
    pub fn new(config: AwaitConfig<Deployment>) -> Self {
        Self {
            config,
            reconciled: false,
            deployment_available: false,
            replica_set_available: false,
            updated_replica_set_ready: false,
            revision: String::new(),
            deployment_errors: BTreeMap::new(),
            deployment: None,
            replica_sets: BTreeMap::new(),
            pods: BTreeMap::new(),
            pvcs: BTreeMap::new(),
        }
    }

    fn is_legacy_api(&self) -> bool {
        self.config.initial_api_version.as_deref() == Some(EXTENSIONS_V1BETA1)
    }

    fn target(&self) -> Target {
        Target::from_resource(self.deployment.as_ref().unwrap_or(&self.config.object))
    }

    pub(crate) async fn run(
        &mut self,
        deployments: BoxStream<'static, Event<Deployment>>,
        replica_sets: BoxStream<'static, Event<ReplicaSet>>,
        pods: BoxStream<'static, Event<Pod>>,
        pvcs: BoxStream<'static, Event<PersistentVolumeClaim>>,
        timeout: Duration,
    ) -> Result<(), AwaitError> {
        let mut deployments = deployments.fuse();
        let mut replica_sets = replica_sets.fuse();
        let mut pods = pods.fuse();
        let mut pvcs = pvcs.fuse();
        let cancel = self.config.cancel.clone();
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let mut ticker = interval_at(
            Instant::now() + AGGREGATE_REPORT_PERIOD,
            AGGREGATE_REPORT_PERIOD,
        );

        loop {
            if self.reconciled && self.check_and_log_status() {
                return Ok(());
            }

            // Dependents are only consulted once the Deployment controller
            // has observed the current generation.
            let reconciled = self.reconciled;
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(AwaitError::cancelled(self.target(), self.error_messages()));
                }
                _ = &mut deadline => {
                    return Err(AwaitError::timed_out(self.target(), self.error_messages()));
                }
                _ = ticker.tick(), if reconciled => {
                    for message in self.aggregate_pod_errors() {
                        self.config.log(message.severity, &message.text);
                    }
                }
                Some(event) = deployments.next() => {
                    if reconciled {
                        self.process_deployment_event(event);
                    } else {
                        self.wait_for_reconcile(event);
                    }
                }
                Some(event) = replica_sets.next(), if reconciled => {
                    self.process_replica_set_event(event);
                }
                Some(event) = pods.next(), if reconciled => self.process_pod_event(event),
                Some(event) = pvcs.next(), if reconciled => self.process_pvc_event(event),
            }
        }
    }

    fn wait_for_reconcile(&mut self, event: Event<Deployment>) {
        let Event::Applied(deployment) = &event else {
            return;
        };
        if deployment.name_any() != self.config.name() {
            return;
        }
        let observed = deployment
            .status
            .as_ref()
            .and_then(|s| s.observed_generation);
        if observed.is_some() && observed == deployment.metadata.generation {
            self.reconciled = true;
            self.process_deployment_event(event);
        }
    }

    /// Evaluates listed snapshots once and reports whether the Deployment
    /// is ready.
    pub(crate) fn read_from(
        &mut self,
        deployment: Deployment,
        replica_sets: Vec<ReplicaSet>,
        pods: Vec<Pod>,
        pvcs: Vec<PersistentVolumeClaim>,
    ) -> Result<(), AwaitError> {
        self.reconciled = true;
        self.process_deployment_event(Event::Applied(deployment));
        for rs in replica_sets {
            self.process_replica_set_event(Event::Applied(rs));
        }
        for pod in pods {
            self.process_pod_event(Event::Applied(pod));
        }
        for pvc in pvcs {
            self.process_pvc_event(Event::Applied(pvc));
        }
        if self.check_and_log_status() {
            return Ok(());
        }
        Err(AwaitError::initialization(
            self.target(),
            self.error_messages(),
        ))
    }

    fn check_and_log_status(&self) -> bool {
        let rolled_forward = self.revision == "1" || self.is_legacy_api() || self.replica_set_available;
        let ready = self.deployment_available
            && rolled_forward
            && self.updated_replica_set_ready
            && self.unbound_pvcs().is_empty();
        if ready {
            self.config
                .log(Severity::Info, "✅ Deployment initialization complete");
        }
        ready
    }

    fn process_deployment_event(&mut self, event: Event<Deployment>) {
        let deployment = match event {
            Event::Applied(d) if d.name_any() == self.config.name() => d,
            _ => return,
        };

        self.deployment_errors.clear();
        let generation = deployment.metadata.generation.unwrap_or_default();
        if generation < self.config.object.metadata.generation.unwrap_or_default() {
            event!(
                Level::DEBUG,
                resource_name = %deployment.name_any(),
                generation,
                "ignoring stale deployment snapshot"
            );
            return;
        }

        self.deployment_available = false;
        self.replica_set_available = false;
        self.revision = revision_of(&deployment).unwrap_or_default().to_string();
        self.deployment = Some(deployment);
        if self.revision.is_empty() {
            return;
        }
        let Some(deployment) = &self.deployment else {
            return;
        };
        let status = deployment.status.clone().unwrap_or_default();

        if self.is_legacy_api() && status.observed_generation != deployment.metadata.generation {
            return;
        }

        let mut warnings = Vec::new();
        for condition in status.conditions.iter().flatten() {
            let is_true = condition.status == "True";
            match condition.type_.as_str() {
                "Progressing" if !self.is_legacy_api() => {
                    self.replica_set_available = is_true
                        && condition.reason.as_deref() == Some("NewReplicaSetAvailable");
                }
                "Available" => self.deployment_available = is_true,
                _ => continue,
            }
            if !is_true {
                if let (Some(reason), Some(message)) = (&condition.reason, &condition.message) {
                    let text = format!("[{}] {}", reason, message);
                    self.deployment_errors.insert(reason.clone(), text.clone());
                    warnings.push(text);
                }
            }
        }
        for warning in warnings {
            self.config.log(Severity::Warning, &warning);
        }

        self.check_replica_set_status();
        self.check_pvc_status();
    }

    fn process_replica_set_event(&mut self, event: Event<ReplicaSet>) {
        let owner = ResourceId::from_resource(&self.config.object);
        let rs = event.object();
        if !is_owned_by(&rs.metadata, &owner) {
            return;
        }
        let revision = replica_set_revision(rs).unwrap_or_default().to_string();
        match event {
            Event::Deleted(_) => {
                self.replica_sets.remove(&revision);
            }
            Event::Applied(rs) => {
                self.replica_sets.insert(revision, rs);
            }
        }
        self.check_replica_set_status();
    }

    fn change_triggered_rollout(&self) -> bool {
        match &self.config.last {
            None => true,
            Some(last) => revision_of(last).unwrap_or_default() != self.revision,
        }
    }

    fn check_replica_set_status(&mut self) {
        self.updated_replica_set_ready = false;
        let Some(rs) = self.replica_sets.get(&self.revision) else {
            return;
        };
        let spec_replicas = rs.spec.as_ref().and_then(|s| s.replicas);
        let desired = spec_replicas.unwrap_or(1);
        let ready_replicas = rs.status.as_ref().and_then(|s| s.ready_replicas);
        let done_waiting = match ready_replicas {
            Some(ready) => ready >= desired,
            None => desired == 0,
        };

        let last_revision = self
            .config
            .last
            .as_ref()
            .and_then(revision_of)
            .unwrap_or_default();
        self.updated_replica_set_ready = if self.change_triggered_rollout() {
            last_revision != self.revision && done_waiting
        } else {
            done_waiting
        };

        if !self.updated_replica_set_ready {
            self.config.log(
                Severity::Info,
                &format!(
                    "Waiting for app ReplicaSet to be available ({}/{} Pods available)",
                    ready_replicas.unwrap_or_default(),
                    desired
                ),
            );
        } else if spec_replicas == Some(0) {
            self.config.log(
                Severity::Warning,
                &format!("Replicas scaled to 0 for Deployment {:?}", self.config.name()),
            );
        }
    }

    fn claimed_volume_names(&self) -> Vec<String> {
        self.deployment
            .as_ref()
            .and_then(|d| d.spec.as_ref())
            .and_then(|s| s.template.spec.as_ref())
            .and_then(|s| s.volumes.as_ref())
            .map(|volumes| {
                volumes
                    .iter()
                    .filter_map(|v| v.persistent_volume_claim.as_ref())
                    .map(|c| c.claim_name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn process_pvc_event(&mut self, event: Event<PersistentVolumeClaim>) {
        match event {
            Event::Deleted(pvc) => {
                self.pvcs.remove(&pvc.name_any());
            }
            Event::Applied(pvc) => {
                if self.claimed_volume_names().contains(&pvc.name_any()) {
                    self.pvcs.insert(pvc.name_any(), pvc);
                }
            }
        }
        self.check_pvc_status();
    }

    fn check_pvc_status(&self) {
        for (name, pvc) in &self.pvcs {
            let phase = pvc_phase(pvc);
            if phase != "Bound" {
                self.config.log(
                    Severity::Warning,
                    &format!(
                        "PersistentVolumeClaim: [{}] is not ready. status.phase currently at: {}",
                        name, phase
                    ),
                );
            }
        }
    }

    fn unbound_pvcs(&self) -> Vec<String> {
        self.pvcs
            .iter()
            .filter(|(_, pvc)| pvc_phase(pvc) != "Bound")
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn process_pod_event(&mut self, event: Event<Pod>) {
        match event {
            Event::Deleted(pod) => {
                self.pods.remove(&pod.name_any());
            }
            // Ownership is resolved when diagnostics are aggregated, since the
            // current ReplicaSet may not be known yet.
            Event::Applied(pod) => {
                self.pods.insert(pod.name_any(), pod);
            }
        }
    }

    fn aggregate_pod_errors(&self) -> Messages {
        let Some(rs) = self.replica_sets.get(&self.revision) else {
            return Messages::default();
        };
        let owner = ResourceId::from_resource(rs);
        let mut messages = Messages::default();
        for pod in self.pods.values() {
            if !is_owned_by(&pod.metadata, &owner) {
                continue;
            }
            let mut checker = PodChecker::new();
            checker.update(pod);
            messages.extend(checker.problems());
        }
        messages
    }

    fn error_messages(&self) -> Vec<String> {
        let mut messages: Vec<String> = self.deployment_errors.values().cloned().collect();

        let unbound = self.unbound_pvcs();
        if !unbound.is_empty() {
            messages.push(format!(
                "Failed to bind PersistentVolumeClaim(s): {:?}",
                unbound.join(",")
            ));
        }

        if self.revision.is_empty() {
            messages.push("Updated ReplicaSet was never created".to_string());
        } else if !self.deployment_available {
            messages.push("Minimum number of live Pods was not attained".to_string());
        } else if self.revision == "1" || self.is_legacy_api() {
            if !self.updated_replica_set_ready {
                messages.push(
                    "Minimum number of Pods to consider the application live was not attained"
                        .to_string(),
                );
            }
        } else if !self.replica_set_available {
            messages.push(
                "Minimum number of Pods to consider the application live was not attained"
                    .to_string(),
            );
        } else if !self.updated_replica_set_ready {
            messages.push(
                "Attempted to roll forward to new ReplicaSet, but minimum number of Pods did not become live"
                    .to_string(),
            );
        }

        messages.extend(self.aggregate_pod_errors().into_iter().map(|m| m.text));
        messages
    }
}

fn pvc_phase(pvc: &PersistentVolumeClaim) -> String {
    pvc.status
        .as_ref()
        .and_then(|s| s.phase.clone())
        .unwrap_or_default()
}

#[async_trait::async_trait]
impl Awaiter for DeploymentAwaiter {
    async fn await_ready(&mut self, client: &Client) -> Result<(), AwaitError> {
        let namespace = self.config.namespace();
        let timeout = self.config.timeout_or(DEFAULT_TIMEOUT);
        let deployments = watch::named(
            Api::<Deployment>::namespaced(client.clone(), &namespace),
            &self.config.name(),
        );
        let replica_sets = watch::all(Api::<ReplicaSet>::namespaced(client.clone(), &namespace));
        let pods = watch::all(Api::<Pod>::namespaced(client.clone(), &namespace));
        let pvcs = watch::all(Api::<PersistentVolumeClaim>::namespaced(
            client.clone(),
            &namespace,
        ));
        self.run(deployments, replica_sets, pods, pvcs, timeout).await
    }

    async fn read(&mut self, client: &Client) -> Result<(), AwaitError> {
        let namespace = self.config.namespace();
        let deployment = Api::<Deployment>::namespaced(client.clone(), &namespace)
            .get(&self.config.name())
            .await?;
        let params = ListParams::default();
        let replica_sets = list_or_empty(
            Api::<ReplicaSet>::namespaced(client.clone(), &namespace),
            &params,
        )
        .await;
        let pods = list_or_empty(Api::<Pod>::namespaced(client.clone(), &namespace), &params).await;
        let pvcs = list_or_empty(
            Api::<PersistentVolumeClaim>::namespaced(client.clone(), &namespace),
            &params,
        )
        .await;
        self.read_from(deployment, replica_sets, pods, pvcs)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;
    use crate::logging::testing::RecordingSink;
    use crate::states::pod::fixtures::image_pull_backoff_pod;
    use crate::watch::testing::{replay, silent};

    fn deployment(revision: Option<&str>, generation: i64, conditions: Value) -> Deployment {
        let mut annotations = serde_json::Map::new();
        if let Some(revision) = revision {
            annotations.insert(REVISION_ANNOTATION.into(), json!(revision));
        }
        serde_json::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {
                "name": "web",
                "namespace": "default",
                "generation": generation,
                "annotations": annotations,
            },
            "spec": {
                "selector": { "matchLabels": { "app": "web" } },
                "template": {
                    "metadata": { "labels": { "app": "web" } },
                    "spec": {
                        "containers": [{ "name": "app", "image": "nginx" }],
                        "volumes": [{ "name": "data", "persistentVolumeClaim": { "claimName": "data" } }],
                    },
                },
            },
            "status": { "observedGeneration": generation, "conditions": conditions },
        }))
        .unwrap()
    }

    fn rolled_out() -> Value {
        json!([
            { "type": "Available", "status": "True", "reason": "MinimumReplicasAvailable", "message": "ok" },
            { "type": "Progressing", "status": "True", "reason": "NewReplicaSetAvailable", "message": "done" },
        ])
    }

    fn unavailable() -> Value {
        json!([
            { "type": "Available", "status": "False", "reason": "MinimumReplicasUnavailable",
              "message": "Deployment does not have minimum availability." },
            { "type": "Progressing", "status": "True", "reason": "ReplicaSetUpdated", "message": "progressing" },
        ])
    }

    fn replica_set(name: &str, revision: &str, spec: i32, ready: Option<i32>) -> ReplicaSet {
        let mut status = json!({ "replicas": spec });
        if let Some(ready) = ready {
            status["readyReplicas"] = json!(ready);
        }
        serde_json::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "ReplicaSet",
            "metadata": {
                "name": name,
                "namespace": "default",
                "annotations": { REVISION_ANNOTATION: revision },
                "ownerReferences": [{
                    "apiVersion": "apps/v1", "kind": "Deployment", "name": "web", "uid": "d",
                }],
            },
            "spec": { "replicas": spec, "selector": { "matchLabels": { "app": "web" } } },
            "status": status,
        }))
        .unwrap()
    }

    fn pvc(phase: &str) -> PersistentVolumeClaim {
        serde_json::from_value(json!({
            "metadata": { "name": "data", "namespace": "default" },
            "status": { "phase": phase },
        }))
        .unwrap()
    }

    fn owned_pod(rs: &str) -> Pod {
        let mut pod = image_pull_backoff_pod("web-abc");
        pod.metadata.owner_references = Some(vec![serde_json::from_value(json!({
            "apiVersion": "apps/v1", "kind": "ReplicaSet", "name": rs, "uid": "r",
        }))
        .unwrap()]);
        pod
    }

    fn awaiter(object: Deployment) -> DeploymentAwaiter {
        DeploymentAwaiter::new(AwaitConfig::new(object))
    }

    #[tokio::test(start_paused = true)]
    async fn first_revision_rolls_out() {
        let d = deployment(Some("1"), 1, rolled_out());
        let mut a = awaiter(d.clone());
        let result = a
            .run(
                replay(vec![Event::Applied(d)]),
                replay(vec![Event::Applied(replica_set("web-1", "1", 1, Some(1)))]),
                silent(),
                silent(),
                DEFAULT_TIMEOUT,
            )
            .await;
        assert!(result.is_ok(), "{:?}", result);
    }

    #[tokio::test(start_paused = true)]
    async fn rollout_completes_after_unavailable_snapshot() {
        let d = deployment(Some("2"), 2, rolled_out());
        let mut a = awaiter(d.clone());
        let result = a
            .run(
                replay(vec![
                    Event::Applied(deployment(Some("2"), 2, unavailable())),
                    Event::Applied(d),
                ]),
                replay(vec![
                    Event::Applied(replica_set("web-1", "1", 1, Some(1))),
                    Event::Applied(replica_set("web-2", "2", 2, Some(2))),
                ]),
                silent(),
                silent(),
                DEFAULT_TIMEOUT,
            )
            .await;
        assert!(result.is_ok(), "{:?}", result);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_revision_times_out() {
        let d = deployment(None, 1, json!([]));
        let mut a = awaiter(d.clone());
        let err = a
            .run(
                replay(vec![Event::Applied(d)]),
                silent(),
                silent(),
                silent(),
                Duration::from_secs(60),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AwaitError::TimedOut(_)));
        assert_eq!(err.sub_errors(), ["Updated ReplicaSet was never created"]);
    }

    #[tokio::test(start_paused = true)]
    async fn never_reconciled_times_out() {
        let mut d = deployment(Some("1"), 2, rolled_out());
        d.status.as_mut().unwrap().observed_generation = Some(1);
        let mut a = awaiter(d.clone());
        let err = a
            .run(
                replay(vec![Event::Applied(d)]),
                replay(vec![Event::Applied(replica_set("web-1", "1", 1, Some(1)))]),
                silent(),
                silent(),
                Duration::from_secs(60),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AwaitError::TimedOut(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_deployment_reports_conditions_and_pods() {
        let d = deployment(Some("2"), 2, unavailable());
        let mut a = awaiter(d.clone());
        let err = a
            .run(
                replay(vec![Event::Applied(d)]),
                replay(vec![Event::Applied(replica_set("web-2", "2", 1, Some(0)))]),
                replay(vec![Event::Applied(owned_pod("web-2"))]),
                silent(),
                Duration::from_secs(60),
            )
            .await
            .unwrap_err();
        let sub_errors = err.sub_errors();
        assert_eq!(
            sub_errors[0],
            "[MinimumReplicasUnavailable] Deployment does not have minimum availability."
        );
        assert_eq!(sub_errors[1], "Minimum number of live Pods was not attained");
        assert_eq!(
            sub_errors[2],
            "[Pod default/web-abc]: [ImagePullBackOff] manifest for nginx:nope not found"
        );
    }

    #[test_log::test]
    fn unbound_claim_blocks_readiness() {
        let d = deployment(Some("1"), 1, rolled_out());
        let sink = RecordingSink::default();
        let mut a = DeploymentAwaiter::new(
            AwaitConfig::new(d.clone()).with_sink(std::sync::Arc::new(sink.clone())),
        );
        let err = a
            .read_from(
                d.clone(),
                vec![replica_set("web-1", "1", 1, Some(1))],
                vec![],
                vec![pvc("Pending")],
            )
            .unwrap_err();
        assert_eq!(
            err.sub_errors(),
            ["Failed to bind PersistentVolumeClaim(s): \"data\""]
        );
        assert!(sink.contains("PersistentVolumeClaim: [data] is not ready"));

        let mut a = awaiter(d.clone());
        assert!(a
            .read_from(
                d,
                vec![replica_set("web-1", "1", 1, Some(1))],
                vec![],
                vec![pvc("Bound")],
            )
            .is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_reports_diagnostics() {
        let d = deployment(None, 1, json!([]));
        let mut a = awaiter(d.clone());
        a.config.cancel.cancel();
        let err = a
            .run(replay(vec![]), silent(), silent(), silent(), DEFAULT_TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, AwaitError::Cancelled(_)));
        assert_eq!(err.sub_errors(), ["Updated ReplicaSet was never created"]);
    }

    #[test]
    fn update_without_new_revision_is_not_a_rollout() {
        let last = deployment(Some("3"), 3, rolled_out());
        let current = deployment(Some("3"), 4, rolled_out());
        let mut a = DeploymentAwaiter::new(AwaitConfig::new(current.clone()).with_last(Some(last)));
        let result = a.read_from(
            current,
            vec![replica_set("web-3", "3", 2, Some(2))],
            vec![],
            vec![],
        );
        assert!(result.is_ok(), "{:?}", result);
    }

    #[test_log::test]
    fn read_of_stalled_rollout_is_an_initialization_error() {
        let last = deployment(Some("3"), 3, rolled_out());
        let current = deployment(
            Some("4"),
            4,
            json!([
                { "type": "Available", "status": "True", "reason": "MinimumReplicasAvailable", "message": "ok" },
                { "type": "Progressing", "status": "True", "reason": "ReplicaSetUpdated", "message": "progressing" },
            ]),
        );
        let mut a = DeploymentAwaiter::new(AwaitConfig::new(current.clone()).with_last(Some(last)));
        let err = a
            .read_from(
                current,
                vec![
                    replica_set("web-3", "3", 2, Some(2)),
                    replica_set("web-4", "4", 2, Some(1)),
                ],
                vec![],
                vec![],
            )
            .unwrap_err();
        assert!(matches!(err, AwaitError::Initialization(_)));
        assert_eq!(
            err.sub_errors(),
            ["Minimum number of Pods to consider the application live was not attained"]
        );
    }

    #[test]
    fn redelivered_snapshot_keeps_verdict() {
        let d = deployment(Some("1"), 1, rolled_out());
        let mut a = awaiter(d.clone());
        a.reconciled = true;
        a.process_replica_set_event(Event::Applied(replica_set("web-1", "1", 1, Some(1))));
        a.process_deployment_event(Event::Applied(d.clone()));
        assert!(a.check_and_log_status());
        a.process_deployment_event(Event::Applied(d));
        assert!(a.check_and_log_status());
        assert!(a.error_messages().is_empty());
    }

    #[test]
    fn deleted_replica_set_is_pruned() {
        let d = deployment(Some("1"), 1, rolled_out());
        let mut a = awaiter(d.clone());
        let rs = replica_set("web-1", "1", 1, Some(1));
        a.process_replica_set_event(Event::Applied(rs.clone()));
        a.process_deployment_event(Event::Applied(d));
        assert!(a.check_and_log_status());
        a.process_replica_set_event(Event::Deleted(rs));
        assert!(!a.check_and_log_status());
    }
}
