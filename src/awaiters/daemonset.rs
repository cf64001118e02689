use std::collections::BTreeMap;
use std::time::Duration;

use futures::stream::{BoxStream, StreamExt};
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};
use kube::{Client, ResourceExt};
use tokio::time::{interval_at, Instant};

use super::{list_or_empty, Awaiter};
use crate::config::{AwaitConfig, AGGREGATE_REPORT_PERIOD};
use crate::error::{AwaitError, Target};
use crate::logging::{Messages, Severity};
use crate::ownership::{is_owned_by, ResourceId};
use crate::states::pod::PodChecker;
use crate::watch::{self, Event};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Waits for a DaemonSet to run an available, up-to-date Pod on every node
/// it is scheduled to.
pub struct DaemonSetAwaiter {
    config: AwaitConfig<DaemonSet>,
    observed: bool,
    rolled_out: bool,
    daemonset: Option<DaemonSet>,
    pods: BTreeMap<String, Pod>,
    generation: i64,
    observed_generation: i64,
    desired: i32,
    updated: i32,
    available: i32,
}

impl DaemonSetAwaiter {
    pub fn new(config: AwaitConfig<DaemonSet>) -> Self {
        Self {
            config,
            observed: false,
            rolled_out: false,
            daemonset: None,
            pods: BTreeMap::new(),
            generation: 0,
            observed_generation: 0,
            desired: 0,
            updated: 0,
            available: 0,
        }
    }

    fn current(&self) -> &DaemonSet {
        self.daemonset.as_ref().unwrap_or(&self.config.object)
    }

    pub(crate) async fn run(
        &mut self,
        daemonsets: BoxStream<'static, Event<DaemonSet>>,
        pods: BoxStream<'static, Event<Pod>>,
        timeout: Duration,
    ) -> Result<(), AwaitError> {
        let mut daemonsets = daemonsets.fuse();
        let mut pods = pods.fuse();
        let cancel = self.config.cancel.clone();
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let mut ticker = interval_at(
            Instant::now() + AGGREGATE_REPORT_PERIOD,
            AGGREGATE_REPORT_PERIOD,
        );

        loop {
            if self.check_and_log_status() {
                return Ok(());
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(AwaitError::cancelled(
                        Target::from_resource(self.current()),
                        self.error_messages(),
                    ));
                }
                _ = &mut deadline => {
                    return Err(AwaitError::timed_out(
                        Target::from_resource(self.current()),
                        self.error_messages(),
                    ));
                }
                _ = ticker.tick() => {
                    for message in self.aggregate_pod_errors() {
                        self.config.log(message.severity, &message.text);
                    }
                }
                Some(event) = daemonsets.next() => self.process_daemonset_event(event),
                Some(event) = pods.next() => self.process_pod_event(event),
            }
        }
    }

    pub(crate) fn read_from(
        &mut self,
        daemonset: DaemonSet,
        pods: Vec<Pod>,
    ) -> Result<(), AwaitError> {
        self.process_daemonset_event(Event::Applied(daemonset));
        for pod in pods {
            self.process_pod_event(Event::Applied(pod));
        }
        if self.check_and_log_status() {
            return Ok(());
        }
        Err(AwaitError::initialization(
            Target::from_resource(self.current()),
            self.error_messages(),
        ))
    }

    fn check_and_log_status(&self) -> bool {
        if self.observed && self.rolled_out {
            self.config
                .log(Severity::Info, "✅ DaemonSet initialization complete");
            return true;
        }

        if !self.observed {
            self.config.log(
                Severity::Info,
                "[1/2] Waiting for DaemonSet controller to observe the latest generation",
            );
        } else {
            self.config.log(
                Severity::Info,
                &format!(
                    "[2/2] Waiting for DaemonSet to roll out ({}/{} Pods updated, {}/{} available)",
                    self.updated, self.desired, self.available, self.desired
                ),
            );
        }
        false
    }

    fn process_daemonset_event(&mut self, event: Event<DaemonSet>) {
        if event.object().name_any() != self.config.name() {
            return;
        }
        self.observed = false;
        self.rolled_out = false;

        let Event::Applied(daemonset) = event else {
            return;
        };

        let status = daemonset.status.clone().unwrap_or_default();
        self.generation = daemonset.metadata.generation.unwrap_or_default();
        self.observed_generation = status.observed_generation.unwrap_or_default();
        self.desired = status.desired_number_scheduled;
        self.updated = status.updated_number_scheduled.unwrap_or_default();
        self.available = status.number_available.unwrap_or_default();
        self.daemonset = Some(daemonset);

        // Counts describe the previous generation until the controller
        // catches up.
        self.observed = self.observed_generation >= self.generation;
        self.rolled_out = self.updated == self.desired && self.available == self.desired;
    }

    fn process_pod_event(&mut self, event: Event<Pod>) {
        match event {
            Event::Deleted(pod) => {
                self.pods.remove(&pod.name_any());
            }
            Event::Applied(pod) => {
                self.pods.insert(pod.name_any(), pod);
            }
        }
    }

    fn aggregate_pod_errors(&self) -> Messages {
        let owner = ResourceId::from_resource(self.current());
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
        let mut messages = Vec::new();
        if !self.observed {
            messages.push(format!(
                "DaemonSet controller has not observed generation {} (last observed {})",
                self.generation, self.observed_generation
            ));
        } else if !self.rolled_out {
            messages.push(format!(
                "{} out of {} Pods are updated and {} out of {} are available",
                self.updated, self.desired, self.available, self.desired
            ));
        }
        messages.extend(self.aggregate_pod_errors().into_iter().map(|m| m.text));
        messages
    }
}

#[async_trait::async_trait]
impl Awaiter for DaemonSetAwaiter {
    async fn await_ready(&mut self, client: &Client) -> Result<(), AwaitError> {
        let namespace = self.config.namespace();
        let timeout = self.config.timeout_or(DEFAULT_TIMEOUT);
        let daemonsets = watch::named(
            Api::<DaemonSet>::namespaced(client.clone(), &namespace),
            &self.config.name(),
        );
        let pods = watch::all(Api::<Pod>::namespaced(client.clone(), &namespace));
        self.run(daemonsets, pods, timeout).await
    }

    async fn read(&mut self, client: &Client) -> Result<(), AwaitError> {
        let namespace = self.config.namespace();
        let daemonset = Api::<DaemonSet>::namespaced(client.clone(), &namespace)
            .get(&self.config.name())
            .await?;
        let pods = list_or_empty(
            Api::<Pod>::namespaced(client.clone(), &namespace),
            &ListParams::default(),
        )
        .await;
        self.read_from(daemonset, pods)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;
    use crate::logging::testing::RecordingSink;
    use crate::states::pod::fixtures::image_pull_backoff_pod;
    use crate::watch::testing::{paced, replay, silent};

    fn daemonset(generation: i64, status: Value) -> DaemonSet {
        serde_json::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "DaemonSet",
            "metadata": { "name": "agent", "namespace": "default", "generation": generation },
            "spec": {
                "selector": { "matchLabels": { "app": "agent" } },
                "updateStrategy": { "type": "RollingUpdate" },
                "template": { "spec": { "containers": [{ "name": "agent", "image": "nginx" }] } },
            },
            "status": status,
        }))
        .unwrap()
    }

    fn creating() -> Value {
        json!({
            "desiredNumberScheduled": 2, "currentNumberScheduled": 0, "updatedNumberScheduled": 0,
            "numberAvailable": 0, "numberMisscheduled": 0, "numberReady": 0,
            "observedGeneration": 1,
        })
    }

    fn progressing() -> Value {
        json!({
            "desiredNumberScheduled": 2, "currentNumberScheduled": 2, "updatedNumberScheduled": 1,
            "numberAvailable": 1, "numberMisscheduled": 1, "numberReady": 1,
            "observedGeneration": 1,
        })
    }

    fn running() -> Value {
        json!({
            "desiredNumberScheduled": 2, "currentNumberScheduled": 2, "updatedNumberScheduled": 2,
            "numberAvailable": 2, "numberMisscheduled": 0, "numberReady": 2,
            "observedGeneration": 1,
        })
    }

    fn awaiter(object: DaemonSet) -> DaemonSetAwaiter {
        DaemonSetAwaiter::new(AwaitConfig::new(object))
    }

    fn owned_failing_pod(name: &str) -> Pod {
        let mut pod = image_pull_backoff_pod(name);
        pod.metadata.owner_references = Some(vec![serde_json::from_value(json!({
            "apiVersion": "apps/v1", "kind": "DaemonSet", "name": "agent", "uid": "d",
        }))
        .unwrap()]);
        pod
    }

    #[tokio::test(start_paused = true)]
    async fn rollout_completes() {
        let d = daemonset(1, creating());
        let sink = RecordingSink::default();
        let mut a = DaemonSetAwaiter::new(
            AwaitConfig::new(d.clone()).with_sink(std::sync::Arc::new(sink.clone())),
        );
        let result = a
            .run(
                paced(vec![
                    (Duration::ZERO, Event::Applied(d)),
                    (Duration::from_secs(60), Event::Applied(daemonset(1, progressing()))),
                    (Duration::from_secs(60), Event::Applied(daemonset(1, running()))),
                ]),
                silent(),
                DEFAULT_TIMEOUT,
            )
            .await;
        assert!(result.is_ok(), "{:?}", result);
        assert!(sink.contains("(1/2 Pods updated, 1/2 available)"));
        assert!(sink.contains("DaemonSet initialization complete"));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_rollout_times_out_with_pod_errors() {
        let d = daemonset(1, progressing());
        let mut a = awaiter(d.clone());
        let err = a
            .run(
                replay(vec![Event::Applied(d)]),
                replay(vec![Event::Applied(owned_failing_pod("agent-x"))]),
                Duration::from_secs(60),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AwaitError::TimedOut(_)));
        let sub_errors = err.sub_errors();
        assert_eq!(
            sub_errors[0],
            "1 out of 2 Pods are updated and 1 out of 2 are available"
        );
        assert!(sub_errors[1].starts_with("[Pod default/agent-x]"));
    }

    #[test]
    fn unobserved_generation_is_not_ready() {
        // The counts are complete, but they belong to generation 1.
        let d = daemonset(2, running());
        let err = awaiter(d.clone()).read_from(d, vec![]).unwrap_err();
        assert!(matches!(err, AwaitError::Initialization(_)));
        assert_eq!(
            err.sub_errors(),
            ["DaemonSet controller has not observed generation 2 (last observed 1)"]
        );
    }

    #[test]
    fn read_accepts_rolled_out_daemonset() {
        let d = daemonset(1, running());
        assert!(awaiter(d.clone()).read_from(d, vec![]).is_ok());
    }

    #[test]
    fn no_schedulable_nodes_is_ready() {
        let d = daemonset(
            1,
            json!({
                "desiredNumberScheduled": 0, "currentNumberScheduled": 0,
                "numberMisscheduled": 0, "numberReady": 0, "observedGeneration": 1,
            }),
        );
        assert!(awaiter(d.clone()).read_from(d, vec![]).is_ok());
    }

    #[test]
    fn deletion_and_other_daemonsets() {
        let d = daemonset(1, running());
        let mut a = awaiter(d.clone());
        a.process_daemonset_event(Event::Applied(d.clone()));
        assert!(a.check_and_log_status());

        let mut other = d.clone();
        other.metadata.name = Some("logger".to_string());
        a.process_daemonset_event(Event::Deleted(other));
        assert!(a.check_and_log_status());

        a.process_daemonset_event(Event::Deleted(d));
        assert!(!a.check_and_log_status());
    }

    #[test]
    fn unowned_pods_are_not_reported() {
        let d = daemonset(1, progressing());
        let mut a = awaiter(d.clone());
        a.process_daemonset_event(Event::Applied(d));
        a.process_pod_event(Event::Applied(image_pull_backoff_pod("stray")));
        assert!(a.aggregate_pod_errors().is_empty());
        a.process_pod_event(Event::Applied(owned_failing_pod("agent-x")));
        assert_eq!(a.aggregate_pod_errors().0.len(), 1);
        a.process_pod_event(Event::Deleted(owned_failing_pod("agent-x")));
        assert!(a.aggregate_pod_errors().is_empty());
    }
}
