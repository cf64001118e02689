use std::collections::BTreeMap;
use std::time::Duration;

use futures::stream::{BoxStream, StreamExt};
use k8s_openapi::api::apps::v1::StatefulSet;
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

/// Waits for every replica of a StatefulSet to be ready at the update
/// revision.
pub struct StatefulSetAwaiter {
    config: AwaitConfig<StatefulSet>,
    revision_ready: bool,
    replicas_ready: bool,
    current_generation: i64,
    statefulset: Option<StatefulSet>,
    pods: BTreeMap<String, Pod>,
    current_replicas: i32,
    target_replicas: i32,
    current_revision: String,
    target_revision: String,
}

impl StatefulSetAwaiter {
    pub fn new(config: AwaitConfig<StatefulSet>) -> Self {
        Self {
            config,
            revision_ready: false,
            replicas_ready: false,
            current_generation: 0,
            statefulset: None,
            pods: BTreeMap::new(),
            current_replicas: 0,
            target_replicas: 0,
            current_revision: String::new(),
            target_revision: String::new(),
        }
    }

    fn current(&self) -> &StatefulSet {
        self.statefulset.as_ref().unwrap_or(&self.config.object)
    }

    pub(crate) async fn run(
        &mut self,
        statefulsets: BoxStream<'static, Event<StatefulSet>>,
        pods: BoxStream<'static, Event<Pod>>,
        timeout: Duration,
    ) -> Result<(), AwaitError> {
        let mut statefulsets = statefulsets.fuse();
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
                Some(event) = statefulsets.next() => self.process_statefulset_event(event),
                Some(event) = pods.next() => self.process_pod_event(event),
            }
        }
    }

    pub(crate) fn read_from(
        &mut self,
        statefulset: StatefulSet,
        pods: Vec<Pod>,
    ) -> Result<(), AwaitError> {
        self.process_statefulset_event(Event::Applied(statefulset));
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
        if self.replicas_ready && self.revision_ready {
            self.config
                .log(Severity::Info, "✅ StatefulSet initialization complete");
            return true;
        }

        if self.current_generation <= 1 {
            self.config.log(
                Severity::Info,
                &format!(
                    "[1/2] Waiting for StatefulSet to create Pods ({}/{} Pods ready)",
                    self.current_replicas, self.target_replicas
                ),
            );
        } else if !self.replicas_ready {
            self.config.log(
                Severity::Info,
                &format!(
                    "[1/3] Waiting for StatefulSet update to roll out ({}/{} Pods ready)",
                    self.current_replicas, self.target_replicas
                ),
            );
        } else {
            self.config.log(
                Severity::Info,
                "[2/3] Waiting for StatefulSet to update .status.currentRevision",
            );
        }
        false
    }

    fn process_statefulset_event(&mut self, event: Event<StatefulSet>) {
        if event.object().name_any() != self.config.name() {
            return;
        }
        // Every snapshot has to prove readiness again.
        self.revision_ready = false;
        self.replicas_ready = false;

        let Event::Applied(statefulset) = event else {
            return;
        };

        self.current_generation = statefulset.metadata.generation.unwrap_or_default();
        let spec = statefulset.spec.clone().unwrap_or_default();
        let status = statefulset.status.clone().unwrap_or_default();
        self.statefulset = Some(statefulset);
        if self.current_generation == 0 {
            return;
        }

        let on_delete = spec
            .update_strategy
            .as_ref()
            .and_then(|s| s.type_.as_deref())
            == Some("OnDelete");
        self.current_revision = status.current_revision.unwrap_or_default();
        self.target_revision = status.update_revision.unwrap_or_default();

        let replicas = spec.replicas.unwrap_or(1);
        let ready_replicas = status.ready_replicas.unwrap_or_default();
        let current_replicas = status.current_replicas.unwrap_or_default();
        let updated_replicas = status.updated_replicas.unwrap_or_default();

        if self.current_generation > 1 && on_delete {
            // Pods only move to the new revision when someone deletes them.
            self.revision_ready = true;
            self.replicas_ready = replicas == status.replicas && replicas == ready_replicas;
        } else {
            self.revision_ready =
                !self.current_revision.is_empty() && self.current_revision == self.target_revision;
            self.replicas_ready = replicas == status.replicas
                && replicas == ready_replicas
                && replicas == current_replicas;
        }

        self.target_replicas = replicas;
        // Mid-rollout, ready Pods may still be running the previous revision.
        self.current_replicas = if self.revision_ready {
            ready_replicas
        } else {
            ready_replicas.min(updated_replicas)
        };
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
        if !self.replicas_ready {
            messages.push(format!(
                "{} out of {} replicas succeeded readiness checks",
                self.current_replicas, self.target_replicas
            ));
        }
        if !self.revision_ready {
            messages.push(format!(
                "StatefulSet controller failed to advance from revision {:?} to revision {:?}",
                self.current_revision, self.target_revision
            ));
        }
        messages.extend(self.aggregate_pod_errors().into_iter().map(|m| m.text));
        messages
    }
}

#[async_trait::async_trait]
impl Awaiter for StatefulSetAwaiter {
    async fn await_ready(&mut self, client: &Client) -> Result<(), AwaitError> {
        let namespace = self.config.namespace();
        let timeout = self.config.timeout_or(DEFAULT_TIMEOUT);
        let statefulsets = watch::named(
            Api::<StatefulSet>::namespaced(client.clone(), &namespace),
            &self.config.name(),
        );
        let pods = watch::all(Api::<Pod>::namespaced(client.clone(), &namespace));
        self.run(statefulsets, pods, timeout).await
    }

    async fn read(&mut self, client: &Client) -> Result<(), AwaitError> {
        let namespace = self.config.namespace();
        let statefulset = Api::<StatefulSet>::namespaced(client.clone(), &namespace)
            .get(&self.config.name())
            .await?;
        let pods = list_or_empty(
            Api::<Pod>::namespaced(client.clone(), &namespace),
            &ListParams::default(),
        )
        .await;
        self.read_from(statefulset, pods)
    }
}
