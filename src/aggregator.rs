use std::future::Future;
use std::sync::{Arc, Mutex};

use futures::stream::{Stream, StreamExt};
use k8s_openapi::api::core::v1::{Event as KubeEvent, Pod};
use kube::api::{Api, ListParams};
use kube::core::DynamicObject;
use kube::{Client, ResourceExt};
use kube_runtime::watcher;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{event, Level};

use crate::logging::{Message, Messages, Severity, StatusSink};
use crate::ownership::{related_resource, ResourceId};
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::states::pod::PodChecker;
use crate::watch::{self, Event};

/// Watches the Pods owned by a controller and streams their warnings and
/// errors.
///
/// The background watch stops when [`PodAggregator::stop`] is called or the
/// aggregator is dropped.
pub struct PodAggregator {
    owner: ResourceId,
    stopped: Arc<Mutex<bool>>,
    results: mpsc::Receiver<Messages>,
    task: JoinHandle<()>,
}

impl PodAggregator {
    /// Lists the Pods in the owner's namespace, then watches them for
    /// changes.
    pub fn start(api: Api<Pod>, owner: ResourceId) -> Self {
        let initial = {
            let api = api.clone();
            let owner = owner.clone();
            async move {
                let config = RetryConfig {
                    max_retries: 2,
                    ..RetryConfig::default()
                };
                let params = ListParams::default();
                match retry_with_backoff(&config, "list pods", || api.list(&params)).await {
                    Ok(list) => list.items,
                    Err(err) => {
                        event!(
                            Level::WARN,
                            err = %err,
                            owner = %owner.name,
                            "failed to list existing pods"
                        );
                        Vec::new()
                    }
                }
            }
        };
        Self::spawn(owner, initial, watch::all(api))
    }

    pub(crate) fn spawn<F, S>(owner: ResourceId, initial: F, events: S) -> Self
    where
        F: Future<Output = Vec<Pod>> + Send + 'static,
        S: Stream<Item = Event<Pod>> + Send + 'static,
    {
        let stopped = Arc::new(Mutex::new(false));
        let (tx, results) = mpsc::channel(1);
        let task = tokio::spawn(run(
            owner.clone(),
            Arc::clone(&stopped),
            tx,
            initial,
            events,
        ));
        Self {
            owner,
            stopped,
            results,
            task,
        }
    }

    /// Waits for the next batch of messages. Returns `None` once the
    /// aggregator has stopped.
    pub async fn recv(&mut self) -> Option<Messages> {
        self.results.recv().await
    }

    /// Stops the background watch. Calling this more than once is harmless.
    pub fn stop(&self) {
        let mut stopped = match self.stopped.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *stopped {
            return;
        }
        *stopped = true;
        self.task.abort();
        event!(Level::DEBUG, owner = %self.owner.name, "stopped pod aggregator");
    }

    /// Lists the owner's Pods once and reports their problems without
    /// watching.
    pub async fn read(api: &Api<Pod>, owner: &ResourceId) -> Result<Messages, kube::Error> {
        let pods = api.list(&ListParams::default()).await?;
        Ok(Self::read_from(owner, &pods.items))
    }

    pub fn read_from(owner: &ResourceId, pods: &[Pod]) -> Messages {
        let mut messages = Messages::default();
        for pod in pods {
            if let Some(problems) = check(owner, pod) {
                messages.extend(problems);
            }
        }
        messages
    }
}

impl Drop for PodAggregator {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The warnings and errors for `pod`, if it belongs to `owner` and has any.
fn check(owner: &ResourceId, pod: &Pod) -> Option<Messages> {
    if !related_resource(owner, &pod.metadata) {
        return None;
    }
    let mut checker = PodChecker::new();
    checker.update(pod);
    let problems = checker.problems();
    if problems.is_empty() {
        None
    } else {
        Some(problems)
    }
}

fn is_stopped(stopped: &Mutex<bool>) -> bool {
    match stopped.lock() {
        Ok(guard) => *guard,
        Err(poisoned) => *poisoned.into_inner(),
    }
}

async fn run<F, S>(
    owner: ResourceId,
    stopped: Arc<Mutex<bool>>,
    tx: mpsc::Sender<Messages>,
    initial: F,
    events: S,
) where
    F: Future<Output = Vec<Pod>>,
    S: Stream<Item = Event<Pod>>,
{
    let forward = |pod: Pod| {
        let problems = check(&owner, &pod);
        let tx = tx.clone();
        let stopped = Arc::clone(&stopped);
        async move {
            let Some(problems) = problems else {
                return true;
            };
            if is_stopped(&stopped) {
                return false;
            }
            event!(
                Level::DEBUG,
                resource_name = %pod.name_any(),
                "forwarding pod diagnostics"
            );
            tx.send(problems).await.is_ok()
        }
    };

    for pod in initial.await {
        if !forward(pod).await {
            return;
        }
    }

    futures::pin_mut!(events);
    while let Some(event) = events.next().await {
        if is_stopped(&stopped) {
            return;
        }
        if let Event::Applied(pod) = event {
            if !forward(pod).await {
                return;
            }
        }
    }
}

/// Narrates the Kubernetes Events recorded against one object while it is
/// being awaited. Warning Events go to the status sink; the rest are only
/// traced.
///
/// The background watch stops when the aggregator is dropped.
pub struct EventAggregator {
    task: JoinHandle<()>,
}

impl EventAggregator {
    /// Starts watching the Events whose `involvedObject.uid` matches
    /// `owner`. Objects without a uid have no Events to follow.
    pub fn start(client: &Client, owner: &DynamicObject, sink: Arc<dyn StatusSink>) -> Option<Self> {
        let uid = owner.metadata.uid.clone()?;
        let api: Api<KubeEvent> = match owner.metadata.namespace.as_deref() {
            Some(namespace) => Api::namespaced(client.clone(), namespace),
            None => Api::all(client.clone()),
        };
        let events = watch::events(
            api,
            watcher::Config::default().fields(&format!("involvedObject.uid={}", uid)),
        );
        Some(Self::spawn(uid, sink, events))
    }

    pub(crate) fn spawn<S>(uid: String, sink: Arc<dyn StatusSink>, events: S) -> Self
    where
        S: Stream<Item = Event<KubeEvent>> + Send + 'static,
    {
        let task = tokio::spawn(async move {
            futures::pin_mut!(events);
            while let Some(event) = events.next().await {
                let Event::Applied(recorded) = event else {
                    continue;
                };
                if !involves(&uid, &recorded) {
                    continue;
                }
                let message = describe(&recorded);
                if message.severity == Severity::Warning {
                    sink.log(message.severity, &message.text);
                } else {
                    event!(Level::DEBUG, "{}", message.text);
                }
            }
        });
        Self { task }
    }
}

impl Drop for EventAggregator {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn involves(uid: &str, recorded: &KubeEvent) -> bool {
    recorded.involved_object.uid.as_deref() == Some(uid)
}

/// Renders an Event as `[<kind>/<name>] <reason>: <message>`.
pub fn describe(recorded: &KubeEvent) -> Message {
    let object = &recorded.involved_object;
    let text = format!(
        "[{}/{}] {}: {}",
        object.kind.as_deref().unwrap_or_default().to_lowercase(),
        object.name.as_deref().unwrap_or_default(),
        recorded.reason.as_deref().unwrap_or_default(),
        recorded.message.as_deref().unwrap_or_default(),
    );
    match recorded.type_.as_deref() {
        Some("Warning") => Message::warning(text),
        _ => Message::info(text),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::stream;
    use serde_json::json;

    use super::*;
    use crate::kinds::Gvk;
    use crate::logging::testing::RecordingSink;
    use crate::states::pod::fixtures::{image_pull_backoff_pod, ready_pod};
    use crate::watch::testing::{paced, replay, silent};

    fn owner() -> ResourceId {
        ResourceId::new("default", "migrate", Gvk::new("batch", "v1", "Job")).with_generation(1)
    }

    fn owned(mut pod: Pod, owner: &str) -> Pod {
        pod.metadata.generation = Some(1);
        pod.metadata.owner_references = Some(vec![serde_json::from_value(json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "name": owner,
            "uid": "u",
        }))
        .unwrap()]);
        pod
    }

    #[test]
    fn read_reports_only_owned_unhealthy_pods() {
        let pods = vec![
            owned(image_pull_backoff_pod("a"), "migrate"),
            owned(ready_pod("b"), "migrate"),
            owned(image_pull_backoff_pod("c"), "someone-else"),
            image_pull_backoff_pod("d"),
        ];
        let messages = PodAggregator::read_from(&owner(), &pods);
        assert_eq!(messages.0.len(), 1);
        assert!(messages.0[0].text.starts_with("[Pod default/a]"));
    }

    #[tokio::test]
    async fn streams_initial_and_watched_pods() {
        let initial = vec![owned(image_pull_backoff_pod("a"), "migrate")];
        let events = replay(vec![
            Event::Applied(owned(ready_pod("b"), "migrate")),
            Event::Applied(owned(image_pull_backoff_pod("c"), "migrate")),
        ]);
        let mut aggregator = PodAggregator::spawn(owner(), async move { initial }, events);
        let first = aggregator.recv().await.unwrap();
        assert!(first.0[0].text.starts_with("[Pod default/a]"));
        let second = aggregator.recv().await.unwrap();
        assert!(second.0[0].text.starts_with("[Pod default/c]"));
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_ends_the_stream() {
        let mut aggregator =
            PodAggregator::spawn(owner(), async { Vec::new() }, silent::<Pod>());
        aggregator.stop();
        aggregator.stop();
        assert!(aggregator.recv().await.is_none());
    }

    #[tokio::test]
    async fn finished_watch_closes_the_stream() {
        let mut aggregator =
            PodAggregator::spawn(owner(), async { Vec::new() }, stream::empty::<Event<Pod>>());
        assert!(aggregator.recv().await.is_none());
    }

    fn recorded(uid: &str, type_: &str, reason: &str, message: &str) -> KubeEvent {
        serde_json::from_value(json!({
            "metadata": { "name": "web.17a", "namespace": "default" },
            "involvedObject": { "kind": "Deployment", "name": "web", "uid": uid },
            "type": type_,
            "reason": reason,
            "message": message,
        }))
        .unwrap()
    }

    #[test]
    fn events_are_described_with_their_object() {
        let message = describe(&recorded(
            "u1",
            "Warning",
            "FailedCreate",
            "exceeded quota: compute",
        ));
        assert_eq!(
            message,
            Message::warning("[deployment/web] FailedCreate: exceeded quota: compute")
        );
        let normal = describe(&recorded("u1", "Normal", "ScalingReplicaSet", "scaled up"));
        assert_eq!(normal.severity, Severity::Info);
    }

    #[tokio::test]
    async fn only_warnings_about_the_owner_reach_the_sink() {
        let sink = RecordingSink::default();
        let events = stream::iter(vec![
            Event::Applied(recorded("u1", "Normal", "ScalingReplicaSet", "scaled up")),
            Event::Applied(recorded("u2", "Warning", "FailedCreate", "someone else")),
            Event::Deleted(recorded("u1", "Warning", "FailedCreate", "expired")),
            Event::Applied(recorded("u1", "Warning", "FailedCreate", "exceeded quota")),
        ]);
        let mut aggregator = EventAggregator::spawn("u1".to_string(), Arc::new(sink.clone()), events);
        (&mut aggregator.task).await.unwrap();
        let lines = sink.lines.lock().unwrap().clone();
        assert_eq!(
            lines,
            vec![(
                Severity::Warning,
                "[deployment/web] FailedCreate: exceeded quota".to_string()
            )]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_stops_the_event_watch() {
        let sink = RecordingSink::default();
        let events = paced(vec![(
            Duration::from_secs(1),
            Event::Applied(recorded("u1", "Warning", "FailedCreate", "exceeded quota")),
        )]);
        let aggregator = EventAggregator::spawn("u1".to_string(), Arc::new(sink.clone()), events);
        drop(aggregator);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(sink.lines.lock().unwrap().is_empty());
    }
}
