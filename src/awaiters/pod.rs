use std::time::Duration;

use futures::stream::{BoxStream, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::api::Api;
use kube::{Client, ResourceExt};

use super::Awaiter;
use crate::config::AwaitConfig;
use crate::error::{AwaitError, Target};
use crate::logging::{Messages, Severity};
use crate::states::pod::PodChecker;
use crate::watch::{self, Event};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Waits for a Pod to be scheduled, initialized and ready, or to have
/// succeeded.
pub struct PodAwaiter {
    config: AwaitConfig<Pod>,
    pod: Option<Pod>,
    checker: PodChecker,
    ready: bool,
    messages: Messages,
}

impl PodAwaiter {
    pub fn new(config: AwaitConfig<Pod>) -> Self {
        Self {
            config,
            pod: None,
            checker: PodChecker::new(),
            ready: false,
            messages: Messages::default(),
        }
    }

    fn target(&self) -> Target {
        Target::from_resource(self.pod.as_ref().unwrap_or(&self.config.object))
    }

    pub(crate) async fn run(
        &mut self,
        pods: BoxStream<'static, Event<Pod>>,
        timeout: Duration,
    ) -> Result<(), AwaitError> {
        let mut pods = pods.fuse();
        let cancel = self.config.cancel.clone();
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        loop {
            if self.ready {
                return Ok(());
            }
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(AwaitError::cancelled(self.target(), self.error_messages()));
                }
                _ = &mut deadline => {
                    return Err(AwaitError::timed_out(self.target(), self.error_messages()));
                }
                Some(event) = pods.next() => self.process_pod_event(event),
            }
        }
    }

    pub(crate) fn read_from(&mut self, pod: Pod) -> Result<(), AwaitError> {
        self.process_pod_event(Event::Applied(pod));
        if self.ready {
            return Ok(());
        }
        Err(AwaitError::initialization(
            self.target(),
            self.error_messages(),
        ))
    }

    fn process_pod_event(&mut self, event: Event<Pod>) {
        if event.object().name_any() != self.config.name() {
            return;
        }
        let pod = match event {
            Event::Applied(pod) => pod,
            Event::Deleted(_) => {
                self.ready = false;
                return;
            }
        };
        self.messages = self.checker.update(&pod);
        self.ready = self.checker.ready();
        for message in self.messages.infos() {
            self.config.log(Severity::Info, &message.text);
        }
        self.pod = Some(pod);
    }

    fn error_messages(&self) -> Vec<String> {
        self.messages
            .with_severity(&[Severity::Warning, Severity::Error])
            .into_iter()
            .map(|m| m.text)
            .collect()
    }
}

#[async_trait::async_trait]
impl Awaiter for PodAwaiter {
    async fn await_ready(&mut self, client: &Client) -> Result<(), AwaitError> {
        let timeout = self.config.timeout_or(DEFAULT_TIMEOUT);
        let pods = watch::named(
            Api::<Pod>::namespaced(client.clone(), &self.config.namespace()),
            &self.config.name(),
        );
        self.run(pods, timeout).await
    }

    async fn read(&mut self, client: &Client) -> Result<(), AwaitError> {
        let pod = Api::<Pod>::namespaced(client.clone(), &self.config.namespace())
            .get(&self.config.name())
            .await?;
        self.read_from(pod)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::states::pod::fixtures::{image_pull_backoff_pod, pod, ready_pod};
    use crate::watch::testing::{replay, silent};

    fn awaiter(name: &str) -> PodAwaiter {
        PodAwaiter::new(AwaitConfig::new(pod(name, json!({}))))
    }

    #[tokio::test(start_paused = true)]
    async fn becomes_ready() {
        let mut a = awaiter("web");
        let result = a
            .run(
                replay(vec![
                    Event::Applied(image_pull_backoff_pod("web")),
                    Event::Applied(ready_pod("other")),
                    Event::Applied(ready_pod("web")),
                ]),
                DEFAULT_TIMEOUT,
            )
            .await;
        assert!(result.is_ok(), "{:?}", result);
    }

    #[tokio::test(start_paused = true)]
    async fn image_pull_failure_times_out_with_details() {
        let mut a = awaiter("web");
        let err = a
            .run(
                replay(vec![Event::Applied(image_pull_backoff_pod("web"))]),
                Duration::from_secs(30),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AwaitError::TimedOut(_)));
        assert_eq!(
            err.sub_errors(),
            ["[Pod default/web]: [ImagePullBackOff] manifest for nginx:nope not found"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn deletion_undoes_readiness() {
        let mut a = awaiter("web");
        a.process_pod_event(Event::Applied(ready_pod("web")));
        assert!(a.ready);
        a.process_pod_event(Event::Deleted(ready_pod("web")));
        let err = a.run(silent(), Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, AwaitError::TimedOut(_)));
    }

    #[test]
    fn succeeded_pod_reads_ready() {
        let done = pod("web", json!({ "phase": "Succeeded" }));
        assert!(awaiter("web").read_from(done).is_ok());
    }
}
