use std::time::Duration;

use futures::stream::{BoxStream, StreamExt};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use kube::api::Api;
use kube::{Client, ResourceExt};
use tracing::{event, Level};

use super::Awaiter;
use crate::aggregator::PodAggregator;
use crate::config::AwaitConfig;
use crate::error::{AwaitError, Target};
use crate::logging::{Messages, Severity, TimeOrderedLogSet};
use crate::ownership::ResourceId;
use crate::states::job::new_job_state_checker;
use crate::states::StateChecker;
use crate::watch::{self, Event};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Pod readiness noise that is recorded but not echoed while a Job runs.
const UNREADY_CONTAINERS: &str = "containers with unready status";

/// Waits for a Job to complete.
///
/// A terminal failure such as `DeadlineExceeded` ends the wait at once
/// with [`AwaitError::Failed`]. Problems reported by the Job's Pods are
/// collected along the way and attached to whatever error ends the wait.
pub struct JobAwaiter {
    config: AwaitConfig<Job>,
    job: Option<Job>,
    checker: StateChecker<Job>,
    ready: bool,
    errors: TimeOrderedLogSet,
}

impl JobAwaiter {
    pub fn new(config: AwaitConfig<Job>) -> Self {
        Self {
            config,
            job: None,
            checker: new_job_state_checker(),
            ready: false,
            errors: TimeOrderedLogSet::new(),
        }
    }

    fn current(&self) -> &Job {
        self.job.as_ref().unwrap_or(&self.config.object)
    }

    fn owner(&self) -> ResourceId {
        let job = self.current();
        let owner = ResourceId::from_resource(job);
        match job.metadata.generation {
            Some(generation) => owner.with_generation(generation),
            None => owner,
        }
    }

    pub(crate) async fn run(
        &mut self,
        jobs: BoxStream<'static, Event<Job>>,
        mut pods: PodAggregator,
        timeout: Duration,
    ) -> Result<(), AwaitError> {
        let mut jobs = jobs.fuse();
        let cancel = self.config.cancel.clone();
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let result = loop {
            if self.ready {
                break Ok(());
            }
            tokio::select! {
                _ = cancel.cancelled() => {
                    break Err(AwaitError::cancelled(
                        Target::from_resource(self.current()),
                        self.errors.texts(),
                    ));
                }
                _ = &mut deadline => {
                    break Err(AwaitError::timed_out(
                        Target::from_resource(self.current()),
                        self.errors.texts(),
                    ));
                }
                Some(event) = jobs.next() => {
                    if let Err(err) = self.process_job_event(event) {
                        break Err(err);
                    }
                }
                Some(messages) = pods.recv() => self.process_pod_messages(messages),
            }
        };
        pods.stop();
        result
    }

    /// Checks the Job once against listed Pods.
    pub(crate) fn read_from(&mut self, job: Job, pods: &[Pod]) -> Result<(), AwaitError> {
        if self.read_job(job) {
            return Ok(());
        }
        let messages = PodAggregator::read_from(&self.owner(), pods);
        Err(self.unready(messages))
    }

    /// Returns whether the Job is ready. A failed Job is reported by the
    /// caller as not initialized, the same as any other unready Job.
    fn read_job(&mut self, job: Job) -> bool {
        let _ = self.process_job_event(Event::Applied(job));
        self.ready
    }

    fn unready(&mut self, pod_messages: Messages) -> AwaitError {
        for message in pod_messages {
            self.config.log(message.severity, &message.text);
            self.errors.add(message);
        }
        AwaitError::initialization(Target::from_resource(self.current()), self.errors.texts())
    }

    fn process_job_event(&mut self, event: Event<Job>) -> Result<(), AwaitError> {
        let Event::Applied(job) = event else {
            return Ok(());
        };
        if job.name_any() != self.config.name() {
            return Ok(());
        }

        let messages = self.checker.update(&job);
        self.ready = self.checker.ready();
        self.job = Some(job);
        for message in messages.with_severity(&[Severity::Warning, Severity::Error]) {
            self.errors.add(message);
        }
        for message in messages.infos() {
            self.config.log(Severity::Info, &message.text);
        }

        if messages.has_errors() {
            return Err(AwaitError::failed(
                Target::from_resource(self.current()),
                self.errors.texts(),
            ));
        }
        Ok(())
    }

    fn process_pod_messages(&mut self, messages: Messages) {
        for message in messages {
            if !message.text.contains(UNREADY_CONTAINERS) {
                self.config.log(message.severity, &message.text);
            }
            self.errors.add(message);
        }
    }
}

#[async_trait::async_trait]
impl Awaiter for JobAwaiter {
    async fn await_ready(&mut self, client: &Client) -> Result<(), AwaitError> {
        let namespace = self.config.namespace();
        let timeout = self.config.timeout_or(DEFAULT_TIMEOUT);
        let jobs = watch::named(
            Api::<Job>::namespaced(client.clone(), &namespace),
            &self.config.name(),
        );
        let pods = PodAggregator::start(
            Api::<Pod>::namespaced(client.clone(), &namespace),
            self.owner(),
        );
        self.run(jobs, pods, timeout).await
    }

    async fn read(&mut self, client: &Client) -> Result<(), AwaitError> {
        let namespace = self.config.namespace();
        let job = Api::<Job>::namespaced(client.clone(), &namespace)
            .get(&self.config.name())
            .await?;
        if self.read_job(job) {
            return Ok(());
        }
        let pods = Api::<Pod>::namespaced(client.clone(), &namespace);
        let messages = match PodAggregator::read(&pods, &self.owner()).await {
            Ok(messages) => messages,
            Err(err) => {
                event!(Level::DEBUG, err = %err, "failed to list job pods");
                Messages::default()
            }
        };
        Err(self.unready(messages))
    }
}
