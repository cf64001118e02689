use std::time::Duration;

use futures::stream::{BoxStream, StreamExt};
use k8s_openapi::api::core::v1::{Endpoints, Service};
use kube::api::Api;
use kube::{Client, ResourceExt};
use tokio::time::Instant;
use tracing::{event, Level};

use super::Awaiter;
use crate::cluster::{self, ServerVersion};
use crate::config::{AwaitConfig, SETTLE_DELAY};
use crate::error::{AwaitError, Target};
use crate::logging::Severity;
use crate::watch::{self, Event};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Clusters older than this publish no Endpoints for headless Services
/// without ports.
const HEADLESS_ENDPOINTS_FIXED_IN: ServerVersion = ServerVersion::new(1, 12, 0);

const NO_PODS_TARGETED: &str = "Service does not target any Pods. Selected Pods may not be ready, or field '.spec.selector' may not match labels on any Pods";
const NO_IP_ALLOCATED: &str =
    "Service was not allocated an IP address; does your cloud provider support this?";

/// True if any subset of `endpoints` lists at least one address.
pub(crate) fn endpoints_target_pods(endpoints: &Endpoints) -> bool {
    endpoints
        .subsets
        .iter()
        .flatten()
        .any(|s| s.addresses.as_ref().map_or(false, |a| !a.is_empty()))
}

/// Waits for a Service to route traffic.
///
/// LoadBalancer Services also need an ingress IP or hostname. ExternalName
/// Services and headless Services without a selector never get Endpoints,
/// so for them the Service existing is enough.
pub struct ServiceAwaiter {
    config: AwaitConfig<Service>,
    version: ServerVersion,
    service: Option<Service>,
    service_ready: bool,
    endpoints_ready: bool,
    endpoints_settling: bool,
}

impl ServiceAwaiter {
    pub fn new(config: AwaitConfig<Service>) -> Self {
        Self {
            config,
            version: ServerVersion::DEFAULT,
            service: None,
            service_ready: false,
            endpoints_ready: false,
            endpoints_settling: false,
        }
    }

    fn current(&self) -> &Service {
        self.service.as_ref().unwrap_or(&self.config.object)
    }

    fn service_type(&self) -> &str {
        self.current()
            .spec
            .as_ref()
            .and_then(|s| s.type_.as_deref())
            .unwrap_or("ClusterIP")
    }

    fn is_headless(&self) -> bool {
        self.current()
            .spec
            .as_ref()
            .and_then(|s| s.cluster_ip.as_deref())
            == Some("None")
    }

    fn has_selector(&self) -> bool {
        self.current()
            .spec
            .as_ref()
            .and_then(|s| s.selector.as_ref())
            .map_or(false, |s| !s.is_empty())
    }

    fn has_ports(&self) -> bool {
        self.current()
            .spec
            .as_ref()
            .and_then(|s| s.ports.as_ref())
            .map_or(false, |p| !p.is_empty())
    }

    fn should_wait_for_endpoints(&self) -> bool {
        let external_name = self.service_type() == "ExternalName";
        let headless = self.is_headless();
        if external_name || (headless && !self.has_selector()) {
            return false;
        }
        !(self.version < HEADLESS_ENDPOINTS_FIXED_IN && headless && !self.has_ports())
    }

    fn ready_ignoring_settle(&self) -> bool {
        self.service_ready && (!self.should_wait_for_endpoints() || self.endpoints_ready)
    }

    pub(crate) async fn run(
        &mut self,
        services: BoxStream<'static, Event<Service>>,
        endpoints: BoxStream<'static, Event<Endpoints>>,
        version: ServerVersion,
        timeout: Duration,
    ) -> Result<(), AwaitError> {
        self.version = version;
        let mut services = services.fuse();
        let mut endpoints = endpoints.fuse();
        let cancel = self.config.cancel.clone();
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let settle = tokio::time::sleep(SETTLE_DELAY);
        tokio::pin!(settle);

        self.config
            .log(Severity::Info, "[1/3] Finding Pods to direct traffic to");

        loop {
            if self.check_and_log_status() {
                return Ok(());
            }

            let settling = self.endpoints_settling;
            tokio::select! {
                _ = cancel.cancelled() => {
                    if self.ready_ignoring_settle() {
                        return Ok(());
                    }
                    return Err(AwaitError::cancelled(
                        Target::from_resource(self.current()),
                        self.error_messages(),
                    ));
                }
                _ = &mut deadline => {
                    if self.ready_ignoring_settle() {
                        return Ok(());
                    }
                    return Err(AwaitError::timed_out(
                        Target::from_resource(self.current()),
                        self.error_messages(),
                    ));
                }
                _ = &mut settle, if settling => self.endpoints_settling = false,
                Some(event) = services.next() => self.process_service_event(event),
                Some(event) = endpoints.next() => {
                    if self.process_endpoints_event(event) {
                        settle.as_mut().reset(Instant::now() + SETTLE_DELAY);
                    }
                }
            }
        }
    }

    pub(crate) fn read_from(
        &mut self,
        service: Service,
        endpoints: Vec<Endpoints>,
        version: ServerVersion,
    ) -> Result<(), AwaitError> {
        self.version = version;
        self.process_service_event(Event::Applied(service));
        for e in endpoints {
            self.process_endpoints_event(Event::Applied(e));
        }
        self.endpoints_settling = false;
        if self.check_and_log_status() {
            return Ok(());
        }
        Err(AwaitError::initialization(
            Target::from_resource(self.current()),
            self.error_messages(),
        ))
    }

    fn check_and_log_status(&self) -> bool {
        if !self.should_wait_for_endpoints() {
            if self.service_ready {
                self.config
                    .log(Severity::Info, "✅ Service initialization complete");
            }
            return self.service_ready;
        }

        let settled = !self.endpoints_settling && self.endpoints_ready;
        if settled && self.service_ready {
            self.config
                .log(Severity::Info, "✅ Service initialization complete");
            return true;
        }
        if settled {
            self.config.log(
                Severity::Info,
                "[2/3] Attempting to allocate IP address to Service",
            );
        }
        false
    }

    fn process_service_event(&mut self, event: Event<Service>) {
        if event.object().name_any() != self.config.name() {
            return;
        }
        self.service_ready = false;
        let Event::Applied(service) = event else {
            return;
        };
        self.service = Some(service);

        if self.service_type() == "LoadBalancer" {
            self.service_ready = self
                .current()
                .status
                .as_ref()
                .and_then(|s| s.load_balancer.as_ref())
                .and_then(|lb| lb.ingress.as_ref())
                .map_or(false, |ingress| !ingress.is_empty());
            if !self.service_ready {
                event!(
                    Level::DEBUG,
                    resource_name = %self.config.name(),
                    "waiting for load balancer IP or hostname"
                );
            }
        } else {
            self.service_ready = true;
        }
    }

    /// Returns true if the event concerned this Service's Endpoints, in
    /// which case the settle timer has to start over.
    fn process_endpoints_event(&mut self, event: Event<Endpoints>) -> bool {
        if event.object().name_any() != self.config.name() {
            return false;
        }
        self.endpoints_ready = match &event {
            Event::Applied(endpoints) => endpoints_target_pods(endpoints),
            Event::Deleted(_) => false,
        };
        self.endpoints_settling = true;
        true
    }

    fn error_messages(&self) -> Vec<String> {
        let mut messages = Vec::new();
        if !self.should_wait_for_endpoints() {
            return messages;
        }
        if !self.endpoints_ready {
            messages.push(NO_PODS_TARGETED.to_string());
        }
        if self.service_type() == "LoadBalancer" && !self.service_ready {
            messages.push(NO_IP_ALLOCATED.to_string());
        }
        messages
    }
}

#[async_trait::async_trait]
impl Awaiter for ServiceAwaiter {
    async fn await_ready(&mut self, client: &Client) -> Result<(), AwaitError> {
        let namespace = self.config.namespace();
        let timeout = self.config.timeout_or(DEFAULT_TIMEOUT);
        let version = cluster::server_version(client).await;
        let services = watch::named(
            Api::<Service>::namespaced(client.clone(), &namespace),
            &self.config.name(),
        );
        let endpoints = watch::named(
            Api::<Endpoints>::namespaced(client.clone(), &namespace),
            &self.config.name(),
        );
        self.run(services, endpoints, version, timeout).await
    }

    async fn read(&mut self, client: &Client) -> Result<(), AwaitError> {
        let namespace = self.config.namespace();
        let service = Api::<Service>::namespaced(client.clone(), &namespace)
            .get(&self.config.name())
            .await?;
        let endpoints = match Api::<Endpoints>::namespaced(client.clone(), &namespace)
            .get_opt(&self.config.name())
            .await
        {
            Ok(endpoints) => endpoints.into_iter().collect(),
            Err(err) => {
                event!(Level::DEBUG, err = %err, "failed to read service endpoints");
                Vec::new()
            }
        };
        let version = cluster::server_version(client).await;
        self.read_from(service, endpoints, version)
    }
}
