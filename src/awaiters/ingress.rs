use std::collections::BTreeSet;
use std::time::Duration;

use futures::stream::{BoxStream, StreamExt};
use k8s_openapi::api::core::v1::{Endpoints, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Api, ListParams};
use kube::{Client, ResourceExt};
use tokio::time::Instant;

use super::{list_or_empty, Awaiter};
use crate::config::{AwaitConfig, SETTLE_DELAY};
use crate::error::{AwaitError, Target};
use crate::logging::Severity;
use crate::watch::{self, Event};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

const UNAVAILABLE_BACKEND: &str = "Ingress has at least one rule with an unavailable target endpoint.";
const NO_LOAD_BALANCER: &str =
    "Ingress .status.loadBalancer field was not updated with a hostname/IP address.";

/// A Service an Ingress routes to, and the rule that routes there.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Backend {
    host: String,
    path: String,
    service: String,
}

impl Backend {
    fn describe(&self) -> String {
        let rule_path = format!("{}{}", self.host, self.path);
        let rule_path = if rule_path.is_empty() {
            "\"\" (default path)".to_string()
        } else {
            format!("{:?}", rule_path)
        };
        format!("{} -> {:?}", rule_path, self.service)
    }
}

fn backends(ingress: &Ingress) -> Vec<Backend> {
    let Some(spec) = &ingress.spec else {
        return Vec::new();
    };
    let mut backends = Vec::new();
    if let Some(service) = spec
        .default_backend
        .as_ref()
        .and_then(|b| b.service.as_ref())
    {
        backends.push(Backend {
            host: String::new(),
            path: String::new(),
            service: service.name.clone(),
        });
    }
    for rule in spec.rules.iter().flatten() {
        let host = rule.host.clone().unwrap_or_default();
        for path in rule.http.iter().flat_map(|http| http.paths.iter()) {
            if let Some(service) = &path.backend.service {
                backends.push(Backend {
                    host: host.clone(),
                    path: path.path.clone().unwrap_or_default(),
                    service: service.name.clone(),
                });
            }
        }
    }
    backends
}

/// Waits for an Ingress to be given an address and for every Service it
/// routes to to have Endpoints.
pub struct IngressAwaiter {
    config: AwaitConfig<Ingress>,
    ingress: Option<Ingress>,
    ingress_ready: bool,
    known_endpoints: BTreeSet<String>,
    external_services: BTreeSet<String>,
    endpoints_settling: bool,
}

impl IngressAwaiter {
    pub fn new(config: AwaitConfig<Ingress>) -> Self {
        Self {
            config,
            ingress: None,
            ingress_ready: false,
            known_endpoints: BTreeSet::new(),
            external_services: BTreeSet::new(),
            endpoints_settling: false,
        }
    }

    fn current(&self) -> &Ingress {
        self.ingress.as_ref().unwrap_or(&self.config.object)
    }

    pub(crate) async fn run(
        &mut self,
        ingresses: BoxStream<'static, Event<Ingress>>,
        services: BoxStream<'static, Event<Service>>,
        endpoints: BoxStream<'static, Event<Endpoints>>,
        timeout: Duration,
    ) -> Result<(), AwaitError> {
        let mut ingresses = ingresses.fuse();
        let mut services = services.fuse();
        let mut endpoints = endpoints.fuse();
        let cancel = self.config.cancel.clone();
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let settle = tokio::time::sleep(SETTLE_DELAY);
        tokio::pin!(settle);

        self.config.log(
            Severity::Info,
            "[1/3] Finding a matching service for each Ingress path",
        );

        loop {
            if self.check_and_log_status() {
                return Ok(());
            }

            let settling = self.endpoints_settling;
            tokio::select! {
                _ = cancel.cancelled() => {
                    if self.ingress_ready && self.unmatched_backends().is_empty() {
                        return Ok(());
                    }
                    return Err(AwaitError::cancelled(
                        Target::from_resource(self.current()),
                        self.error_messages(),
                    ));
                }
                _ = &mut deadline => {
                    if self.ingress_ready && self.unmatched_backends().is_empty() {
                        return Ok(());
                    }
                    return Err(AwaitError::timed_out(
                        Target::from_resource(self.current()),
                        self.error_messages(),
                    ));
                }
                _ = &mut settle, if settling => {
                    self.endpoints_settling = false;
                    for backend in self.unmatched_backends() {
                        self.config.log(
                            Severity::Warning,
                            &format!(
                                "No matching service found for ingress rule: {}",
                                backend.describe()
                            ),
                        );
                    }
                }
                Some(event) = ingresses.next() => self.process_ingress_event(event),
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
        ingress: Ingress,
        services: Vec<Service>,
        endpoints: Vec<Endpoints>,
    ) -> Result<(), AwaitError> {
        self.process_ingress_event(Event::Applied(ingress));
        for service in services {
            self.process_service_event(Event::Applied(service));
        }
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

    fn unmatched_backends(&self) -> Vec<Backend> {
        backends(self.current())
            .into_iter()
            .filter(|b| {
                !self.external_services.contains(&b.service)
                    && !self.known_endpoints.contains(&b.service)
            })
            .collect()
    }

    fn endpoints_ready(&self) -> bool {
        !self.endpoints_settling && self.unmatched_backends().is_empty()
    }

    fn check_and_log_status(&self) -> bool {
        let endpoints_ready = self.endpoints_ready();
        if endpoints_ready && self.ingress_ready {
            self.config
                .log(Severity::Info, "✅ Ingress initialization complete");
            return true;
        }
        if endpoints_ready {
            self.config.log(
                Severity::Info,
                "[2/3] Waiting for update of .status.loadBalancer with hostname/IP",
            );
        }
        false
    }

    fn process_ingress_event(&mut self, event: Event<Ingress>) {
        if event.object().name_any() != self.config.name() {
            return;
        }
        self.ingress_ready = false;
        let Event::Applied(ingress) = event else {
            return;
        };
        self.ingress_ready = ingress
            .status
            .as_ref()
            .and_then(|s| s.load_balancer.as_ref())
            .and_then(|lb| lb.ingress.as_ref())
            .map_or(false, |ingress| !ingress.is_empty());
        self.ingress = Some(ingress);
    }

    fn process_service_event(&mut self, event: Event<Service>) {
        let name = event.object().name_any();
        match event {
            Event::Deleted(_) => {
                self.external_services.remove(&name);
            }
            Event::Applied(service) => {
                let external = service.spec.as_ref().and_then(|s| s.type_.as_deref())
                    == Some("ExternalName");
                if external {
                    self.external_services.insert(name);
                } else {
                    self.external_services.remove(&name);
                }
            }
        }
    }

    /// Returns true if the Endpoints back one of this Ingress's rules, in
    /// which case the settle timer has to start over.
    fn process_endpoints_event(&mut self, event: Event<Endpoints>) -> bool {
        let name = event.object().name_any();
        if !backends(self.current()).iter().any(|b| b.service == name) {
            return false;
        }
        match event {
            Event::Applied(_) => {
                self.known_endpoints.insert(name);
            }
            Event::Deleted(_) => {
                self.known_endpoints.remove(&name);
            }
        }
        self.endpoints_settling = true;
        true
    }

    fn error_messages(&self) -> Vec<String> {
        let mut messages = Vec::new();
        if !self.unmatched_backends().is_empty() {
            messages.push(UNAVAILABLE_BACKEND.to_string());
        }
        if !self.ingress_ready {
            messages.push(NO_LOAD_BALANCER.to_string());
        }
        messages
    }
}

#[async_trait::async_trait]
impl Awaiter for IngressAwaiter {
    async fn await_ready(&mut self, client: &Client) -> Result<(), AwaitError> {
        let namespace = self.config.namespace();
        let timeout = self.config.timeout_or(DEFAULT_TIMEOUT);
        let ingresses = watch::named(
            Api::<Ingress>::namespaced(client.clone(), &namespace),
            &self.config.name(),
        );
        let services = watch::all(Api::<Service>::namespaced(client.clone(), &namespace));
        let endpoints = watch::all(Api::<Endpoints>::namespaced(client.clone(), &namespace));
        self.run(ingresses, services, endpoints, timeout).await
    }

    async fn read(&mut self, client: &Client) -> Result<(), AwaitError> {
        let namespace = self.config.namespace();
        let ingress = Api::<Ingress>::namespaced(client.clone(), &namespace)
            .get(&self.config.name())
            .await?;
        let params = ListParams::default();
        let services =
            list_or_empty(Api::<Service>::namespaced(client.clone(), &namespace), &params).await;
        let endpoints =
            list_or_empty(Api::<Endpoints>::namespaced(client.clone(), &namespace), &params).await;
        self.read_from(ingress, services, endpoints)
    }
}
