use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ContainerStatus, Pod, PodCondition, PodStatus};
use kube::ResourceExt;
use tracing::{event, Level};

use super::{Condition, ConditionResult, StateChecker};
use crate::logging::{Message, Messages};

const DAEMON_ERROR_PREFIX: &str = "rpc error: code = Unknown desc = Error response from daemon: ";
const MANIFEST_UNKNOWN_SUFFIX: &str = ": manifest unknown";
const CONTAINERS_NOT_READY: &str = "ContainersNotReady";

/// The decoded state of a Pod's status document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodCheckResult {
    pub scheduled: bool,
    pub initialized: bool,
    pub ready: bool,
    pub succeeded: bool,
    pub scheduled_errors: BTreeMap<String, String>,
    pub init_errors: BTreeMap<String, String>,
    pub ready_errors: BTreeMap<String, String>,
    pub container_errors: BTreeMap<String, Vec<String>>,
}

impl PodCheckResult {
    /// Decodes `pod`. Every call starts from a clean slate, so a Pod that
    /// has recovered reports no errors.
    pub fn check(pod: &Pod) -> Self {
        let mut result = Self::default();
        let Some(status) = &pod.status else {
            return result;
        };
        match status.phase.as_deref().unwrap_or_default() {
            "Succeeded" => result.succeeded = true,
            "Running" | "Pending" | "Failed" | "Unknown" | "" => result.check_conditions(status),
            phase => event!(
                Level::DEBUG,
                resource_name = %pod.name_any(),
                phase = %phase,
                "ignoring pod in unrecognized phase"
            ),
        }
        result
    }

    fn check_conditions(&mut self, status: &PodStatus) {
        for condition in status.conditions.iter().flatten() {
            let is_true = condition.status == "True";
            let (flag, bucket) = match condition.type_.as_str() {
                "PodScheduled" => (&mut self.scheduled, &mut self.scheduled_errors),
                "Initialized" => (&mut self.initialized, &mut self.init_errors),
                "Ready" => (&mut self.ready, &mut self.ready_errors),
                _ => continue,
            };
            *flag = is_true;
            if !is_true {
                bucket.clear();
                bucket.insert(
                    condition.reason.clone().unwrap_or_default(),
                    condition.message.clone().unwrap_or_default(),
                );
            }
        }

        for container in status.container_statuses.iter().flatten() {
            if let Some((reason, message)) = container_error(container) {
                self.container_errors.entry(reason).or_default().push(message);
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready || self.succeeded
    }

    /// The generic `ContainersNotReady` reason says nothing once a specific
    /// container error is known.
    fn is_redundant(&self, reason: &str) -> bool {
        reason == CONTAINERS_NOT_READY && !self.container_errors.is_empty()
    }

    fn container_messages(&self) -> Vec<String> {
        self.container_errors
            .iter()
            .flat_map(|(reason, messages)| {
                messages
                    .iter()
                    .map(move |message| format!("[{}] {}", reason, message))
            })
            .collect()
    }

    /// Renders every known problem as a human-readable line.
    pub fn error_messages(&self) -> Vec<String> {
        let mut messages = Vec::new();
        for (reason, message) in &self.scheduled_errors {
            messages.push(format!("Pod unscheduled: [{}] {}", reason, message));
        }
        for (reason, message) in &self.init_errors {
            messages.push(format!("Pod uninitialized: [{}] {}", reason, message));
        }
        for (reason, message) in &self.ready_errors {
            if !self.is_redundant(reason) {
                messages.push(format!("Pod not ready: [{}] {}", reason, message));
            }
        }
        messages.extend(self.container_messages());
        messages
    }
}

/// The reason and message explaining why an unready container is unready,
/// if it is in a state worth reporting.
fn container_error(status: &ContainerStatus) -> Option<(String, String)> {
    if status.ready {
        return None;
    }
    let state = status.state.as_ref()?;
    if let Some(waiting) = &state.waiting {
        let reason = waiting.reason.clone().unwrap_or_default();
        if reason.is_empty() || reason == "ContainerCreating" {
            return None;
        }
        let message = trim_image_pull_message(waiting.message.as_deref().unwrap_or_default());
        return Some((reason, message));
    }
    if let Some(terminated) = &state.terminated {
        let reason = terminated.reason.clone().filter(|r| !r.is_empty())?;
        let message = match terminated.message.as_deref() {
            Some(message) if !message.is_empty() => trim_image_pull_message(message),
            _ => format!("Container completed with exit code {}", terminated.exit_code),
        };
        return Some((reason, message));
    }
    None
}

fn trim_image_pull_message(message: &str) -> String {
    let message = message.strip_prefix(DAEMON_ERROR_PREFIX).unwrap_or(message);
    let message = message.strip_suffix(MANIFEST_UNKNOWN_SUFFIX).unwrap_or(message);
    message.to_string()
}

fn qualified_name(pod: &Pod) -> String {
    format!("{}/{}", pod.namespace().unwrap_or_default(), pod.name_any())
}

fn find_condition<'a>(pod: &'a Pod, type_: &str) -> Option<&'a PodCondition> {
    pod.status
        .as_ref()?
        .conditions
        .as_ref()?
        .iter()
        .find(|c| c.type_ == type_)
}

/// Renders a failing Pod condition together with the container errors
/// behind it.
fn pod_error(pod: &Pod, condition: &PodCondition) -> String {
    let decoded = PodCheckResult::check(pod);
    let mut parts = Vec::new();
    if let (Some(reason), Some(message)) = (&condition.reason, &condition.message) {
        if !reason.is_empty() && !decoded.is_redundant(reason) {
            parts.push(message.clone());
        }
    }
    parts.extend(decoded.container_messages());
    format!("[Pod {}]: {}", qualified_name(pod), parts.join(" -- "))
}

fn is_succeeded(pod: &Pod) -> bool {
    pod.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Succeeded")
}

pub fn pod_scheduled(pod: &Pod) -> ConditionResult {
    let result = ConditionResult::waiting(format!(
        "Waiting for Pod {:?} to be scheduled",
        qualified_name(pod)
    ));
    if is_succeeded(pod) {
        return result.satisfied();
    }
    match find_condition(pod, "PodScheduled") {
        Some(c) if c.status == "True" => result.satisfied(),
        Some(PodCondition {
            reason: Some(reason),
            message: Some(message),
            ..
        }) if !reason.is_empty() && !message.is_empty() => {
            result.with_message(Message::info(message.clone()))
        }
        _ => result,
    }
}

pub fn pod_initialized(pod: &Pod) -> ConditionResult {
    let result = ConditionResult::waiting(format!(
        "Waiting for Pod {:?} to be initialized",
        qualified_name(pod)
    ));
    if is_succeeded(pod) {
        return result.satisfied();
    }
    match find_condition(pod, "Initialized") {
        Some(c) if c.status == "True" => result.satisfied(),
        Some(c) => {
            let text = pod_error(pod, c);
            result.with_message(Message::warning(text))
        }
        None => result,
    }
}

/// Satisfied once the Ready condition is true, or as soon as the Pod has
/// run to completion.
pub fn pod_ready(pod: &Pod) -> ConditionResult {
    let result = ConditionResult::waiting(format!(
        "Waiting for Pod {:?} to be ready",
        qualified_name(pod)
    ));
    if is_succeeded(pod) {
        return result.satisfied();
    }
    match find_condition(pod, "Ready") {
        Some(c) if c.status == "True" => result.satisfied(),
        Some(c) => {
            let text = pod_error(pod, c);
            result.with_message(Message::warning(text))
        }
        None => result,
    }
}

pub fn new_pod_state_checker() -> StateChecker<Pod> {
    StateChecker::new(
        vec![
            Condition::advisory(pod_scheduled),
            Condition::advisory(pod_initialized),
            Condition::governing(pod_ready),
        ],
        "✅ Pod ready",
    )
}

/// Tracks a single Pod's readiness, keeping the condition messages from
/// the latest observation.
pub struct PodChecker {
    checker: StateChecker<Pod>,
    messages: Messages,
}

impl Default for PodChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl PodChecker {
    pub fn new() -> Self {
        Self {
            checker: new_pod_state_checker(),
            messages: Messages::default(),
        }
    }

    pub fn update(&mut self, pod: &Pod) -> Messages {
        self.messages = self.checker.update(pod);
        self.messages.clone()
    }

    pub fn ready(&self) -> bool {
        self.checker.ready()
    }

    /// Warning and error messages from the latest observation.
    pub fn problems(&self) -> Messages {
        self.messages
            .with_severity(&[crate::logging::Severity::Warning, crate::logging::Severity::Error])
    }
}
