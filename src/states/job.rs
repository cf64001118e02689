use k8s_openapi::api::batch::v1::{Job, JobCondition};
use kube::ResourceExt;

use super::{Condition, ConditionResult, StateChecker};
use crate::logging::Message;

/// Failure reasons after which the Job controller will not try again.
const TERMINAL_FAILURE_REASONS: [&str; 2] = ["BackoffLimitExceeded", "DeadlineExceeded"];

fn qualified_name(job: &Job) -> String {
    format!("{}/{}", job.namespace().unwrap_or_default(), job.name_any())
}

fn conditions(job: &Job) -> &[JobCondition] {
    job.status
        .as_ref()
        .and_then(|s| s.conditions.as_deref())
        .unwrap_or_default()
}

fn find_condition<'a>(job: &'a Job, type_: &str) -> Option<&'a JobCondition> {
    conditions(job).iter().find(|c| c.type_ == type_)
}

fn is_terminal_failure(condition: &JobCondition) -> bool {
    condition.type_ == "Failed"
        && condition.status == "True"
        && condition
            .reason
            .as_deref()
            .map_or(false, |r| TERMINAL_FAILURE_REASONS.contains(&r))
}

fn job_error(condition: &JobCondition, all: &[JobCondition]) -> String {
    let mut text = String::new();
    if let (Some(reason), Some(message)) = (&condition.reason, &condition.message) {
        if !reason.is_empty() {
            text.push_str(message);
        }
    }
    for failure in all.iter().filter(|c| is_terminal_failure(c)) {
        text.push_str(&format!(
            " -- [{}] {}",
            failure.reason.as_deref().unwrap_or_default(),
            failure.message.as_deref().unwrap_or_default()
        ));
    }
    text
}

pub fn job_started(job: &Job) -> ConditionResult {
    let result =
        ConditionResult::waiting(format!("Waiting for Job {:?} to start", qualified_name(job)));
    match job.status.as_ref().and_then(|s| s.start_time.as_ref()) {
        Some(_) => result.satisfied(),
        None => result,
    }
}

/// Satisfied once the Job has completed. A terminal failure produces an
/// error-severity message, which callers treat as fatal.
pub fn job_complete(job: &Job) -> ConditionResult {
    let mut result =
        ConditionResult::waiting(format!("Waiting for Job {:?} to succeed", qualified_name(job)));
    if let Some(failed) = find_condition(job, "Failed") {
        if failed.status == "True" {
            let text = job_error(failed, conditions(job));
            result = result.with_message(if is_terminal_failure(failed) {
                Message::error(text)
            } else {
                Message::warning(text)
            });
        }
    }
    if let Some(complete) = find_condition(job, "Complete") {
        if complete.status == "True" {
            result = result.satisfied();
        } else {
            let text = job_error(complete, conditions(job));
            result = result.with_message(Message::warning(text));
        }
    }
    result
}

pub fn new_job_state_checker() -> StateChecker<Job> {
    StateChecker::new(
        vec![
            Condition::governing(job_started),
            Condition::governing(job_complete),
        ],
        "✅ Job ready",
    )
}


#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::fixtures::*;
    use super::*;
    use crate::logging::Severity;

    #[test]
    fn unstarted_job() {
        let mut checker = new_job_state_checker();
        let messages = checker.update(&job("migrate", json!({})));
        assert!(!checker.ready());
        let texts: Vec<_> = messages.iter().map(|m| m.text.clone()).collect();
        assert_eq!(
            texts,
            [
                "Waiting for Job \"default/migrate\" to start",
                "Waiting for Job \"default/migrate\" to succeed",
            ]
        );
    }

    #[test]
    fn completed_job_is_ready() {
        let mut checker = new_job_state_checker();
        let messages = checker.update(&job("migrate", completed()));
        assert!(checker.ready());
        assert_eq!(messages.0, vec![Message::info("✅ Job ready")]);
    }

    #[test]
    fn started_job_waits() {
        let mut checker = new_job_state_checker();
        checker.update(&job("migrate", started()));
        assert!(!checker.ready());
    }

    #[test]
    fn deadline_exceeded_is_an_error() {
        let mut checker = new_job_state_checker();
        let messages = checker.update(&job("migrate", deadline_exceeded()));
        assert!(!checker.ready());
        let errors = messages.errors();
        assert_eq!(errors.0.len(), 1);
        assert_eq!(errors.0[0].severity, Severity::Error);
        assert_eq!(
            errors.0[0].text,
            "Job was active longer than specified deadline -- [DeadlineExceeded] Job was active longer than specified deadline"
        );
    }

    #[test]
    fn other_failures_are_warnings() {
        let mut checker = new_job_state_checker();
        let messages = checker.update(&job(
            "migrate",
            json!({
                "startTime": "2024-01-01T00:00:00Z",
                "conditions": [{ "type": "Failed", "status": "True", "reason": "PodFailurePolicy", "message": "container failed" }],
            }),
        ));
        assert!(!messages.has_errors());
        assert_eq!(messages.warnings().0[0].text, "container failed");
    }
}
