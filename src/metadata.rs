//! User-supplied overrides read from object annotations.

use std::time::Duration;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::{event, Level};

/// Set to `"true"` to skip readiness checks for the object entirely.
pub const SKIP_AWAIT: &str = "kubeawait.dev/skipAwait";
/// Overrides the await timeout, in seconds.
pub const TIMEOUT_SECONDS: &str = "kubeawait.dev/timeoutSeconds";
/// Set to `"true"` to have objects that are found unready on read replaced.
pub const REPLACE_UNREADY: &str = "kubeawait.dev/replaceUnready";

fn annotation<'a>(meta: &'a ObjectMeta, key: &str) -> Option<&'a str> {
    meta.annotations
        .as_ref()
        .and_then(|a| a.get(key))
        .map(String::as_str)
}

fn annotation_true(meta: &ObjectMeta, key: &str) -> bool {
    annotation(meta, key).map_or(false, |v| v.trim() == "true")
}

pub fn skip_await(meta: &ObjectMeta) -> bool {
    annotation_true(meta, SKIP_AWAIT)
}

pub fn replace_unready(meta: &ObjectMeta) -> bool {
    annotation_true(meta, REPLACE_UNREADY)
}

/// The timeout the user asked for: an explicit option wins over the
/// timeout annotation. Returns `None` if neither is set.
pub fn timeout_duration(explicit: Option<Duration>, meta: &ObjectMeta) -> Option<Duration> {
    if explicit.is_some() {
        return explicit;
    }
    let raw = annotation(meta, TIMEOUT_SECONDS)?;
    match raw.trim().parse::<u64>() {
        Ok(seconds) => Some(Duration::from_secs(seconds)),
        Err(err) => {
            event!(
                Level::WARN,
                annotation = TIMEOUT_SECONDS,
                value = %raw,
                err = %err,
                "ignoring malformed timeout annotation"
            );
            None
        }
    }
}
