use std::future::Future;
use std::time::Duration;

use rand::{thread_rng, Rng};
use tokio_util::sync::CancellationToken;
use tracing::{event, Level};

use crate::error::{is_not_found, AwaitError, Target};

/// The state label reported when the object no longer exists.
pub const STATE_DELETED: &str = "Deleted";

const INITIAL_INTERVAL: Duration = Duration::from_millis(500);
const MAX_INTERVAL: Duration = Duration::from_secs(30);

/// Waits for an object's derived state label to reach one of `target`,
/// refreshing it periodically rather than watching it.
///
/// While the label is one of `pending` the wait continues. Any other label,
/// or a failed refresh, ends the wait with [`AwaitError::Failed`]. A
/// not-found response from the refresh function is reported as
/// [`STATE_DELETED`].
#[derive(Debug, Clone)]
pub struct StateWait {
    pub name: String,
    pub pending: Vec<String>,
    pub target: Vec<String>,
    pub timeout: Duration,
    pub cancel: CancellationToken,
}

impl StateWait {
    pub fn new(name: impl Into<String>, timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            name: name.into(),
            pending: Vec::new(),
            target: Vec::new(),
            timeout,
            cancel,
        }
    }

    pub fn pending<I, S>(mut self, states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pending = states.into_iter().map(Into::into).collect();
        self
    }

    pub fn target<I, S>(mut self, states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target = states.into_iter().map(Into::into).collect();
        self
    }

    /// Runs the wait. `refresh` fetches the object and derives its state
    /// label. On success the last fetched object is returned, or `None` if
    /// the target state was [`STATE_DELETED`].
    pub async fn wait<T, F, Fut>(&self, mut refresh: F) -> Result<Option<T>, AwaitError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(T, String), kube::Error>>,
    {
        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        let mut interval = Duration::ZERO;
        let mut last_state: Option<String> = None;
        loop {
            let poll = async {
                tokio::time::sleep(interval).await;
                refresh().await
            };
            let result = tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(AwaitError::cancelled(
                        Target::Name(self.name.clone()),
                        self.last_state_message(&last_state),
                    ));
                }
                _ = &mut deadline => {
                    return Err(AwaitError::timed_out(
                        Target::Name(self.name.clone()),
                        self.last_state_message(&last_state),
                    ));
                }
                result = poll => result,
            };

            let (object, state) = match result {
                Ok((object, state)) => (Some(object), state),
                Err(err) if is_not_found(&err) => (None, STATE_DELETED.to_string()),
                Err(err) => {
                    let mut sub_errors = self.last_state_message(&last_state);
                    sub_errors.push(err.to_string());
                    return Err(AwaitError::failed(Target::Name(self.name.clone()), sub_errors));
                }
            };
            event!(
                Level::DEBUG,
                resource_name = %self.name,
                state = %state,
                "polled resource state"
            );

            if self.target.contains(&state) {
                return Ok(object);
            }
            if !self.pending.contains(&state) {
                return Err(AwaitError::failed(
                    Target::Name(self.name.clone()),
                    vec![format!(
                        "unexpected state {:?}, wanted target {:?}",
                        state,
                        self.target.join(", ")
                    )],
                ));
            }
            last_state = Some(state);
            interval = next_interval(interval);
        }
    }

    fn last_state_message(&self, last_state: &Option<String>) -> Vec<String> {
        match last_state {
            Some(state) => vec![format!(
                "last observed state was {:?}, wanted target {:?}",
                state,
                self.target.join(", ")
            )],
            None => Vec::new(),
        }
    }
}

/// Doubles the interval, capped, with up to 20% added jitter.
fn next_interval(current: Duration) -> Duration {
    let base = if current.is_zero() {
        INITIAL_INTERVAL
    } else {
        (current * 2).min(MAX_INTERVAL)
    };
    let jitter = thread_rng().gen_range(0.0..0.2);
    base + base.mul_f64(jitter)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use kube::core::ErrorResponse;

    use super::*;

    fn not_found() -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: "gone".into(),
            reason: "NotFound".into(),
            code: 404,
        })
    }

    fn sequence(states: &'static [&'static str]) -> impl FnMut() -> std::future::Ready<Result<(u32, String), kube::Error>> {
        let calls = Arc::new(AtomicU32::new(0));
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            let idx = usize::try_from(n).unwrap().min(states.len() - 1);
            std::future::ready(Ok((n, states[idx].to_string())))
        }
    }

    #[test]
    fn interval_grows_and_caps() {
        let first = next_interval(Duration::ZERO);
        assert!(first >= INITIAL_INTERVAL && first < INITIAL_INTERVAL.mul_f64(1.2));
        let capped = next_interval(Duration::from_secs(60));
        assert!(capped >= MAX_INTERVAL && capped < MAX_INTERVAL.mul_f64(1.2));
    }

    #[tokio::test(start_paused = true)]
    async fn reaches_target_through_pending() {
        let wait = StateWait::new("vol", Duration::from_secs(60), CancellationToken::new())
            .pending(["Pending"])
            .target(["Bound"]);
        let result = wait.wait(sequence(&["Pending", "Pending", "Bound"])).await.unwrap();
        assert_eq!(result, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_state_fails() {
        let wait = StateWait::new("vol", Duration::from_secs(60), CancellationToken::new())
            .pending(["Pending"])
            .target(["Bound"]);
        let err = wait.wait(sequence(&["Pending", "Lost"])).await.unwrap_err();
        assert!(matches!(err, AwaitError::Failed(_)));
        assert_eq!(
            err.sub_errors(),
            ["unexpected state \"Lost\", wanted target \"Bound\""]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_while_pending() {
        let wait = StateWait::new("vol", Duration::from_secs(10), CancellationToken::new())
            .pending(["Pending"])
            .target(["Bound"]);
        let err = wait.wait(sequence(&["Pending"])).await.unwrap_err();
        assert!(matches!(err, AwaitError::TimedOut(_)));
        assert_eq!(err.target().unwrap().name(), "vol");
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_counts_as_deleted() {
        let wait = StateWait::new("ns", Duration::from_secs(10), CancellationToken::new())
            .pending(["Terminating"])
            .target([STATE_DELETED]);
        let result = wait
            .wait(|| std::future::ready(Err::<((), String), _>(not_found())))
            .await
            .unwrap();
        assert_eq!(result, None);
    }

    fn server_error() -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: "etcdserver: request timed out".into(),
            reason: "InternalError".into(),
            code: 500,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_error_fails_with_last_state() {
        let wait = StateWait::new("vol", Duration::from_secs(60), CancellationToken::new())
            .pending(["Pending"])
            .target(["Bound"]);
        let calls = Arc::new(AtomicU32::new(0));
        let err = wait
            .wait(|| {
                let first = calls.fetch_add(1, Ordering::SeqCst) == 0;
                std::future::ready(if first {
                    Ok(((), "Pending".to_string()))
                } else {
                    Err(server_error())
                })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AwaitError::Failed(_)));
        let sub_errors = err.sub_errors();
        assert_eq!(sub_errors.len(), 2);
        assert_eq!(
            sub_errors[0],
            "last observed state was \"Pending\", wanted target \"Bound\""
        );
        assert!(sub_errors[1].contains("etcdserver: request timed out"));
        assert!(!err.is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_error_before_any_state() {
        let wait = StateWait::new("ns", Duration::from_secs(10), CancellationToken::new())
            .target(["Active"]);
        let err = wait
            .wait(|| std::future::ready(Err::<((), String), _>(server_error())))
            .await
            .unwrap_err();
        assert!(matches!(err, AwaitError::Failed(_)));
        assert_eq!(err.sub_errors().len(), 1);
        assert_eq!(err.target().unwrap().name(), "ns");
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_the_wait() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let wait = StateWait::new("vol", Duration::from_secs(60), cancel)
            .pending(["Pending"])
            .target(["Bound"]);
        let err = wait.wait(sequence(&["Pending"])).await.unwrap_err();
        assert!(matches!(err, AwaitError::Cancelled(_)));
    }
}
