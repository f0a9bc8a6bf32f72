use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tracing::{debug, warn};

use crate::backend::{BackendError, GenerationBackend, RemoteJobId, RemoteJobState};
use crate::request::{
    current_timestamp, validate_prompt, ErrorDetail, GenerationKind, GenerationParams,
    GenerationRequest, RequestStatus,
};
use crate::{GenerationError, RequestId, Result};

/// Client tuning, passed in explicitly at construction. Build one from the
/// settings store in the shell; the client itself reads no global state.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Ceiling on requests simultaneously submitted or running.
    pub max_concurrent: usize,

    /// Attempt budget for transient submit/poll failures.
    pub max_attempts: u32,

    /// First retry delay; doubles per attempt.
    pub initial_backoff: Duration,

    /// Delay between status polls for an accepted job.
    pub poll_interval: Duration,

    /// Bounded wait for any single remote call. Exceeding it counts as a
    /// transient failure against the attempt budget.
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            poll_interval: Duration::from_secs(2),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl ClientConfig {
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }
}

/// Emitted to observers on every state transition of any request. Carries a
/// snapshot taken atomically with the transition.
#[derive(Debug, Clone)]
pub struct RequestEvent {
    pub id: RequestId,
    pub kind: GenerationKind,
    pub status: RequestStatus,
    pub request: GenerationRequest,
}

type ObserverFn = dyn Fn(&RequestEvent) + Send + Sync;
type ObserverMap = Arc<Mutex<HashMap<u64, Arc<ObserverFn>>>>;

/// Handle returned by `subscribe`. Unsubscribing is idempotent and safe to
/// call from within the callback itself.
#[derive(Clone)]
pub struct Subscription {
    id: u64,
    observers: ObserverMap,
}

impl Subscription {
    pub fn unsubscribe(&self) {
        self.observers.lock().remove(&self.id);
    }
}

struct Tracked {
    request: GenerationRequest,
    /// Holds a concurrency slot (admitted out of the pending queue).
    admitted: bool,
}

struct ClientState {
    requests: HashMap<RequestId, Tracked>,
    queue: VecDeque<RequestId>,
    in_flight: usize,
    cancels: HashSet<RequestId>,
}

struct Inner {
    config: ClientConfig,
    backend: Arc<dyn GenerationBackend>,
    state: Mutex<ClientState>,
    observers: ObserverMap,
    next_observer: AtomicU64,
    events: UnboundedSender<RequestEvent>,
}

/// Generation request client. Cheap to clone; all clones share state.
///
/// Must be constructed and used inside a tokio runtime: each admitted
/// request is driven by a spawned task, and observer callbacks run on a
/// dedicated dispatcher task in transition order.
#[derive(Clone)]
pub struct GenerationClient {
    inner: Arc<Inner>,
}

impl GenerationClient {
    pub fn new(config: ClientConfig, backend: Arc<dyn GenerationBackend>) -> Self {
        let (events, mut rx) = unbounded_channel::<RequestEvent>();
        let observers: ObserverMap = Arc::new(Mutex::new(HashMap::new()));

        // Dispatcher: drains transitions in order and fans out to observers.
        // The observer map lock is released before callbacks run, so a
        // callback may unsubscribe (itself or others) without deadlocking.
        let dispatch_observers = observers.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let callbacks: Vec<Arc<ObserverFn>> =
                    dispatch_observers.lock().values().cloned().collect();
                for callback in callbacks {
                    callback(&event);
                }
            }
        });

        Self {
            inner: Arc::new(Inner {
                config: config.clone(),
                backend,
                state: Mutex::new(ClientState {
                    requests: HashMap::new(),
                    queue: VecDeque::new(),
                    in_flight: 0,
                    cancels: HashSet::new(),
                }),
                observers,
                next_observer: AtomicU64::new(0),
                events,
            }),
        }
    }

    /// Validate and admit a new request. Returns the pending snapshot; the
    /// request is promoted immediately if a concurrency slot is free,
    /// otherwise it queues FIFO. Never blocks on remote I/O.
    pub fn submit_request(
        &self,
        kind: GenerationKind,
        prompt: &str,
        params: GenerationParams,
    ) -> Result<GenerationRequest> {
        let prompt = validate_prompt(kind, prompt)?;
        let request = GenerationRequest::new(kind, prompt, params);
        let snapshot = request.clone();
        let id = request.id;

        let mut state = self.inner.state.lock();
        state.requests.insert(
            id,
            Tracked {
                request,
                admitted: false,
            },
        );
        state.queue.push_back(id);
        emit(&self.inner, &state, id);
        promote_locked(&self.inner, &mut state);

        Ok(snapshot)
    }

    /// Request cancellation. Queued requests cancel immediately; admitted
    /// requests are cancelled best-effort — a remote terminal result that
    /// arrives concurrently wins over the cancellation.
    pub fn cancel_request(&self, id: RequestId) -> Result<()> {
        let mut state = self.inner.state.lock();
        let (status, admitted) = match state.requests.get(&id) {
            Some(tracked) => (tracked.request.status, tracked.admitted),
            None => return Err(GenerationError::NotFound(id)),
        };
        if status.is_terminal() {
            return Err(GenerationError::AlreadyTerminal(id));
        }

        if admitted {
            state.cancels.insert(id);
            debug!(request = %id, "cancellation requested");
        } else {
            state.queue.retain(|queued| *queued != id);
            apply_terminal_locked(&self.inner, &mut state, id, RequestStatus::Cancelled, None, None);
        }
        Ok(())
    }

    pub fn get_request(&self, id: RequestId) -> Result<GenerationRequest> {
        let state = self.inner.state.lock();
        state
            .requests
            .get(&id)
            .map(|tracked| tracked.request.clone())
            .ok_or(GenerationError::NotFound(id))
    }

    /// Snapshot of every tracked request, newest first.
    pub fn list_requests(&self) -> Vec<GenerationRequest> {
        let state = self.inner.state.lock();
        let mut all: Vec<GenerationRequest> = state
            .requests
            .values()
            .map(|tracked| tracked.request.clone())
            .collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }

    /// Register an observer invoked on every state transition of any
    /// request, in the order the transitions occurred.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&RequestEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_observer.fetch_add(1, Ordering::Relaxed);
        self.inner.observers.lock().insert(id, Arc::new(callback));
        Subscription {
            id,
            observers: self.inner.observers.clone(),
        }
    }
}

/// Push the current snapshot of `id` to the event channel. Called with the
/// state lock held so channel order matches transition order.
fn emit(inner: &Inner, state: &ClientState, id: RequestId) {
    if let Some(tracked) = state.requests.get(&id) {
        let _ = inner.events.send(RequestEvent {
            id,
            kind: tracked.request.kind,
            status: tracked.request.status,
            request: tracked.request.clone(),
        });
    }
}

/// Admit queued requests while slots are free, spawning a driver per
/// admission. Caller holds the state lock.
fn promote_locked(inner: &Arc<Inner>, state: &mut ClientState) {
    while state.in_flight < inner.config.max_concurrent {
        let id = match state.queue.pop_front() {
            Some(id) => id,
            None => break,
        };
        if let Some(tracked) = state.requests.get_mut(&id) {
            tracked.admitted = true;
            state.in_flight += 1;
            tokio::spawn(drive(inner.clone(), id));
        }
    }
}

/// Apply a non-terminal transition. Only pending -> submitted and
/// submitted -> running are meaningful; anything else is a stale driver
/// racing a terminal transition and is dropped.
fn apply_status(inner: &Arc<Inner>, id: RequestId, status: RequestStatus) -> bool {
    let mut state = inner.state.lock();
    let tracked = match state.requests.get_mut(&id) {
        Some(tracked) => tracked,
        None => return false,
    };
    let valid = matches!(
        (tracked.request.status, status),
        (RequestStatus::Pending, RequestStatus::Submitted)
            | (RequestStatus::Submitted, RequestStatus::Running)
    );
    if !valid {
        return false;
    }
    tracked.request.status = status;
    emit(inner, &state, id);
    true
}

fn apply_terminal(
    inner: &Arc<Inner>,
    id: RequestId,
    status: RequestStatus,
    result_ref: Option<String>,
    error_detail: Option<ErrorDetail>,
) -> bool {
    let mut state = inner.state.lock();
    apply_terminal_locked(inner, &mut state, id, status, result_ref, error_detail)
}

/// Apply a terminal transition; the first one wins and later ones are
/// no-ops. Releases the concurrency slot and promotes the queue.
fn apply_terminal_locked(
    inner: &Arc<Inner>,
    state: &mut ClientState,
    id: RequestId,
    status: RequestStatus,
    result_ref: Option<String>,
    error_detail: Option<ErrorDetail>,
) -> bool {
    debug_assert!(status.is_terminal());
    let tracked = match state.requests.get_mut(&id) {
        Some(tracked) => tracked,
        None => return false,
    };
    if tracked.request.status.is_terminal() {
        return false;
    }

    tracked.request.status = status;
    tracked.request.completed_at = Some(current_timestamp());
    tracked.request.result_ref = result_ref;
    tracked.request.error_detail = error_detail;
    let held_slot = tracked.admitted;
    tracked.admitted = false;

    state.cancels.remove(&id);
    emit(inner, state, id);

    if held_slot {
        state.in_flight -= 1;
        promote_locked(inner, state);
    }
    true
}

fn cancel_pending(inner: &Inner, id: RequestId) -> bool {
    inner.state.lock().cancels.contains(&id)
}

fn snapshot(inner: &Inner, id: RequestId) -> Option<GenerationRequest> {
    inner
        .state
        .lock()
        .requests
        .get(&id)
        .map(|tracked| tracked.request.clone())
}

fn backoff_delay(initial: Duration, attempt: u32) -> Duration {
    initial.saturating_mul(1 << attempt.saturating_sub(1).min(6))
}

/// Drive one admitted request: submit with bounded retry, then poll the
/// remote job until a terminal state, honoring cancellation along the way.
async fn drive(inner: Arc<Inner>, id: RequestId) {
    let request = match snapshot(&inner, id) {
        Some(request) => request,
        None => return,
    };
    let config = inner.config.clone();

    // Submission: pending until the remote accepts. Transient failures
    // (including timeouts) retry with exponential backoff; permanent
    // failures and an exhausted budget fail the request.
    let mut attempt: u32 = 0;
    let remote = loop {
        if cancel_pending(&inner, id) {
            apply_terminal(&inner, id, RequestStatus::Cancelled, None, None);
            return;
        }
        attempt += 1;
        let outcome =
            tokio::time::timeout(config.request_timeout, inner.backend.submit(&request)).await;
        match outcome {
            Ok(Ok(remote)) => break remote,
            Ok(Err(BackendError::Permanent(message))) => {
                apply_terminal(
                    &inner,
                    id,
                    RequestStatus::Failed,
                    None,
                    Some(ErrorDetail::permanent(message)),
                );
                return;
            }
            Ok(Err(BackendError::Transient(message))) => {
                if attempt >= config.max_attempts {
                    apply_terminal(
                        &inner,
                        id,
                        RequestStatus::Failed,
                        None,
                        Some(ErrorDetail::transient(format!(
                            "submission failed after {} attempts: {}",
                            attempt, message
                        ))),
                    );
                    return;
                }
                warn!(request = %id, attempt, "transient submit failure: {}", message);
                tokio::time::sleep(backoff_delay(config.initial_backoff, attempt)).await;
            }
            Err(_) => {
                if attempt >= config.max_attempts {
                    apply_terminal(
                        &inner,
                        id,
                        RequestStatus::Failed,
                        None,
                        Some(ErrorDetail::transient(format!(
                            "submission timed out after {} attempts",
                            attempt
                        ))),
                    );
                    return;
                }
                warn!(request = %id, attempt, "submit call timed out");
                tokio::time::sleep(backoff_delay(config.initial_backoff, attempt)).await;
            }
        }
    };

    if cancel_pending(&inner, id) {
        // Accepted remotely but cancelled before we recorded it.
        let _ = inner.backend.cancel(&remote).await;
        finish_after_cancel(&inner, id, &remote).await;
        return;
    }

    if !apply_status(&inner, id, RequestStatus::Submitted) {
        // A terminal transition beat the acknowledgement.
        let _ = inner.backend.cancel(&remote).await;
        return;
    }
    debug!(request = %id, remote = %remote, "accepted by remote");

    // Poll until the job reaches a terminal state.
    let mut failures: u32 = 0;
    loop {
        if cancel_pending(&inner, id) {
            let _ = inner.backend.cancel(&remote).await;
            finish_after_cancel(&inner, id, &remote).await;
            return;
        }
        let outcome = tokio::time::timeout(config.request_timeout, inner.backend.poll(&remote)).await;
        match outcome {
            Ok(Ok(job)) => {
                failures = 0;
                match job {
                    RemoteJobState::Queued => {}
                    RemoteJobState::Processing => {
                        apply_status(&inner, id, RequestStatus::Running);
                    }
                    RemoteJobState::Done { result_url } => {
                        apply_terminal(
                            &inner,
                            id,
                            RequestStatus::Succeeded,
                            Some(result_url),
                            None,
                        );
                        return;
                    }
                    RemoteJobState::Error { message } => {
                        apply_terminal(
                            &inner,
                            id,
                            RequestStatus::Failed,
                            None,
                            Some(ErrorDetail::permanent(message)),
                        );
                        return;
                    }
                }
            }
            Ok(Err(BackendError::Permanent(message))) => {
                apply_terminal(
                    &inner,
                    id,
                    RequestStatus::Failed,
                    None,
                    Some(ErrorDetail::permanent(message)),
                );
                return;
            }
            Ok(Err(BackendError::Transient(message))) => {
                failures += 1;
                if failures >= config.max_attempts {
                    apply_terminal(
                        &inner,
                        id,
                        RequestStatus::Failed,
                        None,
                        Some(ErrorDetail::transient(format!(
                            "status polling failed after {} attempts: {}",
                            failures, message
                        ))),
                    );
                    return;
                }
                warn!(request = %id, failures, "transient poll failure: {}", message);
                tokio::time::sleep(backoff_delay(config.initial_backoff, failures)).await;
                continue;
            }
            Err(_) => {
                failures += 1;
                if failures >= config.max_attempts {
                    apply_terminal(
                        &inner,
                        id,
                        RequestStatus::Failed,
                        None,
                        Some(ErrorDetail::transient(format!(
                            "status polling timed out after {} attempts",
                            failures
                        ))),
                    );
                    return;
                }
                tokio::time::sleep(backoff_delay(config.initial_backoff, failures)).await;
                continue;
            }
        }
        tokio::time::sleep(config.poll_interval).await;
    }
}

/// One final status check after a best-effort remote cancel: a terminal
/// result the remote produced concurrently wins over the cancellation.
async fn finish_after_cancel(inner: &Arc<Inner>, id: RequestId, remote: &RemoteJobId) {
    let outcome =
        tokio::time::timeout(inner.config.request_timeout, inner.backend.poll(remote)).await;
    match outcome {
        Ok(Ok(RemoteJobState::Done { result_url })) => {
            apply_terminal(inner, id, RequestStatus::Succeeded, Some(result_url), None);
        }
        Ok(Ok(RemoteJobState::Error { message })) => {
            apply_terminal(
                inner,
                id,
                RequestStatus::Failed,
                None,
                Some(ErrorDetail::permanent(message)),
            );
        }
        _ => {
            apply_terminal(inner, id, RequestStatus::Cancelled, None, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendResult;

    /// Backend whose jobs never finish; enough for admission-side tests.
    struct IdleBackend;

    #[async_trait::async_trait]
    impl GenerationBackend for IdleBackend {
        fn name(&self) -> &str {
            "idle"
        }

        async fn is_available(&self) -> bool {
            true
        }

        async fn submit(&self, _request: &GenerationRequest) -> BackendResult<RemoteJobId> {
            Ok(RemoteJobId("job-1".to_string()))
        }

        async fn poll(&self, _job: &RemoteJobId) -> BackendResult<RemoteJobState> {
            Ok(RemoteJobState::Queued)
        }

        async fn cancel(&self, _job: &RemoteJobId) -> BackendResult<()> {
            Ok(())
        }
    }

    fn test_client() -> GenerationClient {
        GenerationClient::new(ClientConfig::default(), Arc::new(IdleBackend))
    }

    #[tokio::test]
    async fn test_rejected_prompt_creates_no_request() {
        let client = test_client();
        let over = "x".repeat(501);
        let err = client
            .submit_request(GenerationKind::Video, &over, GenerationParams::new())
            .unwrap_err();
        assert!(matches!(err, GenerationError::Validation(_)));
        assert!(client.list_requests().is_empty());
    }

    #[tokio::test]
    async fn test_get_unknown_request() {
        let client = test_client();
        let missing = RequestId::new();
        assert!(matches!(
            client.get_request(missing),
            Err(GenerationError::NotFound(id)) if id == missing
        ));
        assert!(matches!(
            client.cancel_request(missing),
            Err(GenerationError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let client = test_client();
        let sub = client.subscribe(|_| {});
        sub.unsubscribe();
        sub.unsubscribe();
        assert!(client.inner.observers.lock().is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe_from_within_callback() {
        let client = test_client();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let slot_for_callback = slot.clone();
        let sub = client.subscribe(move |_| {
            if let Some(sub) = slot_for_callback.lock().as_ref() {
                sub.unsubscribe();
            }
        });
        *slot.lock() = Some(sub.clone());

        client
            .submit_request(GenerationKind::Music, "ambient pad", GenerationParams::new())
            .unwrap();

        // Let the dispatcher deliver the pending event; the callback
        // unsubscribes itself without deadlocking.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(client.inner.observers.lock().is_empty());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let base = Duration::from_millis(500);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(500));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(1000));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(2000));
        // shift saturates instead of overflowing for absurd attempt counts
        assert_eq!(backoff_delay(base, 40), base * 64);
    }

    #[test]
    fn test_config_floor() {
        let config = ClientConfig::default().with_max_concurrent(0);
        assert_eq!(config.max_concurrent, 1);
    }
}
