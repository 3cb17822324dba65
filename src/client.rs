//! Retry-resilient API client.
//!
//! Wraps every call to the remote endpoint — chat completion (plain or
//! streaming) and embedding — with classified-error retry, exponential
//! backoff with jitter, and credential freshness checks. Retriable errors
//! (`Timeout`, `Transient`, `Connection`, `ServiceUnavailable`) are retried
//! up to `max_attempts` total attempts; everything else surfaces after a
//! single try.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::credentials::CredentialProvider;
use crate::error::ApiError;
use crate::models::StreamEvent;
use crate::transport::{ApiTransport, ChatRequest};

/// Retry schedule: `delay(attempt) = base * 2^attempt + jitter()` seconds,
/// attempt indexed from 0. The jitter function returns a value in [0, 1);
/// injecting a constant makes the schedule fully deterministic for tests.
#[derive(Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub jitter: fn() -> f64,
}

fn uniform_jitter() -> f64 {
    rand::random::<f64>()
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            jitter: uniform_jitter,
        }
    }

    /// Wait before re-trying after a failure of attempt `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponential = self.base_delay.as_secs_f64() * 2f64.powi(attempt as i32);
        Duration::from_secs_f64(exponential + (self.jitter)())
    }
}

/// Client wrapping an [`ApiTransport`] with the retry/credential discipline.
/// Cheap to clone; shared across sessions.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn ApiTransport>,
    credentials: Arc<CredentialProvider>,
    policy: RetryPolicy,
}

impl ApiClient {
    pub fn new(
        transport: Arc<dyn ApiTransport>,
        credentials: Arc<CredentialProvider>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            credentials,
            policy,
        }
    }

    /// Single-shot chat completion with retry.
    pub async fn complete(&self, request: &ChatRequest) -> Result<String, ApiError> {
        let mut last_err: Option<ApiError> = None;

        for attempt in 0..self.policy.max_attempts {
            self.wait_before(attempt, &last_err).await;

            let credential = self.credentials.current().await?;
            match self.transport.complete(request, &credential).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_retriable() => last_err = Some(e),
                Err(e) => return Err(e),
            }
        }

        Err(self.exhausted(last_err))
    }

    /// Embed a batch of texts with retry.
    pub async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        let mut last_err: Option<ApiError> = None;

        for attempt in 0..self.policy.max_attempts {
            self.wait_before(attempt, &last_err).await;

            let credential = self.credentials.current().await?;
            match self.transport.embed(inputs, &credential).await {
                Ok(vectors) => return Ok(vectors),
                Err(e) if e.is_retriable() => last_err = Some(e),
                Err(e) => return Err(e),
            }
        }

        Err(self.exhausted(last_err))
    }

    /// Streaming chat completion with retry.
    ///
    /// Fragments are forwarded on `events` as [`StreamEvent::Token`] the
    /// moment they arrive. A retriable failure mid-stream restarts the call
    /// from scratch: consumers receive [`StreamEvent::Restart`] and must
    /// discard text accumulated so far. [`StreamEvent::Done`] marks
    /// successful completion.
    pub async fn complete_streaming(
        &self,
        request: &ChatRequest,
        events: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ApiError> {
        let mut last_err: Option<ApiError> = None;

        for attempt in 0..self.policy.max_attempts {
            self.wait_before(attempt, &last_err).await;

            let credential = self.credentials.current().await?;
            let (tx, mut rx) = mpsc::channel::<String>(32);

            let call = self.transport.complete_streaming(request, &credential, tx);
            let forward = async {
                let mut forwarded = 0usize;
                while let Some(fragment) = rx.recv().await {
                    forwarded += 1;
                    if events.send(StreamEvent::Token(fragment)).await.is_err() {
                        break;
                    }
                }
                forwarded
            };

            let (result, forwarded) = tokio::join!(call, forward);
            match result {
                Ok(()) => {
                    let _ = events.send(StreamEvent::Done).await;
                    return Ok(());
                }
                Err(e) if e.is_retriable() => {
                    if forwarded > 0 && attempt + 1 < self.policy.max_attempts {
                        warn!(forwarded, "Stream interrupted mid-flight; restarting");
                        let _ = events.send(StreamEvent::Restart).await;
                    }
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(self.exhausted(last_err))
    }

    async fn wait_before(&self, attempt: u32, last_err: &Option<ApiError>) {
        if attempt == 0 {
            return;
        }
        let delay = self.policy.delay(attempt - 1);
        if let Some(err) = last_err {
            info!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying after transient error"
            );
        }
        tokio::time::sleep(delay).await;
    }

    fn exhausted(&self, last_err: Option<ApiError>) -> ApiError {
        ApiError::RetriesExhausted {
            attempts: self.policy.max_attempts,
            last: Box::new(last_err.unwrap_or(ApiError::Connection {
                message: "no attempt recorded".to_string(),
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Credential;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn zero_jitter() -> f64 {
        0.0
    }

    fn instant_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::ZERO,
            jitter: zero_jitter,
        }
    }

    fn transient() -> ApiError {
        ApiError::Transient {
            message: "503-adjacent".to_string(),
        }
    }

    /// Transport that pops one scripted outcome per call.
    struct ScriptedTransport {
        calls: AtomicUsize,
        outcomes: Mutex<VecDeque<Result<String, ApiError>>>,
    }

    impl ScriptedTransport {
        fn new(outcomes: Vec<Result<String, ApiError>>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                outcomes: Mutex::new(outcomes.into()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn next_outcome(&self) -> Result<String, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(ApiError::Connection {
                    message: "script exhausted".to_string(),
                }))
        }
    }

    #[async_trait]
    impl ApiTransport for ScriptedTransport {
        async fn complete(
            &self,
            _request: &ChatRequest,
            _credential: &Credential,
        ) -> Result<String, ApiError> {
            self.next_outcome()
        }

        async fn complete_streaming(
            &self,
            _request: &ChatRequest,
            _credential: &Credential,
            fragments: mpsc::Sender<String>,
        ) -> Result<(), ApiError> {
            match self.next_outcome() {
                Ok(text) => {
                    for word in text.split_inclusive(' ') {
                        let _ = fragments.send(word.to_string()).await;
                    }
                    Ok(())
                }
                Err(e) => {
                    // Half a stream, then the failure.
                    let _ = fragments.send("partial ".to_string()).await;
                    Err(e)
                }
            }
        }

        async fn embed(
            &self,
            inputs: &[String],
            _credential: &Credential,
        ) -> Result<Vec<Vec<f32>>, ApiError> {
            self.next_outcome()
                .map(|_| inputs.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    fn client(transport: Arc<ScriptedTransport>, max_attempts: u32) -> ApiClient {
        ApiClient::new(
            transport,
            Arc::new(CredentialProvider::api_key("test")),
            instant_policy(max_attempts),
        )
    }

    fn request() -> ChatRequest {
        ChatRequest {
            messages: vec![crate::models::ChatMessage::user("hi")],
            temperature: 0.9,
        }
    }

    #[test]
    fn backoff_is_exponential_with_jitter_floor() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            jitter: zero_jitter,
        };
        let mut previous = Duration::ZERO;
        for attempt in 0..5 {
            let delay = policy.delay(attempt);
            let floor = Duration::from_secs_f64(1.0 * 2f64.powi(attempt as i32));
            assert!(delay >= floor, "delay below base*2^{}", attempt);
            assert!(delay >= previous, "delay decreased at attempt {}", attempt);
            previous = delay;
        }
    }

    #[test]
    fn jitter_bounds_delay_above_floor() {
        let policy = RetryPolicy::new(3, Duration::from_secs(2));
        for attempt in 0..3 {
            let floor = 2.0 * 2f64.powi(attempt as i32);
            let delay = policy.delay(attempt).as_secs_f64();
            assert!(delay >= floor && delay < floor + 1.0);
        }
    }

    #[tokio::test]
    async fn retriable_error_exhausts_all_attempts() {
        let transport = ScriptedTransport::new(vec![
            Err(transient()),
            Err(transient()),
            Err(transient()),
            Err(transient()),
            Err(transient()),
        ]);
        let client = client(Arc::clone(&transport), 5);

        let err = client.complete(&request()).await.unwrap_err();
        assert_eq!(transport.calls(), 5);
        match err {
            ApiError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 5);
                assert!(matches!(*last, ApiError::Transient { .. }));
            }
            other => panic!("expected RetriesExhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn non_retriable_error_surfaces_after_one_attempt() {
        let transport = ScriptedTransport::new(vec![Err(ApiError::InvalidRequest {
            message: "prompt too large".to_string(),
        })]);
        let client = client(Arc::clone(&transport), 5);

        let err = client.complete(&request()).await.unwrap_err();
        assert_eq!(transport.calls(), 1);
        assert!(matches!(err, ApiError::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn transient_failure_then_success() {
        let transport =
            ScriptedTransport::new(vec![Err(transient()), Ok("recovered".to_string())]);
        let client = client(Arc::clone(&transport), 5);

        let text = client.complete(&request()).await.unwrap();
        assert_eq!(text, "recovered");
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn embed_retries_like_completion() {
        let transport = ScriptedTransport::new(vec![Err(transient()), Ok(String::new())]);
        let client = client(Arc::clone(&transport), 3);

        let vectors = client.embed(&["a".to_string(), "b".to_string()]).await.unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn stream_restart_after_mid_flight_failure() {
        let transport =
            ScriptedTransport::new(vec![Err(transient()), Ok("hello world".to_string())]);
        let client = client(Arc::clone(&transport), 3);

        let (tx, mut rx) = mpsc::channel(64);
        client.complete_streaming(&request(), tx).await.unwrap();

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }

        // Partial fragment, restart marker, then the full clean stream.
        assert_eq!(events[0], StreamEvent::Token("partial ".to_string()));
        assert_eq!(events[1], StreamEvent::Restart);
        let rest: Vec<_> = events[2..].to_vec();
        assert_eq!(
            rest,
            vec![
                StreamEvent::Token("hello ".to_string()),
                StreamEvent::Token("world".to_string()),
                StreamEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn stream_exhaustion_reports_retries_exhausted() {
        let transport = ScriptedTransport::new(vec![Err(transient()), Err(transient())]);
        let client = client(Arc::clone(&transport), 2);

        let (tx, mut rx) = mpsc::channel(64);
        let err = client.complete_streaming(&request(), tx).await.unwrap_err();
        assert!(matches!(err, ApiError::RetriesExhausted { attempts: 2, .. }));
        assert_eq!(transport.calls(), 2);

        // No Done event on failure.
        let mut saw_done = false;
        while let Some(event) = rx.recv().await {
            saw_done |= event == StreamEvent::Done;
        }
        assert!(!saw_done);
    }
}
