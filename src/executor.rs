// Resilient executor
// Sends one normalized payload to the supplier with a credential attached, and decides
// after each attempt whether to retry, re-authenticate, or give up. Booking calls are
// never re-sent once they may have reached the supplier.

use std::{
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use bytes::Bytes;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::{
    audit::{AuditEntry, AuditLogger, AuditOutcome},
    config::{GatewayConfig, RetryConfig},
    credential::CredentialStore,
    error::{GatewayError, TransportError},
    model::Operation,
    request::{self, UpstreamPayload},
    response,
    transport::{Transport, UpstreamRawResponse, UpstreamRequest},
};

// Longest slice of a non-JSON body kept for errors and audit
const BODY_SNIPPET_LEN: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Normalizing,
    Authenticating,
    Executing,
    NormalizingResponse,
    Done,
    Failed,
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationState::Done | OperationState::Failed)
    }

    pub fn can_transition_to(&self, next: OperationState) -> bool {
        use OperationState::*;
        match (self, next) {
            (_, Failed) => !self.is_terminal(),
            (Normalizing, Authenticating) => true,
            (Authenticating, Executing) => true,
            // Retries loop back through the credential check
            (Executing, Authenticating | NormalizingResponse) => true,
            (NormalizingResponse, Done) => true,
            _ => false,
        }
    }
}

// Per-call state threaded through the facade and the executor
#[derive(Debug)]
pub struct CallContext {
    pub correlation_id: Uuid,
    pub operation: Operation,
    pub deadline: Option<Instant>,
    attempts: u32,
    request_sent: bool,
    state: OperationState,
    history: Vec<OperationState>,
}

impl CallContext {
    pub fn new(operation: Operation, correlation_id: Uuid, deadline: Option<Duration>) -> Self {
        Self {
            correlation_id,
            operation,
            deadline: deadline.map(|d| Instant::now() + d),
            attempts: 0,
            request_sent: false,
            state: OperationState::Normalizing,
            history: vec![OperationState::Normalizing],
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    // True once any attempt may have reached the supplier
    pub fn request_sent(&self) -> bool {
        self.request_sent
    }

    pub fn state(&self) -> OperationState {
        self.state
    }

    pub fn history(&self) -> &[OperationState] {
        &self.history
    }

    pub fn transition(&mut self, next: OperationState) -> bool {
        if !self.state.can_transition_to(next) {
            error!(
                correlation_id = %self.correlation_id,
                from = ?self.state,
                to = ?next,
                "rejected operation state transition"
            );
            return false;
        }
        debug!(correlation_id = %self.correlation_id, from = ?self.state, to = ?next, "state");
        self.state = next;
        self.history.push(next);
        true
    }

    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.transition(OperationState::Failed);
        }
    }

    fn deadline_exceeded(&self, ambiguous: bool) -> GatewayError {
        GatewayError::DeadlineExceeded {
            attempts: self.attempts,
            ambiguous,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExecuteOptions {
    pub use_secondary_endpoint: bool,
}

#[derive(Debug, Default)]
pub struct ExecutorStats {
    pub attempts: AtomicU64,
    pub retries: AtomicU64,
    pub forced_refreshes: AtomicU64,
    pub ambiguous_failures: AtomicU64,
}

// What one attempt means for the call
enum Verdict<T = Value> {
    Success(T),
    Retry { cause: String, rate_limited: bool },
    // Supplier said the token is no good
    Reauthenticate { cause: String },
    // A non-idempotent request may have been applied
    Ambiguous { cause: String },
    Fatal(GatewayError),
}

impl Verdict {
    // A body the normalizer rejects is fatal for this attempt
    fn normalize_with<T>(self, f: impl FnOnce(Value) -> Result<T, GatewayError>) -> Verdict<T> {
        match self {
            Verdict::Success(doc) => match f(doc) {
                Ok(value) => Verdict::Success(value),
                Err(err) => Verdict::Fatal(err),
            },
            Verdict::Retry {
                cause,
                rate_limited,
            } => Verdict::Retry {
                cause,
                rate_limited,
            },
            Verdict::Reauthenticate { cause } => Verdict::Reauthenticate { cause },
            Verdict::Ambiguous { cause } => Verdict::Ambiguous { cause },
            Verdict::Fatal(err) => Verdict::Fatal(err),
        }
    }
}

pub struct ResilientExecutor {
    config: Arc<GatewayConfig>,
    transport: Arc<dyn Transport>,
    credentials: Arc<CredentialStore>,
    audit: Arc<AuditLogger>,
    stats: ExecutorStats,
}

impl ResilientExecutor {
    pub fn new(
        config: Arc<GatewayConfig>,
        transport: Arc<dyn Transport>,
        credentials: Arc<CredentialStore>,
        audit: Arc<AuditLogger>,
    ) -> Self {
        Self {
            config,
            transport,
            credentials,
            audit,
            stats: ExecutorStats::default(),
        }
    }

    pub fn stats(&self) -> &ExecutorStats {
        &self.stats
    }

    // Exponential backoff with jitter. `retry` starts at 1 for the first retry.
    pub fn calculate_backoff(retry: u32, config: &RetryConfig) -> Duration {
        let base_backoff_ms = (config.initial_backoff_ms as f64
            * config.backoff_multiplier.powi(retry.saturating_sub(1) as i32))
        .min(config.max_backoff_ms as f64);

        // Spread retries from concurrent callers
        let jitter = rand::random::<f64>() * config.jitter_factor * base_backoff_ms;
        let backoff_ms = base_backoff_ms * (1.0 - config.jitter_factor / 2.0) + jitter;

        Duration::from_millis(backoff_ms as u64)
    }

    pub fn attempt_timeout(&self, operation: Operation) -> Duration {
        let ms = if operation.is_idempotent() {
            self.config.timeouts.search_ms
        } else {
            self.config.timeouts.booking_ms
        };
        Duration::from_millis(ms)
    }

    /// Runs `payload` against the supplier and returns the decoded response body.
    ///
    /// Leaves `ctx` in `NormalizingResponse` on success and `Failed` otherwise.
    pub async fn execute(
        &self,
        ctx: &mut CallContext,
        payload: UpstreamPayload,
        options: ExecuteOptions,
    ) -> Result<Value, GatewayError> {
        self.execute_with(ctx, payload, options, |body| Ok(body.clone()))
            .await
    }

    /// Like [`execute`](Self::execute), but runs `normalize` on the successful body
    /// before the attempt is audited, so a rejected body is recorded as a fatal error.
    pub async fn execute_with<T>(
        &self,
        ctx: &mut CallContext,
        payload: UpstreamPayload,
        options: ExecuteOptions,
        normalize: impl Fn(&Value) -> Result<T, GatewayError>,
    ) -> Result<T, GatewayError> {
        let result = self.run(ctx, payload, options, &normalize).await;
        if result.is_err() {
            ctx.fail();
        }
        result
    }

    async fn run<T>(
        &self,
        ctx: &mut CallContext,
        payload: UpstreamPayload,
        options: ExecuteOptions,
        normalize: &impl Fn(&Value) -> Result<T, GatewayError>,
    ) -> Result<T, GatewayError> {
        let retry = &self.config.retry;
        let idempotent = ctx.operation.is_idempotent();
        let endpoint = payload.endpoint();
        let url = format!(
            "{}/{}",
            self.config
                .base_url(options.use_secondary_endpoint)
                .trim_end_matches('/'),
            endpoint
        );
        let per_attempt = self.attempt_timeout(ctx.operation);
        let mut retries = 0u32;
        let mut reauthenticated = false;

        loop {
            if ctx.state() != OperationState::Authenticating {
                ctx.transition(OperationState::Authenticating);
            }
            let credential =
                before_deadline(ctx, false, self.credentials.get_valid_credential()).await??;

            let mut body = payload.body.clone();
            request::inject_credential(&mut body, &credential.token);
            let bytes = serde_json::to_vec(&body)
                .map_err(|e| GatewayError::validation(format!("unserializable payload: {e}")))?;

            ctx.attempts += 1;
            let attempt = ctx.attempts;
            self.stats.attempts.fetch_add(1, Ordering::Relaxed);
            ctx.transition(OperationState::Executing);

            let started = Instant::now();
            let send = tokio::time::timeout(
                per_attempt,
                self.transport.send(UpstreamRequest {
                    operation: ctx.operation,
                    url: url.clone(),
                    body: Bytes::from(bytes),
                    timeout: per_attempt,
                    correlation_id: ctx.correlation_id,
                    attempt,
                }),
            );

            let outcome = match before_deadline(ctx, !idempotent, send).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(_elapsed)) => Err(TransportError::Timeout(per_attempt.as_millis() as u64)),
                Err(err) => {
                    ctx.request_sent = true;
                    self.audit
                        .record(AuditEntry {
                            correlation_id: ctx.correlation_id,
                            operation: ctx.operation,
                            endpoint,
                            attempt,
                            duration: started.elapsed(),
                            outcome: AuditOutcome::FatalError,
                            status: None,
                            request: &body,
                            response: None,
                            error: Some(err.to_string()),
                        })
                        .await;
                    return Err(err);
                }
            };

            let (verdict, status, response_doc) = match outcome {
                Ok(raw) => {
                    ctx.request_sent = true;
                    let doc = response_document(&raw);
                    (classify_response(ctx.operation, &raw), Some(raw.status), Some(doc))
                }
                Err(err) => {
                    ctx.request_sent |= err.request_sent();
                    (classify_transport(ctx.operation, &err), None, None)
                }
            };
            let verdict = verdict.normalize_with(|doc| {
                ctx.transition(OperationState::NormalizingResponse);
                normalize(&doc)
            });

            let retries_left = retries < retry.max_retries;
            let (audit_outcome, audit_error) = match &verdict {
                Verdict::Success(_) => (AuditOutcome::Success, None),
                Verdict::Fatal(err) => (AuditOutcome::FatalError, Some(err.to_string())),
                Verdict::Ambiguous { cause } => (AuditOutcome::FatalError, Some(cause.clone())),
                Verdict::Reauthenticate { cause } if reauthenticated => {
                    (AuditOutcome::FatalError, Some(cause.clone()))
                }
                Verdict::Retry { cause, .. } if !retries_left => {
                    (AuditOutcome::FatalError, Some(cause.clone()))
                }
                Verdict::Reauthenticate { cause } | Verdict::Retry { cause, .. } => {
                    (AuditOutcome::RetryableError, Some(cause.clone()))
                }
            };
            self.audit
                .record(AuditEntry {
                    correlation_id: ctx.correlation_id,
                    operation: ctx.operation,
                    endpoint,
                    attempt,
                    duration: started.elapsed(),
                    outcome: audit_outcome,
                    status,
                    request: &body,
                    response: response_doc.as_ref(),
                    error: audit_error,
                })
                .await;

            match verdict {
                Verdict::Success(value) => return Ok(value),
                Verdict::Fatal(err) => return Err(err),
                Verdict::Ambiguous { cause } => {
                    self.stats.ambiguous_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        correlation_id = %ctx.correlation_id,
                        operation = %ctx.operation,
                        %cause,
                        "outcome unknown, not retrying; reconcile through booking details"
                    );
                    return Err(GatewayError::UpstreamUnavailable {
                        cause,
                        status,
                        attempts: attempt,
                        is_retryable: false,
                        ambiguous: true,
                    });
                }
                Verdict::Reauthenticate { cause } if reauthenticated => {
                    return Err(GatewayError::authentication(
                        format!("supplier rejected a freshly issued credential: {cause}"),
                        status,
                    ));
                }
                Verdict::Reauthenticate { .. } => {
                    reauthenticated = true;
                    self.stats.forced_refreshes.fetch_add(1, Ordering::Relaxed);
                    ctx.transition(OperationState::Authenticating);
                    before_deadline(ctx, false, self.credentials.force_refresh(&credential.token))
                        .await??;
                }
                Verdict::Retry { cause, .. } if !retries_left => {
                    error!(
                        correlation_id = %ctx.correlation_id,
                        operation = %ctx.operation,
                        attempts = attempt,
                        %cause,
                        "retries exhausted"
                    );
                    return Err(GatewayError::UpstreamUnavailable {
                        cause,
                        status,
                        attempts: attempt,
                        is_retryable: true,
                        ambiguous: false,
                    });
                }
                Verdict::Retry {
                    cause,
                    rate_limited,
                } => {
                    retries += 1;
                    self.stats.retries.fetch_add(1, Ordering::Relaxed);
                    let delay = if rate_limited {
                        Duration::from_millis(retry.rate_limit_delay_ms)
                    } else {
                        Self::calculate_backoff(retries, retry)
                    };
                    warn!(
                        correlation_id = %ctx.correlation_id,
                        operation = %ctx.operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        %cause,
                        "retrying upstream call"
                    );
                    before_deadline(ctx, false, tokio::time::sleep(delay)).await?;
                }
            }
        }
    }
}

// Races `fut` against the caller's deadline, if there is one
async fn before_deadline<F: Future>(
    ctx: &CallContext,
    ambiguous: bool,
    fut: F,
) -> Result<F::Output, GatewayError> {
    match ctx.deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, fut)
            .await
            .map_err(|_| ctx.deadline_exceeded(ambiguous)),
        None => Ok(fut.await),
    }
}

fn classify_transport(operation: Operation, err: &TransportError) -> Verdict {
    let cause = err.to_string();
    if err.request_sent() && !operation.is_idempotent() {
        Verdict::Ambiguous { cause }
    } else {
        Verdict::Retry {
            cause,
            rate_limited: false,
        }
    }
}

fn classify_response(operation: Operation, raw: &UpstreamRawResponse) -> Verdict {
    match raw.status {
        401 => Verdict::Reauthenticate {
            cause: "HTTP 401".to_string(),
        },
        // Rejected before processing, so safe to resend even for bookings
        429 => Verdict::Retry {
            cause: "HTTP 429".to_string(),
            rate_limited: true,
        },
        500..=599 if operation.is_idempotent() => Verdict::Retry {
            cause: format!("HTTP {}", raw.status),
            rate_limited: false,
        },
        500..=599 => Verdict::Ambiguous {
            cause: format!("HTTP {}", raw.status),
        },
        200..=299 => match raw.json() {
            Ok(doc) => match response::embedded_error(&doc) {
                Some(fault) if fault.is_session_expired() => Verdict::Reauthenticate {
                    cause: format!("session fault {}: {}", fault.code, fault.message),
                },
                Some(fault) => Verdict::Fatal(GatewayError::Upstream {
                    code: fault.code,
                    message: fault.message,
                    status: raw.status,
                }),
                None => Verdict::Success(doc),
            },
            Err(e) => Verdict::Fatal(GatewayError::malformed(format!(
                "{operation} response is not JSON: {e}"
            ))),
        },
        status => {
            let (code, message) = match raw.json().ok().as_ref().and_then(response::embedded_error) {
                Some(fault) => (fault.code, fault.message),
                None => (status.to_string(), body_snippet(&raw.body)),
            };
            Verdict::Fatal(GatewayError::Upstream {
                code,
                message,
                status,
            })
        }
    }
}

fn response_document(raw: &UpstreamRawResponse) -> Value {
    raw.json()
        .unwrap_or_else(|_| Value::String(body_snippet(&raw.body)))
}

fn body_snippet(body: &Bytes) -> String {
    let text = String::from_utf8_lossy(body);
    text.chars().take(BODY_SNIPPET_LEN).collect()
}
