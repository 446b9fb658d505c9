// Transport seam
// The executor only ever talks to a Transport. Production uses HttpTransport; tests and
// local development plug in MockTransport instead of flipping an environment flag.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use uuid::Uuid;

use crate::{error::TransportError, model::Operation};

#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub operation: Operation,
    pub url: String,
    pub body: Bytes,
    pub timeout: Duration,
    pub correlation_id: Uuid,
    pub attempt: u32,
}

#[derive(Debug, Clone)]
pub struct UpstreamRawResponse {
    pub status: u16,
    pub body: Bytes,
}

impl UpstreamRawResponse {
    pub fn json(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamRawResponse, TransportError>;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(connect_timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        Ok(Self { client })
    }

    fn classify(err: reqwest::Error, timeout: Duration) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout(timeout.as_millis() as u64)
        } else if err.is_connect() || err.is_builder() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Io(err.to_string())
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamRawResponse, TransportError> {
        let response = self
            .client
            .post(&request.url)
            .header(CONTENT_TYPE, "application/json")
            .header("X-Correlation-Id", request.correlation_id.to_string())
            .timeout(request.timeout)
            .body(request.body)
            .send()
            .await
            .map_err(|e| Self::classify(e, request.timeout))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| Self::classify(e, request.timeout))?;

        Ok(UpstreamRawResponse { status, body })
    }
}

// Scriptable in-process supplier for tests and local runs
pub mod mock_transport {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    use dashmap::DashMap;
    use parking_lot::Mutex;

    #[derive(Debug, Clone)]
    pub enum MockReply {
        Json(u16, Value),
        // Raw body, for replies that are not JSON at all
        Text(u16, String),
        Fail(TransportError),
        // Never answers; the caller's timeout decides what happens
        Hang,
    }

    impl MockReply {
        pub fn ok(body: Value) -> Self {
            MockReply::Json(200, body)
        }

        pub fn status(status: u16) -> Self {
            MockReply::Json(
                status,
                serde_json::json!({ "Error": { "ErrorCode": status, "ErrorMessage": "mock" } }),
            )
        }
    }

    #[derive(Default)]
    pub struct MockTransport {
        scripts: DashMap<Operation, VecDeque<MockReply>>,
        defaults: DashMap<Operation, MockReply>,
        calls: DashMap<Operation, usize>,
        request_count: AtomicUsize,
        fail_next_requests: AtomicUsize,
        delay_ms: AtomicU64,
        requests: Mutex<Vec<UpstreamRequest>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        // Queued replies are used once each, in order
        pub fn push(&self, operation: Operation, reply: MockReply) {
            self.scripts.entry(operation).or_default().push_back(reply);
        }

        // Used when nothing is queued
        pub fn set_default(&self, operation: Operation, reply: MockReply) {
            self.defaults.insert(operation, reply);
        }

        // The next `count` requests of any kind get an HTTP 500
        pub fn fail_next_requests(&self, count: usize) {
            self.fail_next_requests.store(count, Ordering::SeqCst);
        }

        pub fn set_delay(&self, delay_ms: u64) {
            self.delay_ms.store(delay_ms, Ordering::SeqCst);
        }

        pub fn calls(&self, operation: Operation) -> usize {
            self.calls.get(&operation).map(|c| *c).unwrap_or(0)
        }

        pub fn request_count(&self) -> usize {
            self.request_count.load(Ordering::SeqCst)
        }

        pub fn requests(&self) -> Vec<UpstreamRequest> {
            self.requests.lock().clone()
        }

        fn next_reply(&self, operation: Operation) -> Option<MockReply> {
            if let Some(mut queue) = self.scripts.get_mut(&operation) {
                if let Some(reply) = queue.pop_front() {
                    return Some(reply);
                }
            }
            self.defaults.get(&operation).map(|r| r.clone())
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(
            &self,
            request: UpstreamRequest,
        ) -> Result<UpstreamRawResponse, TransportError> {
            let operation = request.operation;
            self.request_count.fetch_add(1, Ordering::SeqCst);
            *self.calls.entry(operation).or_insert(0) += 1;
            self.requests.lock().push(request);

            let delay = self.delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            let failing = self
                .fail_next_requests
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Ok(UpstreamRawResponse {
                    status: 500,
                    body: Bytes::from_static(b"Internal Server Error"),
                });
            }

            match self.next_reply(operation) {
                Some(MockReply::Json(status, body)) => Ok(UpstreamRawResponse {
                    status,
                    body: Bytes::from(body.to_string()),
                }),
                Some(MockReply::Text(status, body)) => Ok(UpstreamRawResponse {
                    status,
                    body: Bytes::from(body),
                }),
                Some(MockReply::Fail(err)) => Err(err),
                Some(MockReply::Hang) => std::future::pending().await,
                None => Ok(UpstreamRawResponse {
                    status: 404,
                    body: Bytes::from(format!("no mock reply for {operation}")),
                }),
            }
        }
    }
}
