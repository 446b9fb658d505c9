// Audit trail
// One record per upstream attempt, retries included. Secrets and document numbers are
// masked before a record leaves this module, and a broken sink never fails the call
// that produced the record.

use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{clock::Clock, model::Operation, request::SENSITIVE_FIELDS};

pub const REDACTED: &str = "********";

// Generic secret and identity-document keys, compared case-insensitively without separators
const SENSITIVE_KEYS: &[&str] = &[
    "token",
    "accesstoken",
    "password",
    "secret",
    "cardnumber",
    "cvv",
    "cvc",
    "passport",
    "passportno",
    "passportnumber",
    "documentnumber",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuditOutcome {
    Success,
    RetryableError,
    FatalError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Uuid,
    pub operation: Operation,
    pub endpoint: String,
    pub attempt: u32,
    pub duration_ms: u64,
    pub outcome: AuditOutcome,
    pub status: Option<u16>,
    pub request: Value,
    pub response: Option<Value>,
    pub error: Option<String>,
}

// What a caller hands to AuditLogger::record; borrowed so nothing is cloned before redaction
#[derive(Debug)]
pub struct AuditEntry<'a> {
    pub correlation_id: Uuid,
    pub operation: Operation,
    pub endpoint: &'a str,
    pub attempt: u32,
    pub duration: Duration,
    pub outcome: AuditOutcome,
    pub status: Option<u16>,
    pub request: &'a Value,
    pub response: Option<&'a Value>,
    pub error: Option<String>,
}

#[async_trait]
pub trait AuditSink: Send + Sync + 'static {
    async fn write(&self, record: &AuditRecord) -> anyhow::Result<()>;
}

fn is_sensitive(key: &str) -> bool {
    if SENSITIVE_FIELDS.contains(&key) {
        return true;
    }
    let folded: String = key
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    SENSITIVE_KEYS.contains(&folded.as_str())
        || folded.ends_with("token")
        || folded.ends_with("tokenid")
}

/// Deep copy of `value` with every sensitive field replaced by [`REDACTED`].
///
/// Nulls stay null so a reader can still tell "absent" from "masked".
pub fn redact(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let masked: Map<String, Value> = map
                .iter()
                .map(|(key, inner)| {
                    let inner = if is_sensitive(key) && !inner.is_null() {
                        Value::String(REDACTED.to_string())
                    } else {
                        redact(inner)
                    };
                    (key.clone(), inner)
                })
                .collect();
            Value::Object(masked)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        other => other.clone(),
    }
}

pub struct AuditLogger {
    sink: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    write_failures: AtomicU64,
}

impl AuditLogger {
    pub fn new(sink: Arc<dyn AuditSink>, clock: Arc<dyn Clock>) -> Self {
        Self {
            sink,
            clock,
            write_failures: AtomicU64::new(0),
        }
    }

    pub async fn record(&self, entry: AuditEntry<'_>) {
        let record = AuditRecord {
            timestamp: self.clock.now(),
            correlation_id: entry.correlation_id,
            operation: entry.operation,
            endpoint: entry.endpoint.to_string(),
            attempt: entry.attempt,
            duration_ms: entry.duration.as_millis() as u64,
            outcome: entry.outcome,
            status: entry.status,
            request: redact(entry.request),
            response: entry.response.map(redact),
            error: entry.error,
        };

        if let Err(e) = self.sink.write(&record).await {
            self.write_failures.fetch_add(1, Ordering::Relaxed);
            warn!(
                correlation_id = %record.correlation_id,
                attempt = record.attempt,
                error = %e,
                "audit sink write failed"
            );
        }
    }

    pub fn write_failures(&self) -> u64 {
        self.write_failures.load(Ordering::Relaxed)
    }
}

// Keeps everything in memory. Used by tests and for local debugging.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }

    pub fn for_correlation(&self, correlation_id: Uuid) -> Vec<AuditRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.correlation_id == correlation_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn write(&self, record: &AuditRecord) -> anyhow::Result<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

// Append-only file, one JSON object per line
pub struct JsonLinesAuditSink {
    path: PathBuf,
    // Keeps concurrent lines from interleaving
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonLinesAuditSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }
}

#[async_trait]
impl AuditSink for JsonLinesAuditSink {
    async fn write(&self, record: &AuditRecord) -> anyhow::Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("opening audit log {}", self.path.display()))?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

// Emits each record as a structured event on the `audit` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn write(&self, record: &AuditRecord) -> anyhow::Result<()> {
        let payload = serde_json::to_string(record)?;
        info!(
            target: "audit",
            correlation_id = %record.correlation_id,
            operation = %record.operation,
            attempt = record.attempt,
            outcome = ?record.outcome,
            duration_ms = record.duration_ms,
            "{payload}"
        );
        Ok(())
    }
}
