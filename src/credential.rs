// Credential store
// Holds the supplier token for the whole process. Reads of a valid token only take a
// read lock; an expired or missing token is refreshed by exactly one caller while the
// rest wait on the refresh lock and pick up its result.

use std::{
    fmt,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    audit::{AuditEntry, AuditLogger, AuditOutcome},
    clock::Clock,
    config::{GatewayConfig, Masked},
    error::GatewayError,
    model::Operation,
    request, response,
    transport::{Transport, UpstreamRequest},
};

// Upper bound on a token lifetime, whatever the supplier claims
pub const MAX_TTL_SECONDS: i64 = 86_400;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub ttl_seconds: i64,
}

impl Credential {
    // Valid while less than (ttl - margin) has elapsed since issue. A lifetime chrono
    // cannot represent counts as expired.
    pub fn is_valid_at(&self, now: DateTime<Utc>, safety_margin_seconds: i64) -> bool {
        match chrono::Duration::try_seconds(self.ttl_seconds.saturating_sub(safety_margin_seconds)) {
            Some(window) => now.signed_duration_since(self.issued_at) < window,
            None => false,
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        chrono::Duration::try_seconds(self.ttl_seconds)
            .and_then(|ttl| self.issued_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"********")
            .field("issued_at", &self.issued_at)
            .field("ttl_seconds", &self.ttl_seconds)
            .finish()
    }
}

// Performs the authenticate exchange. Every failure is an Authentication error.
#[async_trait]
pub trait Authenticator: Send + Sync + 'static {
    async fn authenticate(&self) -> Result<Credential, GatewayError>;
}

pub struct UpstreamAuthenticator {
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    audit: Option<Arc<AuditLogger>>,
    auth_url: String,
    client_id: String,
    username: String,
    password: Masked<String>,
    end_user_ip: String,
    default_ttl_seconds: i64,
    timeout: Duration,
}

impl UpstreamAuthenticator {
    pub fn new(config: &GatewayConfig, transport: Arc<dyn Transport>, clock: Arc<dyn Clock>) -> Self {
        Self {
            transport,
            clock,
            audit: None,
            auth_url: config.auth_url.clone(),
            client_id: config.client_id.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            end_user_ip: config.end_user_ip.clone(),
            default_ttl_seconds: config.credential_ttl_seconds,
            timeout: config.auth_timeout(),
        }
    }

    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    // Returns the outcome plus the HTTP status and decoded body for the audit trail
    async fn exchange(
        &self,
        payload: &serde_json::Value,
        correlation_id: Uuid,
    ) -> (Result<Credential, GatewayError>, Option<u16>, Option<serde_json::Value>) {
        let body = match serde_json::to_vec(payload) {
            Ok(body) => body,
            Err(e) => {
                let err = GatewayError::authentication(format!("unserializable request: {e}"), None);
                return (Err(err), None, None);
            }
        };

        let sent = self
            .transport
            .send(UpstreamRequest {
                operation: Operation::Authenticate,
                url: self.auth_url.clone(),
                body: Bytes::from(body),
                timeout: self.timeout,
                correlation_id,
                attempt: 1,
            })
            .await;

        let raw = match sent {
            Ok(raw) => raw,
            Err(e) => {
                let err = GatewayError::authentication(format!("authenticate call failed: {e}"), None);
                return (Err(err), None, None);
            }
        };

        let status = Some(raw.status);
        if !raw.is_success() {
            let err = GatewayError::authentication(
                format!("supplier rejected credentials with HTTP {}", raw.status),
                status,
            );
            return (Err(err), status, raw.json().ok());
        }

        let doc = match raw.json() {
            Ok(doc) => doc,
            Err(e) => {
                let err = GatewayError::authentication(
                    format!("unreadable authenticate response: {e}"),
                    status,
                );
                return (Err(err), status, None);
            }
        };

        if let Some(fault) = response::embedded_error(&doc) {
            let err = GatewayError::authentication(
                format!("supplier rejected credentials: {} {}", fault.code, fault.message),
                status,
            );
            return (Err(err), status, Some(doc));
        }

        let credential =
            response::normalize_authenticate_response(&doc, self.clock.now(), self.default_ttl_seconds)
                .map_err(|e| GatewayError::authentication(e.to_string(), status));
        (credential, status, Some(doc))
    }
}

#[async_trait]
impl Authenticator for UpstreamAuthenticator {
    async fn authenticate(&self) -> Result<Credential, GatewayError> {
        let payload = request::normalize_authenticate(
            &self.client_id,
            &self.username,
            self.password.expose(),
            &self.end_user_ip,
        )
        .map_err(|e| GatewayError::authentication(e.to_string(), None))?;

        let correlation_id = Uuid::new_v4();
        let started = tokio::time::Instant::now();
        let (result, status, doc) = self.exchange(&payload.body, correlation_id).await;

        if let Some(audit) = &self.audit {
            let error = result.as_ref().err().map(ToString::to_string);
            audit
                .record(AuditEntry {
                    correlation_id,
                    operation: Operation::Authenticate,
                    endpoint: payload.endpoint(),
                    attempt: 1,
                    duration: started.elapsed(),
                    outcome: if result.is_ok() {
                        AuditOutcome::Success
                    } else {
                        AuditOutcome::FatalError
                    },
                    status,
                    request: &payload.body,
                    response: doc.as_ref(),
                    error,
                })
                .await;
        }

        result
    }
}

// Somewhere the credential can outlive the process. Losing it only costs a re-authenticate.
#[async_trait]
pub trait CredentialCache: Send + Sync + 'static {
    async fn load(&self) -> anyhow::Result<Option<Credential>>;
    async fn store(&self, credential: &Credential) -> anyhow::Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCredentialCache;

#[async_trait]
impl CredentialCache for NoopCredentialCache {
    async fn load(&self) -> anyhow::Result<Option<Credential>> {
        Ok(None)
    }

    async fn store(&self, _credential: &Credential) -> anyhow::Result<()> {
        Ok(())
    }
}

// Single JSON document on disk, replaced atomically on every store
#[derive(Debug, Clone)]
pub struct FileCredentialCache {
    path: PathBuf,
}

impl FileCredentialCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CredentialCache for FileCredentialCache {
    async fn load(&self) -> anyhow::Result<Option<Credential>> {
        let contents = match tokio::fs::read(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("reading credential cache {}", self.path.display()))
            }
        };
        let credential = serde_json::from_slice(&contents)
            .with_context(|| format!("parsing credential cache {}", self.path.display()))?;
        Ok(Some(credential))
    }

    async fn store(&self, credential: &Credential) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(credential)?)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}

pub struct CredentialStore {
    current: RwLock<Option<Credential>>,
    // Serializes the refresh path only
    refresh_lock: tokio::sync::Mutex<()>,
    // Bumped by every completed authenticate attempt
    refresh_epoch: AtomicU64,
    last_failure: Mutex<Option<(u64, GatewayError)>>,
    persisted_checked: AtomicBool,
    authenticator: Arc<dyn Authenticator>,
    cache: Arc<dyn CredentialCache>,
    clock: Arc<dyn Clock>,
    safety_margin_seconds: i64,
    auth_calls: AtomicUsize,
}

impl CredentialStore {
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        cache: Arc<dyn CredentialCache>,
        clock: Arc<dyn Clock>,
        safety_margin_seconds: i64,
    ) -> Self {
        Self {
            current: RwLock::new(None),
            refresh_lock: tokio::sync::Mutex::new(()),
            refresh_epoch: AtomicU64::new(0),
            last_failure: Mutex::new(None),
            persisted_checked: AtomicBool::new(false),
            authenticator,
            cache,
            clock,
            safety_margin_seconds,
            auth_calls: AtomicUsize::new(0),
        }
    }

    pub async fn get_valid_credential(&self) -> Result<Credential, GatewayError> {
        if let Some(credential) = self.valid_cached() {
            return Ok(credential);
        }

        let observed = self.refresh_epoch.load(Ordering::SeqCst);
        let _guard = self.refresh_lock.lock().await;

        // Someone else may have refreshed while we waited
        if let Some(credential) = self.valid_cached() {
            return Ok(credential);
        }
        if let Some(err) = self.failure_since(observed) {
            return Err(err);
        }

        if let Some(credential) = self.load_persisted().await {
            return Ok(credential);
        }
        self.authenticate_locked().await
    }

    // Used after the supplier rejected `stale_token`. Only refreshes if that token is
    // still the current one; a caller that lost the race gets the newer credential.
    pub async fn force_refresh(&self, stale_token: &str) -> Result<Credential, GatewayError> {
        let observed = self.refresh_epoch.load(Ordering::SeqCst);
        let _guard = self.refresh_lock.lock().await;

        if let Some(current) = self.valid_cached() {
            if current.token != stale_token {
                return Ok(current);
            }
        }
        if let Some(err) = self.failure_since(observed) {
            return Err(err);
        }

        debug!("forcing credential refresh");
        *self.current.write() = None;
        // The persisted copy is at best the token that was just rejected
        self.persisted_checked.store(true, Ordering::SeqCst);
        self.authenticate_locked().await
    }

    pub fn invalidate(&self) {
        self.persisted_checked.store(true, Ordering::SeqCst);
        *self.current.write() = None;
    }

    pub fn current(&self) -> Option<Credential> {
        self.current.read().clone()
    }

    pub fn auth_calls(&self) -> usize {
        self.auth_calls.load(Ordering::SeqCst)
    }

    fn valid_cached(&self) -> Option<Credential> {
        let now = self.clock.now();
        self.current
            .read()
            .as_ref()
            .filter(|c| c.is_valid_at(now, self.safety_margin_seconds))
            .cloned()
    }

    fn failure_since(&self, observed: u64) -> Option<GatewayError> {
        match &*self.last_failure.lock() {
            Some((epoch, err)) if *epoch > observed => Some(err.clone()),
            _ => None,
        }
    }

    // Consulted once per process, on the first refresh
    async fn load_persisted(&self) -> Option<Credential> {
        if self.persisted_checked.swap(true, Ordering::SeqCst) {
            return None;
        }

        match self.cache.load().await {
            Ok(Some(credential)) if credential.is_valid_at(self.clock.now(), self.safety_margin_seconds) => {
                debug!(expires_at = %credential.expires_at(), "using persisted credential");
                *self.current.write() = Some(credential.clone());
                Some(credential)
            }
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "credential cache unreadable, re-authenticating");
                None
            }
        }
    }

    async fn authenticate_locked(&self) -> Result<Credential, GatewayError> {
        self.auth_calls.fetch_add(1, Ordering::SeqCst);
        let result = self.authenticator.authenticate().await;
        let epoch = self.refresh_epoch.fetch_add(1, Ordering::SeqCst) + 1;

        match result {
            Ok(credential) => {
                info!(expires_at = %credential.expires_at(), "supplier credential refreshed");
                *self.current.write() = Some(credential.clone());
                *self.last_failure.lock() = None;
                if let Err(e) = self.cache.store(&credential).await {
                    warn!(error = %e, "failed to persist credential");
                }
                Ok(credential)
            }
            Err(err) => {
                warn!(error = %err, "supplier authentication failed");
                *self.last_failure.lock() = Some((epoch, err.clone()));
                Err(err)
            }
        }
    }
}
