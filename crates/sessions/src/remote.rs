//! Client-side sessions with remote services.
//!
//! Holds at most one outbound session token per service and renegotiates
//! it before it gets close to expiry.  Two callers racing past a stale
//! entry will both negotiate; the last one to finish is what stays cached.

use std::sync::Arc;

use async_trait::async_trait;

use ks_domain::error::{Error, Result};
use ks_domain::rows::{retain_live, RemoteSessionRow};
use ks_domain::trace::{SessionKind, TraceEvent};
use ks_domain::{Clock, ServiceKey, SessionToken, Timestamp};

use crate::lifecycle::SessionLifetime;
use crate::persist::SessionPersistence;
use crate::record::SessionRecord;
use crate::store::ExpiringSessionStore;
use crate::sweep::Sweep;

/// What a remote service handed back for a session request.
#[derive(Debug, Clone, Default)]
pub struct RemoteLoginResponse {
    /// Raw `session_key` cookie value, hex-encoded.  `None` if the service
    /// did not set one.
    pub session_key: Option<String>,
    /// Expiry the server says it applied, if it said.
    pub expires_hint: Option<Timestamp>,
}

/// Performs the login round trip against a remote service.
#[async_trait]
pub trait RemoteLogin: Send + Sync {
    async fn request_session(&self, service_key: &ServiceKey) -> Result<RemoteLoginResponse>;
}

pub struct ClientRemoteSessionManager {
    store: ExpiringSessionStore<(), ServiceKey, SessionToken>,
    persistence: Arc<dyn SessionPersistence>,
    login: Arc<dyn RemoteLogin>,
    clock: Arc<dyn Clock>,
    lifetime: SessionLifetime,
}

impl ClientRemoteSessionManager {
    pub async fn load(
        persistence: Arc<dyn SessionPersistence>,
        login: Arc<dyn RemoteLogin>,
        clock: Arc<dyn Clock>,
        lifetime: SessionLifetime,
    ) -> Result<Self> {
        let now = clock.now();
        persistence.prune_expired(now).await?;
        let rows = persistence.load_remote_sessions().await?;
        let (rows, skipped_expired) = retain_live(rows, now);

        let store = ExpiringSessionStore::new();
        let loaded = rows.len();
        store.replace_all(rows.into_iter().map(|row| {
            (
                (),
                row.service_key,
                SessionRecord::new(row.token, now, row.expires_at),
            )
        }));

        TraceEvent::SessionsLoaded {
            kind: SessionKind::Remote,
            loaded,
            skipped_expired,
        }
        .emit();

        Ok(Self {
            store,
            persistence,
            login,
            clock,
            lifetime,
        })
    }

    /// The current session token for `service_key`, negotiating a new one
    /// when none is cached or the cached one is within the renewal margin.
    pub async fn get_session_token(&self, service_key: &ServiceKey) -> Result<SessionToken> {
        let now = self.clock.now();
        if let Some(record) =
            self.store
                .get_fresh(&(), service_key, now, self.lifetime.renewal_margin_secs)
        {
            return Ok(record.subject);
        }

        tracing::debug!(service = %service_key, "negotiating remote session");

        let response = self
            .login
            .request_session(service_key)
            .await
            .map_err(|e| match e {
                Error::SessionNegotiationFailed(msg) => Error::SessionNegotiationFailed(msg),
                other => Error::SessionNegotiationFailed(format!("{service_key}: {other}")),
            })?;

        let raw = response.session_key.ok_or_else(|| {
            Error::SessionNegotiationFailed(format!("{service_key} did not return a session key"))
        })?;
        let token = SessionToken::from_hex(&raw).ok_or_else(|| {
            Error::SessionNegotiationFailed(format!(
                "{service_key} returned a malformed session key"
            ))
        })?;

        let now = self.clock.now();
        let (expires_at, used_server_hint) =
            self.lifetime.negotiated_expiry(now, response.expires_hint);

        self.persistence
            .save_remote_session(&RemoteSessionRow {
                service_key: service_key.clone(),
                token,
                expires_at,
            })
            .await?;

        self.store.put(
            (),
            service_key.clone(),
            SessionRecord::new(token, now, expires_at),
        );

        TraceEvent::RemoteSessionNegotiated {
            service_key: service_key.to_string(),
            expires_at,
            used_server_hint,
        }
        .emit();

        Ok(token)
    }

    /// Explicit logout: forget the cached token.
    pub async fn delete_session(&self, service_key: &ServiceKey) -> Result<()> {
        self.persistence.delete_remote_session(service_key).await?;
        if self.store.delete(&(), service_key) {
            TraceEvent::SessionDeleted {
                kind: SessionKind::Remote,
                partition: service_key.to_string(),
            }
            .emit();
        }
        Ok(())
    }
}

impl Sweep for ClientRemoteSessionManager {
    fn name(&self) -> &'static str {
        "remote"
    }

    fn sweep_expired(&self) -> usize {
        self.store.sweep_expired(self.clock.now())
    }
}
