//! Server-side messaging sessions.
//!
//! A messaging session resolves to who is speaking: the account, a stable
//! identity derived from the account's access key, and the display name
//! chosen when the session was opened.

use std::sync::Arc;

use ks_domain::error::{Error, Result};
use ks_domain::rows::{retain_live, MessagingSessionRow};
use ks_domain::trace::{SessionKind, TraceEvent};
use ks_domain::{Account, AccountIdentifier, Clock, Identity, ServiceKey, SessionToken};

use crate::lifecycle::SessionLifetime;
use crate::persist::SessionPersistence;
use crate::record::SessionRecord;
use crate::resolver::AccountResolver;
use crate::store::ExpiringSessionStore;
use crate::sweep::Sweep;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagingSubject {
    pub account: Account,
    pub identity: Identity,
    pub name: String,
}

pub struct MessagingSessionManager {
    store: ExpiringSessionStore<ServiceKey, SessionToken, MessagingSubject>,
    persistence: Arc<dyn SessionPersistence>,
    resolver: Arc<dyn AccountResolver>,
    clock: Arc<dyn Clock>,
    lifetime: SessionLifetime,
}

impl MessagingSessionManager {
    /// Build the manager and bulk-load persisted sessions, grouped by
    /// service.
    pub async fn load(
        persistence: Arc<dyn SessionPersistence>,
        resolver: Arc<dyn AccountResolver>,
        clock: Arc<dyn Clock>,
        lifetime: SessionLifetime,
    ) -> Result<Self> {
        let now = clock.now();
        persistence.prune_expired(now).await?;
        let rows = persistence.load_messaging_sessions().await?;
        let (rows, skipped_expired) = retain_live(rows, now);
        let loaded = rows.len();

        let store = ExpiringSessionStore::new();
        store.replace_all(rows.into_iter().map(|row| {
            let subject = MessagingSubject {
                account: row.account,
                identity: row.identity,
                name: row.name,
            };
            (
                row.service_key,
                row.token,
                SessionRecord::new(subject, now, row.expires_at),
            )
        }));

        TraceEvent::SessionsLoaded {
            kind: SessionKind::Messaging,
            loaded,
            skipped_expired,
        }
        .emit();

        Ok(Self {
            store,
            persistence,
            resolver,
            clock,
            lifetime,
        })
    }

    /// Identity and display name behind a session token.
    pub fn resolve(&self, service_key: &ServiceKey, token: &SessionToken) -> Result<(Identity, String)> {
        self.store
            .get(service_key, token, self.clock.now())
            .map(|record| (record.subject.identity, record.subject.name))
            .ok_or(Error::SessionExpiredOrUnknown)
    }

    /// Open a messaging session for the account behind `access_key`.
    pub async fn add_session(
        &self,
        service_key: &ServiceKey,
        access_key: &str,
        name: &str,
    ) -> Result<SessionToken> {
        let identifier = AccountIdentifier::AccessKey(access_key.to_owned());
        let account = match self.resolver.resolve_account(service_key, &identifier).await {
            Ok(account) => account,
            Err(Error::AccountNotFound) => return Err(Error::CredentialInvalid),
            Err(e) => return Err(e),
        };

        let identity = Identity::derive(access_key);
        let token = SessionToken::generate();
        let now = self.clock.now();
        let expires_at = self.lifetime.expiry(now);

        self.persistence
            .save_messaging_session(&MessagingSessionRow {
                service_key: service_key.clone(),
                token,
                account: account.clone(),
                identity: identity.clone(),
                name: name.to_owned(),
                expires_at,
            })
            .await?;

        self.store.put(
            service_key.clone(),
            token,
            SessionRecord::new(
                MessagingSubject {
                    account,
                    identity,
                    name: name.to_owned(),
                },
                now,
                expires_at,
            ),
        );

        TraceEvent::SessionCreated {
            kind: SessionKind::Messaging,
            partition: service_key.to_string(),
            expires_at,
        }
        .emit();

        Ok(token)
    }
}

impl Sweep for MessagingSessionManager {
    fn name(&self) -> &'static str {
        "messaging"
    }

    fn sweep_expired(&self) -> usize {
        self.store.sweep_expired(self.clock.now())
    }
}
