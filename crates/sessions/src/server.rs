//! Server-side account sessions.
//!
//! Authenticates an incoming request's session token into an account,
//! scoped per service.  Alongside the expiring store the manager keeps a
//! reverse index from `(service, account)` to that account's live tokens
//! and a cache of resolved accounts, so a permission change can be pushed
//! into every session of the affected accounts without touching tokens or
//! expiries.
//!
//! Mutations (create, invalidate, delete, reload) are serialized by an
//! async write gate held across their persistence writes.  Inside it the
//! lock order is always index, then store, and neither of those is held
//! across an `.await`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use ks_domain::error::{Error, Result};
use ks_domain::rows::{retain_live, AccountSessionRow};
use ks_domain::trace::{SessionKind, TraceEvent};
use ks_domain::{Account, AccountIdentifier, AccountKey, Clock, ServiceKey, SessionToken, Timestamp};

use crate::lifecycle::SessionLifetime;
use crate::persist::SessionPersistence;
use crate::record::SessionRecord;
use crate::resolver::AccountResolver;
use crate::store::ExpiringSessionStore;
use crate::sweep::Sweep;

#[derive(Default)]
struct AccountIndex {
    /// service → account → live session tokens
    tokens: HashMap<ServiceKey, HashMap<AccountKey, HashSet<SessionToken>>>,
    /// service → account → last resolved account
    accounts: HashMap<ServiceKey, HashMap<AccountKey, Account>>,
}

impl AccountIndex {
    fn cached(&self, service_key: &ServiceKey, account_key: &AccountKey) -> Option<Account> {
        self.accounts.get(service_key)?.get(account_key).cloned()
    }

    fn register(&mut self, service_key: &ServiceKey, account: &Account, token: SessionToken) {
        self.accounts
            .entry(service_key.clone())
            .or_default()
            .entry(account.key.clone())
            .or_insert_with(|| account.clone());
        self.tokens
            .entry(service_key.clone())
            .or_default()
            .entry(account.key.clone())
            .or_default()
            .insert(token);
    }

    fn forget_token(&mut self, service_key: &ServiceKey, token: &SessionToken) {
        if let Some(by_account) = self.tokens.get_mut(service_key) {
            by_account.retain(|_, set| {
                set.remove(token);
                !set.is_empty()
            });
        }
    }
}

/// Session token → account cache, partitioned per service.
pub struct ServerAccountSessionManager {
    store: ExpiringSessionStore<ServiceKey, SessionToken, Account>,
    index: Mutex<AccountIndex>,
    /// Held from the first read of the index to the last write of a
    /// mutation, so a write-through never interleaves with another.
    writes: tokio::sync::Mutex<()>,
    persistence: Arc<dyn SessionPersistence>,
    resolver: Arc<dyn AccountResolver>,
    clock: Arc<dyn Clock>,
    lifetime: SessionLifetime,
}

impl ServerAccountSessionManager {
    /// Build the manager and hydrate it from persisted rows.
    pub async fn load(
        persistence: Arc<dyn SessionPersistence>,
        resolver: Arc<dyn AccountResolver>,
        clock: Arc<dyn Clock>,
        lifetime: SessionLifetime,
    ) -> Result<Self> {
        let manager = Self {
            store: ExpiringSessionStore::new(),
            index: Mutex::new(AccountIndex::default()),
            writes: tokio::sync::Mutex::new(()),
            persistence,
            resolver,
            clock,
            lifetime,
        };
        manager.refresh_all().await?;
        Ok(manager)
    }

    /// Issue a new session for the account behind `access_key`.
    ///
    /// Returns the token and its expiry.  Fails with
    /// [`Error::CredentialInvalid`] when the key resolves to no account.
    pub async fn create_session(
        &self,
        service_key: &ServiceKey,
        access_key: &str,
    ) -> Result<(SessionToken, Timestamp)> {
        let identifier = AccountIdentifier::AccessKey(access_key.to_owned());
        let resolved = match self.resolver.resolve_account(service_key, &identifier).await {
            Ok(account) => account,
            Err(Error::AccountNotFound) => return Err(Error::CredentialInvalid),
            Err(e) => return Err(e),
        };

        let _writes = self.writes.lock().await;

        // The cached account stays authoritative until a refresh replaces it.
        let account = self
            .index
            .lock()
            .cached(service_key, &resolved.key)
            .unwrap_or(resolved);

        let now = self.clock.now();
        let token = SessionToken::generate();
        let expires_at = self.lifetime.expiry(now);

        self.persistence
            .save_account_session(&AccountSessionRow {
                token,
                service_key: service_key.clone(),
                account_key: account.key.clone(),
                account: account.clone(),
                expires_at,
            })
            .await?;

        {
            let mut index = self.index.lock();
            index.register(service_key, &account, token);
            self.store.put(
                service_key.clone(),
                token,
                SessionRecord::new(account, now, expires_at),
            );
        }

        TraceEvent::SessionCreated {
            kind: SessionKind::Account,
            partition: service_key.to_string(),
            expires_at,
        }
        .emit();

        Ok((token, expires_at))
    }

    /// Resolve a session token into its account.
    ///
    /// Unknown, deleted and expired tokens all fail with
    /// [`Error::SessionExpiredOrUnknown`].
    pub fn authenticate(&self, service_key: &ServiceKey, token: &SessionToken) -> Result<Account> {
        self.store
            .get(service_key, token, self.clock.now())
            .map(|record| record.subject)
            .ok_or(Error::SessionExpiredOrUnknown)
    }

    /// Re-resolve a batch of accounts whose permissions changed and push
    /// the new account objects into every live session they hold.
    ///
    /// All accounts are resolved before anything is touched, so a failed
    /// lookup leaves the cache unchanged.  Every affected row is written
    /// through with its expiry unchanged, so a reload keeps the new
    /// account.  Returns the number of sessions updated.
    pub async fn invalidate_accounts(
        &self,
        service_key: &ServiceKey,
        identifiers: &[AccountIdentifier],
    ) -> Result<usize> {
        let mut refreshed = Vec::with_capacity(identifiers.len());
        for identifier in identifiers {
            refreshed.push(self.resolver.resolve_account(service_key, identifier).await?);
        }

        let _writes = self.writes.lock().await;
        let now = self.clock.now();
        let rows = {
            let index = self.index.lock();
            self.live_rows(&index, service_key, &refreshed, now)
        };
        for row in &rows {
            self.persistence.save_account_session(row).await?;
        }

        let updated = {
            let mut index = self.index.lock();
            self.apply_refreshed(&mut index, service_key, &refreshed, now)
        };

        TraceEvent::AccountsRefreshed {
            service_key: service_key.to_string(),
            accounts: refreshed.len(),
            sessions_updated: updated,
        }
        .emit();

        Ok(updated)
    }

    /// Rows for the live sessions of `accounts`, carrying the refreshed
    /// account and the original expiry.
    fn live_rows(
        &self,
        index: &AccountIndex,
        service_key: &ServiceKey,
        accounts: &[Account],
        now: Timestamp,
    ) -> Vec<AccountSessionRow> {
        let Some(by_account) = index.tokens.get(service_key) else {
            return Vec::new();
        };
        let mut rows = Vec::new();
        for account in accounts {
            let Some(tokens) = by_account.get(&account.key) else {
                continue;
            };
            for token in tokens {
                if let Some(record) = self.store.get(service_key, token, now) {
                    rows.push(AccountSessionRow {
                        token: *token,
                        service_key: service_key.clone(),
                        account_key: account.key.clone(),
                        account: account.clone(),
                        expires_at: record.expires_at,
                    });
                }
            }
        }
        rows
    }

    /// Swap the refreshed accounts into the cache and every live session.
    fn apply_refreshed(
        &self,
        index: &mut AccountIndex,
        service_key: &ServiceKey,
        refreshed: &[Account],
        now: Timestamp,
    ) -> usize {
        let mut updated = 0;
        for account in refreshed {
            index
                .accounts
                .entry(service_key.clone())
                .or_default()
                .insert(account.key.clone(), account.clone());

            let Some(by_account) = index.tokens.get_mut(service_key) else {
                continue;
            };
            let Some(tokens) = by_account.get_mut(&account.key) else {
                continue;
            };
            tokens.retain(|token| {
                let live = self
                    .store
                    .replace_subject(service_key, token, account.clone(), now);
                if live {
                    updated += 1;
                }
                live
            });
            if tokens.is_empty() {
                by_account.remove(&account.key);
            }
        }
        updated
    }

    /// Cold reload from persistence.  Replaces the store and rebuilds both
    /// indices; rows already expired are skipped and never resurrected,
    /// and are pruned from persistence.
    pub async fn refresh_all(&self) -> Result<()> {
        let _writes = self.writes.lock().await;
        let now = self.clock.now();
        self.persistence.prune_expired(now).await?;
        let rows = self.persistence.load_account_sessions().await?;
        let (rows, skipped_expired) = retain_live(rows, now);
        let loaded = rows.len();

        let mut fresh = AccountIndex::default();
        let mut records = Vec::with_capacity(loaded);
        for row in rows {
            fresh
                .tokens
                .entry(row.service_key.clone())
                .or_default()
                .entry(row.account_key.clone())
                .or_default()
                .insert(row.token);
            fresh
                .accounts
                .entry(row.service_key.clone())
                .or_default()
                .insert(row.account_key, row.account.clone());
            records.push((
                row.service_key,
                row.token,
                SessionRecord::new(row.account, now, row.expires_at),
            ));
        }

        {
            let mut index = self.index.lock();
            *index = fresh;
            self.store.replace_all(records);
        }

        TraceEvent::SessionsLoaded {
            kind: SessionKind::Account,
            loaded,
            skipped_expired,
        }
        .emit();

        Ok(())
    }

    /// Explicit logout.  Idempotent.
    pub async fn delete_session(&self, service_key: &ServiceKey, token: &SessionToken) -> Result<()> {
        let _writes = self.writes.lock().await;
        self.persistence
            .delete_account_session(service_key, token)
            .await?;

        let mut index = self.index.lock();
        index.forget_token(service_key, token);
        if self.store.delete(service_key, token) {
            TraceEvent::SessionDeleted {
                kind: SessionKind::Account,
                partition: service_key.to_string(),
            }
            .emit();
        }
        Ok(())
    }

    /// Number of live tokens the reverse index holds for an account.
    pub fn session_count(&self, service_key: &ServiceKey, account_key: &AccountKey) -> usize {
        self.index
            .lock()
            .tokens
            .get(service_key)
            .and_then(|by_account| by_account.get(account_key))
            .map_or(0, HashSet::len)
    }
}

impl Sweep for ServerAccountSessionManager {
    fn name(&self) -> &'static str {
        "account"
    }

    fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let mut index = self.index.lock();
        let evicted = self.store.sweep_expired(now);
        if evicted > 0 {
            for (service_key, by_account) in index.tokens.iter_mut() {
                by_account.retain(|_, tokens| {
                    tokens.retain(|token| self.store.contains(service_key, token));
                    !tokens.is_empty()
                });
            }
        }
        evicted
    }
}
