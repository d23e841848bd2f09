use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use ks_domain::error::{Error, Result};
use ks_domain::rows::{AccountSessionRow, MessagingSessionRow, RemoteSessionRow, WebSessionRow};
use ks_domain::{ServiceKey, SessionToken, Timestamp};

use super::state::SessionState;
use super::SessionPersistence;

/// In-memory [`SessionPersistence`] for tests and embedders that persist
/// elsewhere.  Writes can be made to fail on demand.
#[derive(Default)]
pub struct MemorySessionStore {
    state: Mutex<SessionState>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.lock().clone()
    }

    /// Edit the stored rows directly, bypassing the write counter.
    pub fn edit(&self, f: impl FnOnce(&mut SessionState)) {
        f(&mut self.state.lock());
    }

    fn write<T>(&self, f: impl FnOnce(&mut SessionState) -> T) -> Result<T> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Persistence("write rejected".into()));
        }
        let out = f(&mut self.state.lock());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(out)
    }
}

#[async_trait]
impl SessionPersistence for MemorySessionStore {
    async fn load_account_sessions(&self) -> Result<Vec<AccountSessionRow>> {
        Ok(self.state.lock().account.clone())
    }

    async fn save_account_session(&self, row: &AccountSessionRow) -> Result<()> {
        self.write(|s| s.upsert_account(row.clone()))
    }

    async fn delete_account_session(
        &self,
        service_key: &ServiceKey,
        token: &SessionToken,
    ) -> Result<()> {
        self.write(|s| s.remove_account(service_key, token))
    }

    async fn load_messaging_sessions(&self) -> Result<Vec<MessagingSessionRow>> {
        Ok(self.state.lock().messaging.clone())
    }

    async fn save_messaging_session(&self, row: &MessagingSessionRow) -> Result<()> {
        self.write(|s| s.upsert_messaging(row.clone()))
    }

    async fn load_remote_sessions(&self) -> Result<Vec<RemoteSessionRow>> {
        Ok(self.state.lock().remote.clone())
    }

    async fn save_remote_session(&self, row: &RemoteSessionRow) -> Result<()> {
        self.write(|s| s.upsert_remote(row.clone()))
    }

    async fn delete_remote_session(&self, service_key: &ServiceKey) -> Result<()> {
        self.write(|s| s.remove_remote(service_key))
    }

    async fn load_web_sessions(&self) -> Result<Vec<WebSessionRow>> {
        Ok(self.state.lock().web.clone())
    }

    async fn save_web_session(&self, row: &WebSessionRow) -> Result<()> {
        self.write(|s| s.upsert_web(row.clone()))
    }

    async fn delete_web_session(&self, site: &str) -> Result<()> {
        self.write(|s| s.remove_web(site))
    }

    async fn prune_expired(&self, now: Timestamp) -> Result<usize> {
        if self.state.lock().expired_count(now) == 0 {
            return Ok(0);
        }
        self.write(|s| s.prune_expired(now))
    }
}
