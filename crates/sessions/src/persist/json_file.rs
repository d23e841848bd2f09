//! JSON-file session persistence.
//!
//! Persists every session row in `sessions.json` under
//! `state_path/sessions/`.  Each mutation rewrites the whole document
//! through a temporary file and a rename, so a crash mid-write leaves the
//! previous document intact.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use ks_domain::error::{Error, Result};
use ks_domain::rows::{AccountSessionRow, MessagingSessionRow, RemoteSessionRow, WebSessionRow};
use ks_domain::{ServiceKey, SessionToken, Timestamp};

use super::state::SessionState;
use super::SessionPersistence;

/// File-backed [`SessionPersistence`].
pub struct JsonFileSessionStore {
    sessions_path: PathBuf,
    state: Mutex<SessionState>,
}

impl JsonFileSessionStore {
    /// Load or create the store at `state_path/sessions/sessions.json`.
    ///
    /// A missing file is empty state.  A file that fails to parse is an
    /// error: silently starting empty would drop every persisted session.
    pub fn open(state_path: &Path) -> Result<Self> {
        let dir = state_path.join("sessions");
        std::fs::create_dir_all(&dir).map_err(Error::Io)?;

        let sessions_path = dir.join("sessions.json");
        let state: SessionState = if sessions_path.exists() {
            let raw = std::fs::read_to_string(&sessions_path).map_err(Error::Io)?;
            serde_json::from_str(&raw).map_err(|e| {
                Error::Persistence(format!("parsing {}: {e}", sessions_path.display()))
            })?
        } else {
            SessionState::default()
        };

        tracing::info!(
            rows = state.len(),
            path = %sessions_path.display(),
            "session state loaded"
        );

        Ok(Self {
            sessions_path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.sessions_path
    }

    /// A copy of everything currently persisted.
    pub async fn snapshot(&self) -> SessionState {
        self.state.lock().await.clone()
    }

    /// Apply `f` to a copy of the state, write the copy, then adopt it.
    /// The lock is held across the write so writers never reorder.
    async fn mutate<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut SessionState),
    {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        f(&mut next);
        self.write_file(&next).await?;
        *state = next;
        Ok(())
    }

    async fn write_file(&self, state: &SessionState) -> Result<()> {
        let json = serde_json::to_string_pretty(state)?;
        let tmp = self.sessions_path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await.map_err(Error::Io)?;
        tokio::fs::rename(&tmp, &self.sessions_path)
            .await
            .map_err(Error::Io)
    }
}

#[async_trait]
impl SessionPersistence for JsonFileSessionStore {
    async fn load_account_sessions(&self) -> Result<Vec<AccountSessionRow>> {
        Ok(self.state.lock().await.account.clone())
    }

    async fn save_account_session(&self, row: &AccountSessionRow) -> Result<()> {
        self.mutate(|s| s.upsert_account(row.clone())).await
    }

    async fn delete_account_session(
        &self,
        service_key: &ServiceKey,
        token: &SessionToken,
    ) -> Result<()> {
        self.mutate(|s| s.remove_account(service_key, token)).await
    }

    async fn load_messaging_sessions(&self) -> Result<Vec<MessagingSessionRow>> {
        Ok(self.state.lock().await.messaging.clone())
    }

    async fn save_messaging_session(&self, row: &MessagingSessionRow) -> Result<()> {
        self.mutate(|s| s.upsert_messaging(row.clone())).await
    }

    async fn load_remote_sessions(&self) -> Result<Vec<RemoteSessionRow>> {
        Ok(self.state.lock().await.remote.clone())
    }

    async fn save_remote_session(&self, row: &RemoteSessionRow) -> Result<()> {
        self.mutate(|s| s.upsert_remote(row.clone())).await
    }

    async fn delete_remote_session(&self, service_key: &ServiceKey) -> Result<()> {
        self.mutate(|s| s.remove_remote(service_key)).await
    }

    async fn load_web_sessions(&self) -> Result<Vec<WebSessionRow>> {
        Ok(self.state.lock().await.web.clone())
    }

    async fn save_web_session(&self, row: &WebSessionRow) -> Result<()> {
        self.mutate(|s| s.upsert_web(row.clone())).await
    }

    async fn delete_web_session(&self, site: &str) -> Result<()> {
        self.mutate(|s| s.remove_web(site)).await
    }

    async fn prune_expired(&self, now: Timestamp) -> Result<usize> {
        let mut state = self.state.lock().await;
        if state.expired_count(now) == 0 {
            return Ok(0);
        }
        let mut next = state.clone();
        let removed = next.prune_expired(now);
        self.write_file(&next).await?;
        *state = next;

        tracing::debug!(removed, path = %self.sessions_path.display(), "expired rows pruned");
        Ok(removed)
    }
}
