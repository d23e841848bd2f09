//! Durable storage for sessions that must survive a restart.
//!
//! Managers read their rows once at start-up (and on a full refresh) and
//! write through on every mutation.  A failed write fails the operation
//! before anything changes in memory.  Expired rows are pruned on load and
//! by the sweeper.

mod json_file;
mod memory;
mod state;

pub use json_file::JsonFileSessionStore;
pub use memory::MemorySessionStore;
pub use state::SessionState;

use async_trait::async_trait;

use ks_domain::error::Result;
use ks_domain::rows::{AccountSessionRow, MessagingSessionRow, RemoteSessionRow, WebSessionRow};
use ks_domain::{ServiceKey, SessionToken, Timestamp};

/// Abstract read/write store, one set of methods per session kind.
#[async_trait]
pub trait SessionPersistence: Send + Sync {
    async fn load_account_sessions(&self) -> Result<Vec<AccountSessionRow>>;
    async fn save_account_session(&self, row: &AccountSessionRow) -> Result<()>;
    async fn delete_account_session(
        &self,
        service_key: &ServiceKey,
        token: &SessionToken,
    ) -> Result<()>;

    async fn load_messaging_sessions(&self) -> Result<Vec<MessagingSessionRow>>;
    async fn save_messaging_session(&self, row: &MessagingSessionRow) -> Result<()>;

    async fn load_remote_sessions(&self) -> Result<Vec<RemoteSessionRow>>;
    async fn save_remote_session(&self, row: &RemoteSessionRow) -> Result<()>;
    async fn delete_remote_session(&self, service_key: &ServiceKey) -> Result<()>;

    async fn load_web_sessions(&self) -> Result<Vec<WebSessionRow>>;
    async fn save_web_session(&self, row: &WebSessionRow) -> Result<()>;
    async fn delete_web_session(&self, site: &str) -> Result<()>;

    /// Drop rows of every kind that expired at or before `now`.  Returns
    /// the number removed; removing nothing writes nothing.
    async fn prune_expired(&self, now: Timestamp) -> Result<usize>;
}
