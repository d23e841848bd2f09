//! Persisted row shapes, one per manager kind.
//!
//! These are what a `SessionPersistence` backend reads at start-up and
//! writes on every mutation that must survive a restart.

use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;
use crate::types::{Account, AccountKey, CookieJar, Identity, ServiceKey, SessionToken};

/// Server-side account session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSessionRow {
    pub token: SessionToken,
    pub service_key: ServiceKey,
    pub account_key: AccountKey,
    pub account: Account,
    pub expires_at: Timestamp,
}

/// Server-side messaging session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagingSessionRow {
    pub service_key: ServiceKey,
    pub token: SessionToken,
    pub account: Account,
    pub identity: Identity,
    pub name: String,
    pub expires_at: Timestamp,
}

/// Client-side session negotiated with a remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSessionRow {
    pub service_key: ServiceKey,
    pub token: SessionToken,
    pub expires_at: Timestamp,
}

/// Client-side cookie session for a named third-party site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebSessionRow {
    pub site: String,
    pub cookies: CookieJar,
    pub expires_at: Timestamp,
}

/// Rows with a timestamped expiry.  Used to filter expired rows on load.
pub trait Expiring {
    fn expires_at(&self) -> Timestamp;

    fn is_live(&self, now: Timestamp) -> bool {
        self.expires_at() > now
    }
}

macro_rules! impl_expiring {
    ($($row:ty),*) => {
        $(impl Expiring for $row {
            fn expires_at(&self) -> Timestamp {
                self.expires_at
            }
        })*
    };
}

impl_expiring!(AccountSessionRow, MessagingSessionRow, RemoteSessionRow, WebSessionRow);

/// Split `rows` into live rows and a count of expired ones.
pub fn retain_live<R: Expiring>(rows: Vec<R>, now: Timestamp) -> (Vec<R>, usize) {
    let total = rows.len();
    let live: Vec<R> = rows.into_iter().filter(|r| r.is_live(now)).collect();
    let skipped = total - live.len();
    (live, skipped)
}
