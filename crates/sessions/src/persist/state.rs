use serde::{Deserialize, Serialize};

use ks_domain::rows::{
    AccountSessionRow, Expiring, MessagingSessionRow, RemoteSessionRow, WebSessionRow,
};
use ks_domain::{ServiceKey, SessionToken, Timestamp};

/// Every persisted session row, grouped by kind.  This is the document
/// the JSON backend writes and the in-memory backend holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(default)]
    pub account: Vec<AccountSessionRow>,
    #[serde(default)]
    pub messaging: Vec<MessagingSessionRow>,
    #[serde(default)]
    pub remote: Vec<RemoteSessionRow>,
    #[serde(default)]
    pub web: Vec<WebSessionRow>,
}

impl SessionState {
    pub fn upsert_account(&mut self, row: AccountSessionRow) {
        match self
            .account
            .iter_mut()
            .find(|r| r.service_key == row.service_key && r.token == row.token)
        {
            Some(existing) => *existing = row,
            None => self.account.push(row),
        }
    }

    pub fn remove_account(&mut self, service_key: &ServiceKey, token: &SessionToken) {
        self.account
            .retain(|r| !(r.service_key == *service_key && r.token == *token));
    }

    pub fn upsert_messaging(&mut self, row: MessagingSessionRow) {
        match self
            .messaging
            .iter_mut()
            .find(|r| r.service_key == row.service_key && r.token == row.token)
        {
            Some(existing) => *existing = row,
            None => self.messaging.push(row),
        }
    }

    /// One remote session per service.
    pub fn upsert_remote(&mut self, row: RemoteSessionRow) {
        self.remove_remote(&row.service_key);
        self.remote.push(row);
    }

    pub fn remove_remote(&mut self, service_key: &ServiceKey) {
        self.remote.retain(|r| r.service_key != *service_key);
    }

    /// One web session per site.
    pub fn upsert_web(&mut self, row: WebSessionRow) {
        self.remove_web(&row.site);
        self.web.push(row);
    }

    pub fn remove_web(&mut self, site: &str) {
        self.web.retain(|r| r.site != site);
    }

    /// Drop every row expired at `now`.  Returns the number dropped.
    pub fn prune_expired(&mut self, now: Timestamp) -> usize {
        let before = self.len();
        self.account.retain(|r| r.is_live(now));
        self.messaging.retain(|r| r.is_live(now));
        self.remote.retain(|r| r.is_live(now));
        self.web.retain(|r| r.is_live(now));
        before - self.len()
    }

    /// Rows that [`prune_expired`](Self::prune_expired) would drop.
    pub fn expired_count(&self, now: Timestamp) -> usize {
        let dead = |live: bool| usize::from(!live);
        self.account.iter().map(|r| dead(r.is_live(now))).sum::<usize>()
            + self.messaging.iter().map(|r| dead(r.is_live(now))).sum::<usize>()
            + self.remote.iter().map(|r| dead(r.is_live(now))).sum::<usize>()
            + self.web.iter().map(|r| dead(r.is_live(now))).sum::<usize>()
    }

    pub fn len(&self) -> usize {
        self.account.len() + self.messaging.len() + self.remote.len() + self.web.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
