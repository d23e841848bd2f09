//! Client API session keys.
//!
//! A client API caller trades its long-lived access key for a session key
//! and presents that instead.  Each successful lookup pushes the session's
//! expiry out again, so a key in regular use never lapses.  Session keys
//! are held in memory only; a restart invalidates all of them.

use std::sync::Arc;

use ks_domain::error::{Error, Result};
use ks_domain::trace::{SessionKind, TraceEvent};
use ks_domain::{Clock, SessionToken};

use crate::record::SessionRecord;
use crate::store::ExpiringSessionStore;
use crate::sweep::Sweep;

pub struct ApiSessionManager {
    store: ExpiringSessionStore<(), SessionToken, String>,
    clock: Arc<dyn Clock>,
    expiry_secs: i64,
}

impl ApiSessionManager {
    pub fn new(clock: Arc<dyn Clock>, expiry_secs: i64) -> Self {
        Self {
            store: ExpiringSessionStore::new(),
            clock,
            expiry_secs,
        }
    }

    /// Issue a session key standing in for `access_key`.
    pub fn generate_session_key(&self, access_key: &str) -> SessionToken {
        let token = SessionToken::generate();
        let now = self.clock.now();
        let expires_at = now.saturating_add(self.expiry_secs);
        self.store.put(
            (),
            token,
            SessionRecord::new(access_key.to_owned(), now, expires_at),
        );

        TraceEvent::SessionCreated {
            kind: SessionKind::Api,
            partition: String::new(),
            expires_at,
        }
        .emit();

        token
    }

    /// The access key behind `session_key`, sliding its expiry forward.
    pub fn access_key_for(&self, session_key: &SessionToken) -> Result<String> {
        let now = self.clock.now();
        self.store
            .renew(&(), session_key, now, now.saturating_add(self.expiry_secs))
            .map(|record| record.subject)
            .ok_or(Error::SessionExpiredOrUnknown)
    }

    /// Drop every session key issued for `access_key`, e.g. when that
    /// access is deleted.  Returns the number dropped.
    pub fn revoke_access_key(&self, access_key: &str) -> usize {
        self.store
            .remove_where(|_, _, record| record.subject == access_key)
    }
}

impl Sweep for ApiSessionManager {
    fn name(&self) -> &'static str {
        "api"
    }

    fn sweep_expired(&self) -> usize {
        self.store.sweep_expired(self.clock.now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ks_domain::ManualClock;

    fn manager() -> (ApiSessionManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        (ApiSessionManager::new(clock.clone(), 86_400), clock)
    }

    #[test]
    fn lookup_returns_access_key() {
        let (mgr, _) = manager();
        let key = mgr.generate_session_key("access-1");
        assert_eq!(mgr.access_key_for(&key).unwrap(), "access-1");
    }

    #[test]
    fn unknown_key_fails() {
        let (mgr, _) = manager();
        let err = mgr.access_key_for(&SessionToken::generate()).unwrap_err();
        assert!(matches!(err, Error::SessionExpiredOrUnknown));
    }

    #[test]
    fn lookups_slide_expiry() {
        let (mgr, clock) = manager();
        let key = mgr.generate_session_key("access-1");

        // Touch the key every 20 hours for three days; it never lapses.
        for _ in 0..4 {
            clock.advance(20 * 3_600);
            assert!(mgr.access_key_for(&key).is_ok());
        }

        clock.advance(86_400);
        assert!(matches!(
            mgr.access_key_for(&key),
            Err(Error::SessionExpiredOrUnknown)
        ));
    }

    #[test]
    fn revoke_drops_all_keys_for_access() {
        let (mgr, _) = manager();
        let a = mgr.generate_session_key("access-1");
        let b = mgr.generate_session_key("access-1");
        let c = mgr.generate_session_key("access-2");
        assert_eq!(mgr.revoke_access_key("access-1"), 2);
        assert!(mgr.access_key_for(&a).is_err());
        assert!(mgr.access_key_for(&b).is_err());
        assert!(mgr.access_key_for(&c).is_ok());
    }
}
