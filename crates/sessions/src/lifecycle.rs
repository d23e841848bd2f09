//! Session lifetime and renewal policy.
//!
//! A session is issued for `lifetime_secs`.  Holders that renew on their own
//! (the client-side managers) treat a cached session as stale once it is
//! within `renewal_margin_secs` of expiry, so a request is never built with
//! a token that runs out mid-flight.

use ks_domain::config::{SessionsConfig, SESSION_LIFETIME_SECS};
use ks_domain::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLifetime {
    pub lifetime_secs: i64,
    pub renewal_margin_secs: i64,
}

impl Default for SessionLifetime {
    fn default() -> Self {
        Self::new(SESSION_LIFETIME_SECS, 0)
    }
}

impl SessionLifetime {
    pub const fn new(lifetime_secs: i64, renewal_margin_secs: i64) -> Self {
        Self {
            lifetime_secs,
            renewal_margin_secs,
        }
    }

    /// Server-side account sessions never renew themselves.
    pub fn server(config: &SessionsConfig) -> Self {
        Self::new(config.server_lifetime_secs, 0)
    }

    pub fn messaging(config: &SessionsConfig) -> Self {
        Self::new(config.messaging_lifetime_secs, 0)
    }

    pub fn client(config: &SessionsConfig) -> Self {
        Self::new(config.client_lifetime_secs, config.client_renewal_margin_secs)
    }

    /// Expiry of a session issued at `now`.
    pub fn expiry(&self, now: Timestamp) -> Timestamp {
        now.saturating_add(self.lifetime_secs)
    }

    /// Expiry of a freshly negotiated session.  A server-supplied hint is
    /// honoured when it lies in the future, capped at our own lifetime.
    /// Returns the expiry and whether the hint was used.
    pub fn negotiated_expiry(&self, now: Timestamp, hint: Option<Timestamp>) -> (Timestamp, bool) {
        let ours = self.expiry(now);
        match hint {
            Some(h) if h > now => (h.min(ours), true),
            _ => (ours, false),
        }
    }
}
