use ks_domain::Timestamp;

/// A cached session.  The token (or service key, or site name) it belongs
/// to is the key it is stored under.
///
/// Records are never edited in place; renewal and subject refresh build a
/// new record and store it over the old one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord<V> {
    pub subject: V,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
}

impl<V> SessionRecord<V> {
    pub fn new(subject: V, created_at: Timestamp, expires_at: Timestamp) -> Self {
        debug_assert!(expires_at > created_at, "session must expire after creation");
        Self {
            subject,
            created_at,
            expires_at,
        }
    }

    /// A record whose expiry has been reached is logically absent.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at <= now
    }

    /// Expired, or expiring within `margin` seconds.
    pub fn is_stale(&self, now: Timestamp, margin: i64) -> bool {
        self.expires_at <= now.saturating_add(margin)
    }

    /// Same token lifetime, different subject.
    pub fn with_subject<W>(&self, subject: W) -> SessionRecord<W> {
        SessionRecord {
            subject,
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }
}
