use serde::Serialize;

/// Which manager a trace event concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Account,
    Messaging,
    Remote,
    Web,
    Api,
}

impl SessionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Account => "account",
            Self::Messaging => "messaging",
            Self::Remote => "remote",
            Self::Web => "web",
            Self::Api => "api",
        }
    }
}

impl std::fmt::Display for SessionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured trace events emitted across all Keystone crates.
///
/// Tokens never appear in events; only service keys, site names, counts,
/// and expiry timestamps.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    SessionsLoaded {
        kind: SessionKind,
        loaded: usize,
        skipped_expired: usize,
    },
    SessionCreated {
        kind: SessionKind,
        partition: String,
        expires_at: i64,
    },
    SessionDeleted {
        kind: SessionKind,
        partition: String,
    },
    AccountsRefreshed {
        service_key: String,
        accounts: usize,
        sessions_updated: usize,
    },
    RemoteSessionNegotiated {
        service_key: String,
        expires_at: i64,
        used_server_hint: bool,
    },
    WebLoginCompleted {
        site: String,
        ttl_secs: i64,
    },
    SweepCompleted {
        evicted: usize,
        pruned: usize,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "ks_event");
    }
}
