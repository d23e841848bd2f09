use std::fmt;

use anyhow::Context;

use ks_domain::config::Config;
use ks_domain::trace::SessionKind;
use ks_domain::{Clock, SystemClock, Timestamp};
use ks_sessions::{JsonFileSessionStore, SessionPersistence, SessionState};

use super::KindFilter;

/// One persisted session as the operator sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLine {
    pub kind: SessionKind,
    /// Service key or site name.
    pub scope: String,
    /// Redacted token, or the cookie count for web sessions.
    pub detail: String,
    pub expires_at: Timestamp,
    pub expired: bool,
}

impl SessionLine {
    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "kind": self.kind,
            "scope": self.scope,
            "detail": self.detail,
            "expires_at": self.expires_at,
            "expired": self.expired,
        })
    }
}

impl fmt::Display for SessionLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let expires = chrono::DateTime::from_timestamp(self.expires_at, 0)
            .map(|t| t.format("%Y-%m-%d %H:%M:%SZ").to_string())
            .unwrap_or_else(|| self.expires_at.to_string());
        write!(
            f,
            "{:<10} {:<20} {:<16} {}{}",
            self.kind.as_str(),
            self.scope,
            self.detail,
            expires,
            if self.expired { "  (expired)" } else { "" },
        )
    }
}

/// Flatten the persisted state into display lines, ordered by kind and
/// then by expiry.
pub fn collect_lines(
    state: &SessionState,
    kind: Option<KindFilter>,
    include_expired: bool,
    now: Timestamp,
) -> Vec<SessionLine> {
    let line = |kind, scope: String, detail: String, expires_at: Timestamp| SessionLine {
        kind,
        scope,
        detail,
        expires_at,
        expired: expires_at <= now,
    };

    let mut lines: Vec<SessionLine> = Vec::with_capacity(state.len());
    lines.extend(state.account.iter().map(|r| {
        line(
            SessionKind::Account,
            r.service_key.to_string(),
            format!("{} {}", r.token.redacted(), r.account_key),
            r.expires_at,
        )
    }));
    lines.extend(state.messaging.iter().map(|r| {
        line(
            SessionKind::Messaging,
            r.service_key.to_string(),
            format!("{} {}", r.token.redacted(), r.name),
            r.expires_at,
        )
    }));
    lines.extend(state.remote.iter().map(|r| {
        line(
            SessionKind::Remote,
            r.service_key.to_string(),
            r.token.redacted(),
            r.expires_at,
        )
    }));
    lines.extend(state.web.iter().map(|r| {
        line(
            SessionKind::Web,
            r.site.clone(),
            format!("{} cookie(s)", r.cookies.len()),
            r.expires_at,
        )
    }));

    lines.retain(|l| kind.map_or(true, |k| k.matches(l.kind)) && (include_expired || !l.expired));
    lines.sort_by(|a, b| {
        a.kind
            .as_str()
            .cmp(b.kind.as_str())
            .then(a.expires_at.cmp(&b.expires_at))
    });
    lines
}

fn open_store(config: &Config) -> anyhow::Result<JsonFileSessionStore> {
    let path = &config.sessions.state_path;
    JsonFileSessionStore::open(path)
        .with_context(|| format!("opening session state under {}", path.display()))
}

/// `keystone sessions list`
pub async fn list(
    config: &Config,
    kind: Option<KindFilter>,
    include_expired: bool,
    json: bool,
) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let state = store.snapshot().await;
    let now = SystemClock.now();
    let lines = collect_lines(&state, kind, include_expired, now);

    if json {
        for line in &lines {
            println!("{}", line.to_json());
        }
        return Ok(());
    }

    if lines.is_empty() {
        println!("No sessions in {}", store.path().display());
        return Ok(());
    }
    for line in &lines {
        println!("{line}");
    }
    Ok(())
}

/// `keystone sessions prune`
pub async fn prune(config: &Config) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let now = SystemClock.now();
    let removed = store
        .prune_expired(now)
        .await
        .with_context(|| format!("writing {}", store.path().display()))?;
    tracing::info!(removed, "pruned expired sessions");
    println!("Removed {removed} expired session(s) from {}", store.path().display());
    Ok(())
}
