use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Thirty days, the default lifetime of server and remote sessions.
pub const SESSION_LIFETIME_SECS: i64 = 30 * 86_400;

/// Session lifetimes, renewal margins and per-site login procedures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Directory holding `sessions/sessions.json`.
    #[serde(default = "d_state_path")]
    pub state_path: PathBuf,

    #[serde(default = "d_session_lifetime")]
    pub server_lifetime_secs: i64,

    #[serde(default = "d_session_lifetime")]
    pub messaging_lifetime_secs: i64,

    #[serde(default = "d_session_lifetime")]
    pub client_lifetime_secs: i64,

    /// A cached remote session closer than this to expiry is renegotiated.
    #[serde(default = "d_client_margin")]
    pub client_renewal_margin_secs: i64,

    /// A cached site session closer than this to expiry logs in again.
    #[serde(default = "d_web_margin")]
    pub web_renewal_margin_secs: i64,

    /// Sliding window for client API session keys.
    #[serde(default = "d_api_expiry")]
    pub api_session_expiry_secs: i64,

    /// Interval of the background expiry sweep.  `None` disables the
    /// sweep; expiry is then enforced only on access.
    #[serde(default)]
    pub sweep_interval_secs: Option<u64>,

    /// Third-party sites with cookie-based logins.
    #[serde(default)]
    pub sites: Vec<SiteConfig>,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            state_path: d_state_path(),
            server_lifetime_secs: SESSION_LIFETIME_SECS,
            messaging_lifetime_secs: SESSION_LIFETIME_SECS,
            client_lifetime_secs: SESSION_LIFETIME_SECS,
            client_renewal_margin_secs: d_client_margin(),
            web_renewal_margin_secs: d_web_margin(),
            api_session_expiry_secs: d_api_expiry(),
            sweep_interval_secs: None,
            sites: Vec::new(),
        }
    }
}

/// One third-party site and how to log in to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Human-readable site name used as the cache key (e.g. `"gallery"`).
    pub name: String,
    pub login: SiteLoginConfig,
    /// Overrides the login kind's default TTL.
    #[serde(default)]
    pub ttl_secs: Option<i64>,
}

impl SiteConfig {
    /// TTL applied to sessions from this site.
    pub fn effective_ttl_secs(&self) -> i64 {
        self.ttl_secs.unwrap_or_else(|| self.login.default_ttl_secs())
    }
}

/// The login procedure a site requires.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SiteLoginConfig {
    /// Fetch an acceptance URL (e.g. an age or terms interstitial) and keep
    /// whatever cookies come back.  No credentials.
    Interstitial { url: String },

    /// Post a login form with credentials read from the environment.
    Form {
        url: String,
        /// Environment variable holding the login id.
        username_env: String,
        /// Environment variable holding the password.
        password_env: String,
        #[serde(default = "d_username_field")]
        username_field: String,
        #[serde(default = "d_password_field")]
        password_field: String,
        /// Fixed extra form fields (e.g. `mode = "login"`).
        #[serde(default)]
        extra_fields: BTreeMap<String, String>,
        /// Cookie whose presence marks a logged-in session.
        marker_cookie: String,
        /// Substring the marker cookie's value must contain.  Empty means
        /// presence alone is enough.
        #[serde(default)]
        marker_substring: String,
    },
}

impl SiteLoginConfig {
    pub fn url(&self) -> &str {
        match self {
            Self::Interstitial { url } | Self::Form { url, .. } => url,
        }
    }

    /// One hour for interstitials, thirty days for credentialed logins.
    pub fn default_ttl_secs(&self) -> i64 {
        match self {
            Self::Interstitial { .. } => 3_600,
            Self::Form { .. } => SESSION_LIFETIME_SECS,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_state_path() -> PathBuf {
    PathBuf::from("./data")
}
fn d_session_lifetime() -> i64 {
    SESSION_LIFETIME_SECS
}
fn d_client_margin() -> i64 {
    600
}
fn d_web_margin() -> i64 {
    300
}
fn d_api_expiry() -> i64 {
    86_400
}
fn d_username_field() -> String {
    "username".into()
}
fn d_password_field() -> String {
    "password".into()
}
