//! Cookie sessions for third-party sites.
//!
//! Each named site has its own login procedure and its own TTL.  A cached
//! jar is reused until it is within the renewal margin of expiry; then the
//! site's procedure runs again.

mod credentials;
mod procedures;

pub use credentials::{EnvCredentialSource, StaticCredentialSource};
pub use procedures::{site_logins_from_config, FormLogin, InterstitialLogin};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use ks_domain::config::SessionsConfig;
use ks_domain::error::{Error, Result};
use ks_domain::rows::{retain_live, WebSessionRow};
use ks_domain::trace::{SessionKind, TraceEvent};
use ks_domain::{Clock, CookieJar};

use crate::persist::SessionPersistence;
use crate::record::SessionRecord;
use crate::store::ExpiringSessionStore;
use crate::sweep::Sweep;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Collaborators
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// HTTP exchange that returns the cookies a response set.
#[async_trait]
pub trait CookieTransport: Send + Sync {
    async fn get(&self, url: &str) -> Result<CookieJar>;
    async fn post_form(&self, url: &str, fields: &[(String, String)]) -> Result<CookieJar>;
}

/// Login id and password for a site.
#[derive(Clone, PartialEq, Eq)]
pub struct SiteCredentials {
    pub username: String,
    pub password: String,
}

impl SiteCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Both fields blank counts as not configured.
    pub fn is_blank(&self) -> bool {
        self.username.is_empty() && self.password.is_empty()
    }
}

impl fmt::Debug for SiteCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SiteCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Where site credentials are configured.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn site_credentials(&self, site: &str) -> Result<Option<SiteCredentials>>;
}

/// Result of a successful site login.
#[derive(Debug, Clone)]
pub struct SiteSession {
    pub cookies: CookieJar,
    pub ttl_secs: i64,
}

/// A site's login procedure.
#[async_trait]
pub trait SiteLogin: Send + Sync {
    /// Whether the procedure needs configured credentials.
    fn requires_credentials(&self) -> bool {
        false
    }

    /// Tells the operator where to configure missing credentials.
    fn credentials_hint(&self) -> String {
        String::new()
    }

    async fn login(&self, site: &str, credentials: Option<&SiteCredentials>) -> Result<SiteSession>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Manager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct WebCredentialSessionManager {
    store: ExpiringSessionStore<(), String, CookieJar>,
    sites: HashMap<String, Arc<dyn SiteLogin>>,
    credentials: Arc<dyn CredentialSource>,
    persistence: Arc<dyn SessionPersistence>,
    clock: Arc<dyn Clock>,
    renewal_margin_secs: i64,
}

impl WebCredentialSessionManager {
    pub async fn load(
        persistence: Arc<dyn SessionPersistence>,
        credentials: Arc<dyn CredentialSource>,
        sites: HashMap<String, Arc<dyn SiteLogin>>,
        clock: Arc<dyn Clock>,
        renewal_margin_secs: i64,
    ) -> Result<Self> {
        let now = clock.now();
        persistence.prune_expired(now).await?;
        let rows = persistence.load_web_sessions().await?;
        let (rows, skipped_expired) = retain_live(rows, now);
        let loaded = rows.len();

        let store = ExpiringSessionStore::new();
        store.replace_all(
            rows.into_iter()
                .map(|row| ((), row.site, SessionRecord::new(row.cookies, now, row.expires_at))),
        );

        TraceEvent::SessionsLoaded {
            kind: SessionKind::Web,
            loaded,
            skipped_expired,
        }
        .emit();

        Ok(Self {
            store,
            sites,
            credentials,
            persistence,
            clock,
            renewal_margin_secs,
        })
    }

    /// Build the manager with the sites declared in `config`, logging in
    /// through `transport` and reading credentials from the environment.
    pub async fn from_config(
        config: &SessionsConfig,
        transport: Arc<dyn CookieTransport>,
        persistence: Arc<dyn SessionPersistence>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let credentials = Arc::new(EnvCredentialSource::from_config(&config.sites));
        let sites = site_logins_from_config(&config.sites, transport);
        Self::load(
            persistence,
            credentials,
            sites,
            clock,
            config.web_renewal_margin_secs,
        )
        .await
    }

    /// Cookies for `site`, logging in when nothing usable is cached.
    pub async fn get_credentials(&self, site: &str) -> Result<CookieJar> {
        let key = site.to_owned();
        let now = self.clock.now();
        if let Some(record) = self
            .store
            .get_fresh(&(), &key, now, self.renewal_margin_secs)
        {
            return Ok(record.subject);
        }

        let login = self
            .sites
            .get(site)
            .cloned()
            .ok_or_else(|| Error::UnknownSite(site.to_owned()))?;

        let credentials = if login.requires_credentials() {
            match self.credentials.site_credentials(site).await? {
                Some(c) if !c.is_blank() => Some(c),
                _ => {
                    return Err(Error::SiteCredentialsMissing {
                        site: site.to_owned(),
                        hint: login.credentials_hint(),
                    })
                }
            }
        } else {
            None
        };

        tracing::debug!(site, "logging in to site");
        let session = login.login(site, credentials.as_ref()).await?;
        if session.ttl_secs <= 0 {
            return Err(Error::SiteLoginRejected {
                site: site.to_owned(),
                reason: format!("session lifetime {}s is not positive", session.ttl_secs),
            });
        }

        let now = self.clock.now();
        let expires_at = now.saturating_add(session.ttl_secs);

        self.persistence
            .save_web_session(&WebSessionRow {
                site: key.clone(),
                cookies: session.cookies.clone(),
                expires_at,
            })
            .await?;

        self.store.put(
            (),
            key,
            SessionRecord::new(session.cookies.clone(), now, expires_at),
        );

        TraceEvent::WebLoginCompleted {
            site: site.to_owned(),
            ttl_secs: session.ttl_secs,
        }
        .emit();

        Ok(session.cookies)
    }

    /// Drop the cached session for `site`; the next call logs in again.
    pub async fn forget(&self, site: &str) -> Result<()> {
        self.persistence.delete_web_session(site).await?;
        if self.store.delete(&(), &site.to_owned()) {
            TraceEvent::SessionDeleted {
                kind: SessionKind::Web,
                partition: site.to_owned(),
            }
            .emit();
        }
        Ok(())
    }

    /// Names of the sites with a registered login procedure.
    pub fn sites(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.sites.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Sweep for WebCredentialSessionManager {
    fn name(&self) -> &'static str {
        "web"
    }

    fn sweep_expired(&self) -> usize {
        self.store.sweep_expired(self.clock.now())
    }
}
