//! Wires every session manager from one [`SessionsConfig`].
//!
//! Embedders supply the collaborators (persistence, account directory,
//! remote login and HTTP transport); lifetimes, margins and the site
//! registry come from config.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use ks_domain::config::{ConfigSeverity, SessionsConfig};
use ks_domain::error::{Error, Result};
use ks_domain::Clock;

use crate::api::ApiSessionManager;
use crate::lifecycle::SessionLifetime;
use crate::messaging::MessagingSessionManager;
use crate::persist::SessionPersistence;
use crate::remote::{ClientRemoteSessionManager, RemoteLogin};
use crate::resolver::AccountResolver;
use crate::server::ServerAccountSessionManager;
use crate::sweep::{spawn_sweeper, Sweep};
use crate::web::{CookieTransport, WebCredentialSessionManager};

/// External dependencies the managers are built over.
#[derive(Clone)]
pub struct SessionCollaborators {
    pub persistence: Arc<dyn SessionPersistence>,
    pub resolver: Arc<dyn AccountResolver>,
    pub remote_login: Arc<dyn RemoteLogin>,
    pub transport: Arc<dyn CookieTransport>,
    pub clock: Arc<dyn Clock>,
}

/// All managers, hydrated and ready to share.
pub struct SessionManagers {
    pub accounts: Arc<ServerAccountSessionManager>,
    pub messaging: Arc<MessagingSessionManager>,
    pub remote: Arc<ClientRemoteSessionManager>,
    pub web: Arc<WebCredentialSessionManager>,
    pub api: Arc<ApiSessionManager>,
    persistence: Arc<dyn SessionPersistence>,
    clock: Arc<dyn Clock>,
}

impl SessionManagers {
    /// Validate `config`, then build and hydrate every manager.  A config
    /// with validation errors is rejected before anything is loaded.
    pub async fn build(config: &SessionsConfig, deps: SessionCollaborators) -> Result<Self> {
        let mut errors = Vec::new();
        for issue in config.validate() {
            match issue.severity {
                ConfigSeverity::Error => errors.push(issue.to_string()),
                ConfigSeverity::Warning => tracing::warn!(field = %issue.field, "{}", issue.message),
            }
        }
        if !errors.is_empty() {
            return Err(Error::Config(errors.join("; ")));
        }

        let accounts = ServerAccountSessionManager::load(
            deps.persistence.clone(),
            deps.resolver.clone(),
            deps.clock.clone(),
            SessionLifetime::server(config),
        )
        .await?;

        let messaging = MessagingSessionManager::load(
            deps.persistence.clone(),
            deps.resolver.clone(),
            deps.clock.clone(),
            SessionLifetime::messaging(config),
        )
        .await?;

        let remote = ClientRemoteSessionManager::load(
            deps.persistence.clone(),
            deps.remote_login.clone(),
            deps.clock.clone(),
            SessionLifetime::client(config),
        )
        .await?;

        let web = WebCredentialSessionManager::from_config(
            config,
            deps.transport.clone(),
            deps.persistence.clone(),
            deps.clock.clone(),
        )
        .await?;

        let api = ApiSessionManager::new(deps.clock.clone(), config.api_session_expiry_secs);

        tracing::info!(sites = config.sites.len(), "session managers ready");

        Ok(Self {
            accounts: Arc::new(accounts),
            messaging: Arc::new(messaging),
            remote: Arc::new(remote),
            web: Arc::new(web),
            api: Arc::new(api),
            persistence: deps.persistence,
            clock: deps.clock,
        })
    }

    pub fn sweepable(&self) -> Vec<Arc<dyn Sweep>> {
        vec![
            self.accounts.clone() as Arc<dyn Sweep>,
            self.messaging.clone() as Arc<dyn Sweep>,
            self.remote.clone() as Arc<dyn Sweep>,
            self.web.clone() as Arc<dyn Sweep>,
            self.api.clone() as Arc<dyn Sweep>,
        ]
    }

    /// Start the background sweep if `sweep_interval_secs` is set.
    pub fn spawn_sweeper(
        &self,
        config: &SessionsConfig,
        shutdown: Arc<Notify>,
    ) -> Option<JoinHandle<()>> {
        let secs = config.sweep_interval_secs.filter(|s| *s > 0)?;
        tracing::info!(interval_secs = secs, "session sweeper started");
        Some(spawn_sweeper(
            self.sweepable(),
            self.persistence.clone(),
            self.clock.clone(),
            Duration::from_secs(secs),
            shutdown,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::MemorySessionStore;
    use crate::testing::{FakeTransport, ScriptedRemoteLogin, StaticAccountResolver};
    use ks_domain::config::{SiteConfig, SiteLoginConfig};
    use ks_domain::{Account, ManualClock, ServiceKey};

    fn deps() -> SessionCollaborators {
        SessionCollaborators {
            persistence: Arc::new(MemorySessionStore::new()),
            resolver: Arc::new(
                StaticAccountResolver::new().with_access_key("tok-abc", Account::new("alice", "Alice")),
            ),
            remote_login: Arc::new(ScriptedRemoteLogin::new()),
            transport: Arc::new(FakeTransport::new()),
            clock: Arc::new(ManualClock::new(1_700_000_000)),
        }
    }

    #[tokio::test]
    async fn builds_managers_from_defaults() {
        let config = SessionsConfig::default();
        let managers = SessionManagers::build(&config, deps()).await.unwrap();

        let svc = ServiceKey::from("svc1");
        let (token, expires_at) = managers.accounts.create_session(&svc, "tok-abc").await.unwrap();
        assert_eq!(expires_at, 1_700_000_000 + config.server_lifetime_secs);
        assert!(managers.accounts.authenticate(&svc, &token).is_ok());
        assert!(managers.web.sites().is_empty());
        assert_eq!(managers.sweepable().len(), 5);
    }

    #[tokio::test]
    async fn rejects_invalid_lifetimes() {
        let mut config = SessionsConfig::default();
        config.server_lifetime_secs = 0;
        let Err(err) = SessionManagers::build(&config, deps()).await else {
            panic!("zero lifetime accepted");
        };
        assert!(matches!(&err, Error::Config(msg) if msg.contains("server_lifetime_secs")));
    }

    #[tokio::test]
    async fn rejects_zero_site_ttl() {
        let mut config = SessionsConfig::default();
        config.sites.push(SiteConfig {
            name: "gallery".into(),
            login: SiteLoginConfig::Interstitial {
                url: "https://gallery.example/enter".into(),
            },
            ttl_secs: Some(0),
        });
        assert!(matches!(
            SessionManagers::build(&config, deps()).await,
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn sweeper_only_when_configured() {
        let mut config = SessionsConfig::default();
        let managers = SessionManagers::build(&config, deps()).await.unwrap();
        let shutdown = Arc::new(Notify::new());
        assert!(managers.spawn_sweeper(&config, shutdown.clone()).is_none());

        config.sweep_interval_secs = Some(60);
        let handle = managers.spawn_sweeper(&config, shutdown.clone()).unwrap();
        shutdown.notify_one();
        handle.await.unwrap();
    }
}
