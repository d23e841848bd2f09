use std::collections::HashMap;

use async_trait::async_trait;

use ks_domain::config::{SiteConfig, SiteLoginConfig};
use ks_domain::error::Result;

use super::{CredentialSource, SiteCredentials};

/// Reads site credentials from the environment variables each site's
/// config names.  Variables are read on every lookup, so rotating a
/// password does not need a restart.
#[derive(Debug, Clone, Default)]
pub struct EnvCredentialSource {
    /// site → (username env var, password env var)
    vars: HashMap<String, (String, String)>,
}

impl EnvCredentialSource {
    pub fn from_config(sites: &[SiteConfig]) -> Self {
        let vars = sites
            .iter()
            .filter_map(|site| match &site.login {
                SiteLoginConfig::Form {
                    username_env,
                    password_env,
                    ..
                } => Some((site.name.clone(), (username_env.clone(), password_env.clone()))),
                SiteLoginConfig::Interstitial { .. } => None,
            })
            .collect();
        Self { vars }
    }
}

#[async_trait]
impl CredentialSource for EnvCredentialSource {
    async fn site_credentials(&self, site: &str) -> Result<Option<SiteCredentials>> {
        let Some((user_var, pass_var)) = self.vars.get(site) else {
            return Ok(None);
        };
        let username = std::env::var(user_var).unwrap_or_default();
        let password = std::env::var(pass_var).unwrap_or_default();
        let creds = SiteCredentials::new(username, password);
        Ok((!creds.is_blank()).then_some(creds))
    }
}

/// Fixed credentials, for tests and for embedders with their own secret
/// storage.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialSource {
    creds: HashMap<String, SiteCredentials>,
}

impl StaticCredentialSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, site: &str, credentials: SiteCredentials) -> Self {
        self.creds.insert(site.to_owned(), credentials);
        self
    }
}

#[async_trait]
impl CredentialSource for StaticCredentialSource {
    async fn site_credentials(&self, site: &str) -> Result<Option<SiteCredentials>> {
        Ok(self.creds.get(site).cloned())
    }
}
