//! Login procedures for the two kinds of site we know how to talk to.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;

use ks_domain::config::{SiteConfig, SiteLoginConfig};
use ks_domain::error::{Error, Result};

use super::{CookieTransport, SiteCredentials, SiteLogin, SiteSession};

/// Fetch an acceptance URL and keep whatever cookies come back.
pub struct InterstitialLogin {
    transport: Arc<dyn CookieTransport>,
    url: String,
    ttl_secs: i64,
}

impl InterstitialLogin {
    pub fn new(transport: Arc<dyn CookieTransport>, url: impl Into<String>, ttl_secs: i64) -> Self {
        Self {
            transport,
            url: url.into(),
            ttl_secs,
        }
    }
}

#[async_trait]
impl SiteLogin for InterstitialLogin {
    async fn login(&self, _site: &str, _credentials: Option<&SiteCredentials>) -> Result<SiteSession> {
        let cookies = self.transport.get(&self.url).await?;
        Ok(SiteSession {
            cookies,
            ttl_secs: self.ttl_secs,
        })
    }
}

/// Post a login form and check the response for a session marker cookie.
pub struct FormLogin {
    transport: Arc<dyn CookieTransport>,
    url: String,
    username_field: String,
    password_field: String,
    extra_fields: BTreeMap<String, String>,
    marker_cookie: String,
    marker_substring: String,
    ttl_secs: i64,
    hint: String,
}

impl FormLogin {
    pub fn from_config(
        transport: Arc<dyn CookieTransport>,
        login: &SiteLoginConfig,
        ttl_secs: i64,
    ) -> Option<Self> {
        let SiteLoginConfig::Form {
            url,
            username_env,
            password_env,
            username_field,
            password_field,
            extra_fields,
            marker_cookie,
            marker_substring,
        } = login
        else {
            return None;
        };

        Some(Self {
            transport,
            url: url.clone(),
            username_field: username_field.clone(),
            password_field: password_field.clone(),
            extra_fields: extra_fields.clone(),
            marker_cookie: marker_cookie.clone(),
            marker_substring: marker_substring.clone(),
            ttl_secs,
            hint: format!("set {username_env} and {password_env}"),
        })
    }

    fn form(&self, credentials: &SiteCredentials) -> Vec<(String, String)> {
        let mut fields: Vec<(String, String)> = self
            .extra_fields
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        fields.push((self.username_field.clone(), credentials.username.clone()));
        fields.push((self.password_field.clone(), credentials.password.clone()));
        fields
    }
}

#[async_trait]
impl SiteLogin for FormLogin {
    fn requires_credentials(&self) -> bool {
        true
    }

    fn credentials_hint(&self) -> String {
        self.hint.clone()
    }

    async fn login(&self, site: &str, credentials: Option<&SiteCredentials>) -> Result<SiteSession> {
        let credentials = credentials.ok_or_else(|| Error::SiteCredentialsMissing {
            site: site.to_owned(),
            hint: self.hint.clone(),
        })?;

        let cookies = self
            .transport
            .post_form(&self.url, &self.form(credentials))
            .await?;

        let accepted = cookies
            .get(&self.marker_cookie)
            .is_some_and(|v| v.contains(self.marker_substring.as_str()));
        if !accepted {
            return Err(Error::SiteLoginRejected {
                site: site.to_owned(),
                reason: format!("no logged-in {} cookie in response", self.marker_cookie),
            });
        }

        Ok(SiteSession {
            cookies,
            ttl_secs: self.ttl_secs,
        })
    }
}

/// Build a login procedure for every configured site.
pub fn site_logins_from_config(
    sites: &[SiteConfig],
    transport: Arc<dyn CookieTransport>,
) -> HashMap<String, Arc<dyn SiteLogin>> {
    let mut logins: HashMap<String, Arc<dyn SiteLogin>> = HashMap::new();
    for site in sites {
        let ttl = site.effective_ttl_secs();
        let login: Arc<dyn SiteLogin> = match &site.login {
            SiteLoginConfig::Interstitial { url } => {
                Arc::new(InterstitialLogin::new(transport.clone(), url.clone(), ttl))
            }
            form @ SiteLoginConfig::Form { .. } => match FormLogin::from_config(transport.clone(), form, ttl) {
                Some(login) => Arc::new(login),
                None => continue,
            },
        };
        logins.insert(site.name.clone(), login);
    }
    logins
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeTransport;

    fn form_config() -> SiteLoginConfig {
        SiteLoginConfig::Form {
            url: "https://artboard.example/login.php".into(),
            username_env: "ART_ID".into(),
            password_env: "ART_PASS".into(),
            username_field: "pixiv_id".into(),
            password_field: "pass".into(),
            extra_fields: [("mode".to_owned(), "login".to_owned())].into_iter().collect(),
            marker_cookie: "PHPSESSID".into(),
            marker_substring: "_".into(),
        }
    }

    #[tokio::test]
    async fn form_login_posts_fields_and_accepts_marker() {
        let transport = Arc::new(FakeTransport::new());
        transport.respond_post(
            "https://artboard.example/login.php",
            [("PHPSESSID", "123_abc")].into_iter().collect(),
        );
        let login = FormLogin::from_config(transport.clone(), &form_config(), 600).unwrap();

        let session = login
            .login("artboard", Some(&SiteCredentials::new("me", "secret")))
            .await
            .unwrap();
        assert_eq!(session.ttl_secs, 600);
        assert_eq!(session.cookies.get("PHPSESSID"), Some("123_abc"));

        let posted = transport.posted_forms();
        assert_eq!(posted.len(), 1);
        let fields = &posted[0].1;
        assert!(fields.contains(&("mode".into(), "login".into())));
        assert!(fields.contains(&("pixiv_id".into(), "me".into())));
        assert!(fields.contains(&("pass".into(), "secret".into())));
    }

    #[tokio::test]
    async fn form_login_without_marker_is_rejected() {
        let transport = Arc::new(FakeTransport::new());
        // Anonymous PHP session: cookie present, no `_`.
        transport.respond_post(
            "https://artboard.example/login.php",
            [("PHPSESSID", "anon")].into_iter().collect(),
        );
        let login = FormLogin::from_config(transport, &form_config(), 600).unwrap();
        let err = login
            .login("artboard", Some(&SiteCredentials::new("me", "wrong")))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SiteLoginRejected { ref site, .. } if site == "artboard"));
    }

    #[tokio::test]
    async fn interstitial_keeps_cookies() {
        let transport = Arc::new(FakeTransport::new());
        transport.respond_get(
            "https://gallery.example/?enterAgree=1",
            [("YII_CSRF_TOKEN", "x")].into_iter().collect(),
        );
        let login = InterstitialLogin::new(transport, "https://gallery.example/?enterAgree=1", 3_600);
        assert!(!login.requires_credentials());
        let session = login.login("gallery", None).await.unwrap();
        assert_eq!(session.cookies.get("YII_CSRF_TOKEN"), Some("x"));
        assert_eq!(session.ttl_secs, 3_600);
    }

    #[test]
    fn builds_one_login_per_site() {
        let sites = vec![
            SiteConfig {
                name: "gallery".into(),
                login: SiteLoginConfig::Interstitial {
                    url: "https://gallery.example/".into(),
                },
                ttl_secs: None,
            },
            SiteConfig {
                name: "artboard".into(),
                login: form_config(),
                ttl_secs: None,
            },
        ];
        let logins = site_logins_from_config(&sites, Arc::new(FakeTransport::new()));
        assert_eq!(logins.len(), 2);
        assert!(logins["artboard"].requires_credentials());
        assert!(!logins["gallery"].requires_credentials());
        assert_eq!(logins["artboard"].credentials_hint(), "set ART_ID and ART_PASS");
    }
}
