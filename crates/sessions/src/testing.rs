//! In-memory collaborators for tests and local tooling.
//!
//! None of these talk to the network.  The login doubles count their calls
//! so a test can assert how often a manager went past its cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use ks_domain::error::{Error, Result};
use ks_domain::{Account, AccountIdentifier, AccountKey, CookieJar, ServiceKey, Timestamp};

use crate::remote::{RemoteLogin, RemoteLoginResponse};
use crate::resolver::AccountResolver;
use crate::web::{CookieTransport, SiteCredentials, SiteLogin, SiteSession};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Accounts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Account directory backed by a map.  The same accounts answer for
/// every service.
#[derive(Default)]
pub struct StaticAccountResolver {
    /// access key → account key
    access_keys: Mutex<HashMap<String, AccountKey>>,
    accounts: Mutex<HashMap<AccountKey, Account>>,
}

impl StaticAccountResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_access_key(self, access_key: &str, account: Account) -> Self {
        self.access_keys
            .lock()
            .insert(access_key.to_owned(), account.key.clone());
        self.set_account(account);
        self
    }

    /// Add or replace an account, e.g. after a permission change.
    pub fn set_account(&self, account: Account) {
        self.accounts.lock().insert(account.key.clone(), account);
    }
}

#[async_trait]
impl AccountResolver for StaticAccountResolver {
    async fn resolve_account(
        &self,
        _service_key: &ServiceKey,
        identifier: &AccountIdentifier,
    ) -> Result<Account> {
        let key = match identifier {
            AccountIdentifier::AccessKey(access_key) => self
                .access_keys
                .lock()
                .get(access_key)
                .cloned()
                .ok_or(Error::AccountNotFound)?,
            AccountIdentifier::AccountKey(key) => key.clone(),
        };
        self.accounts
            .lock()
            .get(&key)
            .cloned()
            .ok_or(Error::AccountNotFound)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Remote services
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Remote login that answers from a queue of scripted responses and then
/// repeats its fallback.
#[derive(Default)]
pub struct ScriptedRemoteLogin {
    queue: Mutex<Vec<Result<RemoteLoginResponse>>>,
    fallback: Mutex<Option<RemoteLoginResponse>>,
    calls: AtomicUsize,
}

impl ScriptedRemoteLogin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always hand back `session_key` (hex) with no expiry hint.
    pub fn always(session_key: &str) -> Self {
        let login = Self::new();
        *login.fallback.lock() = Some(RemoteLoginResponse {
            session_key: Some(session_key.to_owned()),
            expires_hint: None,
        });
        login
    }

    /// Queue a one-off response, served before the fallback.
    pub fn push(&self, response: Result<RemoteLoginResponse>) {
        self.queue.lock().push(response);
    }

    pub fn push_key(&self, session_key: &str, expires_hint: Option<Timestamp>) {
        self.push(Ok(RemoteLoginResponse {
            session_key: Some(session_key.to_owned()),
            expires_hint,
        }));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteLogin for ScriptedRemoteLogin {
    async fn request_session(&self, service_key: &ServiceKey) -> Result<RemoteLoginResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        {
            let mut queue = self.queue.lock();
            if !queue.is_empty() {
                return queue.remove(0);
            }
        }
        self.fallback
            .lock()
            .clone()
            .ok_or_else(|| Error::Http(format!("{service_key}: connection refused")))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Web
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Cookie transport with canned responses per URL.  Unknown URLs fail.
#[derive(Default)]
pub struct FakeTransport {
    gets: Mutex<HashMap<String, CookieJar>>,
    posts: Mutex<HashMap<String, CookieJar>>,
    posted: Mutex<Vec<(String, Vec<(String, String)>)>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond_get(&self, url: &str, cookies: CookieJar) {
        self.gets.lock().insert(url.to_owned(), cookies);
    }

    pub fn respond_post(&self, url: &str, cookies: CookieJar) {
        self.posts.lock().insert(url.to_owned(), cookies);
    }

    /// Every form posted so far, with its URL.
    pub fn posted_forms(&self) -> Vec<(String, Vec<(String, String)>)> {
        self.posted.lock().clone()
    }
}

#[async_trait]
impl CookieTransport for FakeTransport {
    async fn get(&self, url: &str) -> Result<CookieJar> {
        self.gets
            .lock()
            .get(url)
            .cloned()
            .ok_or_else(|| Error::Http(format!("GET {url}: 404")))
    }

    async fn post_form(&self, url: &str, fields: &[(String, String)]) -> Result<CookieJar> {
        self.posted.lock().push((url.to_owned(), fields.to_vec()));
        self.posts
            .lock()
            .get(url)
            .cloned()
            .ok_or_else(|| Error::Http(format!("POST {url}: 404")))
    }
}

/// Site login that hands back a fixed jar and counts how often it ran.
pub struct CountingSiteLogin {
    cookies: CookieJar,
    ttl_secs: i64,
    fail: Mutex<bool>,
    calls: AtomicUsize,
}

impl CountingSiteLogin {
    pub fn new(cookies: CookieJar, ttl_secs: i64) -> Self {
        Self {
            cookies,
            ttl_secs,
            fail: Mutex::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    /// Make subsequent logins get rejected (or succeed again).
    pub fn set_fail(&self, fail: bool) {
        *self.fail.lock() = fail;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SiteLogin for CountingSiteLogin {
    async fn login(&self, site: &str, _credentials: Option<&SiteCredentials>) -> Result<SiteSession> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail.lock() {
            return Err(Error::SiteLoginRejected {
                site: site.to_owned(),
                reason: "scripted failure".into(),
            });
        }
        Ok(SiteSession {
            cookies: self.cookies.clone(),
            ttl_secs: self.ttl_secs,
        })
    }
}
