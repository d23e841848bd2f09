//! End-to-end behaviour of the session managers over in-memory
//! collaborators.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

use ks_domain::error::Error;
use ks_domain::rows::{AccountSessionRow, MessagingSessionRow, RemoteSessionRow, WebSessionRow};
use ks_domain::{
    Account, AccountIdentifier, AccountKey, CookieJar, ManualClock, ServiceKey, SessionToken,
    Timestamp,
};
use ks_sessions::testing::{CountingSiteLogin, ScriptedRemoteLogin, StaticAccountResolver};
use ks_sessions::web::StaticCredentialSource;
use ks_sessions::{
    ClientRemoteSessionManager, MemorySessionStore, ServerAccountSessionManager, SessionLifetime,
    SessionPersistence, SiteCredentials, SiteLogin, WebCredentialSessionManager,
};

const NOW: Timestamp = 1_700_000_000;
const DAY: i64 = 86_400;

fn svc() -> ServiceKey {
    ServiceKey::from("svc1")
}

struct Server {
    mgr: ServerAccountSessionManager,
    persistence: Arc<MemorySessionStore>,
    resolver: Arc<StaticAccountResolver>,
    clock: Arc<ManualClock>,
}

async fn server() -> Server {
    let persistence = Arc::new(MemorySessionStore::new());
    let resolver = Arc::new(
        StaticAccountResolver::new()
            .with_access_key("tok-abc", Account::new("alice", "Alice").with_permissions(&["read"]))
            .with_access_key("tok-bob", Account::new("bob", "Bob")),
    );
    let clock = Arc::new(ManualClock::new(NOW));
    let mgr = ServerAccountSessionManager::load(
        persistence.clone(),
        resolver.clone(),
        clock.clone(),
        SessionLifetime::default(),
    )
    .await
    .unwrap();
    Server {
        mgr,
        persistence,
        resolver,
        clock,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server account sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn create_then_authenticate() {
    let s = server().await;
    let (token, expires_at) = s.mgr.create_session(&svc(), "tok-abc").await.unwrap();
    assert_eq!(expires_at, NOW + 30 * DAY);

    let account = s.mgr.authenticate(&svc(), &token).unwrap();
    assert_eq!(account.key, AccountKey::from("alice"));

    let rows = s.persistence.snapshot().account;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].token, token);
    assert_eq!(rows[0].expires_at, expires_at);
}

#[tokio::test]
async fn token_is_scoped_to_its_service() {
    let s = server().await;
    let (token, _) = s.mgr.create_session(&svc(), "tok-abc").await.unwrap();
    assert!(matches!(
        s.mgr.authenticate(&ServiceKey::from("svc2"), &token),
        Err(Error::SessionExpiredOrUnknown)
    ));
}

#[tokio::test]
async fn aged_session_is_not_resurrected_by_refresh() {
    let s = server().await;
    let (token, _) = s.mgr.create_session(&svc(), "tok-abc").await.unwrap();

    // Age the persisted row past its expiry, then move the clock past it too.
    s.persistence.edit(|state| state.account[0].expires_at = NOW + 10);
    s.clock.advance(11);
    s.mgr.refresh_all().await.unwrap();

    assert!(matches!(
        s.mgr.authenticate(&svc(), &token),
        Err(Error::SessionExpiredOrUnknown)
    ));
    assert_eq!(s.mgr.session_count(&svc(), &AccountKey::from("alice")), 0);
    assert!(s.persistence.snapshot().account.is_empty());
}

#[tokio::test]
async fn expiry_boundary_counts_as_expired() {
    let s = server().await;
    let (token, expires_at) = s.mgr.create_session(&svc(), "tok-abc").await.unwrap();

    s.clock.set(expires_at - 1);
    assert!(s.mgr.authenticate(&svc(), &token).is_ok());
    s.clock.set(expires_at);
    assert!(s.mgr.authenticate(&svc(), &token).is_err());
}

#[tokio::test]
async fn invalidate_pushes_new_account_into_every_session() {
    let s = server().await;
    let mut tokens = Vec::new();
    for _ in 0..5 {
        tokens.push(s.mgr.create_session(&svc(), "tok-abc").await.unwrap());
    }
    let (bob_token, _) = s.mgr.create_session(&svc(), "tok-bob").await.unwrap();
    assert_eq!(s.mgr.session_count(&svc(), &AccountKey::from("alice")), 5);

    s.resolver
        .set_account(Account::new("alice", "Alice").with_permissions(&["read", "admin"]));
    s.clock.advance(DAY);
    let updated = s
        .mgr
        .invalidate_accounts(&svc(), &[AccountIdentifier::AccountKey("alice".into())])
        .await
        .unwrap();
    assert_eq!(updated, 5);

    for (token, _) in &tokens {
        let account = s.mgr.authenticate(&svc(), token).unwrap();
        assert_eq!(account.permissions, vec!["read", "admin"]);
    }
    assert!(s.mgr.authenticate(&svc(), &bob_token).unwrap().permissions.is_empty());

    // Expiry is untouched.
    let (_, expires_at) = tokens[0];
    s.clock.set(expires_at);
    assert!(s.mgr.authenticate(&svc(), &tokens[0].0).is_err());
}

#[tokio::test]
async fn cached_account_wins_until_invalidated() {
    let s = server().await;
    let (first, _) = s.mgr.create_session(&svc(), "tok-abc").await.unwrap();
    s.resolver
        .set_account(Account::new("alice", "Alice").with_permissions(&["admin"]));

    // A new login reuses the cached account rather than the fresh lookup.
    let (second, _) = s.mgr.create_session(&svc(), "tok-abc").await.unwrap();
    assert_eq!(s.mgr.authenticate(&svc(), &second).unwrap().permissions, vec!["read"]);

    s.mgr
        .invalidate_accounts(&svc(), &[AccountIdentifier::AccessKey("tok-abc".into())])
        .await
        .unwrap();
    for token in [first, second] {
        assert_eq!(s.mgr.authenticate(&svc(), &token).unwrap().permissions, vec!["admin"]);
    }

    let (third, _) = s.mgr.create_session(&svc(), "tok-abc").await.unwrap();
    assert_eq!(s.mgr.authenticate(&svc(), &third).unwrap().permissions, vec!["admin"]);
}

#[tokio::test]
async fn failed_lookup_leaves_batch_untouched() {
    let s = server().await;
    let (token, _) = s.mgr.create_session(&svc(), "tok-abc").await.unwrap();
    s.resolver
        .set_account(Account::new("alice", "Alice").with_permissions(&["admin"]));

    let err = s
        .mgr
        .invalidate_accounts(
            &svc(),
            &[
                AccountIdentifier::AccountKey("alice".into()),
                AccountIdentifier::AccountKey("ghost".into()),
            ],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AccountNotFound));
    assert_eq!(
        s.mgr.authenticate(&svc(), &token).unwrap().permissions,
        vec!["read"]
    );
}

#[tokio::test]
async fn revoked_permission_stays_revoked_after_reload() {
    let s = server().await;
    s.resolver
        .set_account(Account::new("alice", "Alice").with_permissions(&["admin"]));
    s.mgr
        .invalidate_accounts(&svc(), &[AccountIdentifier::AccountKey("alice".into())])
        .await
        .unwrap();
    let (token, expires_at) = s.mgr.create_session(&svc(), "tok-abc").await.unwrap();
    assert_eq!(s.mgr.authenticate(&svc(), &token).unwrap().permissions, vec!["admin"]);

    s.resolver.set_account(Account::new("alice", "Alice"));
    s.clock.advance(DAY);
    s.mgr
        .invalidate_accounts(&svc(), &[AccountIdentifier::AccountKey("alice".into())])
        .await
        .unwrap();

    let rows = s.persistence.snapshot().account;
    assert!(rows[0].account.permissions.is_empty());
    assert_eq!(rows[0].expires_at, expires_at);

    s.mgr.refresh_all().await.unwrap();
    assert!(s.mgr.authenticate(&svc(), &token).unwrap().permissions.is_empty());

    let restarted = ServerAccountSessionManager::load(
        s.persistence.clone(),
        s.resolver.clone(),
        s.clock.clone(),
        SessionLifetime::default(),
    )
    .await
    .unwrap();
    assert!(restarted.authenticate(&svc(), &token).unwrap().permissions.is_empty());
}

#[tokio::test]
async fn failed_refresh_write_keeps_old_account() {
    let s = server().await;
    let (token, _) = s.mgr.create_session(&svc(), "tok-abc").await.unwrap();
    s.resolver.set_account(Account::new("alice", "Alice"));
    s.persistence.set_fail_writes(true);

    let err = s
        .mgr
        .invalidate_accounts(&svc(), &[AccountIdentifier::AccountKey("alice".into())])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Persistence(_)));
    assert_eq!(s.mgr.authenticate(&svc(), &token).unwrap().permissions, vec!["read"]);
}

/// Persistence whose next account write parks until released.
struct GatedStore {
    inner: MemorySessionStore,
    armed: AtomicBool,
    entered: Notify,
    release: Notify,
}

impl GatedStore {
    fn new() -> Self {
        Self {
            inner: MemorySessionStore::new(),
            armed: AtomicBool::new(false),
            entered: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait::async_trait]
impl SessionPersistence for GatedStore {
    async fn load_account_sessions(&self) -> ks_domain::Result<Vec<AccountSessionRow>> {
        self.inner.load_account_sessions().await
    }

    async fn save_account_session(&self, row: &AccountSessionRow) -> ks_domain::Result<()> {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.inner.save_account_session(row).await
    }

    async fn delete_account_session(
        &self,
        service_key: &ServiceKey,
        token: &SessionToken,
    ) -> ks_domain::Result<()> {
        self.inner.delete_account_session(service_key, token).await
    }

    async fn load_messaging_sessions(&self) -> ks_domain::Result<Vec<MessagingSessionRow>> {
        self.inner.load_messaging_sessions().await
    }

    async fn save_messaging_session(&self, row: &MessagingSessionRow) -> ks_domain::Result<()> {
        self.inner.save_messaging_session(row).await
    }

    async fn load_remote_sessions(&self) -> ks_domain::Result<Vec<RemoteSessionRow>> {
        self.inner.load_remote_sessions().await
    }

    async fn save_remote_session(&self, row: &RemoteSessionRow) -> ks_domain::Result<()> {
        self.inner.save_remote_session(row).await
    }

    async fn delete_remote_session(&self, service_key: &ServiceKey) -> ks_domain::Result<()> {
        self.inner.delete_remote_session(service_key).await
    }

    async fn load_web_sessions(&self) -> ks_domain::Result<Vec<WebSessionRow>> {
        self.inner.load_web_sessions().await
    }

    async fn save_web_session(&self, row: &WebSessionRow) -> ks_domain::Result<()> {
        self.inner.save_web_session(row).await
    }

    async fn delete_web_session(&self, site: &str) -> ks_domain::Result<()> {
        self.inner.delete_web_session(site).await
    }

    async fn prune_expired(&self, now: Timestamp) -> ks_domain::Result<usize> {
        self.inner.prune_expired(now).await
    }
}

#[tokio::test]
async fn login_racing_a_permission_change_gets_the_new_account() {
    let store = Arc::new(GatedStore::new());
    let resolver = Arc::new(StaticAccountResolver::new().with_access_key(
        "tok-abc",
        Account::new("alice", "Alice").with_permissions(&["admin"]),
    ));
    let mgr = Arc::new(
        ServerAccountSessionManager::load(
            store.clone(),
            resolver.clone(),
            Arc::new(ManualClock::new(NOW)),
            SessionLifetime::default(),
        )
        .await
        .unwrap(),
    );

    store.armed.store(true, Ordering::SeqCst);
    let create = tokio::spawn({
        let mgr = mgr.clone();
        async move { mgr.create_session(&svc(), "tok-abc").await }
    });
    store.entered.notified().await;

    // The login is parked mid-write with the old account.
    resolver.set_account(Account::new("alice", "Alice"));
    let invalidate = tokio::spawn({
        let mgr = mgr.clone();
        async move {
            mgr.invalidate_accounts(&svc(), &[AccountIdentifier::AccountKey("alice".into())])
                .await
        }
    });
    tokio::task::yield_now().await;
    store.release.notify_one();

    let (token, _) = create.await.unwrap().unwrap();
    assert_eq!(invalidate.await.unwrap().unwrap(), 1);
    assert!(mgr.authenticate(&svc(), &token).unwrap().permissions.is_empty());

    mgr.refresh_all().await.unwrap();
    assert!(mgr.authenticate(&svc(), &token).unwrap().permissions.is_empty());
}

#[tokio::test]
async fn restart_rehydrates_live_sessions() {
    let s = server().await;
    let (token, _) = s.mgr.create_session(&svc(), "tok-abc").await.unwrap();

    let reloaded = ServerAccountSessionManager::load(
        s.persistence.clone(),
        s.resolver.clone(),
        s.clock.clone(),
        SessionLifetime::default(),
    )
    .await
    .unwrap();
    assert_eq!(
        reloaded.authenticate(&svc(), &token).unwrap().key,
        AccountKey::from("alice")
    );
    assert_eq!(reloaded.session_count(&svc(), &AccountKey::from("alice")), 1);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client remote sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const KEY: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

async fn remote(
    login: Arc<ScriptedRemoteLogin>,
) -> (ClientRemoteSessionManager, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(NOW));
    let mgr = ClientRemoteSessionManager::load(
        Arc::new(MemorySessionStore::new()),
        login,
        clock.clone(),
        SessionLifetime::new(30 * DAY, 600),
    )
    .await
    .unwrap();
    (mgr, clock)
}

#[tokio::test]
async fn renews_only_inside_margin() {
    let login = Arc::new(ScriptedRemoteLogin::always(KEY));
    let (mgr, clock) = remote(login.clone()).await;
    let remote1 = ServiceKey::from("remote1");

    mgr.get_session_token(&remote1).await.unwrap();
    assert_eq!(login.calls(), 1);

    // 601 seconds left: still fresh.
    clock.set(NOW + 30 * DAY - 601);
    mgr.get_session_token(&remote1).await.unwrap();
    assert_eq!(login.calls(), 1);

    // 599 seconds left: renegotiate.
    clock.set(NOW + 30 * DAY - 599);
    mgr.get_session_token(&remote1).await.unwrap();
    assert_eq!(login.calls(), 2);
}

#[tokio::test]
async fn malformed_session_key_fails_negotiation() {
    let login = Arc::new(ScriptedRemoteLogin::new());
    login.push_key("not-hex", None);
    let (mgr, _) = remote(login).await;
    let err = mgr
        .get_session_token(&ServiceKey::from("remote1"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SessionNegotiationFailed(_)));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Web credential sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct FormSite(CountingSiteLogin);

#[async_trait::async_trait]
impl SiteLogin for FormSite {
    fn requires_credentials(&self) -> bool {
        true
    }

    fn credentials_hint(&self) -> String {
        "set ART_ID and ART_PASS".into()
    }

    async fn login(
        &self,
        site: &str,
        credentials: Option<&SiteCredentials>,
    ) -> ks_domain::Result<ks_sessions::SiteSession> {
        assert!(credentials.is_some());
        self.0.login(site, credentials).await
    }
}

fn jar() -> CookieJar {
    [("PHPSESSID", "123_abc")].into_iter().collect()
}

async fn web(
    sites: HashMap<String, Arc<dyn SiteLogin>>,
    credentials: StaticCredentialSource,
) -> (WebCredentialSessionManager, Arc<MemorySessionStore>, Arc<ManualClock>) {
    let persistence = Arc::new(MemorySessionStore::new());
    let clock = Arc::new(ManualClock::new(NOW));
    let mgr = WebCredentialSessionManager::load(
        persistence.clone(),
        Arc::new(credentials),
        sites,
        clock.clone(),
        300,
    )
    .await
    .unwrap();
    (mgr, persistence, clock)
}

#[tokio::test]
async fn web_login_runs_once_per_ttl() {
    let login = Arc::new(CountingSiteLogin::new(jar(), 3_600));
    let sites: HashMap<String, Arc<dyn SiteLogin>> =
        [("gallery".to_owned(), login.clone() as Arc<dyn SiteLogin>)].into_iter().collect();
    let (mgr, persistence, clock) = web(sites, StaticCredentialSource::new()).await;

    let first = mgr.get_credentials("gallery").await.unwrap();
    assert_eq!(login.calls(), 1);

    let second = mgr.get_credentials("gallery").await.unwrap();
    assert_eq!(first, second);
    assert_eq!(login.calls(), 1);

    // Within the 300s margin of the hour.
    clock.advance(3_600 - 300);
    mgr.get_credentials("gallery").await.unwrap();
    assert_eq!(login.calls(), 2);
    assert_eq!(persistence.snapshot().web.len(), 1);
}

#[tokio::test]
async fn unknown_site_is_rejected() {
    let (mgr, _, _) = web(HashMap::new(), StaticCredentialSource::new()).await;
    assert!(matches!(
        mgr.get_credentials("nowhere").await,
        Err(Error::UnknownSite(ref s)) if s == "nowhere"
    ));
}

#[tokio::test]
async fn missing_credentials_name_the_hint() {
    let sites: HashMap<String, Arc<dyn SiteLogin>> = [(
        "artboard".to_owned(),
        Arc::new(FormSite(CountingSiteLogin::new(jar(), 3_600))) as Arc<dyn SiteLogin>,
    )]
    .into_iter()
    .collect();

    let (mgr, _, _) = web(sites.clone(), StaticCredentialSource::new()).await;
    match mgr.get_credentials("artboard").await {
        Err(Error::SiteCredentialsMissing { site, hint }) => {
            assert_eq!(site, "artboard");
            assert!(hint.contains("ART_ID"));
        }
        other => panic!("expected SiteCredentialsMissing, got {other:?}"),
    }

    // Blank credentials count as missing too.
    let blank = StaticCredentialSource::new().with("artboard", SiteCredentials::new("", ""));
    let (mgr, _, _) = web(sites.clone(), blank).await;
    assert!(matches!(
        mgr.get_credentials("artboard").await,
        Err(Error::SiteCredentialsMissing { .. })
    ));

    let configured = StaticCredentialSource::new().with("artboard", SiteCredentials::new("me", "pw"));
    let (mgr, _, _) = web(sites, configured).await;
    assert!(mgr.get_credentials("artboard").await.is_ok());
}

#[tokio::test]
async fn login_without_a_positive_lifetime_is_rejected() {
    for ttl in [0, -60] {
        let login = Arc::new(CountingSiteLogin::new(jar(), ttl));
        let sites: HashMap<String, Arc<dyn SiteLogin>> =
            [("gallery".to_owned(), login.clone() as Arc<dyn SiteLogin>)].into_iter().collect();
        let (mgr, persistence, _) = web(sites, StaticCredentialSource::new()).await;

        assert!(matches!(
            mgr.get_credentials("gallery").await,
            Err(Error::SiteLoginRejected { ref site, .. }) if site == "gallery"
        ));
        assert!(persistence.snapshot().web.is_empty());

        // Nothing was cached, so the next call logs in again.
        assert!(mgr.get_credentials("gallery").await.is_err());
        assert_eq!(login.calls(), 2);
    }
}

#[tokio::test]
async fn failed_login_caches_nothing() {
    let login = Arc::new(CountingSiteLogin::new(jar(), 3_600));
    login.set_fail(true);
    let sites: HashMap<String, Arc<dyn SiteLogin>> =
        [("gallery".to_owned(), login.clone() as Arc<dyn SiteLogin>)].into_iter().collect();
    let (mgr, persistence, _) = web(sites, StaticCredentialSource::new()).await;

    assert!(matches!(
        mgr.get_credentials("gallery").await,
        Err(Error::SiteLoginRejected { .. })
    ));
    assert!(persistence.snapshot().web.is_empty());

    login.set_fail(false);
    mgr.get_credentials("gallery").await.unwrap();
    assert_eq!(login.calls(), 2);
}
