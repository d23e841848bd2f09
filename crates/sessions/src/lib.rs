//! Session management for Keystone.
//!
//! A family of in-memory, time-expiring session caches built on one shared
//! primitive, [`ExpiringSessionStore`]:
//!
//! - [`ServerAccountSessionManager`]: session token → account, per service.
//! - [`MessagingSessionManager`]: session token → (identity, display name).
//! - [`ClientRemoteSessionManager`]: one outbound session per remote service,
//!   renegotiated before it expires.
//! - [`WebCredentialSessionManager`]: cookie jars for third-party sites.
//! - [`ApiSessionManager`]: short-lived keys for client API access keys.
//!
//! Expiry is lazy: a record past its expiry is evicted by the read that
//! finds it.  [`spawn_sweeper`] optionally reclaims untouched records.
//! Mutations that must survive a restart are written through
//! [`SessionPersistence`] before they become visible in memory.

pub mod api;
pub mod bootstrap;
pub mod lifecycle;
pub mod messaging;
pub mod persist;
pub mod record;
pub mod remote;
pub mod resolver;
pub mod server;
pub mod store;
pub mod sweep;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod web;

pub use api::ApiSessionManager;
pub use bootstrap::{SessionCollaborators, SessionManagers};
pub use lifecycle::SessionLifetime;
pub use messaging::{MessagingSessionManager, MessagingSubject};
pub use persist::{JsonFileSessionStore, MemorySessionStore, SessionPersistence, SessionState};
pub use record::SessionRecord;
pub use remote::{ClientRemoteSessionManager, RemoteLogin, RemoteLoginResponse};
pub use resolver::AccountResolver;
pub use server::ServerAccountSessionManager;
pub use store::ExpiringSessionStore;
pub use sweep::{spawn_sweeper, sweep_all, Sweep};
pub use web::{
    CookieTransport, CredentialSource, SiteCredentials, SiteLogin, SiteSession,
    WebCredentialSessionManager,
};
