/// Shared error type used across all Keystone crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("config: {0}")]
    Config(String),

    /// The supplied access credential does not resolve to any account.
    #[error("credential does not resolve to an account")]
    CredentialInvalid,

    /// The token was never issued, was deleted, or is past its expiry.
    /// The three cases are reported identically.
    #[error("session expired or unknown")]
    SessionExpiredOrUnknown,

    #[error("session negotiation failed: {0}")]
    SessionNegotiationFailed(String),

    #[error("login to {site} rejected: {reason}")]
    SiteLoginRejected { site: String, reason: String },

    #[error("credentials for {site} are not configured ({hint})")]
    SiteCredentialsMissing { site: String, hint: String },

    #[error("no login procedure registered for site {0:?}")]
    UnknownSite(String),

    /// Raised by account resolvers; managers translate it for callers.
    #[error("account not found")]
    AccountNotFound,

    #[error("persistence: {0}")]
    Persistence(String),
}

pub type Result<T> = std::result::Result<T, Error>;
