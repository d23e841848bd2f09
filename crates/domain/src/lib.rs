//! Shared types for the Keystone session subsystem.
//!
//! Everything the session managers, persistence backends, and the operator
//! CLI agree on lives here: token and key newtypes, persisted row shapes,
//! the shared error enum, structured trace events, the clock abstraction,
//! and the TOML configuration tree.

pub mod clock;
pub mod config;
pub mod error;
pub mod rows;
pub mod trace;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use error::{Error, Result};
pub use types::{
    Account, AccountIdentifier, AccountKey, CookieJar, Identity, ServiceKey, SessionToken,
};
