use async_trait::async_trait;

use ks_domain::error::Result;
use ks_domain::{Account, AccountIdentifier, ServiceKey};

/// Looks up accounts in the service's account database.
///
/// Implementations return [`ks_domain::Error::AccountNotFound`] when the
/// identifier resolves to nothing; any other error is passed through to
/// the caller unchanged.
#[async_trait]
pub trait AccountResolver: Send + Sync {
    async fn resolve_account(
        &self,
        service_key: &ServiceKey,
        identifier: &AccountIdentifier,
    ) -> Result<Account>;
}
