//! AWS account identity

use anyhow::{Context, Result};
use tracing::info;

/// Strongly-typed AWS account ID (12-digit string)
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::Display, derive_more::Deref)]
pub struct AccountId(String);

impl AccountId {
    /// Use an account ID supplied by the caller (`AWS_ACCOUNT_ID`) without an STS round-trip
    pub fn new(id: impl Into<String>) -> Self {
        AccountId(id.into())
    }
}

/// Fetch the current AWS account ID via STS GetCallerIdentity
///
/// Requires no special permissions. It succeeds whenever the credentials
/// are valid, so it doubles as a credential check.
pub async fn get_current_account_id(config: &aws_config::SdkConfig) -> Result<AccountId> {
    let sts = aws_sdk_sts::Client::new(config);
    let identity = sts
        .get_caller_identity()
        .send()
        .await
        .context("Failed to get AWS caller identity - check credentials")?;

    let account = identity
        .account()
        .context("No account ID returned from STS GetCallerIdentity")?;

    info!(account_id = %account, "AWS account validated");

    Ok(AccountId(account.to_string()))
}

/// Resolve the account ID from an explicit value or STS.
pub async fn resolve_account_id(
    explicit: Option<&str>,
    config: &aws_config::SdkConfig,
) -> Result<AccountId> {
    match explicit {
        Some(id) => Ok(AccountId::new(id)),
        None => get_current_account_id(config).await,
    }
}
