//! Ephemeral credentials.
//!
//! A credential is issued for one logical operation: its hash is written to
//! the credential store, the plaintext is handed to exactly one scoped
//! callback, and the record is deleted when that scope ends, whether the
//! callback succeeded, failed, panicked or was cancelled.

mod broker;
pub mod secret;

pub use broker::{CredentialBroker, ScopedCredential};

use crate::storage::{NewCredentialRecord, ProviderKeyRow, Store, StoreError};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("Credential issuance failed: {reason}")]
    IssuanceFailed { reason: String },

    #[error("Credential already consumed")]
    AlreadyConsumed,

    #[error("Credential store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    Platform,
    ProviderProxy,
}

impl CredentialKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialKind::Platform => "platform",
            CredentialKind::ProviderProxy => "provider_proxy",
        }
    }
}

/// What an issued credential authorizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialScope {
    Platform {
        organization_id: String,
        label: String,
    },
    ProviderProxy {
        organization_id: String,
        provider_key_id: String,
        label: String,
    },
}

impl CredentialScope {
    pub fn platform(organization_id: impl Into<String>) -> Self {
        CredentialScope::Platform {
            organization_id: organization_id.into(),
            label: "auto-generated-experiment-key".to_string(),
        }
    }

    pub fn provider_proxy(
        organization_id: impl Into<String>,
        provider_key_id: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        CredentialScope::ProviderProxy {
            organization_id: organization_id.into(),
            provider_key_id: provider_key_id.into(),
            label: label.into(),
        }
    }

    pub fn kind(&self) -> CredentialKind {
        match self {
            CredentialScope::Platform { .. } => CredentialKind::Platform,
            CredentialScope::ProviderProxy { .. } => CredentialKind::ProviderProxy,
        }
    }

    pub fn organization_id(&self) -> &str {
        match self {
            CredentialScope::Platform {
                organization_id, ..
            }
            | CredentialScope::ProviderProxy {
                organization_id, ..
            } => organization_id,
        }
    }
}

/// Persistence the broker needs. Implemented by `Store`; tests wrap it to
/// count deletions.
pub trait CredentialStore: Send + Sync {
    fn organization_owner(&self, organization_id: &str) -> Result<Option<String>, StoreError>;

    fn provider_key(
        &self,
        organization_id: &str,
        provider_key_id: &str,
    ) -> Result<Option<ProviderKeyRow>, StoreError>;

    fn insert_credential_record(
        &self,
        record: &NewCredentialRecord<'_>,
    ) -> Result<String, StoreError>;

    /// Must be idempotent: deleting a missing record returns `Ok(false)`.
    fn delete_credential_record(&self, id: &str) -> Result<bool, StoreError>;
}

impl CredentialStore for Store {
    fn organization_owner(&self, organization_id: &str) -> Result<Option<String>, StoreError> {
        Store::organization_owner(self, organization_id)
    }

    fn provider_key(
        &self,
        organization_id: &str,
        provider_key_id: &str,
    ) -> Result<Option<ProviderKeyRow>, StoreError> {
        Store::provider_key(self, organization_id, provider_key_id)
    }

    fn insert_credential_record(
        &self,
        record: &NewCredentialRecord<'_>,
    ) -> Result<String, StoreError> {
        Store::insert_credential_record(self, record)
    }

    fn delete_credential_record(&self, id: &str) -> Result<bool, StoreError> {
        Store::delete_credential_record(self, id)
    }
}
