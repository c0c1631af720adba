use super::secret::{generate_platform_key, generate_proxy_key, hash_secret};
use super::{CredentialError, CredentialKind, CredentialScope, CredentialStore};
use crate::storage::NewCredentialRecord;
use std::future::Future;
use std::sync::{Arc, Mutex};

/// Issues single-use credentials backed by a `CredentialStore`.
#[derive(Clone)]
pub struct CredentialBroker {
    store: Arc<dyn CredentialStore>,
    key_prefix: String,
}

impl CredentialBroker {
    pub fn new(store: Arc<dyn CredentialStore>, key_prefix: impl Into<String>) -> Self {
        Self {
            store,
            key_prefix: key_prefix.into(),
        }
    }

    /// Generate a secret for `scope`, persist its hash and hand back a
    /// credential that can be used exactly once.
    pub fn issue(&self, scope: &CredentialScope) -> Result<ScopedCredential, CredentialError> {
        let organization_id = scope.organization_id();
        let owner_id = self
            .store
            .organization_owner(organization_id)?
            .ok_or_else(|| CredentialError::IssuanceFailed {
                reason: format!("Organization not found: {organization_id}"),
            })?;

        let (secret, provider_key_id, label) = match scope {
            CredentialScope::Platform { label, .. } => {
                (generate_platform_key(&self.key_prefix), None, label.as_str())
            }
            CredentialScope::ProviderProxy {
                provider_key_id,
                label,
                ..
            } => {
                let key = self
                    .store
                    .provider_key(organization_id, provider_key_id)?
                    .ok_or_else(|| CredentialError::IssuanceFailed {
                        reason: format!("Provider key not found or no access: {provider_key_id}"),
                    })?;
                (
                    generate_proxy_key(&self.key_prefix),
                    Some(key.id),
                    label.as_str(),
                )
            }
        };

        let kind = scope.kind();
        let secret_hash = hash_secret(&secret);
        let record_id = self
            .store
            .insert_credential_record(&NewCredentialRecord {
                kind: kind.as_str(),
                secret_hash: &secret_hash,
                owner_id: &owner_id,
                organization_id,
                provider_key_id: provider_key_id.as_deref(),
                label,
            })
            .map_err(|e| CredentialError::IssuanceFailed {
                reason: e.to_string(),
            })?;

        tracing::debug!(
            credential_id = %record_id,
            kind = kind.as_str(),
            organization_id,
            "credential issued"
        );

        Ok(ScopedCredential {
            record_id: record_id.clone(),
            kind,
            lease: Mutex::new(Some(CredentialLease {
                store: Arc::clone(&self.store),
                record_id,
                secret,
                revoked: false,
            })),
        })
    }

    pub fn issue_platform(&self, organization_id: &str) -> Result<ScopedCredential, CredentialError> {
        self.issue(&CredentialScope::platform(organization_id))
    }

    pub fn issue_proxy(
        &self,
        organization_id: &str,
        provider_key_id: &str,
        label: &str,
    ) -> Result<ScopedCredential, CredentialError> {
        self.issue(&CredentialScope::provider_proxy(
            organization_id,
            provider_key_id,
            label,
        ))
    }
}

/// A credential that may be handed to exactly one callback.
///
/// The backing record is deleted when that callback's scope ends. If the
/// credential is dropped unused, the record is deleted on drop.
pub struct ScopedCredential {
    record_id: String,
    kind: CredentialKind,
    lease: Mutex<Option<CredentialLease>>,
}

impl std::fmt::Debug for ScopedCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedCredential")
            .field("record_id", &self.record_id)
            .field("kind", &self.kind)
            .field("consumed", &self.is_consumed())
            .finish_non_exhaustive()
    }
}

impl ScopedCredential {
    pub fn record_id(&self) -> &str {
        &self.record_id
    }

    pub fn kind(&self) -> CredentialKind {
        self.kind
    }

    pub fn is_consumed(&self) -> bool {
        self.lease.lock().unwrap().is_none()
    }

    /// Run `f` with the plaintext secret, then revoke.
    ///
    /// Revocation happens on success, on error, and if the returned future
    /// is dropped before completion. A revoke failure is logged and never
    /// replaces the callback's own result. Second and later calls fail with
    /// `CredentialError::AlreadyConsumed` without invoking `f`.
    pub async fn with_credential<F, Fut, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CredentialError>,
    {
        let lease = self
            .lease
            .lock()
            .unwrap()
            .take()
            .ok_or(CredentialError::AlreadyConsumed)?;

        let result = f(lease.secret.clone()).await;
        drop(lease);
        result
    }
}

struct CredentialLease {
    store: Arc<dyn CredentialStore>,
    record_id: String,
    secret: String,
    revoked: bool,
}

impl CredentialLease {
    fn revoke(&mut self) {
        if self.revoked {
            return;
        }
        self.revoked = true;
        match self.store.delete_credential_record(&self.record_id) {
            Ok(true) => tracing::debug!(credential_id = %self.record_id, "credential revoked"),
            Ok(false) => {
                tracing::debug!(credential_id = %self.record_id, "credential already removed")
            }
            Err(e) => tracing::warn!(
                credential_id = %self.record_id,
                error = %e,
                "failed to revoke credential"
            ),
        }
    }
}

impl Drop for CredentialLease {
    fn drop(&mut self) {
        self.revoke();
    }
}
