//! Failure taxonomy shared by the scheduler, executor and evaluator paths.
//!
//! Each concern keeps its own `thiserror` enum; `EngineErrorKind` is the flat
//! classification used for log fields and persisted failure labels.

use crate::confirm::ConfirmationError;
use crate::credentials::CredentialError;
use crate::providers::ProviderError;
use crate::sandbox::SandboxError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineErrorKind {
    /// No queued work. Benign; never logged as an error.
    ClaimEmpty,
    CredentialIssuanceFailure,
    /// Contract violation: a scoped credential was used twice.
    CredentialAlreadyConsumed,
    ProviderCallFailure,
    WriteConfirmationTimeout,
    SandboxOperationTimeout,
    Datastore,
    Other,
}

impl EngineErrorKind {
    pub fn label(&self) -> &'static str {
        match self {
            EngineErrorKind::ClaimEmpty => "claim_empty",
            EngineErrorKind::CredentialIssuanceFailure => "credential_issuance_failure",
            EngineErrorKind::CredentialAlreadyConsumed => "credential_already_consumed",
            EngineErrorKind::ProviderCallFailure => "provider_call_failure",
            EngineErrorKind::WriteConfirmationTimeout => "write_confirmation_timeout",
            EngineErrorKind::SandboxOperationTimeout => "sandbox_operation_timeout",
            EngineErrorKind::Datastore => "datastore",
            EngineErrorKind::Other => "other",
        }
    }
}

impl std::fmt::Display for EngineErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl From<&CredentialError> for EngineErrorKind {
    fn from(e: &CredentialError) -> Self {
        match e {
            CredentialError::IssuanceFailed { .. } => EngineErrorKind::CredentialIssuanceFailure,
            CredentialError::AlreadyConsumed => EngineErrorKind::CredentialAlreadyConsumed,
            CredentialError::Store(_) => EngineErrorKind::Datastore,
        }
    }
}

impl From<&ProviderError> for EngineErrorKind {
    fn from(_: &ProviderError) -> Self {
        EngineErrorKind::ProviderCallFailure
    }
}

impl From<&ConfirmationError> for EngineErrorKind {
    fn from(_: &ConfirmationError) -> Self {
        EngineErrorKind::WriteConfirmationTimeout
    }
}

impl From<&SandboxError> for EngineErrorKind {
    fn from(e: &SandboxError) -> Self {
        match e {
            SandboxError::OperationTimeout { .. } => EngineErrorKind::SandboxOperationTimeout,
            _ => EngineErrorKind::Other,
        }
    }
}

/// Best-effort classification of an `anyhow` chain, for loop-level logging.
pub fn classify(err: &anyhow::Error) -> EngineErrorKind {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<CredentialError>() {
            return e.into();
        }
        if let Some(e) = cause.downcast_ref::<ProviderError>() {
            return e.into();
        }
        if let Some(e) = cause.downcast_ref::<ConfirmationError>() {
            return e.into();
        }
        if let Some(e) = cause.downcast_ref::<SandboxError>() {
            return e.into();
        }
        if cause.downcast_ref::<crate::storage::StoreError>().is_some() {
            return EngineErrorKind::Datastore;
        }
    }
    EngineErrorKind::Other
}
