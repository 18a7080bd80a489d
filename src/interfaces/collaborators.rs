//! External collaborators reached over a request/response contract.
//!
//! Signature verification, tenant resolution and plan lookup are owned by
//! another system. The ingress gate and the worker only depend on these traits.

use async_trait::async_trait;

use crate::error::{Classify, ErrorClass};
use crate::model::{CanonicalTenantId, TenantRef};

/// Errors raised by a collaborator call.
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("Collaborator rejected request: {0}")]
    Rejected(String),
}

impl Classify for CollaboratorError {
    fn class(&self) -> ErrorClass {
        match self {
            CollaboratorError::Unavailable(_) => ErrorClass::Transient,
            CollaboratorError::Rejected(_) => ErrorClass::Permanent,
        }
    }
}

/// Kept as an alias so gate code reads naturally.
pub type VerifierError = CollaboratorError;

/// Verifies an envelope signature for a tenant.
///
/// Implementations must never log secret material.
#[async_trait]
pub trait SignatureVerifier: Send + Sync {
    async fn verify(
        &self,
        tenant: &TenantRef,
        timestamp: &str,
        body: &[u8],
        signature: &str,
    ) -> Result<bool, CollaboratorError>;
}

/// Resolves a public slug or canonical id to the canonical tenant id.
#[async_trait]
pub trait TenantResolver: Send + Sync {
    async fn resolve(&self, tenant: &TenantRef)
        -> Result<Option<CanonicalTenantId>, CollaboratorError>;
}

/// Commercial plan attributes the worker and valuation engine need.
#[derive(Debug, Clone, PartialEq)]
pub struct TenantPlan {
    /// `None` means unlimited.
    pub monthly_event_limit: Option<u64>,
    /// Average order value in major currency units.
    pub aov_major: f64,
    pub currency: String,
}

/// Plan and entitlement lookup.
#[async_trait]
pub trait Entitlements: Send + Sync {
    async fn plan(&self, tenant: CanonicalTenantId)
        -> Result<Option<TenantPlan>, CollaboratorError>;
}
