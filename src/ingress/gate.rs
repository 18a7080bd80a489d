//! Signed ingress gate.
//!
//! Checks run in a fixed order and stop at the first failure:
//!
//! 1. body size
//! 2. header shape (tenant, timestamp, signature)
//! 3. timestamp window
//! 4. signature
//! 5. strict body decode
//! 6. tenant resolution and header/body binding
//!
//! Nothing tenant-scoped (replay markers, rate-limit counters, session
//! reads) may run before [`SignedIngressGate::authorize`] returns `Ok`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::warn;

use super::envelope::{is_valid_signature, is_valid_timestamp, Envelope};
use super::payload::{decode, IngressPayload, PayloadError};
use crate::config::IngressConfig;
use crate::error::{Classify, ErrorClass};
use crate::interfaces::{SignatureVerifier, TenantResolver};
use crate::model::{CanonicalTenantId, TenantRef};

/// Why the gate turned a request away. The reason of `Unauthorized` is for
/// logs only and never reaches the client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateRejection {
    #[error("Payload exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("Unauthorized: {0}")]
    Unauthorized(&'static str),

    #[error("Forbidden field: {0}")]
    Forbidden(String),

    #[error("Invalid body: {0}")]
    Invalid(String),
}

impl Classify for GateRejection {
    fn class(&self) -> ErrorClass {
        match self {
            GateRejection::Unauthorized(_) => ErrorClass::Auth,
            GateRejection::PayloadTooLarge { .. }
            | GateRejection::Forbidden(_)
            | GateRejection::Invalid(_) => ErrorClass::Validation,
        }
    }
}

impl From<PayloadError> for GateRejection {
    fn from(e: PayloadError) -> Self {
        match e {
            PayloadError::Forbidden(field) => GateRejection::Forbidden(field),
            PayloadError::Invalid(reason) => GateRejection::Invalid(reason),
        }
    }
}

/// A request that passed every gate step.
#[derive(Debug, Clone)]
pub struct Authorized<P> {
    pub tenant: CanonicalTenantId,
    pub payload: P,
    /// Key for the replay store: event id, else signature, else body digest.
    pub replay_key: String,
}

pub struct SignedIngressGate {
    verifier: Arc<dyn SignatureVerifier>,
    resolver: Arc<dyn TenantResolver>,
    config: IngressConfig,
}

impl SignedIngressGate {
    pub fn new(
        verifier: Arc<dyn SignatureVerifier>,
        resolver: Arc<dyn TenantResolver>,
        config: IngressConfig,
    ) -> Self {
        Self {
            verifier,
            resolver,
            config,
        }
    }

    pub fn config(&self) -> &IngressConfig {
        &self.config
    }

    pub async fn authorize<P: IngressPayload>(
        &self,
        envelope: &Envelope,
        now: DateTime<Utc>,
    ) -> Result<Authorized<P>, GateRejection> {
        // 1
        if envelope.body.len() > self.config.max_body_bytes {
            return Err(GateRejection::PayloadTooLarge {
                limit: self.config.max_body_bytes,
            });
        }

        if self.config.verification_disabled {
            warn!(
                client_ip = %envelope.client_ip,
                "Signature verification DISABLED by operator kill switch"
            );
            return self.authorize_unverified(envelope).await;
        }

        // 2
        let header_tenant = envelope
            .tenant
            .as_deref()
            .and_then(TenantRef::parse)
            .ok_or(GateRejection::Unauthorized("malformed tenant header"))?;
        let timestamp = envelope
            .timestamp
            .as_deref()
            .filter(|t| is_valid_timestamp(t))
            .ok_or(GateRejection::Unauthorized("malformed timestamp header"))?;
        let signature = envelope
            .signature
            .as_deref()
            .filter(|s| is_valid_signature(s))
            .ok_or(GateRejection::Unauthorized("malformed signature header"))?;

        // 3
        let sent_at: i64 = timestamp
            .parse()
            .map_err(|_| GateRejection::Unauthorized("malformed timestamp header"))?;
        let skew = now.timestamp() - sent_at;
        if skew > self.config.max_past_skew_secs {
            return Err(GateRejection::Unauthorized("timestamp too old"));
        }
        if -skew > self.config.max_future_skew_secs {
            return Err(GateRejection::Unauthorized("timestamp in the future"));
        }

        // 4
        match self
            .verifier
            .verify(&header_tenant, timestamp, &envelope.body, signature)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                warn!(tenant = %header_tenant, reason = "mismatch", "Signature rejected");
                return Err(GateRejection::Unauthorized("bad signature"));
            }
            Err(e) => {
                warn!(tenant = %header_tenant, reason = %e, "Signature verifier failed");
                return Err(GateRejection::Unauthorized("verifier unavailable"));
            }
        }

        // 5
        let payload: P = decode(&envelope.body)?;

        // 6
        let tenant = self.resolve(&header_tenant).await?;
        let body_tenant = TenantRef::parse(payload.site_id())
            .ok_or(GateRejection::Unauthorized("malformed body tenant"))?;
        if self.resolve(&body_tenant).await? != tenant {
            warn!(tenant = %tenant, "Header and body tenants differ");
            return Err(GateRejection::Unauthorized("tenant binding mismatch"));
        }

        let replay_key = replay_key(
            tenant,
            payload.event_id().map(|id| id.to_string()),
            Some(signature),
            &envelope.body,
        );
        Ok(Authorized {
            tenant,
            payload,
            replay_key,
        })
    }

    async fn authorize_unverified<P: IngressPayload>(
        &self,
        envelope: &Envelope,
    ) -> Result<Authorized<P>, GateRejection> {
        let payload: P = decode(&envelope.body)?;
        let body_tenant = TenantRef::parse(payload.site_id())
            .ok_or(GateRejection::Invalid("malformed site_id".to_string()))?;
        let tenant = self.resolve(&body_tenant).await?;
        let replay_key = replay_key(
            tenant,
            payload.event_id().map(|id| id.to_string()),
            envelope.signature.as_deref(),
            &envelope.body,
        );
        Ok(Authorized {
            tenant,
            payload,
            replay_key,
        })
    }

    async fn resolve(&self, tenant: &TenantRef) -> Result<CanonicalTenantId, GateRejection> {
        match self.resolver.resolve(tenant).await {
            Ok(Some(id)) => Ok(id),
            Ok(None) => Err(GateRejection::Unauthorized("unknown tenant")),
            Err(e) => {
                warn!(tenant = %tenant, error = %e, "Tenant resolver failed");
                Err(GateRejection::Unauthorized("resolver unavailable"))
            }
        }
    }
}

fn replay_key(
    tenant: CanonicalTenantId,
    event_id: Option<String>,
    signature: Option<&str>,
    body: &[u8],
) -> String {
    match (event_id, signature) {
        (Some(event_id), _) => format!("replay:{}:evt:{}", tenant, event_id),
        (None, Some(signature)) => format!("replay:{}:sig:{}", tenant, signature),
        (None, None) => format!("replay:{}:body:{}", tenant, hex::encode(Sha256::digest(body))),
    }
}

#[cfg(test)]
mod tests;
