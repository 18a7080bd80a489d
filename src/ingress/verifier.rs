//! HMAC-SHA256 envelope signatures.
//!
//! The signature is `hex(HMAC-SHA256(secret, "{timestamp}.{raw body}"))`,
//! lowercase. Secrets are looked up by the tenant identifier exactly as sent
//! in the header, so a tenant may sign with its public slug or canonical id.

use std::collections::HashMap;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::config::TenantConfig;
use crate::interfaces::{CollaboratorError, SignatureVerifier};
use crate::model::TenantRef;

type HmacSha256 = Hmac<Sha256>;

/// Compute the hex signature for `timestamp` and `body`.
pub fn sign(secret: &[u8], timestamp: &str, body: &[u8]) -> Result<String, CollaboratorError> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| CollaboratorError::Rejected(format!("invalid signing key: {}", e)))?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verifies signatures against per-tenant secrets held in memory.
#[derive(Clone, Default)]
pub struct HmacSignatureVerifier {
    secrets: HashMap<String, Vec<u8>>,
}

impl HmacSignatureVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tenants(tenants: &[TenantConfig]) -> Self {
        let mut verifier = Self::new();
        for tenant in tenants {
            let secret = tenant.signing_secret.as_bytes().to_vec();
            verifier
                .secrets
                .insert(tenant.canonical_id.as_hyphenated().to_string(), secret.clone());
            if let Some(public_id) = &tenant.public_id {
                verifier.secrets.insert(public_id.clone(), secret);
            }
        }
        verifier
    }

    pub fn with_secret(mut self, tenant: &str, secret: &str) -> Self {
        self.secrets
            .insert(tenant.to_string(), secret.as_bytes().to_vec());
        self
    }
}

#[async_trait]
impl SignatureVerifier for HmacSignatureVerifier {
    async fn verify(
        &self,
        tenant: &TenantRef,
        timestamp: &str,
        body: &[u8],
        signature: &str,
    ) -> Result<bool, CollaboratorError> {
        let Some(secret) = self.secrets.get(&tenant.to_string()) else {
            return Ok(false);
        };
        let expected = sign(secret, timestamp, body)?;
        Ok(bool::from(expected.as_bytes().ct_eq(signature.as_bytes())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_verify_roundtrip() {
        let verifier = HmacSignatureVerifier::new().with_secret("acme", "s3cret");
        let tenant = TenantRef::Public("acme".to_string());
        let signature = sign(b"s3cret", "1760000000", b"{}").unwrap();

        assert_eq!(signature.len(), 64);
        assert!(verifier.verify(&tenant, "1760000000", b"{}", &signature).await.unwrap());
        assert!(!verifier.verify(&tenant, "1760000001", b"{}", &signature).await.unwrap());
        assert!(!verifier.verify(&tenant, "1760000000", b"{ }", &signature).await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_tenant_fails() {
        let verifier = HmacSignatureVerifier::new();
        let tenant = TenantRef::Public("ghost".to_string());
        let signature = sign(b"x", "1760000000", b"{}").unwrap();
        assert!(!verifier.verify(&tenant, "1760000000", b"{}", &signature).await.unwrap());
    }
}
