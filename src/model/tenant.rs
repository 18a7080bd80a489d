//! Tenant identifiers.
//!
//! Edge clients may address a tenant by its public slug or by its canonical
//! UUID. Only the canonical form is used after the ingress gate.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

const PUBLIC_ID_MIN_LEN: usize = 3;
const PUBLIC_ID_MAX_LEN: usize = 64;
const CANONICAL_ID_LEN: usize = 36;

/// Resolved tenant identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalTenantId(pub Uuid);

impl CanonicalTenantId {
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for CanonicalTenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.as_hyphenated())
    }
}

impl From<Uuid> for CanonicalTenantId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Tenant identifier as supplied by a client, not yet resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TenantRef {
    /// Public slug, e.g. `acme-dental`.
    Public(String),
    /// Canonical lowercase hyphenated UUID.
    Canonical(Uuid),
}

impl TenantRef {
    /// Parse a raw identifier, accepting only the two supported shapes.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.len() == CANONICAL_ID_LEN {
            // Uppercase or braced forms are rejected: the canonical shape is exact.
            if raw
                .chars()
                .all(|c| c == '-' || c.is_ascii_digit() || ('a'..='f').contains(&c))
            {
                if let Ok(id) = Uuid::parse_str(raw) {
                    if id.as_hyphenated().to_string() == raw {
                        return Some(TenantRef::Canonical(id));
                    }
                }
            }
            return None;
        }

        if is_public_slug(raw) {
            Some(TenantRef::Public(raw.to_string()))
        } else {
            None
        }
    }

    pub fn as_canonical(&self) -> Option<CanonicalTenantId> {
        match self {
            TenantRef::Canonical(id) => Some(CanonicalTenantId(*id)),
            TenantRef::Public(_) => None,
        }
    }
}

impl fmt::Display for TenantRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TenantRef::Public(slug) => f.write_str(slug),
            TenantRef::Canonical(id) => write!(f, "{}", id.as_hyphenated()),
        }
    }
}

fn is_public_slug(raw: &str) -> bool {
    let len = raw.len();
    if !(PUBLIC_ID_MIN_LEN..=PUBLIC_ID_MAX_LEN).contains(&len) {
        return false;
    }
    let mut chars = raw.chars();
    let first_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
    first_ok
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}
