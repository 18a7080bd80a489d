//! Signed ingress: envelope parsing, strict payloads and the ordered gate.

pub mod directory;
pub mod envelope;
pub mod gate;
pub mod payload;
pub mod verifier;

pub use directory::StaticTenantDirectory;
pub use envelope::{
    Envelope, FORWARDED_FOR_HEADER, SIGNATURE_HEADER, TENANT_HEADER, TIMESTAMP_HEADER,
};
pub use gate::{Authorized, GateRejection, SignedIngressGate};
pub use payload::{
    CallEventPayload, IngressPayload, IntentAction, PayloadError, SealPayload, StagePayload,
    SyncEventPayload, CONSENT_HINT, FORBIDDEN_FIELDS,
};
pub use verifier::{sign, HmacSignatureVerifier};
