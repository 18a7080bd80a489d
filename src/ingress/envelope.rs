//! Inbound request envelope.

use bytes::Bytes;
use http::HeaderMap;

pub const TENANT_HEADER: &str = "tenant-id";
pub const TIMESTAMP_HEADER: &str = "timestamp";
pub const SIGNATURE_HEADER: &str = "signature";
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Client IP used when no forwarding header is present.
pub const UNKNOWN_IP: &str = "unknown";

const SIGNATURE_LEN: usize = 64;

/// Raw request as seen by the ingress gate.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub tenant: Option<String>,
    pub timestamp: Option<String>,
    pub signature: Option<String>,
    pub body: Bytes,
    pub client_ip: String,
    pub user_agent: Option<String>,
}

impl Envelope {
    pub fn from_parts(headers: &HeaderMap, body: Bytes) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };

        let client_ip = header(FORWARDED_FOR_HEADER)
            .and_then(|v| v.split(',').next().map(|ip| ip.trim().to_string()))
            .filter(|ip| !ip.is_empty())
            .unwrap_or_else(|| UNKNOWN_IP.to_string());

        Self {
            tenant: header(TENANT_HEADER),
            timestamp: header(TIMESTAMP_HEADER),
            signature: header(SIGNATURE_HEADER),
            body,
            client_ip,
            user_agent: header(http::header::USER_AGENT.as_str()),
        }
    }
}

/// Unix seconds as 9 to 12 ASCII digits.
pub fn is_valid_timestamp(raw: &str) -> bool {
    (9..=12).contains(&raw.len()) && raw.bytes().all(|b| b.is_ascii_digit())
}

/// 64 lowercase hex characters.
pub fn is_valid_signature(raw: &str) -> bool {
    raw.len() == SIGNATURE_LEN && raw.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_shape() {
        assert!(is_valid_timestamp("123456789"));
        assert!(is_valid_timestamp("1760000000"));
        assert!(is_valid_timestamp("999999999999"));
        assert!(!is_valid_timestamp("12345678"));
        assert!(!is_valid_timestamp("1234567890123"));
        assert!(!is_valid_timestamp("17600000a0"));
        assert!(!is_valid_timestamp("-176000000"));
    }

    #[test]
    fn test_signature_shape() {
        assert!(is_valid_signature(&"a".repeat(64)));
        assert!(!is_valid_signature(&"A".repeat(64)));
        assert!(!is_valid_signature(&"a".repeat(63)));
        assert!(!is_valid_signature(&"g".repeat(64)));
    }

    #[test]
    fn test_client_ip_from_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED_FOR_HEADER, "203.0.113.7, 10.0.0.1".parse().unwrap());
        let envelope = Envelope::from_parts(&headers, Bytes::new());
        assert_eq!(envelope.client_ip, "203.0.113.7");
        assert!(envelope.tenant.is_none());

        let envelope = Envelope::from_parts(&HeaderMap::new(), Bytes::new());
        assert_eq!(envelope.client_ip, UNKNOWN_IP);
    }
}
