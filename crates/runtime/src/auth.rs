//! Authorization gate
//!
//! The service asks one question per request: is this caller authorized.
//! Keys are kept only as SHA-256 digests and compared in constant time.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Credentials presented with a request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: Option<String>,
}

impl Credentials {
    /// Read `Authorization: Bearer <key>`, falling back to `X-API-Key`
    pub fn from_headers(authorization: Option<&str>, api_key_header: Option<&str>) -> Self {
        let bearer = authorization
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty());
        let header = api_key_header.map(str::trim).filter(|key| !key.is_empty());

        Self {
            api_key: bearer.or(header).map(str::to_string),
        }
    }
}

pub trait AuthGate: Send + Sync {
    fn is_authorized(&self, credentials: &Credentials) -> bool;
}

/// Authentication disabled
#[derive(Debug, Default)]
pub struct AllowAll;

impl AuthGate for AllowAll {
    fn is_authorized(&self, _credentials: &Credentials) -> bool {
        true
    }
}

/// Accepts any of a fixed set of API keys
pub struct ApiKeyGate {
    digests: Vec<[u8; 32]>,
}

impl ApiKeyGate {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            digests: keys
                .into_iter()
                .filter(|key| !key.as_ref().is_empty())
                .map(|key| digest(key.as_ref()))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.digests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }
}

fn digest(key: &str) -> [u8; 32] {
    Sha256::digest(key.as_bytes()).into()
}

impl AuthGate for ApiKeyGate {
    fn is_authorized(&self, credentials: &Credentials) -> bool {
        let Some(key) = credentials.api_key.as_deref() else {
            return false;
        };
        let presented = digest(key);
        // Compare against every key so timing does not reveal which matched
        self.digests
            .iter()
            .fold(0u8, |found, expected| found | expected[..].ct_eq(&presented[..]).unwrap_u8())
            == 1
    }
}

/// Gate for the configured key list; an empty list disables authentication
pub fn from_keys(keys: &[String]) -> Box<dyn AuthGate> {
    let gate = ApiKeyGate::new(keys);
    if gate.is_empty() {
        tracing::warn!("No API keys configured, authentication is disabled");
        Box::new(AllowAll)
    } else {
        tracing::info!(keys = gate.len(), "API key authentication enabled");
        Box::new(gate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_from_headers() {
        let bearer = Credentials::from_headers(Some("Bearer abc"), Some("ignored"));
        assert_eq!(bearer.api_key.as_deref(), Some("abc"));

        let header = Credentials::from_headers(Some("Basic xyz"), Some("key-1"));
        assert_eq!(header.api_key.as_deref(), Some("key-1"));

        assert_eq!(Credentials::from_headers(None, None), Credentials::default());
    }

    #[test]
    fn test_api_key_gate() {
        let gate = ApiKeyGate::new(["alpha", "beta", ""]);
        assert_eq!(gate.len(), 2);

        let with = |key: &str| Credentials {
            api_key: Some(key.to_string()),
        };
        assert!(gate.is_authorized(&with("beta")));
        assert!(!gate.is_authorized(&with("gamma")));
        assert!(!gate.is_authorized(&Credentials::default()));
    }

    #[test]
    fn test_empty_key_list_allows_all() {
        let gate = from_keys(&[]);
        assert!(gate.is_authorized(&Credentials::default()));
    }
}
