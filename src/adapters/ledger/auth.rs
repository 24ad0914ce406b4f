//! Ledger Authentication — HMAC-SHA256 Request Signing
//!
//! Signs every ledger API request using HMAC-SHA256. Credentials come
//! from environment variables (LEDGER_API_KEY, LEDGER_API_SECRET) and
//! the secret is never sent in headers — only the computed signature.

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use base64::Engine;

/// Ledger API authentication handler.
pub struct LedgerAuth {
    /// API key from LEDGER_API_KEY env var.
    api_key: String,
    /// API secret from LEDGER_API_SECRET env var (never sent in headers).
    api_secret: String,
}

impl LedgerAuth {
    /// Load credentials from environment variables.
    ///
    /// Required env vars: LEDGER_API_KEY, LEDGER_API_SECRET.
    /// These MUST be set in `.env` (never committed to git).
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("LEDGER_API_KEY")
            .context("LEDGER_API_KEY not set")?;
        let api_secret = std::env::var("LEDGER_API_SECRET")
            .context("LEDGER_API_SECRET not set")?;

        Ok(Self {
            api_key,
            api_secret,
        })
    }

    /// Get the API key for request headers.
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Generate the current Unix timestamp in seconds (for signing).
    pub fn timestamp() -> String {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
            .to_string()
    }

    /// Sign a request using HMAC-SHA256.
    ///
    /// Signature format: HMAC-SHA256(secret, timestamp + method + path + body)
    pub fn sign(
        &self,
        timestamp: &str,
        method: &str,
        path: &str,
        body: &str,
    ) -> String {
        let message = format!("{}{}{}{}", timestamp, method, path, body);
        let mac = hmac_sha256::HMAC::mac(
            message.as_bytes(),
            self.api_secret.as_bytes(),
        );
        base64::engine::general_purpose::STANDARD.encode(mac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth_with(secret: &str) -> LedgerAuth {
        LedgerAuth {
            api_key: "key".to_string(),
            api_secret: secret.to_string(),
        }
    }

    #[test]
    fn test_signature_is_deterministic() {
        let auth = auth_with("secret");
        let a = auth.sign("1700000000", "POST", "/transfers", "{}");
        let b = auth.sign("1700000000", "POST", "/transfers", "{}");
        assert_eq!(a, b);
    }

    #[test]
    fn test_signature_varies_with_inputs() {
        let auth = auth_with("secret");
        let base = auth.sign("1700000000", "POST", "/transfers", "{}");
        assert_ne!(base, auth.sign("1700000001", "POST", "/transfers", "{}"));
        assert_ne!(base, auth.sign("1700000000", "GET", "/transfers", "{}"));
        assert_ne!(base, auth_with("other").sign("1700000000", "POST", "/transfers", "{}"));
    }
}
