//! Inbound webhook signature validation.
//!
//! The gateway signs the full public URL plus the form parameters sorted by
//! key; reverse proxies rewrite scheme and host, so the original URL is
//! reconstructed from forwarding headers before checking.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct WebhookValidator {
    auth_token: String,
}

impl WebhookValidator {
    pub fn new(auth_token: impl Into<String>) -> Self {
        Self {
            auth_token: auth_token.into(),
        }
    }

    /// Check an `X-Twilio-Signature-256` style signature: base64 HMAC-SHA256
    /// over the URL concatenated with `key + value` for each form parameter
    /// in key order.
    pub fn validate(
        &self,
        url: &str,
        params: &BTreeMap<String, String>,
        signature_b64: &str,
    ) -> bool {
        let Ok(expected) = STANDARD.decode(signature_b64.trim()) else {
            return false;
        };

        let mut payload = url.to_string();
        for (key, value) in params {
            payload.push_str(key);
            payload.push_str(value);
        }

        let Ok(mut mac) = HmacSha256::new_from_slice(self.auth_token.as_bytes()) else {
            return false;
        };
        mac.update(payload.as_bytes());
        mac.verify_slice(&expected).is_ok()
    }

    /// Produce a signature for a payload; used by tests and the ctl tool.
    pub fn sign(&self, url: &str, params: &BTreeMap<String, String>) -> String {
        let mut payload = url.to_string();
        for (key, value) in params {
            payload.push_str(key);
            payload.push_str(value);
        }

        let mut mac = HmacSha256::new_from_slice(self.auth_token.as_bytes())
            .expect("hmac accepts any key length");
        mac.update(payload.as_bytes());
        STANDARD.encode(mac.finalize().into_bytes())
    }
}

/// Rebuild the URL the gateway signed, accounting for a reverse proxy that
/// terminated TLS and forwarded plain HTTP internally.
pub fn original_webhook_url(
    forwarded_proto: Option<&str>,
    forwarded_host: Option<&str>,
    host: Option<&str>,
    path_and_query: &str,
) -> String {
    let proto = forwarded_proto.unwrap_or("https");
    let host = forwarded_host.or(host).unwrap_or("localhost");
    format!("{proto}://{host}{path_and_query}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("From".to_string(), "+15550001111".to_string()),
            ("Body".to_string(), "120k".to_string()),
        ])
    }

    #[test]
    fn valid_signature_is_accepted() {
        let validator = WebhookValidator::new("token-123");
        let url = "https://agent.example.com/webhooks/sms";

        let sig = validator.sign(url, &params());
        assert!(validator.validate(url, &params(), &sig));
    }

    #[test]
    fn tampered_body_is_rejected() {
        let validator = WebhookValidator::new("token-123");
        let url = "https://agent.example.com/webhooks/sms";
        let sig = validator.sign(url, &params());

        let mut tampered = params();
        tampered.insert("Body".to_string(), "999k".to_string());
        assert!(!validator.validate(url, &tampered, &sig));
    }

    #[test]
    fn wrong_token_is_rejected() {
        let signer = WebhookValidator::new("token-123");
        let validator = WebhookValidator::new("other-token");
        let url = "https://agent.example.com/webhooks/sms";

        let sig = signer.sign(url, &params());
        assert!(!validator.validate(url, &params(), &sig));
    }

    #[test]
    fn proxy_url_reconstruction_prefers_forwarded_headers() {
        let url = original_webhook_url(
            Some("https"),
            Some("agent.example.com"),
            Some("10.0.0.3:8000"),
            "/webhooks/sms",
        );
        assert_eq!(url, "https://agent.example.com/webhooks/sms");

        let fallback = original_webhook_url(None, None, Some("localhost:8000"), "/webhooks/sms");
        assert_eq!(fallback, "https://localhost:8000/webhooks/sms");
    }
}
