//! fabra-crypto
//!
//! Boundary to the key-management service. Credentials, webhook signing
//! keys, and end-customer API keys are stored as opaque ciphertext in the
//! config store and decrypted only inside the replicate activity.
//!
//! The production implementation lives with the KMS deployment; this crate
//! defines the service contract plus a passthrough implementation for dev
//! and tests, where secrets are hex-encoded rather than encrypted.

use anyhow::{Context, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Encrypt/decrypt of the three secret kinds the sync engine handles.
/// Implementations must be object-safe; activities hold a
/// `Box<dyn CryptoService>`.
pub trait CryptoService: Send + Sync {
    fn decrypt_connection_credentials(&self, ciphertext: &str) -> Result<String>;
    fn encrypt_connection_credentials(&self, plaintext: &str) -> Result<String>;

    fn decrypt_webhook_signing_key(&self, ciphertext: &str) -> Result<String>;
    fn encrypt_webhook_signing_key(&self, plaintext: &str) -> Result<String>;

    fn decrypt_end_customer_api_key(&self, ciphertext: &str) -> Result<String>;
    fn encrypt_end_customer_api_key(&self, plaintext: &str) -> Result<String>;
}

/// Dev/test implementation: hex encoding stands in for encryption so that
/// round-trips work without a KMS. Never wire this into production.
#[derive(Debug, Clone, Default)]
pub struct PassthroughCrypto;

impl PassthroughCrypto {
    pub fn new() -> Self {
        Self
    }

    fn encode(&self, plaintext: &str) -> String {
        hex::encode(plaintext.as_bytes())
    }

    fn decode(&self, ciphertext: &str) -> Result<String> {
        let bytes = hex::decode(ciphertext).context("decoding stored secret")?;
        String::from_utf8(bytes).context("stored secret is not utf-8")
    }
}

impl CryptoService for PassthroughCrypto {
    fn decrypt_connection_credentials(&self, ciphertext: &str) -> Result<String> {
        self.decode(ciphertext)
            .context("decrypting connection credentials")
    }

    fn encrypt_connection_credentials(&self, plaintext: &str) -> Result<String> {
        Ok(self.encode(plaintext))
    }

    fn decrypt_webhook_signing_key(&self, ciphertext: &str) -> Result<String> {
        self.decode(ciphertext)
            .context("decrypting webhook signing key")
    }

    fn encrypt_webhook_signing_key(&self, plaintext: &str) -> Result<String> {
        Ok(self.encode(plaintext))
    }

    fn decrypt_end_customer_api_key(&self, ciphertext: &str) -> Result<String> {
        self.decode(ciphertext)
            .context("decrypting end customer api key")
    }

    fn encrypt_end_customer_api_key(&self, plaintext: &str) -> Result<String> {
        Ok(self.encode(plaintext))
    }
}

/// Hex HMAC-SHA256 of `body` under `key`; the webhook `X-FABRA-SIGNATURE`
/// header value.
pub fn sign_payload(key: &str, body: &[u8]) -> String {
    // HMAC accepts keys of any length; new_from_slice cannot fail.
    let mut mac = HmacSha256::new_from_slice(key.as_bytes()).expect("hmac accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_round_trips_every_secret_kind() {
        let crypto = PassthroughCrypto::new();

        let creds = crypto.encrypt_connection_credentials("{\"project_id\":\"p\"}").unwrap();
        assert_eq!(
            crypto.decrypt_connection_credentials(&creds).unwrap(),
            "{\"project_id\":\"p\"}"
        );

        let signing = crypto.encrypt_webhook_signing_key("key-material").unwrap();
        assert_eq!(crypto.decrypt_webhook_signing_key(&signing).unwrap(), "key-material");

        let api_key = crypto.encrypt_end_customer_api_key("customer-key").unwrap();
        assert_eq!(
            crypto.decrypt_end_customer_api_key(&api_key).unwrap(),
            "customer-key"
        );
    }

    #[test]
    fn ciphertext_is_not_plaintext() {
        let crypto = PassthroughCrypto::new();
        let stored = crypto.encrypt_webhook_signing_key("secret").unwrap();
        assert_ne!(stored, "secret");
    }

    #[test]
    fn decode_rejects_garbage() {
        let crypto = PassthroughCrypto::new();
        assert!(crypto.decrypt_connection_credentials("not-hex!").is_err());
    }

    #[test]
    fn sign_payload_matches_known_vector() {
        // RFC 4231 test case 2: key "Jefe", data "what do ya want for nothing?"
        let signature = sign_payload("Jefe", b"what do ya want for nothing?");
        assert_eq!(
            signature,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn signature_changes_with_key() {
        let body = b"{\"object_id\":1}";
        assert_ne!(sign_payload("k1", body), sign_payload("k2", body));
    }
}
