//! Credential plumbing: shared-key lookup and tenant-key decryption.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::Engine;
use rand::Rng;

use cg_domain::config::AuthConfig;
use cg_domain::error::{Error, Result};

/// Prefix marking an encrypted credential.
pub const ENC_PREFIX: &str = "enc:";

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Convert a [`reqwest::Error`] into the domain [`Error`] type.
///
/// Timeout errors map to [`Error::Timeout`]; everything else maps to
/// [`Error::Http`].
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tenant credential encryption (AES-256-GCM)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Encrypts and decrypts `enc:`-prefixed tenant credentials.
///
/// Format: `enc:` + base64(nonce(12) || ciphertext+tag).
#[derive(Clone)]
pub struct CredentialCipher {
    cipher: Aes256Gcm,
}

impl CredentialCipher {
    pub fn new(key: &[u8]) -> Result<Self> {
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|_| Error::Config("credential key must be 32 bytes".into()))?;
        Ok(Self { cipher })
    }

    /// Build from a hex-encoded key in `env_var`. `Ok(None)` when unset.
    pub fn from_env(env_var: &str) -> Result<Option<Self>> {
        let Ok(hex_key) = std::env::var(env_var) else {
            return Ok(None);
        };
        let key = hex::decode(hex_key.trim())
            .map_err(|e| Error::Config(format!("{env_var} is not valid hex: {e}")))?;
        Self::new(&key).map(Some)
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill(&mut nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|_| Error::Other("credential encryption failed".into()))?;

        let mut packed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        packed.extend_from_slice(&nonce_bytes);
        packed.extend_from_slice(&ciphertext);
        Ok(format!(
            "{ENC_PREFIX}{}",
            base64::engine::general_purpose::STANDARD.encode(packed)
        ))
    }

    pub fn decrypt(&self, value: &str) -> Result<String> {
        let encoded = value
            .strip_prefix(ENC_PREFIX)
            .ok_or_else(|| Error::Auth("credential is not encrypted".into()))?;
        let packed = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| Error::Auth(format!("credential base64 decode failed: {e}")))?;
        if packed.len() < NONCE_LEN + TAG_LEN {
            return Err(Error::Auth("credential ciphertext too short".into()));
        }
        let (nonce, ciphertext) = packed.split_at(NONCE_LEN);
        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::Auth("credential decryption failed".into()))?;
        String::from_utf8(plain).map_err(|e| Error::Auth(e.to_string()))
    }
}

/// Decrypt `value` when possible; otherwise treat it as plaintext.
///
/// Values stored before encryption was introduced have no prefix, and a
/// value that fails to decrypt is passed through unchanged. Resolution
/// never aborts here.
pub fn decrypt_or_plain(cipher: Option<&CredentialCipher>, value: &str) -> String {
    if !value.starts_with(ENC_PREFIX) {
        return value.to_owned();
    }
    match cipher {
        Some(c) => match c.decrypt(value) {
            Ok(plain) => plain,
            Err(e) => {
                tracing::warn!(error = %e, "credential decryption failed; using value as plaintext");
                value.to_owned()
            }
        },
        None => {
            tracing::warn!("encrypted credential but no credential key configured; using as plaintext");
            value.to_owned()
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared (platform) keys
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Resolve the API key from an [`AuthConfig`].
///
/// Precedence:
/// 1. `key` field (plaintext)
/// 2. `service` + `account` → OS keychain via `keyring`
/// 3. `env` field (reads environment variable)
/// 4. Headless fallback: env var `{SERVICE}_{ACCOUNT}` uppercased
/// 5. Error
pub fn resolve_api_key(auth: &AuthConfig) -> Result<String> {
    if let Some(ref key) = auth.key {
        return Ok(key.clone());
    }

    if let (Some(ref service), Some(ref account)) = (&auth.service, &auth.account) {
        match resolve_from_keychain(service, account) {
            Ok(secret) => return Ok(secret),
            Err(e) => {
                tracing::debug!(
                    service = %service,
                    account = %account,
                    error = %e,
                    "keychain lookup failed, falling through to env"
                );
            }
        }
    }

    if let Some(ref env_var) = auth.env {
        return std::env::var(env_var).map_err(|_| {
            Error::Auth(format!("environment variable '{env_var}' not set or not valid UTF-8"))
        });
    }

    if let (Some(ref service), Some(ref account)) = (&auth.service, &auth.account) {
        let fallback_var = keychain_fallback_env_name(service, account);
        if let Ok(val) = std::env::var(&fallback_var) {
            return Ok(val);
        }
    }

    Err(Error::Auth(
        "no API key configured: set 'key', 'env', or keychain 'service'+'account'".into(),
    ))
}

/// Read a secret from the OS keychain (macOS Keychain, Windows Credential
/// Manager, Linux Secret Service). Fails on headless systems.
pub fn resolve_from_keychain(service: &str, account: &str) -> Result<String> {
    let entry = keyring::Entry::new(service, account)
        .map_err(|e| Error::Auth(format!("keyring entry creation failed: {e}")))?;
    entry
        .get_password()
        .map_err(|e| Error::Auth(format!("keyring get_password failed: {e}")))
}

/// `("convogate", "openai-key")` → `"CONVOGATE_OPENAI_KEY"`.
pub fn keychain_fallback_env_name(service: &str, account: &str) -> String {
    format!(
        "{}_{}",
        service.to_uppercase().replace('-', "_"),
        account.to_uppercase().replace('-', "_"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> CredentialCipher {
        CredentialCipher::new(&[7u8; 32]).unwrap()
    }

    #[test]
    fn encrypt_then_decrypt() {
        let c = cipher();
        let enc = c.encrypt("sk-tenant-1").unwrap();
        assert!(enc.starts_with(ENC_PREFIX));
        assert_eq!(c.decrypt(&enc).unwrap(), "sk-tenant-1");
    }

    #[test]
    fn plaintext_passes_through() {
        assert_eq!(decrypt_or_plain(Some(&cipher()), "sk-plain"), "sk-plain");
        assert_eq!(decrypt_or_plain(None, "sk-plain"), "sk-plain");
    }

    #[test]
    fn wrong_key_falls_back_to_plaintext() {
        let enc = cipher().encrypt("secret").unwrap();
        let other = CredentialCipher::new(&[9u8; 32]).unwrap();
        assert_eq!(decrypt_or_plain(Some(&other), &enc), enc);
    }

    #[test]
    fn garbage_ciphertext_falls_back() {
        assert_eq!(decrypt_or_plain(Some(&cipher()), "enc:%%%"), "enc:%%%");
        assert_eq!(decrypt_or_plain(Some(&cipher()), "enc:AAAA"), "enc:AAAA");
    }

    #[test]
    fn short_key_is_rejected() {
        assert!(CredentialCipher::new(&[1u8; 16]).is_err());
    }

    #[test]
    fn fallback_env_name() {
        assert_eq!(
            keychain_fallback_env_name("convogate", "openai-api-key"),
            "CONVOGATE_OPENAI_API_KEY"
        );
    }

    #[test]
    fn resolve_api_key_plaintext_wins() {
        let auth = AuthConfig {
            key: Some("plaintext-wins".into()),
            env: Some("CG_TEST_SHOULD_NOT_BE_READ".into()),
            ..Default::default()
        };
        assert_eq!(resolve_api_key(&auth).unwrap(), "plaintext-wins");
    }

    #[test]
    fn resolve_api_key_env_var() {
        let var_name = "CG_TEST_RESOLVE_ENV_KEY_4411";
        std::env::set_var(var_name, "env-secret-value");
        let auth = AuthConfig {
            env: Some(var_name.into()),
            ..Default::default()
        };
        assert_eq!(resolve_api_key(&auth).unwrap(), "env-secret-value");
        std::env::remove_var(var_name);
    }

    #[test]
    fn resolve_api_key_no_config() {
        let err = resolve_api_key(&AuthConfig::default()).unwrap_err();
        assert!(err.to_string().contains("no API key configured"));
    }
}
