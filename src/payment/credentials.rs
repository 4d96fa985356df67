//! Gateway credential storage (spec §4.4 "Credential handling"): blobs are
//! encrypted at rest with AES-256-GCM and decrypted only at dispatch time,
//! inside the orchestrator, never surfaced to the order aggregate or the
//! event bus.

use rand::RngCore;
use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey, NONCE_LEN};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::ids::GatewayConfigurationId;

/// A gateway API key/secret pair, encrypted at rest. Stored alongside
/// `PaymentMethod.gateway_configuration_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfiguration {
    #[serde(rename = "_id")]
    pub _id: GatewayConfigurationId,
    pub base_url: String,
    /// `nonce || ciphertext || tag`, produced by `seal`.
    pub sealed_api_key: Vec<u8>,
}

/// Encrypts `api_key` with `master_key` (32 bytes) under a random nonce,
/// prefixing the nonce so `open` can recover it.
pub fn seal(master_key: &[u8; 32], api_key: &str) -> Result<Vec<u8>, CoreError> {
    let unbound = UnboundKey::new(&aead::AES_256_GCM, master_key)
        .map_err(|_| CoreError::internal("invalid gateway master key length"))?;
    let key = LessSafeKey::new(unbound);

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    let mut in_out = api_key.as_bytes().to_vec();
    key.seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| CoreError::internal("sealing gateway credential failed"))?;

    let mut sealed = nonce_bytes.to_vec();
    sealed.extend(in_out);
    Ok(sealed)
}

/// Decrypts a blob produced by `seal`. Called only at dispatch time
/// (spec §4.4): the plaintext key never outlives the single gateway call
/// that needs it.
pub fn open(master_key: &[u8; 32], sealed: &[u8]) -> Result<String, CoreError> {
    if sealed.len() < NONCE_LEN {
        return Err(CoreError::internal("sealed gateway credential truncated"));
    }
    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
    let unbound = UnboundKey::new(&aead::AES_256_GCM, master_key)
        .map_err(|_| CoreError::internal("invalid gateway master key length"))?;
    let key = LessSafeKey::new(unbound);
    let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
        .map_err(|_| CoreError::internal("malformed gateway credential nonce"))?;

    let mut in_out = ciphertext.to_vec();
    let plaintext = key
        .open_in_place(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| CoreError::internal("decrypting gateway credential failed"))?;
    String::from_utf8(plaintext.to_vec()).map_err(|_| CoreError::internal("gateway credential was not utf-8"))
}

/// Reads the 32-byte master key from `GATEWAY_CREDENTIAL_KEY` (hex-encoded).
/// Never logged, never placed on the event bus.
pub fn master_key_from_env() -> Result<[u8; 32], CoreError> {
    let hex_key = std::env::var("GATEWAY_CREDENTIAL_KEY")
        .map_err(|_| CoreError::internal("GATEWAY_CREDENTIAL_KEY is not set"))?;
    let bytes = hex_decode(&hex_key).ok_or_else(|| CoreError::internal("GATEWAY_CREDENTIAL_KEY is not valid hex"))?;
    bytes
        .try_into()
        .map_err(|_| CoreError::internal("GATEWAY_CREDENTIAL_KEY must decode to 32 bytes"))
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_then_open_round_trips() {
        let key = [7u8; 32];
        let sealed = seal(&key, "sk_live_abc123").unwrap();
        assert_eq!(open(&key, &sealed).unwrap(), "sk_live_abc123");
    }

    #[test]
    fn wrong_key_fails_to_open() {
        let key = [7u8; 32];
        let other = [9u8; 32];
        let sealed = seal(&key, "sk_live_abc123").unwrap();
        assert!(open(&other, &sealed).is_err());
    }

    #[test]
    fn truncated_blob_is_rejected() {
        let key = [7u8; 32];
        assert!(open(&key, &[1, 2, 3]).is_err());
    }
}
