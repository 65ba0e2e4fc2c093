//! Key derivation and AEAD primitives for the ratchet.
//!
//! Three building blocks cover every cryptographic operation in the crate:
//!
//! - [`kdf`] — HKDF-SHA256 extract + expand producing two 32-byte outputs.
//!   Drives the root chain (`kdf(root_key, dh_output)`) and the symmetric
//!   message chains (`kdf(chain_key, 0x01)`).
//! - [`conversation_key`] — ECDH over secp256k1 between two envelope keys,
//!   reduced to the shared x-coordinate and domain-separated with an HKDF
//!   extract. The same value serves as the header-encryption key for a
//!   direction and as the salt of the next root step.
//! - [`aead_seal`] / [`aead_open`] — AES-256-GCM with a random 12-byte
//!   nonce prepended to the ciphertext, base64 over the concatenation.
//!
//! Envelope keys are BIP340 x-only keys: the same 32-byte public key that
//! authors and signs a relay event is the ECDH input on the other side.
//! ECDH against an x-only key lifts it to the even-y point; since only the
//! shared x-coordinate is used, the result is independent of which y the
//! sender's actual point had.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use hkdf::Hkdf;
use k256::schnorr::signature::{Signer, Verifier};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

/// Info string for the two-output KDF.
const KDF_INFO: &[u8] = b"hush-ratchet-v1";

/// Domain-separation salt for conversation keys.
const CONVERSATION_SALT: &[u8] = b"hush-conversation-v1";

/// Salt for the symmetric chain step: the literal byte 0x01.
pub const CHAIN_STEP_SALT: [u8; 1] = [0x01];

// ── KDF ────────────────────────────────────────────────────────────

/// Two-output KDF: HKDF-SHA256 extract with `salt`, expand to 64 bytes,
/// split into two 32-byte keys.
pub fn kdf(input_key_material: &[u8], salt: &[u8]) -> ([u8; 32], [u8; 32]) {
    let hk = Hkdf::<Sha256>::new(Some(salt), input_key_material);
    let mut okm = [0u8; 64];
    hk.expand(KDF_INFO, &mut okm)
        .expect("64 bytes valid for HKDF");
    let mut first = [0u8; 32];
    let mut second = [0u8; 32];
    first.copy_from_slice(&okm[..32]);
    second.copy_from_slice(&okm[32..]);
    (first, second)
}

/// Derive the shared conversation key between our envelope keypair and a
/// peer envelope public key.
pub fn conversation_key(ours: &Keypair, their_public: &[u8; 32]) -> Result<[u8; 32], CryptoError> {
    let secret =
        k256::SecretKey::from_slice(&ours.secret).map_err(|_| CryptoError::InvalidSecretKey)?;
    let public = lift_x(their_public)?;
    let shared = k256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), public.as_affine());
    let (prk, _) = Hkdf::<Sha256>::extract(Some(CONVERSATION_SALT), shared.raw_secret_bytes());
    let mut key = [0u8; 32];
    key.copy_from_slice(&prk);
    Ok(key)
}

/// Lift an x-only public key to the even-y curve point.
fn lift_x(public: &[u8; 32]) -> Result<k256::PublicKey, CryptoError> {
    let mut sec1 = [0u8; 33];
    sec1[0] = 0x02;
    sec1[1..].copy_from_slice(public);
    k256::PublicKey::from_sec1_bytes(&sec1).map_err(|_| CryptoError::InvalidPublicKey)
}

// ── AEAD ───────────────────────────────────────────────────────────

/// Encrypt with a 32-byte key. Output is `base64(nonce || ciphertext)`.
pub fn aead_seal(key: &[u8; 32], plaintext: &[u8]) -> Result<String, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::EncryptFailed)?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| CryptoError::EncryptFailed)?;
    let mut out = Vec::with_capacity(12 + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(B64.encode(out))
}

/// Decrypt `base64(nonce || ciphertext)` with a 32-byte key.
pub fn aead_open(key: &[u8; 32], payload: &str) -> Result<Vec<u8>, CryptoError> {
    let data = B64
        .decode(payload)
        .map_err(|_| CryptoError::MalformedCiphertext)?;
    if data.len() < 12 {
        return Err(CryptoError::MalformedCiphertext);
    }
    let (nonce, ciphertext) = data.split_at(12);
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::DecryptFailed)?;
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::DecryptFailed)
}

// ── Envelope keypairs ──────────────────────────────────────────────

/// A BIP340 envelope keypair: signs relay events and runs ECDH.
///
/// The secret is stored in its normalized form (the scalar whose public
/// point has even y), so serialize/restore round-trips are stable.
#[derive(Clone, PartialEq, Eq)]
pub struct Keypair {
    secret: [u8; 32],
    public: [u8; 32],
}

impl Keypair {
    /// Generate a fresh random keypair.
    pub fn generate() -> Self {
        let signing = k256::schnorr::SigningKey::random(&mut OsRng);
        Self::from_signing(&signing)
    }

    /// Restore from a 32-byte secret.
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        let signing = k256::schnorr::SigningKey::from_bytes(bytes)
            .map_err(|_| CryptoError::InvalidSecretKey)?;
        Ok(Self::from_signing(&signing))
    }

    fn from_signing(signing: &k256::schnorr::SigningKey) -> Self {
        let mut secret = [0u8; 32];
        secret.copy_from_slice(&signing.to_bytes());
        let mut public = [0u8; 32];
        public.copy_from_slice(&signing.verifying_key().to_bytes());
        Self { secret, public }
    }

    /// The x-only public key.
    pub fn public(&self) -> [u8; 32] {
        self.public
    }

    /// The public key as lowercase hex (the wire identity).
    pub fn public_hex(&self) -> String {
        hex::encode(self.public)
    }

    /// The secret key bytes (for persistence).
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret
    }

    /// Sign a message with BIP340 Schnorr.
    pub fn sign(&self, message: &[u8]) -> Result<[u8; 64], CryptoError> {
        let signing = k256::schnorr::SigningKey::from_bytes(&self.secret)
            .map_err(|_| CryptoError::InvalidSecretKey)?;
        let signature: k256::schnorr::Signature = signing.sign(message);
        let bytes: [u8; 64] = signature.to_bytes().into();
        Ok(bytes)
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the secret.
        f.debug_struct("Keypair")
            .field("public", &self.public_hex())
            .finish_non_exhaustive()
    }
}

/// Verify a BIP340 Schnorr signature by an x-only public key.
pub fn verify_signature(
    public: &[u8; 32],
    message: &[u8],
    signature: &[u8; 64],
) -> Result<(), CryptoError> {
    let verifying = k256::schnorr::VerifyingKey::from_bytes(public)
        .map_err(|_| CryptoError::InvalidPublicKey)?;
    let signature = k256::schnorr::Signature::try_from(signature.as_slice())
        .map_err(|_| CryptoError::InvalidSignature)?;
    verifying
        .verify(message, &signature)
        .map_err(|_| CryptoError::InvalidSignature)
}

/// Parse a lowercase-hex x-only public key.
pub fn public_key_from_hex(s: &str) -> Result<[u8; 32], CryptoError> {
    let bytes = hex::decode(s).map_err(|_| CryptoError::InvalidPublicKey)?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::InvalidPublicKey)
}

// ── Serde ──────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeypairRepr {
    public_key: String,
    secret_key: String,
}

impl Serialize for Keypair {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        KeypairRepr {
            public_key: self.public_hex(),
            secret_key: hex::encode(self.secret),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Keypair {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = KeypairRepr::deserialize(deserializer)?;
        let secret: [u8; 32] = hex::decode(&repr.secret_key)
            .ok()
            .and_then(|bytes| bytes.as_slice().try_into().ok())
            .ok_or_else(|| serde::de::Error::custom("invalid secret key hex"))?;
        let keypair = Keypair::from_secret_bytes(&secret)
            .map_err(|_| serde::de::Error::custom("invalid secret key"))?;
        if keypair.public_hex() != repr.public_key {
            return Err(serde::de::Error::custom(
                "public key does not match secret key",
            ));
        }
        Ok(keypair)
    }
}

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid secret key")]
    InvalidSecretKey,
    #[error("invalid public key")]
    InvalidPublicKey,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("encryption failed")]
    EncryptFailed,
    #[error("decryption failed (wrong key or tampered)")]
    DecryptFailed,
    #[error("malformed ciphertext")]
    MalformedCiphertext,
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kdf_is_deterministic_and_splits() {
        let (a1, a2) = kdf(&[7u8; 32], &[1u8]);
        let (b1, b2) = kdf(&[7u8; 32], &[1u8]);
        assert_eq!(a1, b1);
        assert_eq!(a2, b2);
        assert_ne!(a1, a2);

        // Different salt, different outputs
        let (c1, _) = kdf(&[7u8; 32], &[2u8]);
        assert_ne!(a1, c1);
    }

    #[test]
    fn conversation_key_is_symmetric() {
        let alice = Keypair::generate();
        let bob = Keypair::generate();

        let k1 = conversation_key(&alice, &bob.public()).unwrap();
        let k2 = conversation_key(&bob, &alice.public()).unwrap();
        assert_eq!(k1, k2);

        let carol = Keypair::generate();
        let k3 = conversation_key(&alice, &carol.public()).unwrap();
        assert_ne!(k1, k3);
    }

    #[test]
    fn aead_roundtrip_and_tamper() {
        let key = [3u8; 32];
        let sealed = aead_seal(&key, b"hello").unwrap();
        assert_eq!(aead_open(&key, &sealed).unwrap(), b"hello");

        assert!(aead_open(&[4u8; 32], &sealed).is_err());
        assert!(aead_open(&key, "not base64!!").is_err());
    }

    #[test]
    fn sign_and_verify() {
        let keys = Keypair::generate();
        let sig = keys.sign(b"message").unwrap();
        verify_signature(&keys.public(), b"message", &sig).unwrap();

        assert!(verify_signature(&keys.public(), b"other", &sig).is_err());
        let wrong = Keypair::generate();
        assert!(verify_signature(&wrong.public(), b"message", &sig).is_err());
    }

    #[test]
    fn keypair_restores_from_secret() {
        let keys = Keypair::generate();
        let restored = Keypair::from_secret_bytes(&keys.secret_bytes()).unwrap();
        assert_eq!(restored.public(), keys.public());
    }

    #[test]
    fn keypair_serde_roundtrip() {
        let keys = Keypair::generate();
        let json = serde_json::to_string(&keys).unwrap();
        let restored: Keypair = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, keys);
    }
}
