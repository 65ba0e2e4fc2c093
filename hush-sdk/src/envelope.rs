//! Relay event envelopes and subscription filters.
//!
//! An envelope is the opaque transport event a relay stores and forwards:
//!
//! ```json
//! {
//!   "id": "<sha256 of the canonical form, hex>",
//!   "pubkey": "<author x-only public key, hex>",
//!   "created_at": 1700000000,
//!   "kind": 1060,
//!   "tags": [["header", "<base64 encrypted header>"]],
//!   "content": "<base64 AEAD body>",
//!   "sig": "<BIP340 signature over the id, hex>"
//! }
//! ```
//!
//! The id is the SHA-256 of the canonical JSON array
//! `[0, pubkey, created_at, kind, tags, content]`, and the signature is
//! made by the author key over the 32 raw id bytes. For ratchet messages
//! the author key rotates with the sending chain, so nothing in the
//! envelope links two chains of the same conversation.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::crypto::{self, CryptoError, Keypair};

/// Tag name carrying the encrypted ratchet header.
pub const HEADER_TAG: &str = "header";

/// Tag name addressing an envelope to a rendezvous key.
pub const P_TAG: &str = "p";

/// An opaque, signed transport event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: String,
}

impl Envelope {
    /// Build and sign an envelope authored by `author`.
    pub fn build(
        kind: u16,
        content: String,
        tags: Vec<Vec<String>>,
        author: &Keypair,
    ) -> Result<Self, EnvelopeError> {
        let created_at = chrono::Utc::now().timestamp() as u64;
        let pubkey = author.public_hex();
        let id_bytes = compute_id(&pubkey, created_at, kind, &tags, &content);
        let sig = author.sign(&id_bytes)?;
        Ok(Self {
            id: hex::encode(id_bytes),
            pubkey,
            created_at,
            kind,
            tags,
            content,
            sig: hex::encode(sig),
        })
    }

    /// Check the id against the content and the signature against the
    /// author key.
    pub fn verify(&self) -> Result<(), EnvelopeError> {
        let id_bytes = compute_id(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        );
        if hex::encode(id_bytes) != self.id {
            return Err(EnvelopeError::IdMismatch);
        }
        let public = crypto::public_key_from_hex(&self.pubkey)?;
        let sig: [u8; 64] = hex::decode(&self.sig)
            .ok()
            .and_then(|bytes| bytes.as_slice().try_into().ok())
            .ok_or(EnvelopeError::InvalidSignature)?;
        crypto::verify_signature(&public, &id_bytes, &sig)
            .map_err(|_| EnvelopeError::InvalidSignature)
    }

    /// Value of the first tag named `name`, if present.
    pub fn first_tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.first().map(String::as_str) == Some(name))
            .and_then(|tag| tag.get(1))
            .map(String::as_str)
    }
}

fn compute_id(
    pubkey: &str,
    created_at: u64,
    kind: u16,
    tags: &[Vec<String>],
    content: &str,
) -> [u8; 32] {
    let canonical = serde_json::json!([0, pubkey, created_at, kind, tags, content]);
    let serialized = canonical.to_string();
    Sha256::digest(serialized.as_bytes()).into()
}

// ── Filters ────────────────────────────────────────────────────────

/// A subscription filter: every listed constraint must match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u16>>,
    #[serde(rename = "#p", skip_serializing_if = "Option::is_none")]
    pub p_tags: Option<Vec<String>>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn authors(mut self, authors: Vec<String>) -> Self {
        self.authors = Some(authors);
        self
    }

    pub fn kinds(mut self, kinds: Vec<u16>) -> Self {
        self.kinds = Some(kinds);
        self
    }

    pub fn p_tags(mut self, p_tags: Vec<String>) -> Self {
        self.p_tags = Some(p_tags);
        self
    }

    /// Whether `envelope` satisfies every constraint of this filter.
    pub fn matches(&self, envelope: &Envelope) -> bool {
        if let Some(authors) = &self.authors {
            if !authors.contains(&envelope.pubkey) {
                return false;
            }
        }
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&envelope.kind) {
                return false;
            }
        }
        if let Some(p_tags) = &self.p_tags {
            let tagged = envelope
                .tags
                .iter()
                .filter(|tag| tag.first().map(String::as_str) == Some(P_TAG))
                .filter_map(|tag| tag.get(1));
            let mut found = false;
            for value in tagged {
                if p_tags.contains(value) {
                    found = true;
                    break;
                }
            }
            if !found {
                return false;
            }
        }
        true
    }
}

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("envelope id does not match its content")]
    IdMismatch,
    #[error("invalid envelope signature")]
    InvalidSignature,
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(author: &Keypair) -> Envelope {
        Envelope::build(
            1060,
            "ciphertext".to_string(),
            vec![vec![HEADER_TAG.to_string(), "blob".to_string()]],
            author,
        )
        .unwrap()
    }

    #[test]
    fn build_and_verify() {
        let author = Keypair::generate();
        let envelope = sample(&author);
        envelope.verify().unwrap();
        assert_eq!(envelope.pubkey, author.public_hex());
        assert_eq!(envelope.first_tag_value(HEADER_TAG), Some("blob"));
    }

    #[test]
    fn tampered_content_fails_verification() {
        let author = Keypair::generate();
        let mut envelope = sample(&author);
        envelope.content = "forged".to_string();
        assert!(matches!(envelope.verify(), Err(EnvelopeError::IdMismatch)));
    }

    #[test]
    fn forged_signature_fails_verification() {
        let author = Keypair::generate();
        let other = Keypair::generate();
        let mut envelope = sample(&author);
        // Re-sign the same id with a different key
        let id_bytes: [u8; 32] = hex::decode(&envelope.id)
            .unwrap()
            .as_slice()
            .try_into()
            .unwrap();
        envelope.sig = hex::encode(other.sign(&id_bytes).unwrap());
        assert!(matches!(
            envelope.verify(),
            Err(EnvelopeError::InvalidSignature)
        ));
    }

    #[test]
    fn filter_matching() {
        let author = Keypair::generate();
        let envelope = Envelope::build(
            1060,
            "c".to_string(),
            vec![vec![P_TAG.to_string(), "aa".repeat(32)]],
            &author,
        )
        .unwrap();

        assert!(Filter::new().matches(&envelope));
        assert!(
            Filter::new()
                .authors(vec![author.public_hex()])
                .kinds(vec![1060])
                .matches(&envelope)
        );
        assert!(
            !Filter::new()
                .authors(vec!["00".repeat(32)])
                .matches(&envelope)
        );
        assert!(!Filter::new().kinds(vec![4]).matches(&envelope));
        assert!(
            Filter::new()
                .p_tags(vec!["aa".repeat(32)])
                .matches(&envelope)
        );
        assert!(
            !Filter::new()
                .p_tags(vec!["bb".repeat(32)])
                .matches(&envelope)
        );
    }
}
