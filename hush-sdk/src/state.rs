//! Per-session ratchet state and its stable serialized form.
//!
//! [`SessionState`] is exclusively owned by one [`crate::session::Session`]
//! and serializes to a flat JSON object with every 32-byte secret rendered
//! as lowercase hex, so a session can be persisted and resumed across
//! restarts. Live subscriptions are never part of the snapshot; a resumed
//! session re-subscribes lazily on its first message-callback
//! registration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::crypto::Keypair;

/// Header carried — encrypted — with every ratchet message.
///
/// Canonical encoding is UTF-8 JSON with the keys in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    /// 0-based index within the sender's current chain.
    pub number: u32,
    /// The sender's next envelope public key (hex); its first appearance
    /// triggers a DH ratchet step on the receiving side.
    pub next_public_key: String,
    /// Sender wall clock in milliseconds. Informational only.
    pub time: u64,
    /// Length of the sender's previous sending chain.
    pub previous_chain_length: u32,
}

/// Skipped keys retained for one sender envelope key: the header keys that
/// can still unlock that sender's envelopes (at most two) and the message
/// keys derived past gaps, by message number.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedKeys {
    #[serde(with = "hex_key_vec")]
    pub header_keys: Vec<[u8; 32]>,
    #[serde(with = "hex_key_map")]
    pub message_keys: HashMap<u32, [u8; 32]>,
}

/// The complete Double Ratchet state for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    /// Input to every DH ratchet step.
    #[serde(with = "hex_key")]
    pub root_key: [u8; 32],
    /// The key the peer currently authors envelopes with. `None` until
    /// the first inbound message.
    pub their_current_key: Option<String>,
    /// The peer's advertised next envelope key (hex): the DH input and
    /// the promotion target of the next ratchet step.
    pub their_next_key: String,
    /// Authors our outbound envelopes in the current sending chain.
    /// Absent for a responder that has not completed a DH step yet.
    pub our_current_key: Option<Keypair>,
    /// Pre-generated next keypair, advertised in every outbound header.
    pub our_next_key: Keypair,
    #[serde(with = "hex_key_opt")]
    pub sending_chain_key: Option<[u8; 32]>,
    #[serde(with = "hex_key_opt")]
    pub receiving_chain_key: Option<[u8; 32]>,
    /// Messages sent under the current sending chain.
    pub sending_counter: u32,
    /// Messages received under the current receiving chain.
    pub receiving_counter: u32,
    /// Length of the previous sending chain when it was superseded;
    /// transmitted in every header.
    pub previous_sending_count: u32,
    /// Out-of-order state, keyed by sender envelope key (hex).
    pub skipped_keys: HashMap<String, SkippedKeys>,
}

impl SessionState {
    /// Total number of stored skipped message keys across all senders.
    pub fn skipped_message_key_count(&self) -> usize {
        self.skipped_keys
            .values()
            .map(|entry| entry.message_keys.len())
            .sum()
    }
}

// ── Hex serde helpers ──────────────────────────────────────────────

fn decode_key<E: serde::de::Error>(s: &str) -> Result<[u8; 32], E> {
    let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| serde::de::Error::custom("expected 32 bytes of hex"))
}

mod hex_key {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(key: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(key))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(deserializer)?;
        super::decode_key(&s)
    }
}

mod hex_key_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        key: &Option<[u8; 32]>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match key {
            Some(key) => serializer.serialize_some(&hex::encode(key)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<[u8; 32]>, D::Error> {
        let s: Option<String> = Option::deserialize(deserializer)?;
        s.map(|s| super::decode_key(&s)).transpose()
    }
}

mod hex_key_vec {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(keys: &[[u8; 32]], serializer: S) -> Result<S::Ok, S::Error> {
        let encoded: Vec<String> = keys.iter().map(hex::encode).collect();
        serializer.collect_seq(encoded)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<[u8; 32]>, D::Error> {
        let strings: Vec<String> = Vec::deserialize(deserializer)?;
        strings.iter().map(|s| super::decode_key(s)).collect()
    }
}

mod hex_key_map {
    use std::collections::HashMap;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        map: &HashMap<u32, [u8; 32]>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let encoded: HashMap<String, String> = map
            .iter()
            .map(|(number, key)| (number.to_string(), hex::encode(key)))
            .collect();
        serializer.collect_map(encoded)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<HashMap<u32, [u8; 32]>, D::Error> {
        let encoded: HashMap<String, String> = HashMap::deserialize(deserializer)?;
        let mut out = HashMap::with_capacity(encoded.len());
        for (number, key) in encoded {
            let number: u32 = number.parse().map_err(serde::de::Error::custom)?;
            out.insert(number, super::decode_key(&key)?);
        }
        Ok(out)
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_canonical_encoding() {
        let header = Header {
            number: 3,
            next_public_key: "ab".repeat(32),
            time: 1_700_000_000_123,
            previous_chain_length: 2,
        };
        let json = serde_json::to_string(&header).unwrap();
        assert_eq!(
            json,
            format!(
                "{{\"number\":3,\"nextPublicKey\":\"{}\",\"time\":1700000000123,\"previousChainLength\":2}}",
                "ab".repeat(32)
            )
        );
        let back: Header = serde_json::from_str(&json).unwrap();
        assert_eq!(back, header);
    }

    #[test]
    fn state_serde_roundtrip_in_hex() {
        let mut skipped = HashMap::new();
        skipped.insert(
            "cd".repeat(32),
            SkippedKeys {
                header_keys: vec![[1u8; 32], [2u8; 32]],
                message_keys: HashMap::from([(0, [3u8; 32]), (4, [4u8; 32])]),
            },
        );
        let state = SessionState {
            root_key: [9u8; 32],
            their_current_key: Some("cd".repeat(32)),
            their_next_key: "ef".repeat(32),
            our_current_key: Some(Keypair::generate()),
            our_next_key: Keypair::generate(),
            sending_chain_key: Some([5u8; 32]),
            receiving_chain_key: None,
            sending_counter: 7,
            receiving_counter: 5,
            previous_sending_count: 2,
            skipped_keys: skipped,
        };

        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains(&hex::encode([9u8; 32])));
        assert!(!json.contains("[9,"));

        let back: SessionState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
        assert_eq!(back.skipped_message_key_count(), 2);
    }
}
