//! The session engine: Double Ratchet send/receive over a transport.
//!
//! A [`Session`] owns one [`SessionState`] and up to two live transport
//! subscriptions:
//!
//! - **primary** — authors are the peer's current and next envelope keys;
//!   reopened whenever either rotates.
//! - **skipped** — authors are the senders still owed out-of-order
//!   messages; open only while the skipped-key store is non-empty.
//!
//! All state mutation is serialized behind one mutex, so sends, manual
//! receives and subscription callbacks never interleave. Application
//! callbacks run after the lock is released; a callback may therefore
//! call back into the same session.
//!
//! Sending never publishes: [`Session::send`] returns the sealed envelope
//! and the caller hands it to the transport.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::crypto::{self, CHAIN_STEP_SALT, CryptoError, Keypair};
use crate::envelope::{Envelope, EnvelopeError, Filter, HEADER_TAG};
use crate::state::{Header, SessionState, SkippedKeys};
use crate::transport::{EventCallback, Transport, Unsubscribe};
use crate::{MAX_SKIP, MESSAGE_EVENT_KIND};

/// Receives each decrypted payload, in arrival order.
pub type MessageCallback = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

/// Receives errors from the subscription path that the caller would
/// otherwise never see (body-decrypt failures, fatal ratchet errors).
pub type DiagnosticCallback = Arc<dyn Fn(&SessionError) + Send + Sync>;

/// A Double Ratchet session between two parties.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    state: SessionState,
    transport: Arc<dyn Transport>,
    label: String,
    weak_self: Weak<Mutex<Inner>>,
    on_message: Option<MessageCallback>,
    on_diagnostic: Option<DiagnosticCallback>,
    primary_sub: Option<SubscriptionHandle>,
    skipped_sub: Option<SubscriptionHandle>,
    poisoned: bool,
    closed: bool,
}

struct SubscriptionHandle {
    authors: Vec<String>,
    cancel: Option<Unsubscribe>,
}

impl SubscriptionHandle {
    fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Session {
    /// Create a session from an initial shared secret, the peer's first
    /// public key and one fresh local secret.
    ///
    /// The initiator derives a sending chain immediately and may send
    /// right away; the responder becomes able to send after processing
    /// the initiator's first envelope.
    pub fn init(
        transport: Arc<dyn Transport>,
        their_public: &[u8; 32],
        our_secret: &[u8; 32],
        is_initiator: bool,
        shared_secret: [u8; 32],
    ) -> Result<Self, SessionError> {
        let provided = Keypair::from_secret_bytes(our_secret)?;
        let state = if is_initiator {
            let our_next = Keypair::generate();
            let dh = crypto::conversation_key(&our_next, their_public)?;
            let (root_key, sending_chain_key) = crypto::kdf(&shared_secret, &dh);
            SessionState {
                root_key,
                their_current_key: None,
                their_next_key: hex::encode(their_public),
                our_current_key: Some(provided),
                our_next_key: our_next,
                sending_chain_key: Some(sending_chain_key),
                receiving_chain_key: None,
                sending_counter: 0,
                receiving_counter: 0,
                previous_sending_count: 0,
                skipped_keys: HashMap::new(),
            }
        } else {
            // The responder keeps the shared secret as its root key; its
            // first inbound header triggers the DH step that produces
            // both chains.
            SessionState {
                root_key: shared_secret,
                their_current_key: None,
                their_next_key: hex::encode(their_public),
                our_current_key: None,
                our_next_key: provided,
                sending_chain_key: None,
                receiving_chain_key: None,
                sending_counter: 0,
                receiving_counter: 0,
                previous_sending_count: 0,
                skipped_keys: HashMap::new(),
            }
        };
        Ok(Self::from_state(transport, state))
    }

    /// Reconstruct a session from a serialized snapshot. No subscriptions
    /// are opened until the first [`Session::on_message`] registration.
    pub fn resume(transport: Arc<dyn Transport>, state: SessionState) -> Self {
        Self::from_state(transport, state)
    }

    /// Reconstruct a session from its JSON snapshot.
    pub fn from_json(transport: Arc<dyn Transport>, json: &str) -> Result<Self, SessionError> {
        Ok(Self::resume(transport, serde_json::from_str(json)?))
    }

    fn from_state(transport: Arc<dyn Transport>, state: SessionState) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<Mutex<Inner>>| {
            Mutex::new(Inner {
                state,
                transport,
                label: "session".to_string(),
                weak_self: weak.clone(),
                on_message: None,
                on_diagnostic: None,
                primary_sub: None,
                skipped_sub: None,
                poisoned: false,
                closed: false,
            })
        });
        Self { inner }
    }

    /// Name this session in trace output.
    pub fn with_label(self, label: impl Into<String>) -> Self {
        self.inner.lock().label = label.into();
        self
    }

    /// Whether a send would currently succeed.
    pub fn can_send(&self) -> bool {
        let inner = self.inner.lock();
        !inner.poisoned
            && inner.state.sending_chain_key.is_some()
            && inner.state.our_current_key.is_some()
    }

    /// Advance the sending chain one step and seal `plaintext` into a
    /// signed envelope. The caller publishes it.
    pub fn send(&self, plaintext: &[u8]) -> Result<Envelope, SessionError> {
        let mut inner = self.inner.lock();
        if inner.poisoned {
            return Err(SessionError::Unusable);
        }
        let chain_key = inner
            .state
            .sending_chain_key
            .ok_or(SessionError::NotYetAbleToSend)?;
        let our_current = inner
            .state
            .our_current_key
            .clone()
            .ok_or(SessionError::NotYetAbleToSend)?;

        let (next_chain, message_key) = crypto::kdf(&chain_key, &CHAIN_STEP_SALT);
        inner.state.sending_chain_key = Some(next_chain);

        let header = Header {
            number: inner.state.sending_counter,
            next_public_key: inner.state.our_next_key.public_hex(),
            time: chrono::Utc::now().timestamp_millis() as u64,
            previous_chain_length: inner.state.previous_sending_count,
        };
        inner.state.sending_counter += 1;

        let their_next = crypto::public_key_from_hex(&inner.state.their_next_key)?;
        let header_key = crypto::conversation_key(&our_current, &their_next)?;
        let encrypted_header =
            crypto::aead_seal(&header_key, serde_json::to_string(&header)?.as_bytes())?;
        let body = crypto::aead_seal(&message_key, plaintext)?;

        let envelope = Envelope::build(
            MESSAGE_EVENT_KIND,
            body,
            vec![vec![HEADER_TAG.to_string(), encrypted_header]],
            &our_current,
        )?;
        tracing::trace!(session = %inner.label, number = header.number, "sealed outbound message");
        Ok(envelope)
    }

    /// Process one inbound envelope and return its decrypted payload.
    ///
    /// `Ok(None)` means the envelope was silently ignored: it did not
    /// decrypt under any known header key, or it is a duplicate of an
    /// already-consumed message. Subscriptions feed this same path.
    pub fn receive(&self, envelope: &Envelope) -> Result<Option<Vec<u8>>, SessionError> {
        let mut inner = self.inner.lock();
        let result = inner.process_envelope(envelope);
        if matches!(result, Err(SessionError::TooManyMissedMessages)) {
            inner.poison();
        }
        inner.sync_subscriptions();
        drop(inner);
        match result {
            Err(error) if error.is_silent() => Ok(None),
            other => other,
        }
    }

    /// Register the application callback and open subscriptions. Decrypted
    /// payloads from transport deliveries arrive here in arrival order.
    pub fn on_message(&self, callback: impl Fn(Vec<u8>) + Send + Sync + 'static) {
        let mut inner = self.inner.lock();
        inner.on_message = Some(Arc::new(callback));
        inner.sync_subscriptions();
    }

    /// Register a callback for receive-path errors that would otherwise
    /// be invisible (the subscription path has no caller to return to).
    pub fn on_diagnostic(&self, callback: impl Fn(&SessionError) + Send + Sync + 'static) {
        self.inner.lock().on_diagnostic = Some(Arc::new(callback));
    }

    /// Cancel all transport subscriptions and drop callbacks. Idempotent;
    /// after return no further callbacks fire. The ratchet state stays
    /// valid and can still be serialized.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.on_message = None;
        inner.on_diagnostic = None;
        inner.cancel_subscriptions();
    }

    /// A point-in-time copy of the ratchet state.
    pub fn snapshot(&self) -> SessionState {
        self.inner.lock().state.clone()
    }

    /// Serialize the ratchet state to its stable JSON form.
    pub fn to_json(&self) -> Result<String, SessionError> {
        Ok(serde_json::to_string(&self.snapshot())?)
    }
}

impl Inner {
    fn process_envelope(&mut self, envelope: &Envelope) -> Result<Option<Vec<u8>>, SessionError> {
        if self.poisoned {
            return Err(SessionError::Unusable);
        }
        if envelope.kind != MESSAGE_EVENT_KIND {
            return Ok(None);
        }
        let encrypted_header = envelope
            .first_tag_value(HEADER_TAG)
            .ok_or(SessionError::MalformedHeader)?
            .to_string();
        let sender = envelope.pubkey.clone();
        // A garbage author key cannot belong to this session.
        let Ok(sender_key) = crypto::public_key_from_hex(&sender) else {
            return Err(SessionError::HeaderDecryptFailed);
        };

        let (header, should_ratchet, from_skipped) =
            self.decrypt_header(&sender_key, &sender, &encrypted_header)?;

        // Out-of-order arrivals resolve from the skipped store first, no
        // matter which header key matched: after our own ratchet step the
        // current-key trial collides with the old chain's header key.
        if let Some(message_key) = self.take_skipped(&sender, header.number) {
            let plaintext = crypto::aead_open(&message_key, &envelope.content)
                .map_err(|_| SessionError::BodyDecryptFailed)?;
            tracing::trace!(session = %self.label, number = header.number, "decrypted skipped message");
            return Ok(Some(plaintext));
        }
        if from_skipped {
            // Matched a retired header key but the message key is gone.
            return Err(SessionError::DuplicateSkippedEnvelope);
        }

        // Replays of fully drained chains can still match a live header
        // key; the author check catches them.
        let known_sender = self.state.their_next_key == sender
            || self.state.their_current_key.as_deref() == Some(sender.as_str());
        if !known_sender {
            return Err(SessionError::DuplicateSkippedEnvelope);
        }

        // Within the live chain message numbers only move forward;
        // anything below the counter without a stored key is a duplicate.
        if !should_ratchet
            && header.number < self.state.receiving_counter
            && self.state.their_current_key.as_deref() == Some(sender.as_str())
        {
            return Err(SessionError::DuplicateSkippedEnvelope);
        }

        if should_ratchet && self.state.receiving_chain_key.is_some() {
            // Close out the current receiving chain before promoting
            // anything: its late arrivals must stay decryptable under the
            // old author key.
            let old_author = self
                .state
                .their_current_key
                .clone()
                .ok_or(SessionError::ReceivingChainMissing)?;
            self.skip_message_keys(&old_author, header.previous_chain_length)?;
        }
        if header.next_public_key != self.state.their_next_key {
            let superseded = std::mem::replace(
                &mut self.state.their_next_key,
                header.next_public_key.clone(),
            );
            self.state.their_current_key = Some(superseded);
            tracing::debug!(session = %self.label, "peer envelope key rotated");
        }
        if should_ratchet {
            self.ratchet_step()?;
        }

        // Fill the store up to this message, then advance one step.
        self.skip_message_keys(&sender, header.number)?;
        let chain_key = self
            .state
            .receiving_chain_key
            .ok_or(SessionError::ReceivingChainMissing)?;
        let (next_chain, message_key) = crypto::kdf(&chain_key, &CHAIN_STEP_SALT);
        self.state.receiving_chain_key = Some(next_chain);
        self.state.receiving_counter += 1;
        crypto::aead_open(&message_key, &envelope.content)
            .map(Some)
            .map_err(|_| SessionError::BodyDecryptFailed)
    }

    /// Try, in order: the current-key conversation, the next-key
    /// conversation, then every stored skipped header key for this
    /// sender. Matching the next key means the peer has started a new
    /// chain against our advertised key, so a DH step is due.
    fn decrypt_header(
        &self,
        sender_key: &[u8; 32],
        sender: &str,
        encrypted_header: &str,
    ) -> Result<(Header, bool, bool), SessionError> {
        if let Some(current) = &self.state.our_current_key {
            if let Ok(key) = crypto::conversation_key(current, sender_key) {
                if let Ok(bytes) = crypto::aead_open(&key, encrypted_header) {
                    return Ok((parse_header(&bytes)?, false, false));
                }
            }
        }
        if let Ok(key) = crypto::conversation_key(&self.state.our_next_key, sender_key) {
            if let Ok(bytes) = crypto::aead_open(&key, encrypted_header) {
                return Ok((parse_header(&bytes)?, true, false));
            }
        }
        if let Some(entry) = self.state.skipped_keys.get(sender) {
            for key in &entry.header_keys {
                if let Ok(bytes) = crypto::aead_open(key, encrypted_header) {
                    return Ok((parse_header(&bytes)?, false, true));
                }
            }
        }
        Err(SessionError::HeaderDecryptFailed)
    }

    /// Remove and return the stored message key for `(sender, number)`,
    /// dropping the sender's whole entry once its last key is consumed.
    fn take_skipped(&mut self, sender: &str, number: u32) -> Option<[u8; 32]> {
        let entry = self.state.skipped_keys.get_mut(sender)?;
        let key = entry.message_keys.remove(&number)?;
        if entry.message_keys.is_empty() {
            self.state.skipped_keys.remove(sender);
            tracing::debug!(session = %self.label, sender, "skipped chain drained");
        }
        Some(key)
    }

    /// Derive and store message keys for `author`'s chain up to (not
    /// including) `until`. The gap cap is evaluated once at entry; on
    /// first insertion for a sender the header keys that can still unlock
    /// it are captured alongside.
    fn skip_message_keys(&mut self, author: &str, until: u32) -> Result<(), SessionError> {
        if until <= self.state.receiving_counter {
            return Ok(());
        }
        if self.state.receiving_counter + MAX_SKIP < until {
            return Err(SessionError::TooManyMissedMessages);
        }
        let mut chain_key = self
            .state
            .receiving_chain_key
            .ok_or(SessionError::ReceivingChainMissing)?;

        if !self.state.skipped_keys.contains_key(author) {
            let author_key = crypto::public_key_from_hex(author)?;
            let mut header_keys = Vec::with_capacity(2);
            if let Some(current) = &self.state.our_current_key {
                header_keys.push(crypto::conversation_key(current, &author_key)?);
            }
            header_keys.push(crypto::conversation_key(&self.state.our_next_key, &author_key)?);
            self.state.skipped_keys.insert(
                author.to_string(),
                SkippedKeys {
                    header_keys,
                    message_keys: HashMap::new(),
                },
            );
        }
        let entry = self
            .state
            .skipped_keys
            .get_mut(author)
            .expect("entry ensured above");
        for number in self.state.receiving_counter..until {
            let (next_chain, message_key) = crypto::kdf(&chain_key, &CHAIN_STEP_SALT);
            chain_key = next_chain;
            entry.message_keys.insert(number, message_key);
        }
        tracing::debug!(session = %self.label, author, until, "stored skipped message keys");
        self.state.receiving_counter = until;
        self.state.receiving_chain_key = Some(chain_key);
        Ok(())
    }

    /// One DH ratchet step: derive the receiving chain against the peer's
    /// advertised key, rotate our keypair, then derive the new sending
    /// chain and root.
    fn ratchet_step(&mut self) -> Result<(), SessionError> {
        self.state.previous_sending_count = self.state.sending_counter;
        self.state.sending_counter = 0;
        self.state.receiving_counter = 0;

        let their_next = crypto::public_key_from_hex(&self.state.their_next_key)?;
        let receive_dh = crypto::conversation_key(&self.state.our_next_key, &their_next)?;
        let (root_key, receiving_chain_key) = crypto::kdf(&self.state.root_key, &receive_dh);
        self.state.receiving_chain_key = Some(receiving_chain_key);

        self.state.our_current_key = Some(self.state.our_next_key.clone());
        self.state.our_next_key = Keypair::generate();

        let send_dh = crypto::conversation_key(&self.state.our_next_key, &their_next)?;
        let (root_key, sending_chain_key) = crypto::kdf(&root_key, &send_dh);
        self.state.root_key = root_key;
        self.state.sending_chain_key = Some(sending_chain_key);
        tracing::debug!(session = %self.label, "DH ratchet step");
        Ok(())
    }

    /// Bring the live subscriptions in line with the state: primary on
    /// the peer's current+next authors, skipped on the authors still owed
    /// messages. No-op until a message callback is registered.
    fn sync_subscriptions(&mut self) {
        if self.on_message.is_none() || self.closed || self.poisoned {
            return;
        }
        let mut primary_authors = Vec::with_capacity(2);
        if let Some(current) = &self.state.their_current_key {
            primary_authors.push(current.clone());
        }
        primary_authors.push(self.state.their_next_key.clone());
        if self.primary_sub.as_ref().map(|sub| &sub.authors) != Some(&primary_authors) {
            if let Some(sub) = self.primary_sub.take() {
                sub.cancel();
            }
            tracing::debug!(session = %self.label, "opening primary subscription");
            self.primary_sub = Some(self.open_subscription(primary_authors));
        }

        let mut skipped_authors: Vec<String> = self.state.skipped_keys.keys().cloned().collect();
        skipped_authors.sort();
        if skipped_authors.is_empty() {
            if let Some(sub) = self.skipped_sub.take() {
                sub.cancel();
                tracing::debug!(session = %self.label, "closed skipped subscription");
            }
        } else if self.skipped_sub.as_ref().map(|sub| &sub.authors) != Some(&skipped_authors) {
            if let Some(sub) = self.skipped_sub.take() {
                sub.cancel();
            }
            tracing::debug!(session = %self.label, "opening skipped subscription");
            self.skipped_sub = Some(self.open_subscription(skipped_authors));
        }
    }

    fn open_subscription(&self, authors: Vec<String>) -> SubscriptionHandle {
        let filter = Filter::new()
            .authors(authors.clone())
            .kinds(vec![MESSAGE_EVENT_KIND]);
        let weak = self.weak_self.clone();
        let callback: EventCallback = Arc::new(move |envelope| {
            dispatch_envelope(&weak, &envelope);
        });
        let cancel = self.transport.subscribe(filter, callback);
        SubscriptionHandle {
            authors,
            cancel: Some(cancel),
        }
    }

    fn cancel_subscriptions(&mut self) {
        if let Some(sub) = self.primary_sub.take() {
            sub.cancel();
        }
        if let Some(sub) = self.skipped_sub.take() {
            sub.cancel();
        }
    }

    fn poison(&mut self) {
        self.poisoned = true;
        self.cancel_subscriptions();
        tracing::warn!(session = %self.label, "session poisoned by fatal ratchet error");
    }
}

/// Subscription delivery: process under the lock, dispatch callbacks
/// outside it.
fn dispatch_envelope(weak: &Weak<Mutex<Inner>>, envelope: &Envelope) {
    let Some(inner) = weak.upgrade() else {
        return;
    };
    let (result, on_message, on_diagnostic, label) = {
        let mut inner = inner.lock();
        let result = inner.process_envelope(envelope);
        if matches!(result, Err(SessionError::TooManyMissedMessages)) {
            inner.poison();
        }
        inner.sync_subscriptions();
        (
            result,
            inner.on_message.clone(),
            inner.on_diagnostic.clone(),
            inner.label.clone(),
        )
    };
    match result {
        Ok(Some(plaintext)) => {
            if let Some(callback) = on_message {
                callback(plaintext);
            }
        }
        Ok(None) => {}
        Err(error) if error.is_silent() => {
            tracing::trace!(session = %label, error = %error, "ignored envelope");
        }
        Err(error) => {
            tracing::debug!(session = %label, error = %error, "failed to process envelope");
            if let Some(callback) = on_diagnostic {
                callback(&error);
            }
        }
    }
}

fn parse_header(bytes: &[u8]) -> Result<Header, SessionError> {
    serde_json::from_slice(bytes).map_err(|_| SessionError::MalformedHeader)
}

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("cannot send yet: the sending chain is not established")]
    NotYetAbleToSend,
    #[error("no header key could decrypt the envelope header")]
    HeaderDecryptFailed,
    #[error("envelope body failed to authenticate")]
    BodyDecryptFailed,
    #[error("skipped message key already consumed")]
    DuplicateSkippedEnvelope,
    #[error("message gap exceeds the skipped-key limit")]
    TooManyMissedMessages,
    #[error("envelope header is not a valid header record")]
    MalformedHeader,
    #[error("receiving chain is not established")]
    ReceivingChainMissing,
    #[error("session is unusable after a fatal ratchet error")]
    Unusable,
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
}

impl SessionError {
    /// Errors handled by silently ignoring the envelope: unrelated
    /// traffic, replays and duplicates. Never logged above trace level.
    pub fn is_silent(&self) -> bool {
        matches!(
            self,
            Self::HeaderDecryptFailed | Self::DuplicateSkippedEnvelope
        )
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::InMemoryRelay;

    fn make_sessions() -> (Session, Session) {
        let relay: Arc<dyn Transport> = Arc::new(InMemoryRelay::new());
        let shared = rand::random::<[u8; 32]>();
        let initiator_keys = Keypair::generate();
        let responder_keys = Keypair::generate();

        let alice = Session::init(
            relay.clone(),
            &responder_keys.public(),
            &initiator_keys.secret_bytes(),
            true,
            shared,
        )
        .unwrap()
        .with_label("alice");
        let bob = Session::init(
            relay,
            &initiator_keys.public(),
            &responder_keys.secret_bytes(),
            false,
            shared,
        )
        .unwrap()
        .with_label("bob");
        (alice, bob)
    }

    #[test]
    fn basic_roundtrip() {
        let (alice, bob) = make_sessions();
        let envelope = alice.send(b"Hello Bob!").unwrap();
        envelope.verify().unwrap();
        let plaintext = bob.receive(&envelope).unwrap().unwrap();
        assert_eq!(plaintext, b"Hello Bob!");
    }

    #[test]
    fn bidirectional_with_ratchet_steps() {
        let (alice, bob) = make_sessions();

        let e1 = alice.send(b"Hi Bob").unwrap();
        assert_eq!(bob.receive(&e1).unwrap().unwrap(), b"Hi Bob");

        let e2 = bob.send(b"Hi Alice").unwrap();
        assert_eq!(alice.receive(&e2).unwrap().unwrap(), b"Hi Alice");

        // Each direction again, exercising another DH step
        let e3 = alice.send(b"Second").unwrap();
        assert_eq!(bob.receive(&e3).unwrap().unwrap(), b"Second");
        let e4 = bob.send(b"Third").unwrap();
        assert_eq!(alice.receive(&e4).unwrap().unwrap(), b"Third");
    }

    #[test]
    fn responder_cannot_send_first() {
        let (_alice, bob) = make_sessions();
        assert!(!bob.can_send());
        assert!(matches!(
            bob.send(b"too early"),
            Err(SessionError::NotYetAbleToSend)
        ));
    }

    #[test]
    fn replayed_envelope_is_ignored() {
        let (alice, bob) = make_sessions();
        let envelope = alice.send(b"once").unwrap();
        assert_eq!(bob.receive(&envelope).unwrap().unwrap(), b"once");
        // Same envelope again: silently dropped, state untouched
        let before = bob.snapshot();
        assert_eq!(bob.receive(&envelope).unwrap(), None);
        assert_eq!(bob.snapshot(), before);
    }

    #[test]
    fn unrelated_envelope_is_ignored() {
        let (alice, _bob) = make_sessions();
        let (carol, _dave) = make_sessions();
        let envelope = carol.send(b"for dave").unwrap();
        assert_eq!(alice.receive(&envelope).unwrap(), None);
    }

    #[test]
    fn wrong_kind_is_ignored() {
        let (alice, bob) = make_sessions();
        let mut envelope = alice.send(b"m").unwrap();
        envelope.kind = MESSAGE_EVENT_KIND + 1;
        assert_eq!(bob.receive(&envelope).unwrap(), None);
    }

    #[test]
    fn missing_header_tag_is_malformed() {
        let (alice, bob) = make_sessions();
        let mut envelope = alice.send(b"m").unwrap();
        envelope.tags.clear();
        assert!(matches!(
            bob.receive(&envelope),
            Err(SessionError::MalformedHeader)
        ));
    }

    #[test]
    fn tampered_body_reports_decrypt_failure() {
        let (alice, bob) = make_sessions();
        let mut envelope = alice.send(b"m").unwrap();
        envelope.content = crate::crypto::aead_seal(&[0u8; 32], b"garbage").unwrap();
        assert!(matches!(
            bob.receive(&envelope),
            Err(SessionError::BodyDecryptFailed)
        ));
    }
}
