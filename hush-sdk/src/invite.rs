//! The invite handshake: how two parties bootstrap a session.
//!
//! The inviter mints a *rendezvous* keypair and a random 32-byte link
//! secret. The tuple `(inviter static key, rendezvous public key, link
//! secret)` is the invite; it travels out of band as a URL fragment or as
//! a signed discovery event.
//!
//! # Acceptance
//!
//! The invitee generates a fresh session keypair, builds an initiator
//! session against the rendezvous key with the link secret as the shared
//! secret, and publishes a doubly-wrapped acceptance:
//!
//! ```text
//! envelope  author: throwaway key, p-tag: rendezvous key
//!           content: AEAD(inner, DH(throwaway, rendezvous))
//! inner     pubkey: invitee static key, linkSecret tag
//!           content: AEAD(session public key, DH(invitee static, inviter static))
//! ```
//!
//! An observer who knows the rendezvous key sees only a throwaway author;
//! the invitee's static identity stays inside the outer layer, while the
//! inner layer authenticates the invitee to the inviter.
//!
//! # Invite URL
//!
//! ```text
//! https://hush.chat/#%7B%22inviter%22%3A%22<hex>%22%2C...%7D
//! ```
//!
//! The fragment is a percent-encoded JSON object
//! `{"inviter": <hex>, "sessionKey": <hex>, "linkSecret": <hex>}` and is
//! never sent to any server.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use percent_encoding::{NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use serde::{Deserialize, Serialize};

use crate::crypto::{self, CryptoError, Keypair};
use crate::envelope::{Envelope, EnvelopeError, Filter, P_TAG};
use crate::session::{Session, SessionError};
use crate::transport::{EventCallback, Transport, Unsubscribe};
use crate::{INVITE_EVENT_KIND, MESSAGE_EVENT_KIND};

/// Value of the `d` tag on invite discovery events.
pub const INVITE_D_TAG: &str = "invite";

/// How long [`IssuedInvite::listen_once`] waits by default.
pub const DEFAULT_ACCEPT_TIMEOUT: Duration = Duration::from_secs(10);

const SESSION_KEY_TAG: &str = "sessionKey";
const LINK_SECRET_TAG: &str = "linkSecret";
const INVITE_URL_ROOT: &str = "https://hush.chat/";

/// The shareable invite record: everything an invitee needs to accept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invite {
    /// The inviter's long-term identity public key (hex).
    pub inviter_public: String,
    /// The one-time rendezvous public key (hex).
    pub rendezvous_public: String,
    /// The initial Double Ratchet shared secret.
    pub link_secret: [u8; 32],
    /// Acceptances beyond this count are silently dropped by the
    /// listener. `None` means unlimited. Never serialized into the
    /// invite itself.
    pub max_uses: Option<u32>,
    /// Local bookkeeping name. Never serialized.
    pub label: Option<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InviteLink {
    inviter: String,
    session_key: String,
    link_secret: String,
}

/// The invitee's static-identity acceptance record, carried inside the
/// outer throwaway-encrypted envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AcceptanceEvent {
    pubkey: String,
    created_at: u64,
    tags: Vec<Vec<String>>,
    content: String,
}

/// What an invitee gets back from [`Invite::accept`]: a ready initiator
/// session and the acceptance envelope to publish.
pub struct Acceptance {
    pub session: Session,
    pub envelope: Envelope,
}

impl Invite {
    /// Serialize as a URL whose fragment carries the invite. Fragments
    /// never reach a server.
    pub fn to_url(&self) -> String {
        let link = InviteLink {
            inviter: self.inviter_public.clone(),
            session_key: self.rendezvous_public.clone(),
            link_secret: hex::encode(self.link_secret),
        };
        let json = serde_json::to_string(&link).expect("invite link serializes");
        format!(
            "{INVITE_URL_ROOT}#{}",
            utf8_percent_encode(&json, NON_ALPHANUMERIC)
        )
    }

    /// Parse an invite from a URL fragment.
    pub fn from_url(url: &str) -> Result<Self, InviteError> {
        let (_, fragment) = url.split_once('#').ok_or(InviteError::MalformedInviteData)?;
        let json = percent_decode_str(fragment)
            .decode_utf8()
            .map_err(|_| InviteError::MalformedInviteData)?;
        let link: InviteLink =
            serde_json::from_str(&json).map_err(|_| InviteError::MalformedInviteData)?;
        crypto::public_key_from_hex(&link.inviter)
            .map_err(|_| InviteError::MalformedInviteData)?;
        crypto::public_key_from_hex(&link.session_key)
            .map_err(|_| InviteError::MalformedInviteData)?;
        let link_secret = decode_secret(&link.link_secret)?;
        Ok(Self {
            inviter_public: link.inviter,
            rendezvous_public: link.session_key,
            link_secret,
            max_uses: None,
            label: None,
        })
    }

    /// Serialize as a signed discovery event, addressable under
    /// `["d", "invite"]`.
    pub fn to_event(&self, inviter: &Keypair) -> Result<Envelope, InviteError> {
        if inviter.public_hex() != self.inviter_public {
            return Err(InviteError::InviterKeyMismatch);
        }
        Ok(Envelope::build(
            INVITE_EVENT_KIND,
            String::new(),
            vec![
                vec!["d".to_string(), INVITE_D_TAG.to_string()],
                vec![SESSION_KEY_TAG.to_string(), self.rendezvous_public.clone()],
                vec![LINK_SECRET_TAG.to_string(), hex::encode(self.link_secret)],
            ],
            inviter,
        )?)
    }

    /// Parse and verify a discovery event published by an inviter.
    pub fn from_event(envelope: &Envelope) -> Result<Self, InviteError> {
        if envelope.kind != INVITE_EVENT_KIND {
            return Err(InviteError::MalformedInviteData);
        }
        envelope.verify().map_err(|_| InviteError::InvalidSignature)?;
        let session_key = envelope
            .first_tag_value(SESSION_KEY_TAG)
            .ok_or(InviteError::MalformedInviteData)?;
        crypto::public_key_from_hex(session_key)
            .map_err(|_| InviteError::MalformedInviteData)?;
        let link_secret = decode_secret(
            envelope
                .first_tag_value(LINK_SECRET_TAG)
                .ok_or(InviteError::MalformedInviteData)?,
        )?;
        Ok(Self {
            inviter_public: envelope.pubkey.clone(),
            rendezvous_public: session_key.to_string(),
            link_secret,
            max_uses: None,
            label: None,
        })
    }

    /// Accept the invite: build an initiator session and the
    /// doubly-wrapped acceptance envelope. The caller publishes the
    /// envelope and starts using the session.
    pub fn accept(
        &self,
        transport: Arc<dyn Transport>,
        invitee_static: &Keypair,
    ) -> Result<Acceptance, InviteError> {
        let rendezvous_public = crypto::public_key_from_hex(&self.rendezvous_public)?;
        let inviter_public = crypto::public_key_from_hex(&self.inviter_public)?;

        let session_keys = Keypair::generate();
        let session = Session::init(
            transport,
            &rendezvous_public,
            &session_keys.secret_bytes(),
            true,
            self.link_secret,
        )?;

        // Inner layer: authenticate ourselves to the inviter and hand
        // over the session public key.
        let identity_key = crypto::conversation_key(invitee_static, &inviter_public)?;
        let inner_content = crypto::aead_seal(&identity_key, session_keys.public_hex().as_bytes())?;
        let acceptance = AcceptanceEvent {
            pubkey: invitee_static.public_hex(),
            created_at: chrono::Utc::now().timestamp() as u64,
            tags: vec![vec![
                LINK_SECRET_TAG.to_string(),
                hex::encode(self.link_secret),
            ]],
            content: inner_content,
        };

        // Outer layer: a throwaway author so observers of the rendezvous
        // key learn nothing about who accepted.
        let throwaway = Keypair::generate();
        let outer_key = crypto::conversation_key(&throwaway, &rendezvous_public)?;
        let sealed = crypto::aead_seal(&outer_key, serde_json::to_string(&acceptance)?.as_bytes())?;
        let envelope = Envelope::build(
            MESSAGE_EVENT_KIND,
            sealed,
            vec![vec![P_TAG.to_string(), self.rendezvous_public.clone()]],
            &throwaway,
        )?;

        Ok(Acceptance { session, envelope })
    }
}

/// An invite as held by its issuer: the shareable record plus the
/// rendezvous secret needed to listen for acceptances.
pub struct IssuedInvite {
    pub invite: Invite,
    rendezvous: Keypair,
}

impl IssuedInvite {
    /// Mint a fresh invite for the given inviter identity.
    pub fn new(inviter_public: &[u8; 32]) -> Self {
        let rendezvous = Keypair::generate();
        Self {
            invite: Invite {
                inviter_public: hex::encode(inviter_public),
                rendezvous_public: rendezvous.public_hex(),
                link_secret: rand::random(),
                max_uses: None,
                label: None,
            },
            rendezvous,
        }
    }

    pub fn with_max_uses(mut self, max_uses: u32) -> Self {
        self.invite.max_uses = Some(max_uses);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.invite.label = Some(label.into());
        self
    }

    /// Subscribe for acceptances. Each valid acceptance yields a
    /// responder [`Session`] and the invitee's static public key.
    /// Malformed or replayed acceptances are dropped with a trace entry;
    /// acceptances beyond `max_uses` are silently ignored.
    pub fn listen(
        &self,
        transport: Arc<dyn Transport>,
        inviter: &Keypair,
        on_accept: impl Fn(Session, [u8; 32]) + Send + Sync + 'static,
    ) -> Result<InviteListener, InviteError> {
        if inviter.public_hex() != self.invite.inviter_public {
            return Err(InviteError::InviterKeyMismatch);
        }
        let filter = Filter::new()
            .kinds(vec![MESSAGE_EVENT_KIND])
            .p_tags(vec![self.invite.rendezvous_public.clone()]);

        let rendezvous = self.rendezvous.clone();
        let inviter = inviter.clone();
        let link_secret = self.invite.link_secret;
        let max_uses = self.invite.max_uses;
        let log = Arc::new(Mutex::new(AcceptanceLog::default()));

        let log_for_callback = log.clone();
        let transport_for_sessions = transport.clone();
        let callback: EventCallback = Arc::new(move |envelope| {
            match handle_acceptance(
                &transport_for_sessions,
                &rendezvous,
                &inviter,
                &link_secret,
                &envelope,
            ) {
                Ok((session, invitee_public)) => {
                    {
                        let mut log = log_for_callback.lock();
                        if let Some(max) = max_uses {
                            if log.used_by.len() as u32 >= max {
                                tracing::debug!("invite use limit reached, dropping acceptance");
                                return;
                            }
                        }
                        log.used_by.push(hex::encode(invitee_public));
                    }
                    on_accept(session, invitee_public);
                }
                Err(error) => {
                    tracing::debug!(error = %error, "ignored invite envelope");
                }
            }
        });
        let cancel = transport.subscribe(filter, callback);
        Ok(InviteListener {
            cancel: Mutex::new(Some(cancel)),
            log,
        })
    }

    /// Wait for the first acceptance, bounded by `timeout`
    /// (default 10 s). The listener is cancelled before returning.
    pub async fn listen_once(
        &self,
        transport: Arc<dyn Transport>,
        inviter: &Keypair,
        timeout: Option<Duration>,
    ) -> Result<(Session, [u8; 32]), InviteError> {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let listener = self.listen(transport, inviter, move |session, invitee| {
            let _ = tx.send((session, invitee));
        })?;
        let wait = timeout.unwrap_or(DEFAULT_ACCEPT_TIMEOUT);
        let result = tokio::time::timeout(wait, rx.recv()).await;
        listener.cancel();
        match result {
            Ok(Some(accepted)) => Ok(accepted),
            _ => Err(InviteError::AcceptTimeout),
        }
    }
}

/// Handle to a running acceptance subscription.
pub struct InviteListener {
    cancel: Mutex<Option<Unsubscribe>>,
    log: Arc<Mutex<AcceptanceLog>>,
}

impl InviteListener {
    /// Stop listening. Idempotent.
    pub fn cancel(&self) {
        if let Some(cancel) = self.cancel.lock().take() {
            cancel();
        }
    }

    /// Static public keys (hex) of everyone whose acceptance was admitted.
    pub fn used_by(&self) -> Vec<String> {
        self.log.lock().used_by.clone()
    }
}

#[derive(Default)]
struct AcceptanceLog {
    used_by: Vec<String>,
}

fn handle_acceptance(
    transport: &Arc<dyn Transport>,
    rendezvous: &Keypair,
    inviter: &Keypair,
    link_secret: &[u8; 32],
    envelope: &Envelope,
) -> Result<(Session, [u8; 32]), InviteError> {
    let throwaway_public = crypto::public_key_from_hex(&envelope.pubkey)?;
    let outer_key = crypto::conversation_key(rendezvous, &throwaway_public)?;
    let inner_bytes = crypto::aead_open(&outer_key, &envelope.content)?;
    let acceptance: AcceptanceEvent =
        serde_json::from_slice(&inner_bytes).map_err(|_| InviteError::MalformedInviteData)?;

    let tagged_secret = acceptance
        .tags
        .iter()
        .find(|tag| tag.first().map(String::as_str) == Some(LINK_SECRET_TAG))
        .and_then(|tag| tag.get(1))
        .ok_or(InviteError::MalformedInviteData)?;
    if *tagged_secret != hex::encode(link_secret) {
        return Err(InviteError::LinkSecretMismatch);
    }

    let invitee_public = crypto::public_key_from_hex(&acceptance.pubkey)?;
    let identity_key = crypto::conversation_key(inviter, &invitee_public)?;
    let session_key_hex = String::from_utf8(crypto::aead_open(&identity_key, &acceptance.content)?)
        .map_err(|_| InviteError::MalformedInviteData)?;
    let session_public = crypto::public_key_from_hex(&session_key_hex)?;

    let session = Session::init(
        transport.clone(),
        &session_public,
        &rendezvous.secret_bytes(),
        false,
        *link_secret,
    )?;
    Ok((session, invitee_public))
}

fn decode_secret(hex_str: &str) -> Result<[u8; 32], InviteError> {
    hex::decode(hex_str)
        .ok()
        .and_then(|bytes| bytes.as_slice().try_into().ok())
        .ok_or(InviteError::MalformedInviteData)
}

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum InviteError {
    #[error("malformed invite data")]
    MalformedInviteData,
    #[error("invalid invite signature")]
    InvalidSignature,
    #[error("link secret does not match this invite")]
    LinkSecretMismatch,
    #[error("keypair does not match the invite's inviter key")]
    InviterKeyMismatch,
    #[error("timed out waiting for an invite acceptance")]
    AcceptTimeout,
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
}

// ── Tests ──────────────────────────────────────────────────────────
