//! Double Ratchet secure sessions over relay event subscriptions.
//!
//! Two parties who have exchanged an initial shared secret and one public
//! key each keep a long-lived [`Session`] with forward secrecy,
//! post-compromise recovery and correct decryption under arbitrary
//! reordering. Envelopes are addressed by rotating ephemeral author keys
//! and carry their ratchet header encrypted, so transport metadata links
//! neither two chains nor two conversations.
//!
//! The relay is abstracted behind [`Transport`]: a filtered subscription
//! service plus a publish function. Sessions open at most two
//! subscriptions — one for the peer's live envelope keys and one for
//! senders still owed out-of-order messages.
//!
//! # Bootstrapping
//!
//! Sessions come from the invite handshake ([`invite`]): the inviter
//! mints a rendezvous key and link secret, the invitee accepts with a
//! doubly-wrapped envelope that hides its identity from observers of the
//! rendezvous key.
//!
//! ```no_run
//! use std::sync::Arc;
//! use hush_sdk::{IssuedInvite, Invite, Keypair, Transport, InMemoryRelay};
//!
//! # fn main() -> anyhow::Result<()> {
//! let relay: Arc<dyn Transport> = Arc::new(InMemoryRelay::new());
//!
//! let inviter = Keypair::generate();
//! let issued = IssuedInvite::new(&inviter.public());
//! let url = issued.invite.to_url();
//!
//! // Out of band: the invitee receives the URL.
//! let invitee = Keypair::generate();
//! let accepted = Invite::from_url(&url)?.accept(relay.clone(), &invitee)?;
//! relay.publish(accepted.envelope)?;
//!
//! let envelope = accepted.session.send(b"hello")?;
//! relay.publish(envelope)?;
//! # Ok(())
//! # }
//! ```

pub mod crypto;
pub mod envelope;
pub mod invite;
pub mod session;
pub mod state;
pub mod transport;

/// Event kind of ratchet message envelopes. All peers must agree.
pub const MESSAGE_EVENT_KIND: u16 = 1060;

/// Event kind of invite discovery events.
pub const INVITE_EVENT_KIND: u16 = 30078;

/// Hard cap on message keys derived across a single missing gap.
/// Exceeding it is fatal to the session.
pub const MAX_SKIP: u32 = 1000;

pub use crypto::{CryptoError, Keypair};
pub use envelope::{Envelope, EnvelopeError, Filter};
pub use invite::{
    Acceptance, Invite, InviteError, InviteListener, IssuedInvite, DEFAULT_ACCEPT_TIMEOUT,
};
pub use session::{Session, SessionError};
pub use state::{Header, SessionState, SkippedKeys};
pub use transport::{EventCallback, InMemoryRelay, Transport, TransportError, Unsubscribe};
