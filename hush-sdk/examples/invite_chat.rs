//! Invite handshake and chat demo over the in-memory relay.
//!
//! Usage:
//!   cargo run --example invite_chat -- --rounds 3
//!
//! Walks the whole flow in one process: the inviter mints an invite and
//! listens on its rendezvous key, the invitee accepts via the invite URL
//! and publishes the acceptance, then both sides exchange ratcheted
//! messages through relay subscriptions.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use hush_sdk::{InMemoryRelay, Invite, IssuedInvite, Keypair, Transport};

#[derive(Parser)]
#[command(name = "invite-chat", about = "Invite handshake and chat over an in-memory relay")]
struct Args {
    /// Number of ping/pong rounds after the handshake.
    #[arg(long, default_value_t = 3)]
    rounds: u32,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let relay = Arc::new(InMemoryRelay::new());
    let transport: Arc<dyn Transport> = relay.clone();

    let inviter_keys = Keypair::generate();
    let invitee_keys = Keypair::generate();

    let issued = IssuedInvite::new(&inviter_keys.public()).with_label("demo");
    let url = issued.invite.to_url();
    println!("invite URL: {url}");

    // The invitee receives the URL out of band and accepts.
    let accepted = Invite::from_url(&url)?.accept(transport.clone(), &invitee_keys)?;
    let invitee_session = accepted.session.with_label("invitee");

    let publisher = relay.clone();
    let acceptance_envelope = accepted.envelope;
    tokio::spawn(async move {
        publisher
            .publish(acceptance_envelope)
            .expect("relay accepts the envelope");
    });

    let (inviter_session, invitee_public) = issued
        .listen_once(transport.clone(), &inviter_keys, None)
        .await?;
    let inviter_session = inviter_session.with_label("inviter");
    println!("acceptance from {}", hex::encode(invitee_public));

    inviter_session.on_message(|plaintext| {
        println!("inviter  <- {}", String::from_utf8_lossy(&plaintext));
    });
    invitee_session.on_message(|plaintext| {
        println!("invitee  <- {}", String::from_utf8_lossy(&plaintext));
    });

    for round in 0..args.rounds {
        relay.publish(invitee_session.send(format!("ping {round}").as_bytes())?)?;
        relay.publish(inviter_session.send(format!("pong {round}").as_bytes())?)?;
    }

    invitee_session.close();
    inviter_session.close();
    Ok(())
}
