use std::sync::Arc;

use anyhow::{Context, Result};
use chat_api::PeerId;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use chatcore::{
    cli::{render_message, Cli, Command},
    config::Config,
    events::StateChange,
    store::HttpStore,
    transport::WsTransport,
    ChatSession,
};

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("chatcore=info,warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    let cli = Cli::parse();
    let cfg = Config::load(&cli)?;
    let session = ChatSession::new(
        cfg.user_id.clone(),
        Arc::new(HttpStore::new(cfg.server_url.clone())),
        Arc::new(WsTransport::new(cfg.ws_url())),
        cfg.session_options(),
    );

    match cli.command {
        Command::Users => {
            session.fetch_users().await;
            let snap = session.snapshot();
            if let Some(err) = snap.users_error {
                anyhow::bail!("loading users failed: {err}");
            }
            for user in snap.users {
                println!("{:<24} {}", user.peer_id, user.full_name);
            }
        }
        Command::History { peer } => {
            session.select(Some(PeerId::new(peer))).await;
            let snap = session.snapshot();
            if let Some(err) = snap.conversation.fetch_error {
                anyhow::bail!("loading messages failed: {err}");
            }
            for message in snap.conversation.messages() {
                println!("{}", render_message(message));
            }
        }
        Command::Send { peer, text } => {
            let peer = PeerId::new(peer);
            session.select(Some(peer.clone())).await;
            if let Err(err) = session.open().await {
                warn!(error = %err, "relay unavailable, message will only be persisted");
            }
            let me = session.self_id().clone();
            let stored = session
                .send(&peer, &me, &text)
                .await
                .context("sending message")?;
            println!("{}", stored.id);
            session.close().await;
        }
        Command::Activity { label } => {
            session.open().await.context("connecting to relay")?;
            session.set_activity(&label)?;
            session.close().await;
        }
        Command::Watch => {
            let mut sub = session.subscribe();
            session.open().await.context("connecting to relay")?;
            info!("watching presence - press Ctrl+C to exit");
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    change = sub.recv() => match change {
                        Some(StateChange::PresenceChanged) => {
                            let snap = session.snapshot();
                            let mut online: Vec<String> = snap.presence.online.iter().map(|p| {
                                match snap.presence.activity_of(p) {
                                    Some(activity) => format!("{p} ({activity})"),
                                    None => p.to_string(),
                                }
                            }).collect();
                            online.sort();
                            println!("online: {}", online.join(", "));
                        }
                        Some(StateChange::MessageRelayed(m)) => {
                            println!("{} -> {}: {}", m.sender_id, m.receiver_id, m.content);
                        }
                        Some(StateChange::Disconnected { reason }) => {
                            println!("disconnected: {}", reason.unwrap_or_else(|| "closed".into()));
                            if !session.is_connected() && cfg.reconnect.max_attempts == 0 {
                                break;
                            }
                        }
                        Some(_) => {}
                        None => break,
                    },
                }
            }
            session.close().await;
        }
    }
    Ok(())
}
