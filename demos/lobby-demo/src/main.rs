//! Starts a peer on a local port and walks two participants through a
//! lobby: create, list, join, chat, leave.
//!
//! ```text
//! RUST_LOG=rally=debug cargo run -p lobby-demo
//! ```

use std::error::Error;
use std::time::Duration;

use rally::prelude::*;
use tokio::time::timeout;
use tracing_subscriber::EnvFilter;

const WAIT: Duration = Duration::from_secs(5);

fn participant(url: &str, name: &str) -> Session {
    Session::new(SessionConfig {
        display_name: Some(name.to_owned()),
        ..SessionConfig::with_url(url)
    })
}

/// Waits until `session`'s directory satisfies `ready`.
async fn settle(
    session: &Session,
    ready: impl FnMut(&LobbyDirectory) -> bool,
) -> Result<LobbyDirectory, Box<dyn Error>> {
    let mut directory = session.watch_directory();
    let snapshot = timeout(WAIT, directory.wait_for(ready)).await??;
    Ok((*snapshot).clone())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("lobby_demo=info,rally=info")),
        )
        .init();

    let server = RallyServer::builder().bind("127.0.0.1:0").build().await?;
    let url = format!("ws://{}", server.local_addr()?);
    let peer = server.handle();
    tokio::spawn(server.run());
    tracing::info!(%url, "peer listening");

    let ada = participant(&url, "Ada");
    let lin = participant(&url, "Lin");

    // --- Ada hosts ---
    ada.create_lobby("Friday night", 1, 2).await?;
    let lobby = settle(&ada, |d| d.current().is_some())
        .await?
        .current()
        .cloned()
        .ok_or("lobby vanished")?;
    tracing::info!(lobby_id = %lobby.id, name = %lobby.name, "Ada is hosting");

    // --- Lin browses and joins ---
    lin.request_lobby_list().await?;
    let listed = settle(&lin, |d| !d.is_empty()).await?;
    for entry in listed.lobbies() {
        tracing::info!(
            lobby_id = %entry.id,
            name = %entry.name,
            seats = entry.member_count(),
            "Lin sees a lobby"
        );
    }
    match lin.check_join(&lobby.id, Role::Pawn) {
        JoinCheck::Allowed => lin.join_lobby(&lobby.id, Role::Pawn).await?,
        other => return Err(format!("cannot join: {other:?}").into()),
    }
    let lin_id = lin.participant_id().clone();
    settle(&ada, |d| d.current().is_some_and(|l| l.pawns.contains(&lin_id))).await?;

    // --- Chat ---
    let mut ada_chat = ada.chat_feed();
    lin.send_chat(&lobby.id, "gl hf").await?;
    ada.send_chat(&lobby.id, "you too").await?;
    for _ in 0..2 {
        let line = timeout(WAIT, ada_chat.recv()).await??;
        tracing::info!(sender = %line.sender_id, text = %line.text, "chat");
    }
    tracing::info!(lines = ada.scrollback(&lobby.id).len(), "Ada's scrollback");

    // --- Lin leaves ---
    lin.leave_lobby(&lobby.id).await?;
    settle(&lin, |d| d.current().is_none()).await?;
    settle(&ada, |d| d.current().is_some_and(|l| l.pawns.is_empty())).await?;
    tracing::info!(lobbies = peer.lobbies().await.len(), "Lin left");

    lin.disconnect().await;
    ada.disconnect().await;
    Ok(())
}
