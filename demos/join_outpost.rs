//! # Join Outpost Example
//!
//! Demonstrates a complete live-events client lifecycle:
//!
//! 1. Connect to the live-events server with a session token
//! 2. Join an outpost, verifying the connection's health first
//! 3. Print presence, reactions and timer updates as they arrive
//! 4. Close gracefully on Ctrl+C or when reconnecting gives up
//!
//! ## Running
//!
//! ```sh
//! OUTPOST_TOKEN=... OUTPOST_ID=... OUTPOST_ADDRESS=0x... \
//!     cargo run --example join_outpost
//!
//! # Override the server URL:
//! OUTPOST_LIVE_URL=wss://live.example/ws cargo run --example join_outpost
//! ```

use std::sync::Arc;

use outpost_live_client::{
    IncomingMessageType, LiveClientConfig, LiveEvent, NoMembershipProbe, OutpostClient,
    WebSocketConnector,
};

/// Default server URL when `OUTPOST_LIVE_URL` is not set.
const DEFAULT_URL: &str = "ws://localhost:8080/ws";

fn required(name: &str) -> Result<String, Box<dyn std::error::Error>> {
    std::env::var(name).map_err(|_| format!("{name} must be set").into())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Set `RUST_LOG=outpost_live_client=debug` for connection internals.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let url = std::env::var("OUTPOST_LIVE_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
    let token = required("OUTPOST_TOKEN")?;
    let outpost = required("OUTPOST_ID")?;
    let address = required("OUTPOST_ADDRESS")?;

    let config = LiveClientConfig::new(url, address);
    let (client, mut events) = OutpostClient::new(
        config,
        Arc::new(WebSocketConnector),
        Arc::new(NoMembershipProbe),
    );

    // ── Connect and join ────────────────────────────────────────────
    if !client.connect(&token).await {
        return Err("could not connect to the live-events server".into());
    }
    if !client.reliable_join(&outpost).await {
        client.close().await;
        return Err(format!("could not join outpost {outpost}").into());
    }
    tracing::info!("Joined outpost {outpost}");

    // ── Event loop ──────────────────────────────────────────────────
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    tracing::info!("Event channel closed, exiting");
                    break;
                };

                match event {
                    LiveEvent::Outpost(message) => {
                        let who = message.data.address.as_deref().unwrap_or("?");
                        match message.name {
                            IncomingMessageType::UserJoined => tracing::info!("{who} joined"),
                            IncomingMessageType::UserLeft => tracing::info!("{who} left"),
                            IncomingMessageType::RemainingTimeUpdated => {
                                tracing::info!(
                                    "Time left: {:?}s",
                                    message.data.remaining_time.unwrap_or_default()
                                );
                            }
                            IncomingMessageType::UserTimeIsUp => {
                                tracing::info!("Time is up");
                                break;
                            }
                            name if name.is_reaction() => {
                                let target = message.data.react_to_address.as_deref().unwrap_or("?");
                                tracing::info!("{who} -> {target}: {name:?}");
                            }
                            name => tracing::debug!("{name:?} from {who}"),
                        }
                    }
                    LiveEvent::ConnectionStateChanged(state) => {
                        tracing::info!("Connection: {state:?}");
                    }
                    LiveEvent::MembersRefreshRequested { outpost_uuid } => {
                        tracing::info!("Member list of {outpost_uuid} should be refetched");
                    }
                    LiveEvent::ReconnectExhausted { attempts } => {
                        tracing::error!("Gave up reconnecting after {attempts} attempts; reload to retry");
                        break;
                    }
                }
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, leaving");
                client.leave(&outpost).await;
                break;
            }
        }
    }

    client.close().await;
    Ok(())
}
