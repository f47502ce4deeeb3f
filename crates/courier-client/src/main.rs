//! # courier
//!
//! Headless console front-end. Starts a session, prints the link URI when
//! onboarding, then echoes incoming messages and sends every stdin line of
//! the form `<recipient> <text>` (prefix the recipient with `group:` for a
//! group id). Ctrl-C exits.

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};

use courier_client::{AppPhase, ClientConfig, LinkState, Session, SessionEvent};
use courier_shared::constants::APP_NAME;
use courier_shared::types::Recipient;
use courier_store::StoreEvent;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    courier_client::init_tracing();

    info!("Starting {} v{}", APP_NAME, env!("CARGO_PKG_VERSION"));

    let config = ClientConfig::from_env();
    info!(?config, "Loaded configuration");

    let session = std::sync::Arc::new(Session::new(config).context("failed to open session")?);

    spawn_phase_printer(&session);
    spawn_message_printer(&session)?;
    spawn_event_printer(&session);

    {
        let session = session.clone();
        tokio::spawn(async move {
            if let Err(e) = session.start().await {
                warn!(error = %e, "Session start failed");
            }
        });
    }

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            line = stdin.next_line() => {
                match line.context("failed to read stdin")? {
                    Some(line) => handle_input(&session, &line).await,
                    None => break,
                }
            }
        }
    }

    session.shutdown().await.context("shutdown failed")?;
    Ok(())
}

async fn handle_input(session: &Session, line: &str) {
    let Some((target, text)) = line.trim().split_once(char::is_whitespace) else {
        return;
    };
    if !session.phase().is_chat() {
        eprintln!("not ready to send yet");
        return;
    }

    let recipient = match target.strip_prefix("group:") {
        Some(group_id) => Recipient::Group(group_id.to_string()),
        None => Recipient::Direct(target.to_string()),
    };

    match session.send_message(&recipient, text.trim()).await {
        Ok(outcome) => info!(?outcome, "Send finished"),
        Err(e) => warn!(error = %e, "Send rejected"),
    }
}

fn spawn_phase_printer(session: &Session) {
    let mut phase = session.watch_phase();
    tokio::spawn(async move {
        loop {
            let current = phase.borrow_and_update().clone();
            match &current {
                AppPhase::Loading => println!("loading..."),
                AppPhase::Onboarding(LinkState::RequestingUri) => println!("requesting link..."),
                AppPhase::Onboarding(LinkState::WaitingForScan { uri }) => {
                    println!("scan this link from your phone:\n{uri}")
                }
                AppPhase::Onboarding(LinkState::Success) => println!("linked"),
                AppPhase::Onboarding(LinkState::Error { reason }) => {
                    println!("link failed: {reason}")
                }
                AppPhase::Chat => println!("ready"),
            }
            if phase.changed().await.is_err() {
                break;
            }
        }
    });
}

fn spawn_message_printer(session: &Session) -> anyhow::Result<()> {
    let mut events = session.subscribe_store()?;
    tokio::spawn(async move {
        while let Some(event) = next_event(&mut events, "store").await {
            if let StoreEvent::NewMessage { message, .. } = event {
                if !message.outgoing {
                    let from = message.sender_name.as_deref().unwrap_or(&message.sender);
                    println!("[{}] {from}: {}", message.conversation_key, message.content);
                }
            }
        }
    });
    Ok(())
}

/// Next event of a printer feed. A printer that falls behind skips what it
/// missed and keeps going; `None` once the feed is closed.
async fn next_event<T: Clone>(events: &mut broadcast::Receiver<T>, feed: &str) -> Option<T> {
    loop {
        match events.recv().await {
            Ok(event) => return Some(event),
            Err(RecvError::Lagged(skipped)) => {
                warn!(feed, skipped, "Printer fell behind, skipping events");
            }
            Err(RecvError::Closed) => return None,
        }
    }
}

fn spawn_event_printer(session: &Session) {
    let mut events = session.subscribe();
    tokio::spawn(async move {
        while let Some(event) = next_event(&mut events, "session").await {
            if let SessionEvent::DaemonExited { code } = event {
                println!("daemon exited ({code:?})");
            }
        }
    });
}
