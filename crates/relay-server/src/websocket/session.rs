//! `WebSocket` session lifecycle: one connected client from upgrade through
//! disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use relay_core::ProtocolError;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument};

use super::connection::Session;
use super::handler::{handle_message, reject};
use crate::hub::Hub;

/// How long the writer may take to flush after the reader stops.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Drive a registered session over `ws`.
///
/// 1. Spawns the writer task: outbound queue → socket, `Close` on cancel
/// 2. Routes inbound text and binary frames; any frame refreshes liveness
/// 3. On close, error, or cancellation removes the session from the hub
#[instrument(skip_all, fields(session_id = %session.id, user_id = %session.user_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    hub: Arc<Hub>,
    session: Arc<Session>,
    mut outbound: mpsc::Receiver<Arc<str>>,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let cancel = session.cancel_token();

    let writer_cancel = cancel.clone();
    let mut writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                frame = outbound.recv() => {
                    let Some(frame) = frame else { break };
                    if ws_tx.send(Message::Text(frame.to_string().into())).await.is_err() {
                        break;
                    }
                }
                () = writer_cancel.cancelled() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => break,
            frame = ws_rx.next() => frame,
        };
        let msg = match frame {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                debug!(error = %e, "websocket read error");
                break;
            }
            None => break,
        };

        match msg {
            Message::Text(text) => handle_message(&hub, &session, text.as_str()),
            Message::Binary(data) => match std::str::from_utf8(&data) {
                Ok(text) => handle_message(&hub, &session, text),
                Err(_) => {
                    session.touch();
                    debug!(len = data.len(), "non-UTF-8 binary frame");
                    reject(&hub, &session, &ProtocolError::InvalidEncoding);
                }
            },
            Message::Ping(_) | Message::Pong(_) => session.touch(),
            Message::Close(_) => {
                info!("client sent close frame");
                break;
            }
        }
    }

    let _ = hub.remove_session(&session.id);
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
        writer.abort();
    }
    debug!("session task finished");
}
