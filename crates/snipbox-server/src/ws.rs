//! WebSocket transport for sessions
//!
//! Splits the socket into a reader task feeding [`Inbound`] events and a
//! writer task draining [`ServerMessage`]s, then lets the library's session
//! supervisor run between them.

use std::time::Duration;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use snipbox::session::{Inbound, ServerMessage, Session};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::http::AppState;

const INBOUND_BUFFER: usize = 32;
const OUTBOUND_BUFFER: usize = 256;

/// How long the writer may take to flush after the session ends
const WRITER_DRAIN: Duration = Duration::from_secs(5);

/// GET /ws - upgrade to a session
pub async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

async fn serve_socket(socket: WebSocket, state: AppState) {
    let (sink, stream) = socket.split();
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BUFFER);
    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);

    let session = Session::new(state.runner.clone(), (*state.session).clone())
        .with_registry(state.registry.clone());
    let id = session.id();
    debug!(session = %id, "websocket upgraded");

    let reader = tokio::spawn(read_frames(stream, inbound_tx));
    let mut writer = tokio::spawn(write_frames(sink, outbound_rx));

    let reason = session.run(inbound_rx, outbound_tx).await;

    reader.abort();
    if tokio::time::timeout(WRITER_DRAIN, &mut writer).await.is_err() {
        warn!(session = %id, "writer did not drain, dropping connection");
        writer.abort();
    }
    info!(session = %id, %reason, "websocket closed");
}

async fn read_frames(mut stream: SplitStream<WebSocket>, inbound: mpsc::Sender<Inbound>) {
    while let Some(frame) = stream.next().await {
        let event = match frame {
            Ok(Message::Text(text)) => Inbound::Text(text),
            Ok(Message::Binary(data)) => Inbound::Text(String::from_utf8_lossy(&data).into_owned()),
            Ok(Message::Pong(_)) => Inbound::Pong,
            // answered by axum itself
            Ok(Message::Ping(_)) => continue,
            Ok(Message::Close(_)) => Inbound::Closed,
            Err(e) => {
                debug!(error = %e, "websocket read failed");
                Inbound::Closed
            }
        };

        let closed = event == Inbound::Closed;
        if inbound.send(event).await.is_err() || closed {
            break;
        }
    }
}

async fn write_frames(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<ServerMessage>,
) {
    while let Some(message) = outbound.recv().await {
        let text = match message.to_json() {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "failed to encode server message");
                continue;
            }
        };

        // a transport ping as well, so clients without protocol support still answer
        if matches!(message, ServerMessage::Ping) && sink.send(Message::Ping(Vec::new())).await.is_err()
        {
            break;
        }
        if sink.send(Message::Text(text)).await.is_err() {
            break;
        }
        if matches!(message, ServerMessage::Closing { .. }) {
            let _ = sink.send(Message::Close(None)).await;
            break;
        }
    }
}
