use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path,
    },
    response::Response,
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use log::info;
use serde_json::Value;

use pullup_core::util::random_string;
use pullup_domain::chat::{ChatConn, ConnReceiver};

use crate::{auth::SoftSession, Router, ServerContext};

/// `/ws/<markerId>`: joins the marker's chat room.
async fn chat_ws(
    ws: WebSocketUpgrade,
    context: ServerContext,
    session: SoftSession,
    Path(marker_id): Path<String>,
) -> Response {
    let (user_id, nickname) = match session.0 {
        Some(details) => (details.user_id.to_string(), details.username),
        None => (String::new(), format!("손님-{}", random_string(4))),
    };

    ws.on_upgrade(move |socket| handle_socket(socket, context, marker_id, user_id, nickname))
}

async fn handle_socket(
    socket: WebSocket,
    context: ServerContext,
    room_id: String,
    user_id: String,
    nickname: String,
) {
    let client_id = random_string(12);
    let (conn, receiver) = ChatConn::new(client_id.clone(), user_id, nickname);

    context.domain.chat.join_room(&room_id, conn.clone());
    info!("Client {client_id} joined room {room_id}");

    let (ws_tx, mut ws_rx) = socket.split();

    let writer = tokio::spawn(write_frames(ws_tx, receiver));

    // This task owns the read half. Every frame stamps activity so the idle
    // sweeper leaves live connections alone.
    while let Some(message) = ws_rx.next().await {
        match message {
            Ok(Message::Text(text)) => {
                conn.touch();

                let body = extract_message(&text);

                if body.is_empty() {
                    continue;
                }

                context
                    .domain
                    .chat
                    .broadcast_message(&room_id, &body, &conn.nickname, &conn.user_id)
                    .await;
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => conn.touch(),
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }

    context.domain.chat.leave_room(&room_id, &client_id);
    conn.close();
    writer.abort();

    info!("Client {client_id} left room {room_id}");
}

/// The writer task: drains the bounded send channel onto the socket until
/// the channel closes, the connection is told to close, or a write fails.
async fn write_frames(
    mut ws_tx: futures_util::stream::SplitSink<WebSocket, Message>,
    mut receiver: ConnReceiver,
) {
    loop {
        tokio::select! {
            frame = receiver.frames.recv() => {
                match frame {
                    Some(payload) => {
                        if ws_tx.send(Message::Text((*payload).clone())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = receiver.closed.changed() => break,
        }
    }

    let _ = ws_tx.close().await;
}

/// Clients send `{"message": "..."}`; bare text is tolerated.
fn extract_message(text: &str) -> String {
    serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|value| {
            value
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| text.to_string())
}

pub fn router() -> Router {
    Router::new().route("/ws/:markerId", get(chat_ws))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_message() {
        assert_eq!(extract_message(r#"{"message":"hi"}"#), "hi");
        assert_eq!(extract_message("plain text"), "plain text");
        assert_eq!(
            extract_message(r#"{"other":"x"}"#),
            r#"{"other":"x"}"#,
            "frames without a message field pass through verbatim"
        );
    }
}
