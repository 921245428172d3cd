use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};

use crate::wallclock::annotate_wallclock_message;

use super::context::WebContext;

/// WebSocket variant of the wall-clock protocol: every received JSON object
/// is echoed back with server timing fields added. Stateless per message.
pub async fn handle_wcws(State(web_context): State<WebContext>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| wcws_session(socket, web_context))
}

async fn wcws_session(mut socket: WebSocket, web_context: WebContext) {
    while let Some(Ok(message)) = socket.recv().await {
        match message {
            Message::Text(text) => {
                let receive_nanos = web_context.wallclock.nanos();

                let incoming: serde_json::Map<String, serde_json::Value> =
                    match serde_json::from_str(&text) {
                        Ok(message) => message,
                        Err(err) => {
                            tracing::debug!(error = ?err, "dropping non-object wall clock message");
                            continue;
                        }
                    };

                let annotated = annotate_wallclock_message(
                    incoming,
                    receive_nanos,
                    web_context.wallclock.nanos(),
                    web_context.precision,
                    web_context.max_freq_error,
                );

                let reply = match serde_json::to_string(&annotated) {
                    Ok(reply) => reply,
                    Err(err) => {
                        tracing::error!(error = ?err, "cannot serialize wall clock response");
                        continue;
                    }
                };
                if socket.send(Message::Text(reply)).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
}
