use std::net::SocketAddr;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use super::context::WebContext;

/// The `/server` endpoint for the controller (e.g. the TV in a browser).
/// Addresses outside the allow-list get a deliberately opaque 404.
pub async fn handle_controller(
    State(web_context): State<WebContext>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    if !web_context.controller_allowed(&remote.ip()) {
        tracing::warn!(remote = %remote, "controller connection from non-allowed address");
        return StatusCode::NOT_FOUND.into_response();
    }
    ws.on_upgrade(move |socket| controller_session(socket, web_context))
}

async fn controller_session(socket: WebSocket, web_context: WebContext) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    if !web_context.engine().controller_connected(tx) {
        tracing::warn!("second controller connection refused");
        let _ = sender.close().await;
        return;
    }
    tracing::info!("controller connected");

    let mut send_task = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    loop {
        tokio::select! {
            _ = &mut send_task => {
                break;
            },
            inbound = receiver.next() => {
                match inbound {
                    None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                    Some(Ok(Message::Text(text))) => {
                        // malformed messages are logged and dropped; the
                        // connection stays open
                        if let Err(err) = web_context.engine().controller_message(&text) {
                            tracing::warn!(error = %err, "dropping controller message");
                        }
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    send_task.abort();
    web_context.engine().controller_disconnected();
    tracing::info!("controller disconnected");
}
