use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use super::context::WebContext;

pub async fn handle_cii(State(web_context): State<WebContext>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| cii_session(socket, web_context))
}

async fn cii_session(socket: WebSocket, web_context: WebContext) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let Some(client) = web_context.engine().cii_client_connected(tx) else {
        tracing::debug!("CII connection refused while server is disabled");
        let _ = sender.close().await;
        return;
    };
    tracing::debug!(client, "CII client connected");

    // Writer half: the engine enqueues, this task does the socket I/O. The
    // channel closing (server disabled or client dropped) ends the session.
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
                    // CSAs do not speak on CSS-CII
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    send_task.abort();
    web_context.engine().cii_client_disconnected(client);
    tracing::debug!(client, "CII client disconnected");
}
