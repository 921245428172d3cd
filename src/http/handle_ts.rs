use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::ts_server::SetupData;

use super::context::WebContext;

pub async fn handle_ts(State(web_context): State<WebContext>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| ts_session(socket, web_context))
}

async fn ts_session(socket: WebSocket, web_context: WebContext) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let Some(client) = web_context.engine().ts_client_connected(tx) else {
        tracing::debug!("TS connection refused while server is disabled");
        let _ = sender.close().await;
        return;
    };
    tracing::debug!(client, "TS client connected");

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
                        match serde_json::from_str::<SetupData>(&text) {
                            Ok(setup) => {
                                let result = web_context.engine().ts_client_setup(client, setup);
                                if let Err(err) = result {
                                    tracing::error!(error = %err, client, "TS setup failed fatally");
                                    web_context.shutdown.cancel();
                                    break;
                                }
                            }
                            // Actual/Earliest/Latest reports and anything else
                            // a CSA may send; nothing here consumes them.
                            Err(err) => {
                                tracing::debug!(error = ?err, client, "ignoring non-setup CSS-TS message");
                            }
                        }
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    send_task.abort();
    web_context.engine().ts_client_disconnected(client);
    tracing::debug!(client, "TS client disconnected");
}
