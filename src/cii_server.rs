//! CSS-CII server endpoint.
//!
//! Holds the CII record served to CSAs and a registry of connected clients.
//! Each client remembers the CII it last received so that pushes can carry
//! only the changed fields. Messages leave through per-client channels; the
//! WebSocket task owning the other end does the actual socket write.

use std::collections::HashMap;

use tokio::sync::mpsc::UnboundedSender;

use crate::protocol::{CiiMessage, Omissible};

pub type ClientId = u64;

struct CiiConnection {
    sink: UnboundedSender<String>,
    prev_cii: CiiMessage,
}

pub struct CiiServer {
    cii: CiiMessage,
    enabled: bool,
    next_id: ClientId,
    connections: HashMap<ClientId, CiiConnection>,
}

impl CiiServer {
    pub fn new(enabled: bool) -> Self {
        Self {
            cii: CiiMessage {
                protocol_version: Omissible::Value("1.1".to_string()),
                ..Default::default()
            },
            enabled,
            next_id: 0,
            connections: HashMap::new(),
        }
    }

    pub fn cii(&self) -> &CiiMessage {
        &self.cii
    }

    /// Sole mutation point for the stored CII record.
    pub fn merge(&mut self, delta: CiiMessage) {
        self.cii.merge(delta);
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Disabling drops every connected client.
    pub fn set_enabled(&mut self, enabled: bool) {
        if !enabled && !self.connections.is_empty() {
            tracing::debug!(
                clients = self.connections.len(),
                "CII server disabled, dropping clients"
            );
            self.connections.clear();
        }
        self.enabled = enabled;
    }

    pub fn num_clients(&self) -> usize {
        self.connections.len()
    }

    pub fn client_connected(&mut self, sink: UnboundedSender<String>) -> Option<ClientId> {
        self.accept_client(sink, true)
    }

    pub(crate) fn accept_client(
        &mut self,
        sink: UnboundedSender<String>,
        send_initial: bool,
    ) -> Option<ClientId> {
        if !self.enabled {
            return None;
        }
        let id = self.next_id;
        self.next_id += 1;

        let mut prev_cii = CiiMessage::default();
        if send_initial {
            send(&sink, &self.cii);
            prev_cii = self.cii.clone();
        }

        self.connections.insert(id, CiiConnection { sink, prev_cii });
        Some(id)
    }

    /// Returns whether the client was still registered.
    pub fn client_disconnected(&mut self, client: ClientId) -> bool {
        self.connections.remove(&client).is_some()
    }

    /// Push the stored CII to every client: either each client's diff against
    /// what it last saw, or the full record. Clients with nothing new are
    /// skipped.
    pub fn update_clients(&mut self, send_only_diff: bool) {
        for connection in self.connections.values_mut() {
            let outgoing = if send_only_diff {
                self.cii.diff_since(&connection.prev_cii)
            } else {
                self.cii.clone()
            };
            if send_only_diff && outgoing.is_empty() {
                continue;
            }
            send(&connection.sink, &outgoing);
            connection.prev_cii = self.cii.clone();
        }
    }
}

fn send(sink: &UnboundedSender<String>, cii: &CiiMessage) {
    match serde_json::to_string(cii) {
        Ok(text) => {
            if sink.send(text).is_err() {
                tracing::debug!("CII client sink closed, message dropped");
            }
        }
        Err(err) => tracing::error!(error = ?err, "cannot serialize CII message"),
    }
}

/// Decorator adding a blocking mode to the CII server, so the controller can
/// swap several CII fields without CSAs observing an intermediate state.
/// While blocked, merges are accepted but nothing is pushed; releasing the
/// block flushes.
pub struct BlockableCiiServer {
    server: CiiServer,
    blocking: bool,
}

impl BlockableCiiServer {
    pub fn new(server: CiiServer) -> Self {
        Self {
            server,
            blocking: false,
        }
    }

    pub fn blocking(&self) -> bool {
        self.blocking
    }

    pub fn set_blocking(&mut self, blocking: bool) {
        if self.blocking == blocking {
            return;
        }
        self.blocking = blocking;
        if !self.blocking {
            self.server.update_clients(true);
        }
    }

    /// While blocking, the new client is registered without the usual
    /// welcome message, with an empty "previously sent" record; the flush on
    /// release then delivers the entire current state as its first message.
    pub fn client_connected(&mut self, sink: UnboundedSender<String>) -> Option<ClientId> {
        self.server.accept_client(sink, !self.blocking)
    }

    pub fn client_disconnected(&mut self, client: ClientId) -> bool {
        self.server.client_disconnected(client)
    }

    pub fn update_clients(&mut self, send_only_diff: bool) {
        if !self.blocking {
            self.server.update_clients(send_only_diff);
        }
    }

    pub fn cii(&self) -> &CiiMessage {
        self.server.cii()
    }

    pub fn merge(&mut self, delta: CiiMessage) {
        self.server.merge(delta);
    }

    pub fn enabled(&self) -> bool {
        self.server.enabled()
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.server.set_enabled(enabled);
    }

    pub fn num_clients(&self) -> usize {
        self.server.num_clients()
    }
}
