//! CSS-TS server endpoint.
//!
//! CSAs open a connection and send a setup message naming the content they
//! are watching and the timeline they want. The server keeps the timeline
//! source informed of which selectors are still needed by anyone, and pushes
//! a Control Timestamp to each client whenever its timeline changes. A
//! timeline that the source cannot supply, or whose content id stem does not
//! match the current content, is reported as unavailable.

use std::collections::HashMap;

use tokio::sync::mpsc::UnboundedSender;

use crate::errors::ProxyError;
use crate::protocol::ControlTimestamp;
use crate::timeline_source::{InterestChange, TimelineSource};
use crate::wallclock::WallClock;

pub type ClientId = u64;

pub(crate) mod model {
    use serde::{Deserialize, Serialize};

    /// Per-connection setup sent by a CSA after connecting.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct SetupData {
        pub content_id_stem: String,
        pub timeline_selector: String,
    }
}

pub use model::SetupData;

struct TsConnection {
    sink: UnboundedSender<String>,
    setup: Option<SetupData>,
    last_sent: Option<ControlTimestamp>,
}

pub struct TsServer {
    content_id: Option<String>,
    enabled: bool,
    wallclock: WallClock,
    next_id: ClientId,
    connections: HashMap<ClientId, TsConnection>,
}

impl TsServer {
    pub fn new(wallclock: WallClock, enabled: bool) -> Self {
        Self {
            content_id: None,
            enabled,
            wallclock,
            next_id: 0,
            connections: HashMap::new(),
        }
    }

    pub fn content_id(&self) -> Option<&str> {
        self.content_id.as_deref()
    }

    pub fn set_content_id(&mut self, content_id: Option<String>) {
        self.content_id = content_id;
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Disabling drops every client, which releases their timeline
    /// selectors; the resulting interest changes are handed back.
    pub fn set_enabled(
        &mut self,
        enabled: bool,
        source: &mut dyn TimelineSource,
    ) -> Vec<InterestChange> {
        let mut changes = vec![];
        if !enabled && !self.connections.is_empty() {
            tracing::debug!(
                clients = self.connections.len(),
                "TS server disabled, dropping clients"
            );
            let clients: Vec<ClientId> = self.connections.keys().copied().collect();
            for client in clients {
                changes.extend(self.client_disconnected(client, source));
            }
        }
        self.enabled = enabled;
        changes
    }

    pub fn num_clients(&self) -> usize {
        self.connections.len()
    }

    pub fn client_connected(&mut self, sink: UnboundedSender<String>) -> Option<ClientId> {
        if !self.enabled {
            return None;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.connections.insert(
            id,
            TsConnection {
                sink,
                setup: None,
                last_sent: None,
            },
        );
        Some(id)
    }

    /// Handle a setup message: mark the requested selector as needed, release
    /// a previously requested one this client no longer wants, and push the
    /// current timeline state to the client.
    pub fn client_setup(
        &mut self,
        client: ClientId,
        setup: SetupData,
        source: &mut dyn TimelineSource,
    ) -> Result<Vec<InterestChange>, ProxyError> {
        let previous_setup = match self.connections.get_mut(&client) {
            Some(connection) => {
                let previous = connection.setup.replace(setup.clone());
                connection.last_sent = None;
                previous
            }
            None => {
                return Err(ProxyError::LibraryContractViolation(format!(
                    "setup for unknown TS client {client}"
                )))
            }
        };

        let mut changes = vec![];
        if let Some(previous) = previous_setup {
            if previous.timeline_selector != setup.timeline_selector
                && !self.selector_in_use(&previous.timeline_selector)
            {
                changes.extend(source.timeline_selector_not_needed(&previous.timeline_selector));
            }
        }
        changes.extend(source.timeline_selector_needed(&setup.timeline_selector));

        self.update_client(client, source);
        Ok(changes)
    }

    pub fn client_disconnected(
        &mut self,
        client: ClientId,
        source: &mut dyn TimelineSource,
    ) -> Vec<InterestChange> {
        let Some(connection) = self.connections.remove(&client) else {
            return vec![];
        };
        let mut changes = vec![];
        if let Some(setup) = connection.setup {
            if !self.selector_in_use(&setup.timeline_selector) {
                changes.extend(source.timeline_selector_not_needed(&setup.timeline_selector));
            }
        }
        changes
    }

    /// Push the current Control Timestamp to every client that has completed
    /// setup. Unchanged timelines are not re-sent.
    pub fn update_all_clients(&mut self, source: &dyn TimelineSource) {
        let clients: Vec<ClientId> = self.connections.keys().copied().collect();
        for client in clients {
            self.update_client(client, source);
        }
    }

    fn update_client(&mut self, client: ClientId, source: &dyn TimelineSource) {
        let now = self.wallclock.nanos();
        let content_id = self.content_id.clone();
        let Some(connection) = self.connections.get_mut(&client) else {
            return;
        };
        let Some(setup) = connection.setup.clone() else {
            return;
        };

        let available = content_matches_stem(content_id.as_deref(), &setup.content_id_stem)
            .then(|| source.control_timestamp(&setup.timeline_selector))
            .flatten();
        let timestamp = available.unwrap_or_else(|| ControlTimestamp::unavailable(now));

        let already_sent = match &connection.last_sent {
            Some(previous) if *previous == timestamp => true,
            Some(previous) if !previous.is_available() && !timestamp.is_available() => true,
            _ => false,
        };
        if already_sent {
            return;
        }

        match serde_json::to_string(&timestamp) {
            Ok(text) => {
                if connection.sink.send(text).is_err() {
                    tracing::debug!(client, "TS client sink closed, message dropped");
                }
            }
            Err(err) => tracing::error!(error = ?err, "cannot serialize Control Timestamp"),
        }
        connection.last_sent = Some(timestamp);
    }

    fn selector_in_use(&self, selector: &str) -> bool {
        self.connections.values().any(|connection| {
            connection
                .setup
                .as_ref()
                .is_some_and(|setup| setup.timeline_selector == selector)
        })
    }
}

fn content_matches_stem(content_id: Option<&str>, stem: &str) -> bool {
    content_id.is_some_and(|content_id| content_id.starts_with(stem))
}
