//! Controller-facing WebSocket endpoint state.
//!
//! A single controller (e.g. a TV emulated in a browser) connects here and
//! becomes the authority for CII content and Control Timestamps. At most one
//! connection is held at a time; the current timeline interest set is cached
//! so a freshly connected controller can be told everything it missed.

use std::collections::HashMap;

use tokio::sync::mpsc::UnboundedSender;

use crate::errors::ProxyError;
use crate::protocol::{CiiMessage, ControlTimestamp};

/// Options carried alongside a controller update. Unknown options are
/// ignored; `blockCii` is deliberately tri-state (absent leaves the blocking
/// mode untouched).
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize)]
pub struct UpdateOptions {
    #[serde(rename = "blockCii", default)]
    pub block_cii: Option<bool>,
}

/// A parsed controller message, with absent parts defaulted to empty.
#[derive(Debug, Clone, Default)]
pub struct ControllerUpdate {
    pub cii: CiiMessage,
    pub control_timestamps: HashMap<String, ControlTimestamp>,
    pub options: UpdateOptions,
}

pub(crate) mod model {
    use std::collections::HashMap;

    use serde::{Deserialize, Serialize};

    use crate::protocol::{CiiMessage, ControlTimestamp};

    use super::UpdateOptions;

    #[derive(Debug, Default, Deserialize)]
    pub(crate) struct ControllerMessage {
        #[serde(default)]
        pub(crate) cii: Option<CiiMessage>,

        #[serde(rename = "controlTimestamps", default)]
        pub(crate) control_timestamps: Option<HashMap<String, ControlTimestamp>>,

        #[serde(default)]
        pub(crate) options: Option<UpdateOptions>,
    }

    #[derive(Debug, Serialize)]
    pub(crate) struct TimelinesRequest {
        #[serde(rename = "add_timelineSelectors")]
        pub(crate) add: Vec<String>,

        #[serde(rename = "remove_timelineSelectors")]
        pub(crate) remove: Vec<String>,
    }

    #[derive(Debug, Serialize)]
    pub(crate) struct SlaveCount {
        #[serde(rename = "nrOfSlaves")]
        pub(crate) nr_of_slaves: usize,
    }
}

pub struct ControllerEndpoint {
    sink: Option<UnboundedSender<String>>,
    initial_message: String,
    cached_selectors: Vec<String>,
    connected: bool,
}

impl ControllerEndpoint {
    pub fn new(initial_message: String) -> Self {
        Self {
            sink: None,
            initial_message,
            cached_selectors: vec![],
            connected: false,
        }
    }

    pub fn connected(&self) -> bool {
        self.connected
    }

    /// Accept a controller connection unless one is already held. The new
    /// controller is greeted with the initial message and a timelines
    /// request announcing the whole cached interest set as newly added.
    pub fn client_connected(&mut self, sink: UnboundedSender<String>) -> bool {
        if self.connected {
            return false;
        }
        self.sink = Some(sink);
        if !self.initial_message.is_empty() {
            let initial = self.initial_message.clone();
            if let Err(err) = self.send(initial) {
                tracing::debug!(error = %err, "could not greet controller");
            }
        }
        let selectors = self.cached_selectors.clone();
        if let Err(err) = self.send_timelines_request(selectors.clone(), selectors, vec![]) {
            tracing::debug!(error = %err, "could not announce timeline interest to controller");
        }
        self.connected = true;
        true
    }

    /// The cached interest set survives a disconnect, so a reconnecting
    /// controller gets it re-announced.
    pub fn client_disconnected(&mut self) {
        self.sink = None;
        self.connected = false;
    }

    pub fn parse_message(raw: &str) -> Result<ControllerUpdate, ProxyError> {
        let message: model::ControllerMessage = serde_json::from_str(raw)?;
        Ok(ControllerUpdate {
            cii: message.cii.unwrap_or_default(),
            control_timestamps: message.control_timestamps.unwrap_or_default(),
            options: message.options.unwrap_or_default(),
        })
    }

    /// Tell the controller which timelines are now required. `all` replaces
    /// the cached interest set; only the add/remove delta goes on the wire.
    pub fn send_timelines_request(
        &mut self,
        all: Vec<String>,
        added: Vec<String>,
        removed: Vec<String>,
    ) -> Result<(), ProxyError> {
        self.cached_selectors = all;
        self.send_json(&model::TimelinesRequest {
            add: added,
            remove: removed,
        })
    }

    pub fn update_number_of_slaves(&mut self, nr_of_slaves: usize) -> Result<(), ProxyError> {
        self.send_json(&model::SlaveCount { nr_of_slaves })
    }

    fn send_json<T: serde::Serialize>(&mut self, message: &T) -> Result<(), ProxyError> {
        let text = serde_json::to_string(message)
            .map_err(|err| ProxyError::ControllerTransport(format!("cannot serialize: {err}")))?;
        self.send(text)
    }

    fn send(&mut self, text: String) -> Result<(), ProxyError> {
        // not connected: state is updated, nothing goes on the wire
        let Some(sink) = &self.sink else {
            return Ok(());
        };
        if sink.send(text).is_err() {
            self.sink = None;
            return Err(ProxyError::ControllerTransport(
                "controller socket closed".to_string(),
            ));
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn cached_selectors(&self) -> &[String] {
        &self.cached_selectors
    }
}
