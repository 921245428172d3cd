//! The proxying engine.
//!
//! Binds one controller to the CSS-CII and CSS-TS server endpoints. The
//! controller supplies CII deltas and Control Timestamps; CSA interest in
//! timelines and the CII client count flow back up to it. The CSS servers
//! are only enabled while a controller connection is open, and the
//! advertised TS/WC URLs in the served CII can never be overridden from
//! upstream.
//!
//! Every entry point takes `&mut self`; the HTTP layer serialises them
//! behind one mutex, so one controller message is handled to completion
//! before anything else observes the state. All pushes are channel enqueues
//! and never block in here.

use tokio::sync::mpsc::UnboundedSender;

use crate::cii_server::{self, BlockableCiiServer};
use crate::controller::{ControllerEndpoint, ControllerUpdate};
use crate::errors::ProxyError;
use crate::protocol::{CiiMessage, Omissible};
use crate::timeline_source::{InterestChange, ProxyTimelineSource};
use crate::ts_server::{self, SetupData, TsServer};

pub struct ProxyEngine {
    cii_server: BlockableCiiServer,
    ts_server: TsServer,
    source: ProxyTimelineSource,
    controller: ControllerEndpoint,
}

impl ProxyEngine {
    /// Take control of the given CSS servers. Both are forced to disabled
    /// until a controller connects, whatever state they were handed over in,
    /// and the served CII is seeded with the advertised TS and WC URLs.
    pub fn new(
        cii_server: BlockableCiiServer,
        ts_server: TsServer,
        cii_url: &str,
        ts_url: &str,
        wc_url: &str,
    ) -> Self {
        let initial_message = serde_json::json!({ "ciiUrl": cii_url }).to_string();

        let mut engine = Self {
            cii_server,
            ts_server,
            source: ProxyTimelineSource::new(),
            controller: ControllerEndpoint::new(initial_message),
        };
        engine.cii_server.merge(CiiMessage {
            ts_url: Omissible::Value(ts_url.to_string()),
            wc_url: Omissible::Value(wc_url.to_string()),
            ..Default::default()
        });
        engine.apply_enablement();
        engine
    }

    /// The CSS servers follow the controller connection as a pair.
    fn apply_enablement(&mut self) {
        let connected = self.controller.connected();
        self.cii_server.set_enabled(connected);
        let changes = self.ts_server.set_enabled(connected, &mut self.source);
        for change in changes {
            self.forward_interest_change(change);
        }
        tracing::info!(enabled = connected, "CII & TS servers enabled?");
    }

    fn forward_interest_change(&mut self, change: InterestChange) {
        if let Err(err) =
            self.controller
                .send_timelines_request(change.all, change.added, change.removed)
        {
            tracing::debug!(error = %err, "timeline interest not delivered to controller");
        }
    }

    fn send_slave_count(&mut self) {
        let count = self.cii_server.num_clients();
        if let Err(err) = self.controller.update_number_of_slaves(count) {
            tracing::debug!(error = %err, "slave count not delivered to controller");
        }
    }

    // Controller side.

    pub fn controller_connected(&mut self, sink: UnboundedSender<String>) -> bool {
        if !self.controller.client_connected(sink) {
            return false;
        }
        self.apply_enablement();
        true
    }

    pub fn controller_disconnected(&mut self) {
        self.controller.client_disconnected();
        self.apply_enablement();
    }

    pub fn controller_message(&mut self, raw: &str) -> Result<(), ProxyError> {
        let update = ControllerEndpoint::parse_message(raw)?;
        self.apply_update(update);
        Ok(())
    }

    /// Apply one controller update, in order: pin the advertised URLs, honour
    /// a blocking request, merge the CII delta, push the CII diff, hand the
    /// content id and fresh Control Timestamps to the TS side, push timelines.
    fn apply_update(&mut self, update: ControllerUpdate) {
        let mut cii = update.cii;
        // the proxy is the authority for these; whatever the controller sent
        // must not reach the stored record
        cii.ts_url = Omissible::Omitted;
        cii.wc_url = Omissible::Omitted;

        if update.options.block_cii == Some(true) {
            self.cii_server.set_blocking(true);
        }
        self.cii_server.merge(cii);
        if update.options.block_cii == Some(false) {
            self.cii_server.set_blocking(false);
        }
        self.cii_server.update_clients(true);

        let content_id = self.cii_server.cii().content_id.value().cloned();
        self.ts_server.set_content_id(content_id);
        self.source.timelines_update(update.control_timestamps);
        self.ts_server.update_all_clients(&self.source);
    }

    // CSA side, CSS-CII.

    pub fn cii_client_connected(
        &mut self,
        sink: UnboundedSender<String>,
    ) -> Option<cii_server::ClientId> {
        let client = self.cii_server.client_connected(sink)?;
        self.send_slave_count();
        Some(client)
    }

    pub fn cii_client_disconnected(&mut self, client: cii_server::ClientId) {
        if self.cii_server.client_disconnected(client) {
            self.send_slave_count();
        }
    }

    // CSA side, CSS-TS.

    pub fn ts_client_connected(
        &mut self,
        sink: UnboundedSender<String>,
    ) -> Option<ts_server::ClientId> {
        self.ts_server.client_connected(sink)
    }

    pub fn ts_client_setup(
        &mut self,
        client: ts_server::ClientId,
        setup: SetupData,
    ) -> Result<(), ProxyError> {
        let changes = self
            .ts_server
            .client_setup(client, setup, &mut self.source)?;
        for change in changes {
            self.forward_interest_change(change);
        }
        Ok(())
    }

    pub fn ts_client_disconnected(&mut self, client: ts_server::ClientId) {
        let changes = self.ts_server.client_disconnected(client, &mut self.source);
        for change in changes {
            self.forward_interest_change(change);
        }
    }

    // Shared state, read-only.

    pub fn cii_server(&self) -> &BlockableCiiServer {
        &self.cii_server
    }

    pub fn ts_server(&self) -> &TsServer {
        &self.ts_server
    }

    pub fn timeline_source(&self) -> &ProxyTimelineSource {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cii_server::CiiServer;
    use crate::protocol::{ControlTimestamp, PresentationStatus};
    use crate::timeline_source::TimelineSource;
    use crate::wallclock::WallClock;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    const CII_URL: &str = "flurble";
    const TS_URL: &str = "blah";
    const WC_URL: &str = "plig";

    fn make_engine() -> ProxyEngine {
        // both servers deliberately handed over pre-enabled
        let cii_server = BlockableCiiServer::new(CiiServer::new(true));
        let ts_server = TsServer::new(WallClock::new(), true);
        ProxyEngine::new(cii_server, ts_server, CII_URL, TS_URL, WC_URL)
    }

    fn connect_controller(engine: &mut ProxyEngine) -> UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        assert!(engine.controller_connected(tx));
        rx
    }

    fn connect_cii_client(engine: &mut ProxyEngine) -> (u64, UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = engine.cii_client_connected(tx).expect("CII server disabled");
        (client, rx)
    }

    fn connect_ts_client(
        engine: &mut ProxyEngine,
        selector: &str,
    ) -> (u64, UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = engine.ts_client_connected(tx).expect("TS server disabled");
        engine
            .ts_client_setup(
                client,
                SetupData {
                    content_id_stem: "".to_string(),
                    timeline_selector: selector.to_string(),
                },
            )
            .unwrap();
        (client, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<String>) -> Vec<serde_json::Value> {
        let mut messages = vec![];
        while let Ok(message) = rx.try_recv() {
            messages.push(serde_json::from_str(&message).unwrap());
        }
        messages
    }

    #[test]
    fn defaults_servers_to_disabled() {
        let engine = make_engine();
        assert!(!engine.cii_server().enabled());
        assert!(!engine.ts_server().enabled());
    }

    #[test]
    fn initial_cii_mostly_empty() {
        let engine = make_engine();
        let cii = engine.cii_server().cii();

        assert_eq!(cii.defined_fields().len(), 3);
        assert_eq!(cii.protocol_version, Omissible::Value("1.1".to_string()));
        assert_eq!(cii.ts_url, Omissible::Value(TS_URL.to_string()));
        assert_eq!(cii.wc_url, Omissible::Value(WC_URL.to_string()));
    }

    #[test]
    fn servers_follow_controller_connection() {
        let mut engine = make_engine();

        let _controller = connect_controller(&mut engine);
        assert!(engine.cii_server().enabled());
        assert!(engine.ts_server().enabled());

        engine.controller_disconnected();
        assert!(!engine.cii_server().enabled());
        assert!(!engine.ts_server().enabled());
    }

    #[test]
    fn second_controller_connection_refused() {
        let mut engine = make_engine();
        let _controller = connect_controller(&mut engine);

        let (second, _rx) = mpsc::unbounded_channel();
        assert!(!engine.controller_connected(second));
    }

    #[test]
    fn controller_greeted_with_cii_url() {
        let mut engine = make_engine();
        let mut controller = connect_controller(&mut engine);

        let messages = drain(&mut controller);
        assert_eq!(messages[0], serde_json::json!({ "ciiUrl": CII_URL }));
        assert_eq!(
            messages[1],
            serde_json::json!({
                "add_timelineSelectors": [],
                "remove_timelineSelectors": []
            })
        );
    }

    #[test]
    fn disconnect_drops_csa_connections() {
        let mut engine = make_engine();
        let _controller = connect_controller(&mut engine);
        let (_, mut cii_rx) = connect_cii_client(&mut engine);
        drain(&mut cii_rx);

        engine.controller_disconnected();

        assert_eq!(
            cii_rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        );
    }

    #[test]
    fn controller_cii_propagated_to_csas() {
        let mut engine = make_engine();
        let _controller = connect_controller(&mut engine);
        let (_, mut cii_rx) = connect_cii_client(&mut engine);
        assert_eq!(drain(&mut cii_rx).len(), 1); // welcome message only

        engine
            .controller_message(
                r#"{
                    "cii": {
                        "contentId": "boingboing",
                        "presentationStatus": "okay",
                        "contentIdStatus": "final"
                    }
                }"#,
            )
            .unwrap();

        assert_eq!(drain(&mut cii_rx).len(), 1);
        let cii = engine.cii_server().cii();
        assert_eq!(cii.content_id, Omissible::Value("boingboing".to_string()));
        assert_eq!(cii.content_id_status, Omissible::Value("final".to_string()));
        assert_eq!(
            cii.presentation_status,
            Omissible::Value(PresentationStatus(vec!["okay".to_string()]))
        );
    }

    #[test]
    fn controller_cannot_overwrite_ts_and_wc_urls() {
        let mut engine = make_engine();
        let _controller = connect_controller(&mut engine);
        let (_, mut cii_rx) = connect_cii_client(&mut engine);
        drain(&mut cii_rx);

        engine
            .controller_message(
                r#"{
                    "cii": {
                        "tsUrl": "xxxyyy",
                        "wcUrl": "3o87t3q8ot",
                        "presentationStatus": "fault"
                    }
                }"#,
            )
            .unwrap();

        assert_eq!(drain(&mut cii_rx).len(), 1);
        let cii = engine.cii_server().cii();
        assert_eq!(cii.ts_url, Omissible::Value(TS_URL.to_string()));
        assert_eq!(cii.wc_url, Omissible::Value(WC_URL.to_string()));
    }

    #[test]
    fn every_controller_cii_update_is_pushed() {
        let mut engine = make_engine();
        let _controller = connect_controller(&mut engine);
        let (_, mut cii_rx) = connect_cii_client(&mut engine);
        drain(&mut cii_rx);

        for index in 0..10 {
            let content_id = format!("dvb://content.{index}");
            engine
                .controller_message(&format!(r#"{{"cii": {{"contentId": "{content_id}"}}}}"#))
                .unwrap();

            assert_eq!(drain(&mut cii_rx).len(), 1);
            assert_eq!(
                engine.cii_server().cii().content_id,
                Omissible::Value(content_id)
            );
        }
    }

    #[test]
    fn all_cii_properties_forwarded_except_pinned_urls() {
        let mut engine = make_engine();
        let _controller = connect_controller(&mut engine);

        engine
            .controller_message(
                r#"{
                    "cii": {
                        "protocolVersion": "1.1",
                        "contentId": "dvb://1234.5678.0123",
                        "contentIdStatus": "partial",
                        "presentationStatus": "okay muted",
                        "mrsUrl": "http://mrs.example.com/mrs-service",
                        "tsUrl": "ws://a.b.c.d/ts",
                        "wcUrl": "udp://1.2.3.4:123",
                        "teUrl": "ws://a.b.c.d/te",
                        "timelines": [
                            {
                                "timelineSelector": "urn:blah:plug:floooo",
                                "timelineProperties": {
                                    "unitsPerTick": 1001,
                                    "unitsPerSecond": 60000,
                                    "accuracy": 0.3
                                }
                            },
                            {
                                "timelineSelector": "urn:blah:plug:seilrgb",
                                "timelineProperties": {
                                    "unitsPerTick": 1,
                                    "unitsPerSecond": 25
                                }
                            }
                        ],
                        "private": [ { "type": "blah", "flurgle": [1, 2, {"f": true}, null, "hello"] } ]
                    }
                }"#,
            )
            .unwrap();

        let cii = engine.cii_server().cii();
        assert_eq!(cii.protocol_version, Omissible::Value("1.1".to_string()));
        assert_eq!(
            cii.content_id,
            Omissible::Value("dvb://1234.5678.0123".to_string())
        );
        assert_eq!(cii.content_id_status, Omissible::Value("partial".to_string()));
        assert_eq!(
            cii.presentation_status,
            Omissible::Value(PresentationStatus(vec![
                "okay".to_string(),
                "muted".to_string()
            ]))
        );
        assert_eq!(
            cii.mrs_url,
            Omissible::Value("http://mrs.example.com/mrs-service".to_string())
        );
        assert_eq!(cii.ts_url, Omissible::Value(TS_URL.to_string()));
        assert_eq!(cii.wc_url, Omissible::Value(WC_URL.to_string()));
        assert_eq!(cii.te_url, Omissible::Value("ws://a.b.c.d/te".to_string()));

        let timelines = cii.timelines.value().unwrap();
        assert_eq!(timelines.len(), 2);
        assert_eq!(timelines[0].timeline_selector, "urn:blah:plug:floooo");
        assert_eq!(timelines[0].timeline_properties.accuracy, Some(0.3));
        assert_eq!(timelines[1].timeline_properties.units_per_second, 25);

        let private = cii.private.value().unwrap();
        assert_eq!(
            private[0],
            serde_json::json!({ "type": "blah", "flurgle": [1, 2, {"f": true}, null, "hello"] })
        );
    }

    #[test]
    fn content_id_passed_to_ts_server() {
        let mut engine = make_engine();
        let _controller = connect_controller(&mut engine);

        engine
            .controller_message(r#"{"cii": {"contentId": "abcdef"}}"#)
            .unwrap();

        assert_eq!(engine.ts_server().content_id(), Some("abcdef"));
    }

    #[test]
    fn timeline_needed_forwarded_to_controller() {
        let mut engine = make_engine();
        let mut controller = connect_controller(&mut engine);
        drain(&mut controller);

        let _ts = connect_ts_client(&mut engine, "urn:dvb:css:timeline:temi:2:160");

        let messages = drain(&mut controller);
        assert_eq!(messages.len(), 1);
        assert_eq!(
            messages[0]["add_timelineSelectors"],
            serde_json::json!(["urn:dvb:css:timeline:temi:2:160"])
        );
        assert_eq!(
            messages[0]["remove_timelineSelectors"],
            serde_json::json!([])
        );
    }

    #[test]
    fn additional_timeline_forwarded_alone() {
        let mut engine = make_engine();
        let mut controller = connect_controller(&mut engine);

        let _first = connect_ts_client(&mut engine, "urn:dvb:css:timeline:temi:2:160");
        drain(&mut controller);

        let _second = connect_ts_client(&mut engine, "urn:foobar");
        let messages = drain(&mut controller);
        assert_eq!(messages.len(), 1);
        assert_eq!(
            messages[0]["add_timelineSelectors"],
            serde_json::json!(["urn:foobar"])
        );
    }

    #[test]
    fn timeline_not_needed_forwarded_to_controller() {
        let mut engine = make_engine();
        let mut controller = connect_controller(&mut engine);

        let (first, _rx_first) = connect_ts_client(&mut engine, "urn:dvb:css:timeline:temi:2:160");
        let (second, _rx_second) = connect_ts_client(&mut engine, "urn:seiugh");
        drain(&mut controller);

        engine.ts_client_disconnected(first);
        let messages = drain(&mut controller);
        assert_eq!(messages.len(), 1);
        assert_eq!(
            messages[0]["remove_timelineSelectors"],
            serde_json::json!(["urn:dvb:css:timeline:temi:2:160"])
        );

        engine.ts_client_disconnected(second);
        let messages = drain(&mut controller);
        assert_eq!(messages.len(), 1);
        assert_eq!(
            messages[0]["remove_timelineSelectors"],
            serde_json::json!(["urn:seiugh"])
        );
    }

    #[test]
    fn shared_selector_forwarded_once() {
        let mut engine = make_engine();
        let mut controller = connect_controller(&mut engine);
        drain(&mut controller);

        let (first, _rx_first) = connect_ts_client(&mut engine, "urn:dvb:css:timeline:pts");
        let (second, _rx_second) = connect_ts_client(&mut engine, "urn:dvb:css:timeline:pts");
        assert_eq!(drain(&mut controller).len(), 1);

        engine.ts_client_disconnected(first);
        assert!(drain(&mut controller).is_empty());

        engine.ts_client_disconnected(second);
        assert_eq!(drain(&mut controller).len(), 1);
    }

    #[test]
    fn no_control_timestamp_until_controller_provides_one() {
        let mut engine = make_engine();
        let _controller = connect_controller(&mut engine);
        let (_, mut ts_rx) = connect_ts_client(&mut engine, "urn:dvb:css:timeline:temi:2:160");

        // the first push marks the timeline unavailable
        let first = drain(&mut ts_rx);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0]["contentTime"], serde_json::Value::Null);
        assert_eq!(
            engine
                .timeline_source()
                .control_timestamp("urn:dvb:css:timeline:temi:2:160"),
            None
        );

        engine
            .controller_message(
                r#"{
                    "cii": {"contentId": "dvb://233a.1004.1080"},
                    "controlTimestamps": {
                        "urn:dvb:css:timeline:temi:2:160": {
                            "contentTime": "55",
                            "wallClockTime": "1234",
                            "timelineSpeedMultiplier": 1.0
                        }
                    }
                }"#,
            )
            .unwrap();

        let messages = drain(&mut ts_rx);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["contentTime"], "55");
        assert_eq!(messages[0]["wallClockTime"], "1234");
        assert_eq!(messages[0]["timelineSpeedMultiplier"], 1.0);
    }

    #[test]
    fn control_timestamp_only_applies_to_its_selector() {
        let mut engine = make_engine();
        let _controller = connect_controller(&mut engine);
        let (_, mut temi_rx) = connect_ts_client(&mut engine, "urn:dvb:css:timeline:temi:2:160");
        let (_, mut pts_rx) = connect_ts_client(&mut engine, "urn:dvb:css:timeline:pts");
        drain(&mut temi_rx);
        drain(&mut pts_rx);

        engine
            .controller_message(
                r#"{
                    "cii": {"contentId": "dvb://233a.1004.1080"},
                    "controlTimestamps": {
                        "urn:dvb:css:timeline:pts": {
                            "contentTime": "55",
                            "wallClockTime": "1234",
                            "timelineSpeedMultiplier": 1.0
                        }
                    }
                }"#,
            )
            .unwrap();

        assert_eq!(
            engine
                .timeline_source()
                .control_timestamp("urn:dvb:css:timeline:temi:2:160"),
            None
        );
        assert_eq!(
            engine
                .timeline_source()
                .control_timestamp("urn:dvb:css:timeline:pts"),
            Some(ControlTimestamp {
                content_time: Some(55),
                wall_clock_time: 1234,
                timeline_speed_multiplier: Some(1.0),
            })
        );

        // the unavailable timeline is not re-announced
        assert!(drain(&mut temi_rx).is_empty());
        assert_eq!(drain(&mut pts_rx).len(), 1);
    }

    #[test]
    fn control_timestamps_forgotten_when_timeline_churns() {
        let mut engine = make_engine();
        let _controller = connect_controller(&mut engine);
        let (client, _ts_rx) = connect_ts_client(&mut engine, "urn:dvb:css:timeline:pts");

        engine
            .controller_message(
                r#"{
                    "controlTimestamps": {
                        "urn:dvb:css:timeline:pts": {
                            "contentTime": "9573",
                            "wallClockTime": "12340001",
                            "timelineSpeedMultiplier": 0.5
                        }
                    }
                }"#,
            )
            .unwrap();

        engine.ts_client_disconnected(client);
        let (_, _ts_rx) = connect_ts_client(&mut engine, "urn:dvb:css:timeline:pts");

        assert_eq!(
            engine
                .timeline_source()
                .control_timestamp("urn:dvb:css:timeline:pts"),
            None
        );
    }

    #[test]
    fn update_leaves_unlisted_timelines_alone() {
        let mut engine = make_engine();
        let _controller = connect_controller(&mut engine);
        let _pts = connect_ts_client(&mut engine, "urn:dvb:css:timeline:pts");
        let _temi = connect_ts_client(&mut engine, "urn:dvb:css:timeline:temi:1:1");

        engine
            .controller_message(
                r#"{
                    "controlTimestamps": {
                        "urn:dvb:css:timeline:pts": {
                            "contentTime": "9573",
                            "wallClockTime": "12340001",
                            "timelineSpeedMultiplier": 0.5
                        },
                        "urn:dvb:css:timeline:temi:1:1": {
                            "contentTime": "1",
                            "wallClockTime": "12440001",
                            "timelineSpeedMultiplier": 0.5
                        }
                    }
                }"#,
            )
            .unwrap();
        engine
            .controller_message(
                r#"{
                    "controlTimestamps": {
                        "urn:dvb:css:timeline:temi:1:1": {
                            "contentTime": "15",
                            "wallClockTime": "13140001",
                            "timelineSpeedMultiplier": 0.5
                        }
                    }
                }"#,
            )
            .unwrap();

        assert_eq!(
            engine
                .timeline_source()
                .control_timestamp("urn:dvb:css:timeline:pts"),
            Some(ControlTimestamp {
                content_time: Some(9573),
                wall_clock_time: 12340001,
                timeline_speed_multiplier: Some(0.5),
            })
        );
        assert_eq!(
            engine
                .timeline_source()
                .control_timestamp("urn:dvb:css:timeline:temi:1:1"),
            Some(ControlTimestamp {
                content_time: Some(15),
                wall_clock_time: 13140001,
                timeline_speed_multiplier: Some(0.5),
            })
        );
    }

    #[test]
    fn slave_count_reported_on_cii_connect_and_disconnect() {
        let mut engine = make_engine();
        let mut controller = connect_controller(&mut engine);
        drain(&mut controller);

        let (first, _rx_first) = connect_cii_client(&mut engine);
        assert_eq!(
            drain(&mut controller),
            vec![serde_json::json!({ "nrOfSlaves": 1 })]
        );

        let (_second, _rx_second) = connect_cii_client(&mut engine);
        assert_eq!(
            drain(&mut controller),
            vec![serde_json::json!({ "nrOfSlaves": 2 })]
        );

        engine.cii_client_disconnected(first);
        assert_eq!(
            drain(&mut controller),
            vec![serde_json::json!({ "nrOfSlaves": 1 })]
        );
    }

    #[test]
    fn reconnecting_controller_hears_current_interest_set() {
        let mut engine = make_engine();
        let _controller = connect_controller(&mut engine);
        let _ts = connect_ts_client(&mut engine, "urn:dvb:css:timeline:pts");

        // dropping the controller disables the TS server, which drops the
        // CSA and empties the interest set
        engine.controller_disconnected();

        let mut controller = connect_controller(&mut engine);
        let messages = drain(&mut controller);
        assert_eq!(
            messages[1],
            serde_json::json!({
                "add_timelineSelectors": [],
                "remove_timelineSelectors": []
            })
        );
    }

    #[test]
    fn block_cii_defers_pushes_until_released() {
        let mut engine = make_engine();
        let _controller = connect_controller(&mut engine);
        let (_, mut cii_rx) = connect_cii_client(&mut engine);
        drain(&mut cii_rx);

        engine
            .controller_message(
                r#"{"cii": {"contentId": "dvb://half-done"}, "options": {"blockCii": true}}"#,
            )
            .unwrap();
        assert!(drain(&mut cii_rx).is_empty());
        assert!(engine.cii_server().blocking());

        // absent blockCii leaves the blocking mode alone
        engine
            .controller_message(r#"{"cii": {"presentationStatus": "transitioning"}}"#)
            .unwrap();
        assert!(drain(&mut cii_rx).is_empty());
        assert!(engine.cii_server().blocking());

        engine
            .controller_message(
                r#"{"cii": {"contentId": "dvb://done", "presentationStatus": "okay"}, "options": {"blockCii": false}}"#,
            )
            .unwrap();
        assert!(!engine.cii_server().blocking());

        let messages = drain(&mut cii_rx);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["contentId"], "dvb://done");
        assert_eq!(messages[0]["presentationStatus"], "okay");
    }

    #[test]
    fn malformed_controller_message_is_recoverable() {
        let mut engine = make_engine();
        let _controller = connect_controller(&mut engine);

        let result = engine.controller_message(r#"{"cii": nonsense"#);
        assert!(matches!(
            result,
            Err(ProxyError::MalformedControllerMessage(_))
        ));
        assert!(result.is_err_and(|err| err.is_recoverable()));

        // the engine keeps working afterwards
        engine
            .controller_message(r#"{"cii": {"contentId": "dvb://fine"}}"#)
            .unwrap();
        assert_eq!(
            engine.cii_server().cii().content_id,
            Omissible::Value("dvb://fine".to_string())
        );
    }
}
