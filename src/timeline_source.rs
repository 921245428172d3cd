use std::collections::HashMap;

use crate::protocol::ControlTimestamp;

/// A change to the set of timeline selectors CSAs currently need.
#[derive(Debug, Clone, PartialEq)]
pub struct InterestChange {
    pub all: Vec<String>,
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

/// Source of Control Timestamps for a CSS-TS server.
///
/// The TS server calls `timeline_selector_needed` / `_not_needed` as CSA
/// interest comes and goes, and queries `control_timestamp` when pushing to
/// clients. Interest changes are handed back to the caller rather than fired
/// through stored callbacks, so ordering stays with the single caller.
pub trait TimelineSource: Send {
    fn timeline_selector_needed(&mut self, selector: &str) -> Option<InterestChange>;
    fn timeline_selector_not_needed(&mut self, selector: &str) -> Option<InterestChange>;
    fn recognises_timeline_selector(&self, selector: &str) -> bool;
    fn control_timestamp(&self, selector: &str) -> Option<ControlTimestamp>;
}

/// Timeline source fed by the upstream controller.
///
/// Holds the selectors of current interest and, per selector, the last
/// Control Timestamp the controller supplied (`None` until it does).
#[derive(Default)]
pub struct ProxyTimelineSource {
    timelines: HashMap<String, Option<ControlTimestamp>>,
}

impl ProxyTimelineSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store fresh Control Timestamps from the controller. Entries for
    /// selectors no CSA needs any more are silently dropped. Does not push
    /// anything to clients; the caller nudges the TS server afterwards.
    pub fn timelines_update(&mut self, control_timestamps: HashMap<String, ControlTimestamp>) {
        for (selector, ct) in control_timestamps {
            if let Some(slot) = self.timelines.get_mut(&selector) {
                *slot = Some(ct);
            }
        }
    }

    pub fn selectors(&self) -> Vec<String> {
        self.timelines.keys().cloned().collect()
    }
}

impl TimelineSource for ProxyTimelineSource {
    fn timeline_selector_needed(&mut self, selector: &str) -> Option<InterestChange> {
        if self.timelines.contains_key(selector) {
            return None;
        }
        self.timelines.insert(selector.to_string(), None);
        Some(InterestChange {
            all: self.selectors(),
            added: vec![selector.to_string()],
            removed: vec![],
        })
    }

    fn timeline_selector_not_needed(&mut self, selector: &str) -> Option<InterestChange> {
        self.timelines.remove(selector)?;
        Some(InterestChange {
            all: self.selectors(),
            added: vec![],
            removed: vec![selector.to_string()],
        })
    }

    fn recognises_timeline_selector(&self, selector: &str) -> bool {
        self.timelines.contains_key(selector)
    }

    fn control_timestamp(&self, selector: &str) -> Option<ControlTimestamp> {
        self.timelines.get(selector).cloned().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn some_ct(content_time: i64) -> ControlTimestamp {
        ControlTimestamp {
            content_time: Some(content_time),
            wall_clock_time: 1234,
            timeline_speed_multiplier: Some(1.0),
        }
    }

    #[test]
    fn needed_is_idempotent() {
        let mut source = ProxyTimelineSource::new();

        let change = source.timeline_selector_needed("urn:dvb:css:timeline:pts");
        assert_eq!(
            change,
            Some(InterestChange {
                all: vec!["urn:dvb:css:timeline:pts".to_string()],
                added: vec!["urn:dvb:css:timeline:pts".to_string()],
                removed: vec![],
            })
        );

        assert_eq!(source.timeline_selector_needed("urn:dvb:css:timeline:pts"), None);
    }

    #[test]
    fn not_needed_for_unknown_selector_is_silent() {
        let mut source = ProxyTimelineSource::new();
        assert_eq!(source.timeline_selector_not_needed("urn:nothing"), None);
    }

    #[test]
    fn control_timestamp_is_none_until_supplied() {
        let mut source = ProxyTimelineSource::new();
        source.timeline_selector_needed("urn:dvb:css:timeline:pts");

        assert!(source.recognises_timeline_selector("urn:dvb:css:timeline:pts"));
        assert_eq!(source.control_timestamp("urn:dvb:css:timeline:pts"), None);

        source.timelines_update(HashMap::from([(
            "urn:dvb:css:timeline:pts".to_string(),
            some_ct(55),
        )]));
        assert_eq!(
            source.control_timestamp("urn:dvb:css:timeline:pts"),
            Some(some_ct(55))
        );
    }

    #[test]
    fn updates_for_unknown_selectors_are_dropped() {
        let mut source = ProxyTimelineSource::new();
        source.timeline_selector_needed("urn:dvb:css:timeline:pts");

        source.timelines_update(HashMap::from([("urn:other".to_string(), some_ct(9))]));

        assert!(!source.recognises_timeline_selector("urn:other"));
        assert_eq!(source.control_timestamp("urn:other"), None);
    }

    #[test]
    fn removal_forgets_stored_timestamp() {
        let mut source = ProxyTimelineSource::new();
        source.timeline_selector_needed("urn:dvb:css:timeline:pts");
        source.timelines_update(HashMap::from([(
            "urn:dvb:css:timeline:pts".to_string(),
            some_ct(9573),
        )]));

        let change = source.timeline_selector_not_needed("urn:dvb:css:timeline:pts");
        assert_eq!(
            change,
            Some(InterestChange {
                all: vec![],
                added: vec![],
                removed: vec!["urn:dvb:css:timeline:pts".to_string()],
            })
        );

        source.timeline_selector_needed("urn:dvb:css:timeline:pts");
        assert_eq!(source.control_timestamp("urn:dvb:css:timeline:pts"), None);
    }
}
