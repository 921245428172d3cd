//! Wire types shared by the CSS-CII and CSS-TS surfaces.
//!
//! CII messages are loose records of independently optional fields. A field
//! can be absent from a delta ("leave the stored value alone"), explicitly
//! `null`, or carry a value; [`Omissible`] keeps those three states apart so
//! that merging a delta never invents or destroys fields by accident.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Tri-state CII field: absent from the message, JSON `null`, or a value.
#[derive(Debug, Clone, PartialEq)]
pub enum Omissible<T> {
    Omitted,
    Null,
    Value(T),
}

impl<T> Omissible<T> {
    pub fn is_omitted(&self) -> bool {
        matches!(self, Omissible::Omitted)
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Omissible::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Omissible::Value(value) => Some(value),
            _ => None,
        }
    }
}

impl<T> Default for Omissible<T> {
    fn default() -> Self {
        Omissible::Omitted
    }
}

impl<T: Serialize> Serialize for Omissible<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Omissible::Omitted | Omissible::Null => serializer.serialize_none(),
            Omissible::Value(value) => serializer.serialize_some(value),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Omissible<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Option::<T>::deserialize(deserializer)? {
            None => Omissible::Null,
            Some(value) => Omissible::Value(value),
        })
    }
}

/// `presentationStatus` is carried on the wire as space-separated tokens
/// ("okay muted") but handled as a list.
#[derive(Debug, Clone, PartialEq)]
pub struct PresentationStatus(pub Vec<String>);

impl From<&str> for PresentationStatus {
    fn from(value: &str) -> Self {
        Self(value.split_whitespace().map(str::to_string).collect())
    }
}

impl Serialize for PresentationStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.join(" "))
    }
}

impl<'de> Deserialize<'de> for PresentationStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(Self::from(value.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineProperties {
    pub units_per_tick: u64,
    pub units_per_second: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineOption {
    pub timeline_selector: String,
    pub timeline_properties: TimelineProperties,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private: Option<serde_json::Value>,
}

/// A CSS-CII message or delta.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CiiMessage {
    #[serde(default, skip_serializing_if = "Omissible::is_omitted")]
    pub protocol_version: Omissible<String>,
    #[serde(default, skip_serializing_if = "Omissible::is_omitted")]
    pub mrs_url: Omissible<String>,
    #[serde(default, skip_serializing_if = "Omissible::is_omitted")]
    pub content_id: Omissible<String>,
    #[serde(default, skip_serializing_if = "Omissible::is_omitted")]
    pub content_id_status: Omissible<String>,
    #[serde(default, skip_serializing_if = "Omissible::is_omitted")]
    pub presentation_status: Omissible<PresentationStatus>,
    #[serde(default, skip_serializing_if = "Omissible::is_omitted")]
    pub ts_url: Omissible<String>,
    #[serde(default, skip_serializing_if = "Omissible::is_omitted")]
    pub wc_url: Omissible<String>,
    #[serde(default, skip_serializing_if = "Omissible::is_omitted")]
    pub te_url: Omissible<String>,
    #[serde(default, skip_serializing_if = "Omissible::is_omitted")]
    pub timelines: Omissible<Vec<TimelineOption>>,
    #[serde(default, skip_serializing_if = "Omissible::is_omitted")]
    pub private: Omissible<Vec<serde_json::Value>>,
}

fn merge_field<T>(stored: &mut Omissible<T>, incoming: Omissible<T>) {
    if !incoming.is_omitted() {
        *stored = incoming;
    }
}

fn changed_field<T: Clone + PartialEq>(
    current: &Omissible<T>,
    previous: &Omissible<T>,
) -> Omissible<T> {
    if !current.is_omitted() && current != previous {
        current.clone()
    } else {
        Omissible::Omitted
    }
}

impl CiiMessage {
    /// Merge a delta into this message: every field present in the delta
    /// replaces the stored field, omitted fields leave it untouched.
    pub fn merge(&mut self, delta: CiiMessage) {
        merge_field(&mut self.protocol_version, delta.protocol_version);
        merge_field(&mut self.mrs_url, delta.mrs_url);
        merge_field(&mut self.content_id, delta.content_id);
        merge_field(&mut self.content_id_status, delta.content_id_status);
        merge_field(&mut self.presentation_status, delta.presentation_status);
        merge_field(&mut self.ts_url, delta.ts_url);
        merge_field(&mut self.wc_url, delta.wc_url);
        merge_field(&mut self.te_url, delta.te_url);
        merge_field(&mut self.timelines, delta.timelines);
        merge_field(&mut self.private, delta.private);
    }

    /// The delta that carries this message's differences against `previous`.
    pub fn diff_since(&self, previous: &CiiMessage) -> CiiMessage {
        CiiMessage {
            protocol_version: changed_field(&self.protocol_version, &previous.protocol_version),
            mrs_url: changed_field(&self.mrs_url, &previous.mrs_url),
            content_id: changed_field(&self.content_id, &previous.content_id),
            content_id_status: changed_field(&self.content_id_status, &previous.content_id_status),
            presentation_status: changed_field(
                &self.presentation_status,
                &previous.presentation_status,
            ),
            ts_url: changed_field(&self.ts_url, &previous.ts_url),
            wc_url: changed_field(&self.wc_url, &previous.wc_url),
            te_url: changed_field(&self.te_url, &previous.te_url),
            timelines: changed_field(&self.timelines, &previous.timelines),
            private: changed_field(&self.private, &previous.private),
        }
    }

    /// Names of the fields this message defines (anything not omitted).
    pub fn defined_fields(&self) -> Vec<&'static str> {
        let named: [(&'static str, bool); 10] = [
            ("protocolVersion", !self.protocol_version.is_omitted()),
            ("mrsUrl", !self.mrs_url.is_omitted()),
            ("contentId", !self.content_id.is_omitted()),
            ("contentIdStatus", !self.content_id_status.is_omitted()),
            ("presentationStatus", !self.presentation_status.is_omitted()),
            ("tsUrl", !self.ts_url.is_omitted()),
            ("wcUrl", !self.wc_url.is_omitted()),
            ("teUrl", !self.te_url.is_omitted()),
            ("timelines", !self.timelines.is_omitted()),
            ("private", !self.private.is_omitted()),
        ];
        named
            .into_iter()
            .filter(|(_, defined)| *defined)
            .map(|(name, _)| name)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.defined_fields().is_empty()
    }
}

/// A Control Timestamp: a point on a media timeline pinned to a point on the
/// wall clock, plus the timeline speed. An absent `contentTime` means the
/// timeline is currently unavailable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlTimestamp {
    #[serde(default, with = "opt_string_int")]
    pub content_time: Option<i64>,
    #[serde(with = "string_int")]
    pub wall_clock_time: i64,
    pub timeline_speed_multiplier: Option<f64>,
}

impl ControlTimestamp {
    pub fn unavailable(wall_clock_time: i64) -> Self {
        Self {
            content_time: None,
            wall_clock_time,
            timeline_speed_multiplier: None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.content_time.is_some()
    }
}

/// The DVB CSS wire form carries 64-bit integers as decimal strings, but
/// real controllers mix in plain JSON numbers. Both are accepted; output is
/// always the string form.
mod string_int {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    pub(super) enum IntOrString {
        Int(i64),
        Str(String),
    }

    pub(super) fn normalise<E: serde::de::Error>(value: IntOrString) -> Result<i64, E> {
        match value {
            IntOrString::Int(value) => Ok(value),
            IntOrString::Str(text) => text.trim().parse::<i64>().map_err(E::custom),
        }
    }

    pub fn serialize<S: Serializer>(value: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        normalise(IntOrString::deserialize(deserializer)?)
    }
}

mod opt_string_int {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::string_int::{normalise, IntOrString};

    pub fn serialize<S: Serializer>(value: &Option<i64>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(value) => serializer.serialize_some(&value.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<i64>, D::Error> {
        Option::<IntOrString>::deserialize(deserializer)?
            .map(normalise)
            .transpose()
    }
}
