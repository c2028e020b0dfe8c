//! Tracker event model.
//!
//! An [`Event`] is a dot-namespaced name plus a property map. Property values
//! are integers, durations, strings or a tag set. Tag sets carry dimensional
//! labels for sinks that understand them; other sinks fold them into the flat
//! property view returned by [`Event::flattened`].

use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

/// Property key holding the measured value.
pub const VALUE: &str = "Value";
/// Property key holding the [`MetricKind`].
pub const TYPE: &str = "Type";
/// Property key holding the tag set.
pub const TAGS: &str = "Tags";
/// Property key holding the destination host.
pub const HOST: &str = "Host";
/// Property key holding the protocol (`http`, `https`, `tcp`).
pub const PROTOCOL: &str = "Protocol";
/// Property key holding the request path.
pub const URL: &str = "Url";

/// How a sink should aggregate an event's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Elapsed wall time.
    Timer,
    /// Monotonic count.
    Counter,
    /// Point-in-time level.
    Gauge,
    /// Unique occurrences.
    Set,
}

impl MetricKind {
    /// Lowercase name stored in the `Type` property.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Timer => "timer",
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Set => "set",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "timer" => Some(MetricKind::Timer),
            "counter" => Some(MetricKind::Counter),
            "gauge" => Some(MetricKind::Gauge),
            "set" => Some(MetricKind::Set),
            _ => None,
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single property value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    /// Signed integer.
    Integer(i64),
    /// Elapsed time.
    Duration(Duration),
    /// Free-form text.
    Text(String),
    /// Dimension name to value.
    Tags(BTreeMap<String, String>),
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Integer(v) => write!(f, "{}", v),
            PropertyValue::Duration(d) => write!(f, "{}ms", d.as_millis()),
            PropertyValue::Text(s) => f.write_str(s),
            PropertyValue::Tags(tags) => {
                let joined: Vec<String> = tags.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
                write!(f, "{{{}}}", joined.join(","))
            }
        }
    }
}

impl Serialize for PropertyValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PropertyValue::Integer(v) => serializer.serialize_i64(*v),
            // Durations go out as integer milliseconds.
            PropertyValue::Duration(d) => {
                serializer.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            }
            PropertyValue::Text(s) => serializer.serialize_str(s),
            PropertyValue::Tags(tags) => {
                let mut map = serializer.serialize_map(Some(tags.len()))?;
                for (k, v) in tags {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Integer(v)
    }
}

impl From<Duration> for PropertyValue {
    fn from(d: Duration) -> Self {
        PropertyValue::Duration(d)
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::Text(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        PropertyValue::Text(s)
    }
}

/// A named measurement with typed properties.
///
/// Events are immutable once built; use the builder-style [`Event::with`]
/// while constructing.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Event {
    #[serde(rename = "event")]
    name: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    properties: BTreeMap<String, PropertyValue>,
}

impl Event {
    /// Create an event with no properties.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: BTreeMap::new(),
        }
    }

    /// A counter increment of one, labelled with `tags`.
    pub fn counter<I, K, V>(name: impl Into<String>, tags: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::new(name)
            .with(VALUE, 1i64)
            .with(TYPE, MetricKind::Counter.as_str())
            .with_tags(tags)
    }

    /// A timer measuring the time elapsed since `start`.
    pub fn timer(name: impl Into<String>, start: Instant) -> Self {
        Self::new(name)
            .with(VALUE, start.elapsed())
            .with(TYPE, MetricKind::Timer.as_str())
    }

    /// Add or replace a property.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Add or replace the tag set.
    pub fn with_tags<I, K, V>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let tags: BTreeMap<String, String> =
            tags.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self.properties
            .insert(TAGS.to_string(), PropertyValue::Tags(tags));
        self
    }

    /// Event name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All properties, tag set included.
    pub fn properties(&self) -> &BTreeMap<String, PropertyValue> {
        &self.properties
    }

    /// Look up one property.
    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }

    /// Look up a text property.
    pub fn text(&self, key: &str) -> Option<&str> {
        match self.properties.get(key) {
            Some(PropertyValue::Text(s)) => Some(s),
            _ => None,
        }
    }

    /// The metric kind recorded in the `Type` property, if any.
    pub fn kind(&self) -> Option<MetricKind> {
        self.text(TYPE).and_then(MetricKind::parse)
    }

    /// The tag set, if any.
    pub fn tags(&self) -> Option<&BTreeMap<String, String>> {
        match self.properties.get(TAGS) {
            Some(PropertyValue::Tags(tags)) => Some(tags),
            _ => None,
        }
    }

    /// Properties without the tag set.
    pub fn fields(&self) -> impl Iterator<Item = (&String, &PropertyValue)> {
        self.properties.iter().filter(|(k, _)| k.as_str() != TAGS)
    }

    /// Flat string view for sinks without dimensional support.
    ///
    /// Tags are folded in as `Tags.<name>` so they cannot clobber a field.
    pub fn flattened(&self) -> BTreeMap<String, String> {
        let mut flat: BTreeMap<String, String> = self
            .fields()
            .map(|(k, v)| (k.clone(), v.to_string()))
            .collect();
        if let Some(tags) = self.tags() {
            for (k, v) in tags {
                flat.insert(format!("{}.{}", TAGS, k), v.clone());
            }
        }
        flat
    }
}
