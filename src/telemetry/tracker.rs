//! The tracker capability and its in-process implementations.
//!
//! Every sink implements [`Tracker`]. Callers on the connection path log and
//! swallow tracker errors; a failing sink never affects proxying.

use super::error::TelemetryError;
use super::event::Event;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, info, warn};

/// A destination for tracker events.
///
/// Implementations must be safe to call from many connection tasks at once.
pub trait Tracker: Send + Sync {
    /// Deliver one event.
    fn track(&self, event: &Event) -> Result<(), TelemetryError>;

    /// Short sink name used in diagnostics.
    fn name(&self) -> &'static str {
        "tracker"
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracker;

impl Tracker for NoopTracker {
    fn track(&self, _event: &Event) -> Result<(), TelemetryError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}

/// Writes events to the diagnostic log as JSON.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTracker;

impl Tracker for LogTracker {
    fn track(&self, event: &Event) -> Result<(), TelemetryError> {
        let properties = serde_json::to_string(event.properties())?;
        info!(target: "sni_warden::events", "{} - {}", event.name(), properties);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// Fans events out to several sinks.
///
/// Every sink is called even if an earlier one fails. Per-sink failures are
/// logged; the last failure is returned.
#[derive(Default)]
pub struct CompositeTracker {
    trackers: Vec<Arc<dyn Tracker>>,
}

impl CompositeTracker {
    /// Create a composite over `trackers`.
    pub fn new(trackers: Vec<Arc<dyn Tracker>>) -> Self {
        Self { trackers }
    }

    /// Append another sink.
    pub fn push(&mut self, tracker: Arc<dyn Tracker>) {
        self.trackers.push(tracker);
    }

    /// Number of sinks.
    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    /// Whether there are no sinks.
    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }
}

impl Tracker for CompositeTracker {
    fn track(&self, event: &Event) -> Result<(), TelemetryError> {
        let mut last_err = None;
        for tracker in &self.trackers {
            if let Err(e) = tracker.track(event) {
                warn!("Tracker sink '{}' failed: {}", tracker.name(), e);
                last_err = Some(e);
            }
        }
        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn name(&self) -> &'static str {
        "composite"
    }
}

/// Keeps every event in memory. Used by tests and embedders.
#[derive(Debug, Default)]
pub struct RecordingTracker {
    events: Mutex<Vec<Event>>,
}

impl RecordingTracker {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded events.
    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Names of all recorded events, in order.
    pub fn names(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|e| e.name().to_string())
            .collect()
    }

    /// Drop all recorded events.
    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Tracker for RecordingTracker {
    fn track(&self, event: &Event) -> Result<(), TelemetryError> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// Emits a timer event when dropped.
///
/// Created at the start of serving a connection or request so the duration
/// is recorded on every exit path.
pub struct ServeTimer {
    tracker: Arc<dyn Tracker>,
    event: Option<Event>,
    start: Instant,
}

impl ServeTimer {
    /// Start timing. `event` supplies the name and extra properties.
    pub fn start(tracker: Arc<dyn Tracker>, event: Event) -> Self {
        Self {
            tracker,
            event: Some(event),
            start: Instant::now(),
        }
    }
}

impl Drop for ServeTimer {
    fn drop(&mut self) {
        let Some(template) = self.event.take() else {
            return;
        };
        let mut event = Event::timer(template.name(), self.start);
        for (k, v) in template.properties() {
            event = event.with(k.clone(), v.clone());
        }
        if let Err(e) = self.tracker.track(&event) {
            debug!("Failed to track {}: {}", event.name(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::event::{HOST, MetricKind};

    struct FailingTracker;

    impl Tracker for FailingTracker {
        fn track(&self, _event: &Event) -> Result<(), TelemetryError> {
            Err(TelemetryError::SendError {
                sink: "failing",
                message: "unreachable".to_string(),
            })
        }
    }

    #[test]
    fn test_composite_calls_every_sink() {
        let first = Arc::new(RecordingTracker::new());
        let second = Arc::new(RecordingTracker::new());
        let composite = CompositeTracker::new(vec![first.clone(), second.clone()]);

        composite.track(&Event::new("a")).unwrap();

        assert_eq!(first.names(), vec!["a"]);
        assert_eq!(second.names(), vec!["a"]);
    }

    #[test]
    fn test_composite_does_not_short_circuit() {
        let recorder = Arc::new(RecordingTracker::new());
        let composite = CompositeTracker::new(vec![
            Arc::new(FailingTracker),
            recorder.clone(),
        ]);

        let result = composite.track(&Event::new("b"));

        assert!(result.is_err());
        assert_eq!(recorder.names(), vec!["b"]);
    }

    #[test]
    fn test_empty_composite_is_ok() {
        let composite = CompositeTracker::default();
        assert!(composite.is_empty());
        assert!(composite.track(&Event::new("c")).is_ok());
    }

    #[test]
    fn test_serve_timer_emits_on_drop() {
        let recorder = Arc::new(RecordingTracker::new());
        {
            let _timer = ServeTimer::start(
                recorder.clone(),
                Event::new("serve.https.example.com").with(HOST, "example.com"),
            );
        }

        let events = recorder.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name(), "serve.https.example.com");
        assert_eq!(events[0].kind(), Some(MetricKind::Timer));
        assert_eq!(events[0].text(HOST), Some("example.com"));
    }

    #[test]
    fn test_log_tracker_succeeds() {
        assert!(LogTracker.track(&Event::new("d").with("k", 1i64)).is_ok());
    }
}
