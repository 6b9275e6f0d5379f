//! Progress reporting over the broadcast event channel
//!
//! The pipeline pushes progress through a [`ProgressReporter`] handle instead
//! of touching the channel directly, so progress can be suppressed without
//! tearing down the event stream (lifecycle events always flow).

use tokio::sync::broadcast;

use crate::types::{Event, TrackId};

/// Cheap-to-clone handle emitting progress events for one track
#[derive(Clone, Debug)]
pub struct ProgressReporter {
    event_tx: broadcast::Sender<Event>,
    track_id: TrackId,
    enabled: bool,
}

impl ProgressReporter {
    /// Create a reporter for one track; `enabled = false` makes it a no-op
    #[must_use]
    pub fn new(event_tx: broadcast::Sender<Event>, track_id: TrackId, enabled: bool) -> Self {
        Self {
            event_tx,
            track_id,
            enabled,
        }
    }

    /// Id of the track this reporter belongs to
    #[must_use]
    pub fn track_id(&self) -> TrackId {
        self.track_id
    }

    /// Report cumulative bytes received from a network source
    pub fn stream_progress(&self, received: u64, total: u64) {
        if !self.enabled {
            return;
        }
        self.event_tx
            .send(Event::StreamProgress {
                id: self.track_id,
                received,
                total,
            })
            .ok();
    }

    /// Report transcode position advancement
    pub fn transcode_progress(&self, position_secs: f64, delta_secs: f64) {
        if !self.enabled {
            return;
        }
        self.event_tx
            .send(Event::TranscodeProgress {
                id: self.track_id,
                position_secs,
                delta_secs,
            })
            .ok();
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_when_enabled() {
        let (tx, mut rx) = broadcast::channel(8);
        let reporter = ProgressReporter::new(tx, TrackId::new(1), true);
        reporter.stream_progress(1024, 4096);
        match rx.try_recv().unwrap() {
            Event::StreamProgress {
                id,
                received,
                total,
            } => {
                assert_eq!(id, TrackId::new(1));
                assert_eq!(received, 1024);
                assert_eq!(total, 4096);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn silent_when_suppressed() {
        let (tx, mut rx) = broadcast::channel(8);
        let reporter = ProgressReporter::new(tx, TrackId::new(1), false);
        reporter.stream_progress(1024, 4096);
        reporter.transcode_progress(0.5, 0.5);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn survives_having_no_subscribers() {
        let (tx, _) = broadcast::channel(8);
        let reporter = ProgressReporter::new(tx, TrackId::new(1), true);
        // send() errors with no receivers; the reporter must swallow that
        reporter.transcode_progress(1.0, 1.0);
    }
}
