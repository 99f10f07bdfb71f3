//! Display-side consumers of pipeline output

use std::sync::atomic::{AtomicU64, Ordering};

use flume::{Receiver, Sender};
use tracing::{error, info};

use crate::capture::CaptureState;
use crate::error::ErrorKind;
use crate::pipeline::HistogramResult;

/// Receives histogram results and session notifications.
///
/// `on_histogram` is called from the worker thread once per processed frame
/// and must return quickly. The other callbacks arrive from the session's
/// control thread. Implementations must not call back into the camera.
pub trait ResultSink: Send + Sync {
    fn on_histogram(&self, result: HistogramResult);

    fn on_session_error(&self, kind: ErrorKind);

    /// A new capture state was committed. `None` means the session aborted.
    fn on_capture_state(&self, _state: Option<CaptureState>) {}

    /// A still capture finished and preview resumed.
    fn on_capture_complete(&self) {}
}

/// Logs every `every`-th histogram and all session events.
pub struct LogSink {
    every: u64,
    seen: AtomicU64,
}

impl LogSink {
    pub fn new(every: u64) -> Self {
        Self {
            every: every.max(1),
            seen: AtomicU64::new(0),
        }
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new(1)
    }
}

impl ResultSink for LogSink {
    fn on_histogram(&self, result: HistogramResult) {
        let n = self.seen.fetch_add(1, Ordering::Relaxed);
        if n % self.every != 0 {
            return;
        }
        let top = result
            .buckets
            .iter()
            .map(|b| format!("{} {}", b.hex(), b.percent_label()))
            .collect::<Vec<_>>()
            .join(", ");
        info!(sequence = result.frame_sequence, distinct = result.distinct_colors, "top colors: {}", top);
    }

    fn on_session_error(&self, kind: ErrorKind) {
        error!(?kind, "camera session error");
    }

    fn on_capture_state(&self, state: Option<CaptureState>) {
        info!(?state, "capture state");
    }

    fn on_capture_complete(&self) {
        info!("picture taken");
    }
}

/// Everything a [`ChannelSink`] forwards.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Histogram(HistogramResult),
    SessionError(ErrorKind),
    CaptureState(Option<CaptureState>),
    CaptureComplete,
}

/// Forwards sink callbacks over an unbounded channel, for UI threads that
/// poll on their own schedule.
#[derive(Clone)]
pub struct ChannelSink {
    tx: Sender<SinkEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, Receiver<SinkEvent>) {
        let (tx, rx) = flume::unbounded();
        (Self { tx }, rx)
    }

    fn send(&self, event: SinkEvent) {
        // A dropped receiver just means nobody is watching anymore.
        let _ = self.tx.send(event);
    }
}

impl ResultSink for ChannelSink {
    fn on_histogram(&self, result: HistogramResult) {
        self.send(SinkEvent::Histogram(result));
    }

    fn on_session_error(&self, kind: ErrorKind) {
        self.send(SinkEvent::SessionError(kind));
    }

    fn on_capture_state(&self, state: Option<CaptureState>) {
        self.send(SinkEvent::CaptureState(state));
    }

    fn on_capture_complete(&self) {
        self.send(SinkEvent::CaptureComplete);
    }
}
