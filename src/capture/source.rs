//! Boundary to the camera device
//!
//! A [`FrameSource`] is the platform camera stack. The core never enumerates
//! devices or picks formats; it opens what it is told to, submits requests and
//! reacts to whatever the device reports through [`Delivery`].

use std::sync::Arc;

use flume::Sender;

use super::frame::{Frame, PixelFormat, Size};
use super::metadata::ResultMetadata;
use super::request::{CaptureRequest, FpsRange};
use super::sequencer::SequencerEvent;
use crate::error::Result;
use crate::pipeline::FrameQueue;

/// Stream parameters handed to the device on open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    pub format: PixelFormat,
    pub size: Size,
    pub fps: FpsRange,
}

/// An opened camera device. Closing consumes it.
#[derive(Debug)]
pub struct DeviceHandle {
    pub id: u64,
    pub name: String,
    pub flash_supported: bool,
}

/// A configured capture session on a device. Closing consumes it.
#[derive(Debug)]
pub struct CaptureSessionHandle {
    pub id: u64,
}

/// Messages consumed by a session's control loop.
#[derive(Debug)]
pub(crate) enum ControlEvent {
    Sequencer(SequencerEvent),
    Shutdown,
}

/// Result callbacks for submitted requests.
///
/// Callbacks for one request must be delivered in order, progress before
/// completion. Sending after the session closed is a no-op.
#[derive(Debug, Clone)]
pub struct ResultCallback {
    tx: Sender<ControlEvent>,
}

impl ResultCallback {
    pub(crate) fn new(tx: Sender<ControlEvent>) -> Self {
        Self { tx }
    }

    fn send(&self, event: SequencerEvent) {
        let _ = self.tx.send(ControlEvent::Sequencer(event));
    }

    pub fn progressed(&self, request: &CaptureRequest, metadata: ResultMetadata) {
        self.send(SequencerEvent::Result {
            request: request.kind,
            metadata,
            partial: true,
        });
    }

    pub fn completed(&self, request: &CaptureRequest, metadata: ResultMetadata) {
        self.send(SequencerEvent::Result {
            request: request.kind,
            metadata,
            partial: false,
        });
    }

    pub fn failed(&self, request: &CaptureRequest, reason: impl Into<String>) {
        self.send(SequencerEvent::RequestFailed {
            request: request.kind,
            reason: reason.into(),
        });
    }

    pub fn access_error(&self, reason: impl Into<String>) {
        self.send(SequencerEvent::AccessError(reason.into()));
    }

    pub fn disconnected(&self) {
        self.send(SequencerEvent::Disconnected);
    }
}

/// Where a capture session sends its output.
#[derive(Debug, Clone)]
pub struct Delivery {
    frames: Arc<FrameQueue>,
    results: ResultCallback,
}

impl Delivery {
    pub(crate) fn new(frames: Arc<FrameQueue>, results: ResultCallback) -> Self {
        Self { frames, results }
    }

    /// Frame-delivery callback. Never blocks; an unconsumed older frame is
    /// dropped. Returns `false` once the session has closed.
    pub fn deliver_frame(&self, frame: Frame) -> bool {
        self.frames.push(frame)
    }

    pub fn results(&self) -> &ResultCallback {
        &self.results
    }
}

/// The camera device the core drives.
///
/// Calls may block briefly but must not wait on the core's own threads.
pub trait FrameSource: Send + Sync + 'static {
    /// Open the device for the given stream.
    fn open_device(&self, stream: &StreamConfig) -> Result<DeviceHandle>;

    /// Configure a capture session that outputs through `delivery`.
    fn create_capture_session(
        &self,
        device: &DeviceHandle,
        stream: &StreamConfig,
        delivery: Delivery,
    ) -> Result<CaptureSessionHandle>;

    /// Replace the repeating request.
    fn submit_repeating(&self, session: &CaptureSessionHandle, request: CaptureRequest) -> Result<()>;

    fn stop_repeating(&self, session: &CaptureSessionHandle) -> Result<()>;

    /// Submit a one-shot request; results arrive through the session's
    /// [`ResultCallback`].
    fn submit_once(&self, session: &CaptureSessionHandle, request: CaptureRequest) -> Result<()>;

    /// Free buffers that only a still capture needed.
    fn release_capture_resources(&self, _session: &CaptureSessionHandle) {}

    fn close_capture_session(&self, session: CaptureSessionHandle) -> Result<()>;

    fn close_device(&self, device: DeviceHandle) -> Result<()>;
}
