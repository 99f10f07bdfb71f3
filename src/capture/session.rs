//! Session lifetime, the device permit and the capture control loop

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use arc_swap::ArcSwap;
use config::ConfigError;
use flume::{Receiver, Sender};
use tracing::{debug, info, instrument, warn};

use super::request::{RequestKind, RequestTemplate};
use super::sequencer::{Action, CaptureSequencer, CaptureState, SequencerEvent};
use super::source::{
    CaptureSessionHandle, ControlEvent, Delivery, DeviceHandle, FrameSource, ResultCallback,
};
use crate::display::ResultSink;
use crate::error::{Error, ErrorKind, Result};
use crate::pipeline::{FrameQueue, PipelineWorker, QueueStats};
use crate::utils::lock;
use crate::{Config, PipelineConfig};

/// Single permit guarding device open and teardown.
///
/// The permit is a token in a one-slot channel; holding a [`DevicePermit`]
/// means owning the token, and dropping it puts the token back.
#[derive(Debug)]
pub struct DeviceLock {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl Default for DeviceLock {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceLock {
    pub fn new() -> Self {
        let (tx, rx) = flume::bounded(1);
        let _ = tx.send(());
        Self { tx, rx }
    }

    /// Wait at most `timeout` for the permit.
    pub fn try_acquire_for(&self, timeout: Duration) -> Option<DevicePermit<'_>> {
        self.rx
            .recv_timeout(timeout)
            .ok()
            .map(|()| DevicePermit { lock: self })
    }

    /// Wait for the permit without a deadline.
    pub fn acquire(&self) -> DevicePermit<'_> {
        // `self.tx` keeps the channel connected, so this only returns with the token.
        let _ = self.rx.recv();
        DevicePermit { lock: self }
    }

    pub fn is_held(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Held device permit, returned on drop on every exit path.
#[derive(Debug)]
pub struct DevicePermit<'a> {
    lock: &'a DeviceLock,
}

impl Drop for DevicePermit<'_> {
    fn drop(&mut self) {
        let _ = self.lock.tx.try_send(());
    }
}

/// Device, capture session and request template of one open session.
#[derive(Debug)]
pub struct SessionHandles {
    pub device: DeviceHandle,
    pub capture_session: CaptureSessionHandle,
    pub template: RequestTemplate,
}

impl SessionHandles {
    /// Close the capture session, then the device. The device is closed even
    /// if closing the session fails; the first error is returned.
    pub fn close<S: FrameSource + ?Sized>(self, source: &S) -> Result<()> {
        let SessionHandles {
            device,
            capture_session,
            ..
        } = self;
        let session_result = source.close_capture_session(capture_session);
        if let Err(e) = &session_result {
            warn!("Failed to close capture session: {}", e);
        }
        let device_result = source.close_device(device);
        if let Err(e) = &device_result {
            warn!("Failed to close camera device: {}", e);
        }
        session_result.and(device_result)
    }
}

/// State shared between a session's owner and its control loop.
struct Live<S: FrameSource> {
    source: Arc<S>,
    handles: Mutex<Option<SessionHandles>>,
    sequencer: Mutex<CaptureSequencer>,
    queue: Arc<FrameQueue>,
    sink: Arc<dyn ResultSink>,
}

impl<S: FrameSource> Live<S> {
    fn is_open(&self) -> bool {
        lock(&self.handles).is_some()
    }

    /// Take the handles and close them. Closing twice is impossible: the
    /// second caller finds nothing to close.
    fn close_handles(&self) -> Result<()> {
        let handles = lock(&self.handles).take();
        match handles {
            Some(handles) => {
                info!(device = handles.device.id, "closing camera session");
                handles.close(self.source.as_ref())
            }
            None => Ok(()),
        }
    }

    /// Run one sequencer event: plan, perform the actions, then commit. If an
    /// action fails mid-capture, the capture is cancelled back to `Preview`
    /// instead.
    fn handle(&self, event: &SequencerEvent) {
        match event {
            SequencerEvent::AccessError(reason) => warn!("Camera access error: {}", reason),
            SequencerEvent::RequestFailed { request, reason } => {
                warn!(?request, "Capture request failed: {}", reason)
            }
            _ => {}
        }

        let changed = {
            let mut sequencer = lock(&self.sequencer);
            let planned = sequencer.plan(event);
            if planned.next == sequencer.state() && planned.actions.is_empty() {
                if matches!(event, SequencerEvent::CaptureIntent) {
                    debug!(state = ?sequencer.state(), "capture in progress, ignoring intent");
                }
                return;
            }
            let failed = planned
                .actions
                .iter()
                .find_map(|action| self.perform(*action).err().map(|e| (action, e)));
            let applied = match failed {
                None => planned,
                Some((action, e)) => {
                    warn!(state = ?sequencer.state(), ?action, "Capture step failed: {}", e);
                    let recovery = sequencer.recovery();
                    for action in recovery.actions {
                        if let Err(e) = self.perform(*action) {
                            warn!(?action, "Failed to cancel capture: {}", e);
                        }
                    }
                    recovery
                }
            };
            sequencer.commit(applied).then_some(applied.next)
        };
        if let Some(state) = changed {
            self.sink.on_capture_state(state);
        }
    }

    fn perform(&self, action: Action) -> Result<()> {
        match action {
            Action::Submit(kind) => self.with_handles(|handles| {
                let request = handles.template.build(kind);
                debug!(?kind, id = request.id, "submitting capture request");
                if kind != RequestKind::StillCapture {
                    return self.source.submit_once(&handles.capture_session, request);
                }
                self.source.stop_repeating(&handles.capture_session)?;
                let submitted = self.source.submit_once(&handles.capture_session, request);
                if submitted.is_err() {
                    // Preview was stopped for this still; bring it back.
                    let preview = handles.template.build(RequestKind::Preview);
                    if let Err(e) = self.source.submit_repeating(&handles.capture_session, preview) {
                        warn!("Failed to restart preview: {}", e);
                    }
                }
                submitted
            }),
            Action::ResumePreview => self.with_handles(|handles| {
                let request = handles.template.build(RequestKind::Preview);
                self.source.submit_repeating(&handles.capture_session, request)
            }),
            Action::ReleaseCaptureResources => self.with_handles(|handles| {
                self.source.release_capture_resources(&handles.capture_session);
                Ok(())
            }),
            Action::NotifyCaptured => {
                metrics::counter!("chroma_still_captures_total").increment(1);
                self.sink.on_capture_complete();
                Ok(())
            }
            Action::Abort => {
                self.abort();
                Ok(())
            }
        }
    }

    /// Requests are submitted with the handles locked so that closing the
    /// session cannot interleave with a submission.
    fn with_handles(&self, f: impl FnOnce(&SessionHandles) -> Result<()>) -> Result<()> {
        let handles = lock(&self.handles);
        match handles.as_ref() {
            Some(handles) => f(handles),
            None => Err(Error::Disconnected),
        }
    }

    fn abort(&self) {
        warn!("camera disconnected, aborting session");
        if let Err(e) = self.close_handles() {
            warn!("Failed to release disconnected camera: {}", e);
        }
        self.queue.close();
        self.sink.on_session_error(ErrorKind::Disconnected);
    }
}

fn control_loop<S: FrameSource>(live: Arc<Live<S>>, events: Receiver<ControlEvent>) {
    debug!("capture control loop started");
    while let Ok(event) = events.recv() {
        match event {
            ControlEvent::Shutdown => break,
            ControlEvent::Sequencer(event) => {
                live.handle(&event);
                if lock(&live.sequencer).state().is_none() {
                    break;
                }
            }
        }
    }
    debug!("capture control loop exiting");
}

/// An open session: device handles, frame queue, histogram worker and the
/// control loop. Dropping it tears everything down.
struct Session<S: FrameSource> {
    live: Arc<Live<S>>,
    worker: PipelineWorker,
    control: Option<JoinHandle<()>>,
    events: Sender<ControlEvent>,
}

impl<S: FrameSource> Session<S> {
    fn open(
        source: &Arc<S>,
        config: &Config,
        pipeline: &Arc<ArcSwap<PipelineConfig>>,
        sink: &Arc<dyn ResultSink>,
    ) -> Result<Self> {
        let stream = config.stream_config();
        let queue = Arc::new(FrameQueue::new());
        let (tx, rx) = flume::unbounded();

        let device = source.open_device(&stream)?;
        info!(device = %device.name, size = %stream.size, "camera device opened");

        let delivery = Delivery::new(Arc::clone(&queue), ResultCallback::new(tx.clone()));
        let capture_session = match source.create_capture_session(&device, &stream, delivery) {
            Ok(session) => session,
            Err(e) => {
                if let Err(close_err) = source.close_device(device) {
                    warn!("Failed to close camera device: {}", close_err);
                }
                queue.close();
                return Err(match e {
                    Error::ConfigureFailed(_) | Error::Disconnected => e,
                    other => Error::ConfigureFailed(other.to_string()),
                });
            }
        };

        let template = RequestTemplate::new(
            config.capture.flash_policy,
            device.flash_supported,
            stream.fps,
        );
        if let Err(e) =
            source.submit_repeating(&capture_session, template.build(RequestKind::Preview))
        {
            warn!("Failed to start preview: {}", e);
        }

        let live = Arc::new(Live {
            source: Arc::clone(source),
            handles: Mutex::new(Some(SessionHandles {
                device,
                capture_session,
                template,
            })),
            sequencer: Mutex::new(CaptureSequencer::new()),
            queue: Arc::clone(&queue),
            sink: Arc::clone(sink),
        });

        let spawned = PipelineWorker::spawn(queue, Arc::clone(sink), Arc::clone(pipeline))
            .and_then(|worker| {
                let live = Arc::clone(&live);
                thread::Builder::new()
                    .name("chroma-control".into())
                    .spawn(move || control_loop(live, rx))
                    .map(|control| (worker, control))
                    .map_err(Error::Spawn)
            });
        let (worker, control) = match spawned {
            Ok(threads) => threads,
            Err(e) => {
                if let Err(close_err) = live.close_handles() {
                    warn!("Failed to close camera session: {}", close_err);
                }
                live.queue.close();
                return Err(e);
            }
        };

        Ok(Self {
            live,
            worker,
            control: Some(control),
            events: tx,
        })
    }

    fn is_open(&self) -> bool {
        self.live.is_open()
    }

    /// Stop the control loop, close the handles, release the queue, then join
    /// the worker. Safe to call more than once.
    fn shutdown(&mut self) -> Result<()> {
        let _ = self.events.send(ControlEvent::Shutdown);
        if let Some(control) = self.control.take() {
            if control.join().is_err() {
                warn!("capture control loop panicked");
            }
        }
        let closed = self.live.close_handles();
        self.live.queue.close();
        self.worker.stop();
        closed
    }
}

impl<S: FrameSource> Drop for Session<S> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("Camera session teardown failed: {}", e);
        }
    }
}

/// Counters for the running session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub queue: QueueStats,
    pub processed: u64,
}

/// Owns the device permit and at most one open session.
///
/// `open` and `teardown` may race from different threads; the permit makes
/// them take turns, so each device open is matched by exactly one close.
pub struct Camera<S: FrameSource> {
    source: Arc<S>,
    config: Config,
    pipeline: Arc<ArcSwap<PipelineConfig>>,
    sink: Arc<dyn ResultSink>,
    permit: DeviceLock,
    session: Mutex<Option<Session<S>>>,
}

impl<S: FrameSource> Camera<S> {
    pub fn new(source: S, config: Config, sink: Arc<dyn ResultSink>) -> Self {
        Self::with_shared_source(Arc::new(source), config, sink)
    }

    pub fn with_shared_source(source: Arc<S>, config: Config, sink: Arc<dyn ResultSink>) -> Self {
        let pipeline = Arc::new(ArcSwap::from_pointee(config.pipeline.clone()));
        Self {
            source,
            config,
            pipeline,
            sink,
            permit: DeviceLock::new(),
            session: Mutex::new(None),
        }
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    /// Open the device, configure the session, start preview and the worker.
    #[instrument(skip(self))]
    pub fn open(&self) -> Result<()> {
        let timeout = Duration::from_millis(self.config.session.open_timeout_ms);
        let Some(_permit) = self.permit.try_acquire_for(timeout) else {
            return Err(self.surface(Error::SessionOpenTimeout(timeout)));
        };

        let mut slot = lock(&self.session);
        if slot.as_ref().is_some_and(Session::is_open) {
            return Err(Error::AlreadyOpen);
        }
        // A session that aborted on disconnect still owns its threads.
        if let Some(mut stale) = slot.take() {
            if let Err(e) = stale.shutdown() {
                warn!("Failed to clean up aborted session: {}", e);
            }
        }

        let session = Session::open(&self.source, &self.config, &self.pipeline, &self.sink)
            .map_err(|e| self.surface(e))?;
        *slot = Some(session);
        info!("camera session open");
        Ok(())
    }

    /// Close the session: capture session, device, frame queue, worker, in
    /// that order. A no-op when nothing is open.
    #[instrument(skip(self))]
    pub fn teardown(&self) -> Result<()> {
        let _permit = self.permit.acquire();
        let session = lock(&self.session).take();
        match session {
            Some(mut session) => {
                let result = session.shutdown();
                info!("camera session closed");
                result
            }
            None => Ok(()),
        }
    }

    /// User intent to take a picture.
    pub fn take_picture(&self) -> Result<()> {
        let slot = lock(&self.session);
        match slot.as_ref() {
            Some(session) if session.is_open() => session
                .events
                .send(ControlEvent::Sequencer(SequencerEvent::CaptureIntent))
                .map_err(|_| Error::Disconnected),
            _ => Err(Error::DeviceAccess("camera is not open".into())),
        }
    }

    pub fn is_open(&self) -> bool {
        lock(&self.session).as_ref().is_some_and(Session::is_open)
    }

    /// Current capture state, `None` if no session is running or it aborted.
    pub fn capture_state(&self) -> Option<CaptureState> {
        lock(&self.session)
            .as_ref()
            .and_then(|session| lock(&session.live.sequencer).state())
    }

    pub fn stats(&self) -> Option<SessionStats> {
        lock(&self.session).as_ref().map(|session| SessionStats {
            queue: session.live.queue.stats(),
            processed: session.worker.processed(),
        })
    }

    /// Swap the worker's settings; picked up on its next frame. Invalid
    /// settings are rejected and the running ones kept.
    pub fn update_pipeline(&self, config: PipelineConfig) -> std::result::Result<(), ConfigError> {
        config.validate()?;
        self.pipeline.store(Arc::new(config));
        Ok(())
    }

    fn surface(&self, error: Error) -> Error {
        if error.is_user_visible() {
            self.sink.on_session_error(error.kind());
        }
        error
    }
}

impl<S: FrameSource> Drop for Camera<S> {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            warn!("Camera teardown failed: {}", e);
        }
    }
}
