//! In-process camera that renders test patterns and answers capture requests
//! from a script. Drives the demo binary and the integration tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, warn};

use super::frame::{Frame, FrameMetadata, PixelFormat, Size};
use super::metadata::{AeState, AfState, ResultMetadata};
use super::request::{CaptureRequest, RequestKind};
use super::source::{
    CaptureSessionHandle, Delivery, DeviceHandle, FrameSource, ResultCallback, StreamConfig,
};
use crate::error::{Error, Result};
use crate::utils::lock;

/// What the synthetic sensor sees.
#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    /// Every pixel the same 0xRRGGBB colour
    Solid(u32),
    /// Equal-width vertical bands, left to right
    Stripes(Vec<u32>),
    /// Eight grey bands scrolling one column per frame
    Gradient,
}

impl Pattern {
    fn pixel(&self, x: u32, width: u32, sequence: u64) -> u32 {
        match self {
            Pattern::Solid(color) => *color,
            Pattern::Stripes(colors) if colors.is_empty() => 0,
            Pattern::Stripes(colors) => {
                let band = u64::from(x) * colors.len() as u64 / u64::from(width.max(1));
                colors[band as usize]
            }
            Pattern::Gradient => {
                let shifted = (u64::from(x) + sequence) % u64::from(width.max(1));
                let level = (shifted * 8 / u64::from(width.max(1))) as u32 * 32;
                (level << 16) | (level << 8) | level
            }
        }
    }

    /// Render one packed frame in `format`.
    fn render(&self, size: Size, format: PixelFormat, sequence: u64) -> Option<Vec<u8>> {
        let bpp = format.bytes_per_pixel()? as usize;
        if format == PixelFormat::Yuyv4 {
            return None;
        }
        let row: Vec<u8> = (0..size.width)
            .flat_map(|x| {
                let c = self.pixel(x, size.width, sequence);
                let (r, g, b) = ((c >> 16) as u8, (c >> 8) as u8, c as u8);
                let px = match format {
                    PixelFormat::Bgr24 => [b, g, r, 0],
                    _ => [r, g, b, 0xff],
                };
                px.into_iter().take(bpp)
            })
            .collect();
        Some(row.repeat(size.height as usize))
    }
}

/// How a synthetic open should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenFailure {
    PermissionDenied,
    Unavailable,
}

#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub name: String,
    pub pattern: Pattern,
    pub flash_supported: bool,
    /// Results reported for a focus-lock request, in order
    pub focus_script: Vec<ResultMetadata>,
    /// Results reported for a precapture request, in order
    pub precapture_script: Vec<ResultMetadata>,
    pub open_failure: Option<OpenFailure>,
    pub fail_configure: bool,
    /// Time spent inside `open_device`
    pub open_delay: Duration,
    /// Overrides the interval derived from the stream's max fps
    pub frame_interval: Option<Duration>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            name: "synthetic0".into(),
            pattern: Pattern::Gradient,
            flash_supported: true,
            focus_script: vec![
                ResultMetadata::af(AfState::ActiveScan),
                ResultMetadata::new(Some(AfState::FocusedLocked), Some(AeState::Converged)),
            ],
            precapture_script: vec![
                ResultMetadata::ae(AeState::Precapture),
                ResultMetadata::ae(AeState::Converged),
            ],
            open_failure: None,
            fail_configure: false,
            open_delay: Duration::ZERO,
            frame_interval: None,
        }
    }
}

/// Counters describing everything the core did to the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyntheticStats {
    pub devices_opened: usize,
    pub devices_closed: usize,
    pub sessions_created: usize,
    pub sessions_closed: usize,
    pub still_captures: usize,
    /// Closes of handles that were not open
    pub unmatched_closes: usize,
}

struct ActiveSession {
    results: ResultCallback,
    streaming: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    producer: Option<JoinHandle<()>>,
}

impl ActiveSession {
    fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(producer) = self.producer.take() {
            producer.thread().unpark();
            if producer.join().is_err() {
                warn!("synthetic frame producer panicked");
            }
        }
    }
}

#[derive(Default)]
struct Counters {
    devices_opened: AtomicUsize,
    devices_closed: AtomicUsize,
    sessions_created: AtomicUsize,
    sessions_closed: AtomicUsize,
    still_captures: AtomicUsize,
    unmatched_closes: AtomicUsize,
}

pub struct SyntheticSource {
    config: SyntheticConfig,
    next_id: AtomicU64,
    devices: Mutex<HashSet<u64>>,
    sessions: Mutex<HashMap<u64, ActiveSession>>,
    submitted: Mutex<Vec<CaptureRequest>>,
    counters: Counters,
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self::new(SyntheticConfig::default())
    }
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            next_id: AtomicU64::new(1),
            devices: Mutex::new(HashSet::new()),
            sessions: Mutex::new(HashMap::new()),
            submitted: Mutex::new(Vec::new()),
            counters: Counters::default(),
        }
    }

    /// Devices currently open.
    pub fn open_devices(&self) -> usize {
        lock(&self.devices).len()
    }

    pub fn stats(&self) -> SyntheticStats {
        let c = &self.counters;
        SyntheticStats {
            devices_opened: c.devices_opened.load(Ordering::SeqCst),
            devices_closed: c.devices_closed.load(Ordering::SeqCst),
            sessions_created: c.sessions_created.load(Ordering::SeqCst),
            sessions_closed: c.sessions_closed.load(Ordering::SeqCst),
            still_captures: c.still_captures.load(Ordering::SeqCst),
            unmatched_closes: c.unmatched_closes.load(Ordering::SeqCst),
        }
    }

    /// Every request submitted so far, repeating and one-shot.
    pub fn submitted(&self) -> Vec<CaptureRequest> {
        lock(&self.submitted).clone()
    }

    /// Simulate the device going away: every live session is told it was
    /// disconnected and its frames stop.
    pub fn disconnect(&self) {
        let sessions = lock(&self.sessions);
        info!(sessions = sessions.len(), "synthetic camera disconnected");
        for session in sessions.values() {
            session.streaming.store(false, Ordering::Release);
            session.results.disconnected();
        }
    }

    fn with_session<T>(&self, id: u64, f: impl FnOnce(&ActiveSession) -> T) -> Result<T> {
        let sessions = lock(&self.sessions);
        sessions
            .get(&id)
            .map(f)
            .ok_or_else(|| Error::DeviceAccess(format!("capture session {id} is closed")))
    }

    fn answer(&self, results: &ResultCallback, request: &CaptureRequest) {
        match request.kind {
            RequestKind::FocusLock => {
                for metadata in &self.config.focus_script {
                    results.completed(request, *metadata);
                }
            }
            RequestKind::Precapture => {
                for metadata in &self.config.precapture_script {
                    results.completed(request, *metadata);
                }
            }
            RequestKind::StillCapture => {
                self.counters.still_captures.fetch_add(1, Ordering::SeqCst);
                results.progressed(request, ResultMetadata::default());
                results.completed(request, ResultMetadata::default());
            }
            RequestKind::FocusUnlock => {
                results.completed(request, ResultMetadata::af(AfState::Inactive));
            }
            RequestKind::Preview => {}
        }
    }
}

impl FrameSource for SyntheticSource {
    fn open_device(&self, _stream: &StreamConfig) -> Result<DeviceHandle> {
        if !self.config.open_delay.is_zero() {
            thread::sleep(self.config.open_delay);
        }
        match self.config.open_failure {
            Some(OpenFailure::PermissionDenied) => return Err(Error::PermissionDenied),
            Some(OpenFailure::Unavailable) => {
                return Err(Error::DeviceUnavailable(self.config.name.clone()))
            }
            None => {}
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.devices).insert(id);
        self.counters.devices_opened.fetch_add(1, Ordering::SeqCst);
        debug!(id, "synthetic device opened");
        Ok(DeviceHandle {
            id,
            name: self.config.name.clone(),
            flash_supported: self.config.flash_supported,
        })
    }

    fn create_capture_session(
        &self,
        device: &DeviceHandle,
        stream: &StreamConfig,
        delivery: Delivery,
    ) -> Result<CaptureSessionHandle> {
        if self.config.fail_configure {
            return Err(Error::ConfigureFailed("synthetic configure failure".into()));
        }
        if !lock(&self.devices).contains(&device.id) {
            return Err(Error::DeviceAccess(format!("device {} is closed", device.id)));
        }
        if stream.format.bytes_per_pixel().is_none() || stream.format == PixelFormat::Yuyv4 {
            return Err(Error::ConfigureFailed(format!(
                "synthetic camera cannot produce {:?}",
                stream.format
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let interval = self
            .config
            .frame_interval
            .unwrap_or_else(|| Duration::from_secs_f64(1.0 / f64::from(stream.fps.max.max(1))));
        let streaming = Arc::new(AtomicBool::new(false));
        let stop = Arc::new(AtomicBool::new(false));
        let results = delivery.results().clone();

        let producer = {
            let pattern = self.config.pattern.clone();
            let stream = *stream;
            let streaming = Arc::clone(&streaming);
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name("synthetic-frames".into())
                .spawn(move || produce(pattern, stream, interval, delivery, streaming, stop))
                .map_err(Error::Spawn)?
        };

        lock(&self.sessions).insert(
            id,
            ActiveSession {
                results,
                streaming,
                stop,
                producer: Some(producer),
            },
        );
        self.counters.sessions_created.fetch_add(1, Ordering::SeqCst);
        debug!(id, device = device.id, "synthetic capture session configured");
        Ok(CaptureSessionHandle { id })
    }

    fn submit_repeating(&self, session: &CaptureSessionHandle, request: CaptureRequest) -> Result<()> {
        self.with_session(session.id, |active| {
            active.streaming.store(true, Ordering::Release);
        })?;
        lock(&self.submitted).push(request);
        Ok(())
    }

    fn stop_repeating(&self, session: &CaptureSessionHandle) -> Result<()> {
        self.with_session(session.id, |active| {
            active.streaming.store(false, Ordering::Release);
        })
    }

    fn submit_once(&self, session: &CaptureSessionHandle, request: CaptureRequest) -> Result<()> {
        let results = self.with_session(session.id, |active| active.results.clone())?;
        self.answer(&results, &request);
        lock(&self.submitted).push(request);
        Ok(())
    }

    fn close_capture_session(&self, session: CaptureSessionHandle) -> Result<()> {
        let active = lock(&self.sessions).remove(&session.id);
        match active {
            Some(mut active) => {
                active.stop();
                self.counters.sessions_closed.fetch_add(1, Ordering::SeqCst);
                debug!(id = session.id, "synthetic capture session closed");
                Ok(())
            }
            None => {
                self.counters.unmatched_closes.fetch_add(1, Ordering::SeqCst);
                Err(Error::DeviceAccess(format!("capture session {} is not open", session.id)))
            }
        }
    }

    fn close_device(&self, device: DeviceHandle) -> Result<()> {
        if lock(&self.devices).remove(&device.id) {
            self.counters.devices_closed.fetch_add(1, Ordering::SeqCst);
            debug!(id = device.id, "synthetic device closed");
            Ok(())
        } else {
            self.counters.unmatched_closes.fetch_add(1, Ordering::SeqCst);
            Err(Error::DeviceAccess(format!("device {} is not open", device.id)))
        }
    }
}

impl Drop for SyntheticSource {
    fn drop(&mut self) {
        for (_, mut active) in lock(&self.sessions).drain() {
            active.stop();
        }
    }
}

fn produce(
    pattern: Pattern,
    stream: StreamConfig,
    interval: Duration,
    delivery: Delivery,
    streaming: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
) {
    let mut sequence = 0u64;
    while !stop.load(Ordering::Acquire) {
        if streaming.load(Ordering::Acquire) {
            let Some(pixels) = pattern.render(stream.size, stream.format, sequence) else {
                delivery.results().access_error("unrenderable stream format");
                return;
            };
            sequence += 1;
            let meta = FrameMetadata::packed(sequence, stream.size, stream.format);
            if !delivery.deliver_frame(Frame::new(Bytes::from(pixels), meta)) {
                debug!("frame queue closed, producer idle");
                streaming.store(false, Ordering::Release);
            }
        }
        thread::park_timeout(interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn stripes_split_the_width_evenly() {
        let pattern = Pattern::Stripes(vec![0xff0000, 0x00ff00]);
        let px: Vec<u32> = (0..4).map(|x| pattern.pixel(x, 4, 0)).collect();
        assert_eq!(px, [0xff0000, 0xff0000, 0x00ff00, 0x00ff00]);
    }

    #[test]
    fn renders_bgr_in_reverse_channel_order() {
        let pixels = Pattern::Solid(0x112233)
            .render(Size::new(2, 1), PixelFormat::Bgr24, 0)
            .unwrap();
        assert_eq!(pixels, [0x33, 0x22, 0x11, 0x33, 0x22, 0x11]);
    }

    #[test]
    fn gradient_scrolls_with_sequence() {
        let a = Pattern::Gradient.pixel(0, 8, 0);
        let b = Pattern::Gradient.pixel(0, 8, 1);
        assert_ne!(a, b);
    }

    #[test]
    fn closing_an_unknown_device_is_counted() {
        let source = SyntheticSource::default();
        let err = source
            .close_device(DeviceHandle {
                id: 99,
                name: "ghost".into(),
                flash_supported: false,
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeviceAccess);
        assert_eq!(source.stats().unmatched_closes, 1);
    }
}
