use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chroma::capture::metadata::{AeState, AfState, ResultMetadata};
use chroma::capture::request::{AeMode, RequestKind};
use chroma::capture::{Camera, OpenFailure, Pattern, SyntheticConfig, SyntheticSource};
use chroma::display::{ChannelSink, SinkEvent};
use chroma::{CaptureState, Config, ErrorKind, PipelineConfig};
use flume::Receiver;

const RED: u32 = 0xff0000;
const BLUE: u32 = 0x0000ff;
const WAIT: Duration = Duration::from_secs(5);

fn config() -> Config {
    let mut config = Config::default();
    config.capture.width = 8;
    config.capture.height = 4;
    config.capture.max_fps = 30;
    config.session.open_timeout_ms = 500;
    config.pipeline.pop_timeout_ms = 10;
    config
}

fn synthetic(pattern: Pattern) -> SyntheticConfig {
    SyntheticConfig {
        pattern,
        frame_interval: Some(Duration::from_millis(5)),
        ..SyntheticConfig::default()
    }
}

fn new_camera(source: SyntheticConfig, config: Config) -> (Camera<SyntheticSource>, Receiver<SinkEvent>) {
    let (sink, rx) = ChannelSink::new();
    (Camera::new(SyntheticSource::new(source), config, Arc::new(sink)), rx)
}

/// Wait for the first event matching `pred`.
fn wait_for(rx: &Receiver<SinkEvent>, pred: impl Fn(&SinkEvent) -> bool) -> Option<SinkEvent> {
    let deadline = Instant::now() + WAIT;
    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        match rx.recv_timeout(left) {
            Ok(event) if pred(&event) => return Some(event),
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
    None
}

/// Capture states reported until the capture completes and preview resumes.
fn states_until_complete(rx: &Receiver<SinkEvent>) -> Vec<Option<CaptureState>> {
    let mut states = Vec::new();
    let mut complete = false;
    let deadline = Instant::now() + WAIT;
    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        match rx.recv_timeout(left) {
            Ok(SinkEvent::CaptureState(state)) => states.push(state),
            Ok(SinkEvent::CaptureComplete) => complete = true,
            Ok(_) => {}
            Err(_) => break,
        }
        if complete && states.last() == Some(&Some(CaptureState::Preview)) {
            return states;
        }
    }
    panic!("capture never completed, saw {states:?}");
}

fn submitted_kinds(camera: &Camera<SyntheticSource>) -> Vec<RequestKind> {
    camera.source().submitted().iter().map(|r| r.kind).collect()
}

#[test]
fn histograms_flow_from_preview_to_sink() {
    let (camera, rx) = new_camera(synthetic(Pattern::Stripes(vec![RED, BLUE])), config());
    camera.open().unwrap();

    let Some(SinkEvent::Histogram(result)) = wait_for(&rx, |e| matches!(e, SinkEvent::Histogram(_)))
    else {
        panic!("no histogram delivered");
    };
    assert_eq!(result.len(), 5);
    assert_eq!(result.distinct_colors, 2);
    assert_eq!((result.buckets[0].color, result.buckets[0].percentage), (RED, 50.0));
    assert_eq!((result.buckets[1].color, result.buckets[1].percentage), (BLUE, 50.0));
    assert!(result.buckets[2..].iter().all(|b| b.is_placeholder()));

    camera.teardown().unwrap();
    let stats = camera.source().stats();
    assert_eq!((stats.devices_opened, stats.devices_closed), (1, 1));
    assert_eq!((stats.sessions_created, stats.sessions_closed), (1, 1));
    assert_eq!(camera.source().open_devices(), 0);
}

#[test]
fn still_capture_with_converged_exposure() {
    let (camera, rx) = new_camera(synthetic(Pattern::Solid(RED)), config());
    camera.open().unwrap();
    camera.take_picture().unwrap();

    assert_eq!(
        states_until_complete(&rx),
        [
            Some(CaptureState::WaitingFocusLock),
            Some(CaptureState::PictureTaken),
            Some(CaptureState::Preview),
        ]
    );
    assert_eq!(camera.capture_state(), Some(CaptureState::Preview));
    assert_eq!(
        submitted_kinds(&camera),
        [
            RequestKind::Preview,
            RequestKind::FocusLock,
            RequestKind::StillCapture,
            RequestKind::FocusUnlock,
            RequestKind::Preview,
        ]
    );
    assert_eq!(camera.source().stats().still_captures, 1);
}

#[test]
fn still_capture_runs_precapture_when_exposure_is_searching() {
    let source = SyntheticConfig {
        focus_script: vec![ResultMetadata::new(
            Some(AfState::FocusedLocked),
            Some(AeState::Searching),
        )],
        ..synthetic(Pattern::Solid(BLUE))
    };
    let (camera, rx) = new_camera(source, config());
    camera.open().unwrap();
    camera.take_picture().unwrap();

    assert_eq!(
        states_until_complete(&rx),
        [
            Some(CaptureState::WaitingFocusLock),
            Some(CaptureState::WaitingPrecapture),
            Some(CaptureState::WaitingPrecaptureDone),
            Some(CaptureState::PictureTaken),
            Some(CaptureState::Preview),
        ]
    );
    let precapture = camera
        .source()
        .submitted()
        .into_iter()
        .find(|r| r.kind == RequestKind::Precapture)
        .unwrap();
    assert!(precapture.ae_precapture_trigger);
}

#[test]
fn capture_intent_is_ignored_mid_sequence() {
    let source = SyntheticConfig {
        // Focus never locks, so the sequence parks in WaitingFocusLock.
        focus_script: vec![ResultMetadata::af(AfState::ActiveScan)],
        ..synthetic(Pattern::Solid(RED))
    };
    let (camera, _rx) = new_camera(source, config());
    camera.open().unwrap();
    camera.take_picture().unwrap();
    camera.take_picture().unwrap();

    let deadline = Instant::now() + WAIT;
    while camera.capture_state() != Some(CaptureState::WaitingFocusLock) {
        assert!(Instant::now() < deadline, "sequence never started");
        thread::sleep(Duration::from_millis(5));
    }
    thread::sleep(Duration::from_millis(50));
    let focus_locks = submitted_kinds(&camera)
        .into_iter()
        .filter(|k| *k == RequestKind::FocusLock)
        .count();
    assert_eq!(focus_locks, 1);
}

#[test]
fn auto_flash_only_when_supported() {
    let (camera, _rx) = new_camera(synthetic(Pattern::Gradient), config());
    camera.open().unwrap();
    assert_eq!(camera.source().submitted()[0].ae_mode, AeMode::OnAutoFlash);

    let source = SyntheticConfig {
        flash_supported: false,
        ..synthetic(Pattern::Gradient)
    };
    let (camera, _rx) = new_camera(source, config());
    camera.open().unwrap();
    assert_eq!(camera.source().submitted()[0].ae_mode, AeMode::On);
}

#[test]
fn open_times_out_while_another_open_holds_the_permit() {
    let source = SyntheticConfig {
        open_delay: Duration::from_millis(400),
        ..synthetic(Pattern::Gradient)
    };
    let mut config = config();
    config.session.open_timeout_ms = 50;
    let (camera, rx) = new_camera(source, config);
    let camera = Arc::new(camera);

    let slow = {
        let camera = Arc::clone(&camera);
        thread::spawn(move || camera.open())
    };
    thread::sleep(Duration::from_millis(100));
    let err = camera.open().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SessionOpenTimeout);
    assert!(wait_for(&rx, |e| *e == SinkEvent::SessionError(ErrorKind::SessionOpenTimeout)).is_some());

    slow.join().unwrap().unwrap();
    assert!(camera.is_open());
    assert_eq!(camera.source().stats().devices_opened, 1);
}

#[test]
fn second_open_is_rejected() {
    let (camera, _rx) = new_camera(synthetic(Pattern::Gradient), config());
    camera.open().unwrap();
    assert_eq!(camera.open().unwrap_err().kind(), ErrorKind::AlreadyOpen);
    assert_eq!(camera.source().stats().devices_opened, 1);
}

#[test]
fn configure_failure_closes_the_device() {
    let source = SyntheticConfig {
        fail_configure: true,
        ..synthetic(Pattern::Gradient)
    };
    let (camera, rx) = new_camera(source, config());

    assert_eq!(camera.open().unwrap_err().kind(), ErrorKind::ConfigureFailed);
    assert!(wait_for(&rx, |e| *e == SinkEvent::SessionError(ErrorKind::ConfigureFailed)).is_some());
    assert!(!camera.is_open());
    let stats = camera.source().stats();
    assert_eq!((stats.devices_opened, stats.devices_closed), (1, 1));
}

#[test]
fn permission_denied_is_left_to_the_host() {
    let source = SyntheticConfig {
        open_failure: Some(OpenFailure::PermissionDenied),
        ..synthetic(Pattern::Gradient)
    };
    let (camera, rx) = new_camera(source, config());

    assert_eq!(camera.open().unwrap_err().kind(), ErrorKind::PermissionDenied);
    assert!(rx.try_iter().all(|e| !matches!(e, SinkEvent::SessionError(_))));
}

#[test]
fn disconnect_aborts_and_releases_the_device() {
    let (camera, rx) = new_camera(synthetic(Pattern::Gradient), config());
    camera.open().unwrap();
    camera.source().disconnect();

    assert!(wait_for(&rx, |e| *e == SinkEvent::SessionError(ErrorKind::Disconnected)).is_some());
    assert!(wait_for(&rx, |e| *e == SinkEvent::CaptureState(None)).is_some());
    assert!(!camera.is_open());
    assert_eq!(camera.capture_state(), None);
    assert_eq!(camera.source().open_devices(), 0);
    assert_eq!(camera.take_picture().unwrap_err().kind(), ErrorKind::DeviceAccess);

    // The aborted session is replaced on the next open.
    camera.open().unwrap();
    assert!(camera.is_open());
    camera.teardown().unwrap();
    let stats = camera.source().stats();
    assert_eq!((stats.devices_opened, stats.devices_closed), (2, 2));
    assert_eq!(stats.unmatched_closes, 0);
}

#[test]
fn take_picture_needs_an_open_camera() {
    let (camera, _rx) = new_camera(synthetic(Pattern::Gradient), config());
    assert_eq!(camera.take_picture().unwrap_err().kind(), ErrorKind::DeviceAccess);
    camera.teardown().unwrap();
    assert_eq!(camera.source().stats().devices_closed, 0);
}

#[test]
fn reopen_after_teardown() {
    let (camera, rx) = new_camera(synthetic(Pattern::Solid(RED)), config());
    for _ in 0..3 {
        camera.open().unwrap();
        assert!(wait_for(&rx, |e| matches!(e, SinkEvent::Histogram(_))).is_some());
        camera.teardown().unwrap();
        assert!(!camera.is_open());
    }
    let stats = camera.source().stats();
    assert_eq!((stats.sessions_created, stats.sessions_closed), (3, 3));
    assert_eq!((stats.devices_opened, stats.devices_closed), (3, 3));
}

#[test]
fn racing_open_and_teardown_close_each_device_once() {
    let (camera, _rx) = new_camera(synthetic(Pattern::Gradient), config());
    let camera = Arc::new(camera);

    let workers: Vec<_> = (0..4)
        .map(|i| {
            let camera = Arc::clone(&camera);
            thread::spawn(move || {
                for n in 0..20 {
                    if (i + n) % 2 == 0 {
                        let _ = camera.open();
                    } else {
                        camera.teardown().unwrap();
                    }
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let stats = camera.source().stats();
    assert_eq!(stats.unmatched_closes, 0);
    assert_eq!(stats.devices_opened - stats.devices_closed, usize::from(camera.is_open()));
    camera.teardown().unwrap();
    assert_eq!(camera.source().open_devices(), 0);
}

#[test]
fn pipeline_settings_apply_while_running() {
    let (camera, rx) = new_camera(synthetic(Pattern::Gradient), config());
    camera.open().unwrap();
    camera.update_pipeline(PipelineConfig {
        top_n: 2,
        pop_timeout_ms: 10,
        ..PipelineConfig::default()
    })
    .unwrap();
    assert!(wait_for(&rx, |e| matches!(e, SinkEvent::Histogram(r) if r.len() == 2)).is_some());
    assert!(camera.stats().unwrap().processed > 0);
}

#[test]
fn invalid_pipeline_settings_are_rejected() {
    let (camera, rx) = new_camera(synthetic(Pattern::Gradient), config());
    camera.open().unwrap();
    let empty = PipelineConfig {
        top_n: 0,
        ..PipelineConfig::default()
    };
    let spinning = PipelineConfig {
        pop_timeout_ms: 0,
        ..PipelineConfig::default()
    };
    assert!(camera.update_pipeline(empty).is_err());
    assert!(camera.update_pipeline(spinning).is_err());

    let histograms: Vec<_> = (0..3)
        .map(|_| match wait_for(&rx, |e| matches!(e, SinkEvent::Histogram(_))) {
            Some(SinkEvent::Histogram(result)) => result.len(),
            other => panic!("expected a histogram, got {other:?}"),
        })
        .collect();
    assert_eq!(histograms, [5, 5, 5]);
}
