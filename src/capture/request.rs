//! Immutable capture requests built fresh for every submission

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Flash behaviour requested by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlashPolicy {
    /// Fire the flash in low light, when the device has one
    #[default]
    Auto,
    Off,
}

/// What a request is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Continuous preview stream
    Preview,
    /// Start a one-shot focus scan and lock
    FocusLock,
    /// Run the exposure precapture sequence
    Precapture,
    /// High resolution still
    StillCapture,
    /// Cancel the focus lock and return AF to continuous mode
    FocusUnlock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMode {
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfMode {
    ContinuousPicture,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfTrigger {
    Idle,
    Start,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AeMode {
    On,
    OnAutoFlash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FpsRange {
    pub min: u32,
    pub max: u32,
}

/// A single capture request. Never mutated after it is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    pub id: u64,
    pub kind: RequestKind,
    pub control_mode: ControlMode,
    pub af_mode: AfMode,
    pub af_trigger: AfTrigger,
    pub ae_mode: AeMode,
    pub ae_precapture_trigger: bool,
    pub target_fps: FpsRange,
}

impl CaptureRequest {
    pub fn is_repeating(&self) -> bool {
        self.kind == RequestKind::Preview
    }
}

/// Session-wide request settings. Produces a new [`CaptureRequest`] per
/// submission so no field can leak from one protocol step into the next.
#[derive(Debug)]
pub struct RequestTemplate {
    ae_mode: AeMode,
    target_fps: FpsRange,
    next_id: AtomicU64,
}

impl RequestTemplate {
    pub fn new(policy: FlashPolicy, flash_supported: bool, target_fps: FpsRange) -> Self {
        let ae_mode = match policy {
            FlashPolicy::Auto if flash_supported => AeMode::OnAutoFlash,
            _ => AeMode::On,
        };
        Self {
            ae_mode,
            target_fps,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn ae_mode(&self) -> AeMode {
        self.ae_mode
    }

    pub fn build(&self, kind: RequestKind) -> CaptureRequest {
        let af_trigger = match kind {
            RequestKind::FocusLock => AfTrigger::Start,
            RequestKind::FocusUnlock => AfTrigger::Cancel,
            _ => AfTrigger::Idle,
        };
        CaptureRequest {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            kind,
            control_mode: ControlMode::Auto,
            af_mode: AfMode::ContinuousPicture,
            af_trigger,
            ae_mode: self.ae_mode,
            ae_precapture_trigger: kind == RequestKind::Precapture,
            target_fps: self.target_fps,
        }
    }
}
