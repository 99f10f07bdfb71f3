//! Still-capture sequencing: lock focus, settle exposure, capture, resume preview
//!
//! The transition table is a pure function of `(state, event)`. The session's
//! control loop feeds it device results, performs the returned actions and only
//! then commits the new state. When a step cannot be carried out, the capture
//! is cancelled through [`recovery`] and the next intent starts over.

use tracing::debug;

use super::metadata::{AeState, ResultMetadata};
use super::request::RequestKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureState {
    Preview,
    WaitingFocusLock,
    WaitingPrecapture,
    WaitingPrecaptureDone,
    PictureTaken,
}

impl CaptureState {
    fn ordinal(self) -> u8 {
        match self {
            CaptureState::Preview => 0,
            CaptureState::WaitingFocusLock => 1,
            CaptureState::WaitingPrecapture => 2,
            CaptureState::WaitingPrecaptureDone => 3,
            CaptureState::PictureTaken => 4,
        }
    }

    /// Edges allowed by the protocol: strictly forward, plus the return to
    /// `Preview` from any capture step.
    pub fn can_advance_to(self, next: CaptureState) -> bool {
        next.ordinal() > self.ordinal()
            || (self != CaptureState::Preview && next == CaptureState::Preview)
    }

    /// The one-shot request this state is waiting on.
    pub fn in_flight(self) -> Option<RequestKind> {
        match self {
            CaptureState::Preview => None,
            CaptureState::WaitingFocusLock => Some(RequestKind::FocusLock),
            CaptureState::WaitingPrecapture | CaptureState::WaitingPrecaptureDone => {
                Some(RequestKind::Precapture)
            }
            CaptureState::PictureTaken => Some(RequestKind::StillCapture),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SequencerEvent {
    /// The user asked for a picture
    CaptureIntent,
    /// Partial or final metadata for a submitted request
    Result {
        request: RequestKind,
        metadata: ResultMetadata,
        partial: bool,
    },
    /// The device dropped a submitted request
    RequestFailed { request: RequestKind, reason: String },
    /// Transient control-channel failure
    AccessError(String),
    /// Hard device loss
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Submit a one-shot request built from the session template
    Submit(RequestKind),
    /// Re-arm the repeating preview request
    ResumePreview,
    /// Drop anything only the still capture needed
    ReleaseCaptureResources,
    /// Tell the sink a still capture finished
    NotifyCaptured,
    /// Tear down the session handles
    Abort,
}

/// Outcome of one table lookup. `next == None` is the aborted, unset state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: Option<CaptureState>,
    pub actions: &'static [Action],
}

impl Transition {
    const fn to(next: CaptureState, actions: &'static [Action]) -> Self {
        Self {
            next: Some(next),
            actions,
        }
    }

    const fn stay(state: Option<CaptureState>) -> Self {
        Self {
            next: state,
            actions: &[],
        }
    }
}

const LOCK_FOCUS: &[Action] = &[Action::Submit(RequestKind::FocusLock)];
const RUN_PRECAPTURE: &[Action] = &[Action::Submit(RequestKind::Precapture)];
const CAPTURE_STILL: &[Action] = &[Action::Submit(RequestKind::StillCapture)];
const FINISH_CAPTURE: &[Action] = &[
    Action::Submit(RequestKind::FocusUnlock),
    Action::ResumePreview,
    Action::ReleaseCaptureResources,
    Action::NotifyCaptured,
];
const CANCEL_CAPTURE: &[Action] = &[
    Action::Submit(RequestKind::FocusUnlock),
    Action::ResumePreview,
    Action::ReleaseCaptureResources,
];
const ABORT: &[Action] = &[Action::Abort];

/// The capture protocol's transition table.
pub fn transition(state: Option<CaptureState>, event: &SequencerEvent) -> Transition {
    use CaptureState::*;

    let Some(current) = state else {
        return Transition::stay(None);
    };

    match (current, event) {
        (_, SequencerEvent::Disconnected) => Transition {
            next: None,
            actions: ABORT,
        },
        (_, SequencerEvent::RequestFailed { request, .. })
            if current.in_flight() == Some(*request) =>
        {
            Transition::to(Preview, CANCEL_CAPTURE)
        }
        (Preview, SequencerEvent::CaptureIntent) => Transition::to(WaitingFocusLock, LOCK_FOCUS),
        (WaitingFocusLock, SequencerEvent::Result { metadata, .. }) => match metadata.af_state {
            None => Transition::to(PictureTaken, CAPTURE_STILL),
            Some(af) if af.is_locked() => {
                if metadata.ae_settled() {
                    Transition::to(PictureTaken, CAPTURE_STILL)
                } else {
                    Transition::to(WaitingPrecapture, RUN_PRECAPTURE)
                }
            }
            Some(_) => Transition::stay(state),
        },
        (WaitingPrecapture, SequencerEvent::Result { metadata, .. }) => match metadata.ae_state {
            None | Some(AeState::Precapture) | Some(AeState::FlashRequired) => {
                Transition::to(WaitingPrecaptureDone, &[])
            }
            Some(_) => Transition::stay(state),
        },
        (WaitingPrecaptureDone, SequencerEvent::Result { metadata, .. }) => {
            if metadata.ae_state != Some(AeState::Precapture) {
                Transition::to(PictureTaken, CAPTURE_STILL)
            } else {
                Transition::stay(state)
            }
        }
        (
            PictureTaken,
            SequencerEvent::Result {
                request: RequestKind::StillCapture,
                partial: false,
                ..
            },
        ) => Transition::to(Preview, FINISH_CAPTURE),
        _ => Transition::stay(state),
    }
}

/// Way back to `Preview` after a capture step could not be carried out.
/// Stays put when there is no capture in progress.
pub fn recovery(state: Option<CaptureState>) -> Transition {
    match state {
        Some(current) if current != CaptureState::Preview => {
            Transition::to(CaptureState::Preview, CANCEL_CAPTURE)
        }
        _ => Transition::stay(state),
    }
}

/// Holds the current capture state for one session.
#[derive(Debug)]
pub struct CaptureSequencer {
    state: Option<CaptureState>,
}

impl Default for CaptureSequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureSequencer {
    pub fn new() -> Self {
        Self {
            state: Some(CaptureState::Preview),
        }
    }

    pub fn state(&self) -> Option<CaptureState> {
        self.state
    }

    /// Look up the transition for `event` without changing state.
    pub fn plan(&self, event: &SequencerEvent) -> Transition {
        transition(self.state, event)
    }

    /// Transition that cancels the capture in progress.
    pub fn recovery(&self) -> Transition {
        recovery(self.state)
    }

    /// Apply a planned transition. Returns whether the state changed.
    pub fn commit(&mut self, t: Transition) -> bool {
        if t.next == self.state {
            return false;
        }
        debug_assert!(
            match (self.state, t.next) {
                (Some(from), Some(to)) => from.can_advance_to(to),
                (Some(_), None) => true,
                (None, _) => false,
            },
            "illegal capture transition {:?} -> {:?}",
            self.state,
            t.next
        );
        debug!(from = ?self.state, to = ?t.next, "capture state transition");
        metrics::counter!("chroma_capture_transitions_total").increment(1);
        self.state = t.next;
        true
    }

    /// Plan and commit in one step.
    pub fn handle(&mut self, event: &SequencerEvent) -> &'static [Action] {
        let t = self.plan(event);
        self.commit(t);
        t.actions
    }
}
