//! Per-result 3A metadata reported by the device

/// Auto-focus routine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AfState {
    Inactive,
    PassiveScan,
    PassiveFocused,
    ActiveScan,
    FocusedLocked,
    NotFocusedLocked,
    PassiveUnfocused,
}

impl AfState {
    /// The focus routine has finished its triggered scan, sharp or not.
    pub fn is_locked(self) -> bool {
        matches!(self, AfState::FocusedLocked | AfState::NotFocusedLocked)
    }
}

/// Auto-exposure routine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AeState {
    Inactive,
    Searching,
    Converged,
    Locked,
    FlashRequired,
    Precapture,
}

/// Metadata attached to a partial or final capture result.
///
/// Devices may leave either field unset; `None` means "no report".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResultMetadata {
    pub af_state: Option<AfState>,
    pub ae_state: Option<AeState>,
}

impl ResultMetadata {
    pub const fn new(af_state: Option<AfState>, ae_state: Option<AeState>) -> Self {
        Self { af_state, ae_state }
    }

    pub const fn af(af_state: AfState) -> Self {
        Self {
            af_state: Some(af_state),
            ae_state: None,
        }
    }

    pub const fn ae(ae_state: AeState) -> Self {
        Self {
            af_state: None,
            ae_state: Some(ae_state),
        }
    }

    /// Exposure needs no precapture sequence. An unreported state counts as
    /// converged, otherwise devices that never report AE would stall capture.
    pub fn ae_settled(&self) -> bool {
        matches!(self.ae_state, None | Some(AeState::Converged))
    }
}
