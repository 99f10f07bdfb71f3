//! Session and device error types

use std::time::Duration;

use thiserror::Error;

/// Coarse error classification handed to the result sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Transient control-channel failure; the next operation may succeed.
    DeviceAccess,
    /// No usable backing device or format.
    DeviceUnavailable,
    /// The device permit could not be taken in time.
    SessionOpenTimeout,
    /// Camera permission missing; handled by the host, never by the core.
    PermissionDenied,
    /// The capture session could not be configured.
    ConfigureFailed,
    /// The device went away while the session was open.
    Disconnected,
    /// A session is already open on this camera.
    AlreadyOpen,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("camera access failed: {0}")]
    DeviceAccess(String),
    #[error("no usable camera device: {0}")]
    DeviceUnavailable(String),
    #[error("timed out after {0:?} waiting to lock camera opening")]
    SessionOpenTimeout(Duration),
    #[error("camera permission denied")]
    PermissionDenied,
    #[error("capture session configuration failed: {0}")]
    ConfigureFailed(String),
    #[error("camera device disconnected")]
    Disconnected,
    #[error("a camera session is already open")]
    AlreadyOpen,
    #[error("failed to spawn session thread: {0}")]
    Spawn(#[source] std::io::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::DeviceAccess(_) => ErrorKind::DeviceAccess,
            Error::DeviceUnavailable(_) => ErrorKind::DeviceUnavailable,
            Error::SessionOpenTimeout(_) => ErrorKind::SessionOpenTimeout,
            Error::PermissionDenied => ErrorKind::PermissionDenied,
            Error::ConfigureFailed(_) => ErrorKind::ConfigureFailed,
            Error::Disconnected => ErrorKind::Disconnected,
            Error::AlreadyOpen => ErrorKind::AlreadyOpen,
            Error::Spawn(_) => ErrorKind::ConfigureFailed,
        }
    }

    /// Whether the error is surfaced to the user through the result sink.
    ///
    /// Transient access errors are only logged and permission problems belong
    /// to the host's permission flow.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::DeviceUnavailable
                | ErrorKind::SessionOpenTimeout
                | ErrorKind::ConfigureFailed
                | ErrorKind::Disconnected
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
