pub mod decoder;
pub mod frame;
pub mod metadata;
pub mod request;
pub mod sequencer;
pub mod session;
pub mod source;
pub mod synthetic;

pub use decoder::{decode_frame, DecodeError, DecodedImage};
pub use frame::{Frame, FrameMetadata, PixelFormat, Size};
pub use metadata::{AeState, AfState, ResultMetadata};
pub use request::{CaptureRequest, FlashPolicy, FpsRange, RequestKind, RequestTemplate};
pub use sequencer::{CaptureSequencer, CaptureState, SequencerEvent};
pub use session::{Camera, SessionStats};
pub use source::{CaptureSessionHandle, Delivery, DeviceHandle, FrameSource, ResultCallback, StreamConfig};
pub use synthetic::{OpenFailure, Pattern, SyntheticConfig, SyntheticSource, SyntheticStats};
