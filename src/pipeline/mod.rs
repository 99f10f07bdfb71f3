pub mod histogram;
pub mod queue;
pub mod worker;

pub use histogram::{ColorBucket, HistogramResult};
pub use queue::{FrameQueue, Popped, QueueStats};
pub use worker::PipelineWorker;
