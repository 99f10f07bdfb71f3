pub mod sink;

pub use sink::{ChannelSink, LogSink, ResultSink, SinkEvent};
