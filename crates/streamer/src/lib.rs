//! The acquisition-to-sink streaming pipeline: bounded frame queue,
//! network/file sinks, the consuming manager and the producing
//! application loop.

pub mod app;
pub mod file_sink;
pub mod manager;
pub mod net_sink;
pub mod queue;
pub mod sink;

pub use app::{AppError, ChannelConditioner, StreamingApplication};
pub use file_sink::FileSink;
pub use manager::{NotifyStop, PushError, StopReason, StreamingManager};
pub use net_sink::NetSink;
pub use queue::{FrameQueue, OverflowPolicy, QueueClosed};
pub use sink::{Sink, SinkError, SinkStatus};
