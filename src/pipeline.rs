//! The bounded prefetch queue that sits between the fetch loop and the
//! ordered dispatch loop, plus the per-height payload it carries.

pub mod height;
pub mod queue;
pub mod ring;

pub use height::HeightData;
pub use queue::{PipelineQueue, QueueStorage};
pub use ring::RingBuffer;
