//! Audio subsystem module

pub mod block;
#[cfg(feature = "device")]
pub mod device;
pub mod output;
pub mod queue;
pub mod render;
pub mod simulated;

pub use block::SampleBlock;
#[cfg(feature = "device")]
pub use device::{list_output_devices, CpalOutput};
pub use output::{Completion, DeviceTime, OutputDevice, SlotId};
pub use queue::{FeedQueue, SharedFeedQueue};
pub use simulated::SimulatedOutput;
