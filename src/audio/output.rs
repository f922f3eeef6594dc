//! Output slot abstraction
//!
//! An output device plays blocks at absolute positions on its own sample
//! clock. Each scheduled block is a slot: armed when [`OutputDevice::schedule`]
//! returns, playing while the device clock is inside its window, and
//! completed when the window has been fully rendered. Completion is reported
//! exactly once per slot through the device's completion channel; cancelled
//! slots never report. A slot that reaches the renderer after its start has
//! been rendered plays nothing and is reported as missed.

use std::fmt;

use crate::audio::block::SampleBlock;
use crate::error::AudioError;

/// Position on the device clock, in sample frames since the device started
pub type DeviceTime = u64;

/// Handle of one scheduled playback. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub u64);

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot#{}", self.0)
    }
}

/// Completion notification for a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub slot: SlotId,
    /// Device time at which the slot's last frame was rendered, or at which
    /// a missed slot was dropped
    pub at: DeviceTime,
    /// Nothing of the slot was played
    pub missed: bool,
}

impl Completion {
    pub fn played(slot: SlotId, at: DeviceTime) -> Self {
        Self { slot, at, missed: false }
    }

    pub fn missed(slot: SlotId, at: DeviceTime) -> Self {
        Self { slot, at, missed: true }
    }
}

/// Capability set the scheduler needs from an audio output.
///
/// Implementations must not block in `schedule` or `cancel`; both are called
/// from the scheduler's completion handler.
pub trait OutputDevice: Send {
    /// Device sample rate in Hz
    fn sample_rate(&self) -> u32;

    /// Monotonic device clock
    fn current_time(&self) -> DeviceTime;

    /// How far past `current_time` a start must be to reach the renderer in
    /// time. Zero for devices that arm synchronously.
    fn lead_time(&self) -> DeviceTime {
        0
    }

    /// Arm `slot` to play `block` starting at `start`.
    ///
    /// Fails with [`AudioError::StartInPast`] if `start` has already been
    /// rendered. A start that passes while the slot is in flight to the
    /// renderer yields a missed [`Completion`] instead.
    fn schedule(&self, slot: SlotId, block: SampleBlock, start: DeviceTime) -> Result<(), AudioError>;

    /// Cancel an armed slot. Its completion will not be reported.
    fn cancel(&self, slot: SlotId);
}

impl<D: OutputDevice + ?Sized> OutputDevice for Box<D> {
    fn sample_rate(&self) -> u32 {
        (**self).sample_rate()
    }

    fn current_time(&self) -> DeviceTime {
        (**self).current_time()
    }

    fn lead_time(&self) -> DeviceTime {
        (**self).lead_time()
    }

    fn schedule(&self, slot: SlotId, block: SampleBlock, start: DeviceTime) -> Result<(), AudioError> {
        (**self).schedule(slot, block, start)
    }

    fn cancel(&self, slot: SlotId) {
        (**self).cancel(slot)
    }
}
