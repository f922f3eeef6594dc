//! Render side of a hardware output
//!
//! [`Renderer`] lives inside the audio callback. It receives armed slots and
//! cancellations over a lock-free channel, writes each output frame from the
//! slot whose window covers it (silence where none does), and reports every
//! slot whose window has been fully written. A slot whose start was already
//! rendered when it arrived is reported as missed and never played.
//!
//! The callback never blocks, never logs and never frees a block: finished,
//! cancelled and missed blocks go back over the retire channel and are
//! dropped on the scheduler side.

use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::audio::block::SampleBlock;
use crate::audio::output::{Completion, DeviceTime, SlotId};

/// Messages from the scheduler side to the callback
pub enum RenderCommand {
    Arm {
        slot: SlotId,
        block: SampleBlock,
        start: DeviceTime,
    },
    Cancel(SlotId),
}

/// Clock shared between the callback and the device handle
#[derive(Debug, Default)]
pub struct RenderClock {
    rendered: AtomicU64,
    largest_callback: AtomicU64,
}

impl RenderClock {
    /// Frames rendered so far
    pub fn now(&self) -> DeviceTime {
        self.rendered.load(Ordering::Acquire)
    }

    /// Largest callback buffer seen, in frames
    pub fn largest_callback(&self) -> DeviceTime {
        self.largest_callback.load(Ordering::Relaxed)
    }
}

struct PendingSlot {
    slot: SlotId,
    block: SampleBlock,
    start: DeviceTime,
}

impl PendingSlot {
    fn end(&self) -> DeviceTime {
        self.start + self.block.len() as DeviceTime
    }
}

/// Callback-side state of a hardware output
pub struct Renderer {
    channels: usize,
    position: DeviceTime,
    pending: Vec<PendingSlot>,
    commands: Receiver<RenderCommand>,
    completions: Sender<Completion>,
    retired: Sender<SampleBlock>,
    clock: Arc<RenderClock>,
}

impl Renderer {
    pub fn new(
        channels: u16,
        commands: Receiver<RenderCommand>,
        completions: Sender<Completion>,
        retired: Sender<SampleBlock>,
        clock: Arc<RenderClock>,
    ) -> Self {
        Self {
            channels: channels.max(1) as usize,
            position: clock.now(),
            pending: Vec::with_capacity(16),
            commands,
            completions,
            retired,
            clock,
        }
    }

    /// Fill one interleaved device buffer. The mono slot sample is copied to
    /// every output channel.
    pub fn render(&mut self, out: &mut [f32]) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                RenderCommand::Arm { slot, block, start } if start < self.position => {
                    let _ = self.completions.try_send(Completion::missed(slot, self.position));
                    self.retire(block);
                }
                RenderCommand::Arm { slot, block, start } => {
                    self.pending.push(PendingSlot { slot, block, start })
                }
                RenderCommand::Cancel(slot) => {
                    if let Some(i) = self.pending.iter().position(|p| p.slot == slot) {
                        let cancelled = self.pending.remove(i);
                        self.retire(cancelled.block);
                    }
                }
            }
        }

        let mut frames = 0u64;
        for frame in out.chunks_mut(self.channels) {
            let t = self.position + frames;
            let sample = self
                .pending
                .iter()
                .find(|p| t >= p.start && t < p.end())
                .map(|p| p.block.samples()[(t - p.start) as usize])
                .unwrap_or(0.0);
            frame.fill(sample);
            frames += 1;
        }

        self.position += frames;
        let mut i = 0;
        while i < self.pending.len() {
            if self.pending[i].end() <= self.position {
                let done = self.pending.remove(i);
                let _ = self.completions.try_send(Completion::played(done.slot, done.end()));
                self.retire(done.block);
            } else {
                i += 1;
            }
        }

        self.clock.largest_callback.fetch_max(frames, Ordering::Relaxed);
        self.clock.rendered.store(self.position, Ordering::Release);
    }

    fn retire(&self, block: SampleBlock) {
        // A full channel hands the block back and it drops here; the device
        // handle drains the channel on every schedule call.
        let _ = self.retired.try_send(block);
    }
}
