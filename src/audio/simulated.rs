//! Simulated output device
//!
//! Plays nothing; keeps a sample clock that only moves when told to, records
//! every scheduled slot and reports completions exactly like a hardware
//! backend would. Used by the tests and as the fallback output when no
//! audio device is available, in which case [`SimulatedOutput::spawn_realtime_clock`]
//! advances the clock at wall-clock speed.

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audio::block::SampleBlock;
use crate::audio::output::{Completion, DeviceTime, OutputDevice, SlotId};
use crate::error::AudioError;

/// One `schedule` call as seen by the device
#[derive(Debug, Clone)]
pub struct ScheduledSlot {
    pub slot: SlotId,
    pub start: DeviceTime,
    pub block: SampleBlock,
    pub cancelled: bool,
    /// Accepted but reported missed without playing
    pub missed: bool,
}

impl ScheduledSlot {
    pub fn end(&self) -> DeviceTime {
        self.start + self.block.len() as DeviceTime
    }

    /// Whether any of the slot reached the output
    pub fn played(&self) -> bool {
        !self.cancelled && !self.missed
    }
}

struct SimState {
    now: DeviceTime,
    lead: DeviceTime,
    armed: Vec<ScheduledSlot>,
    history: Vec<ScheduledSlot>,
    missed: Vec<Completion>,
    fail_next: usize,
    miss_next: usize,
}

/// Manually clocked output device. Cloning shares the device.
#[derive(Clone)]
pub struct SimulatedOutput {
    state: Arc<Mutex<SimState>>,
    sample_rate: u32,
    completion_tx: Sender<Completion>,
}

impl SimulatedOutput {
    /// Create a device at time zero, returning it with its completion stream
    pub fn new(sample_rate: u32) -> (Self, Receiver<Completion>) {
        let (completion_tx, completion_rx) = unbounded();
        let device = Self {
            state: Arc::new(Mutex::new(SimState {
                now: 0,
                lead: 0,
                armed: Vec::new(),
                history: Vec::new(),
                missed: Vec::new(),
                fail_next: 0,
                miss_next: 0,
            })),
            sample_rate,
            completion_tx,
        };
        (device, completion_rx)
    }

    /// Render `frames` frames, completing every slot whose window has ended.
    ///
    /// Missed slots are reported first, then completions in end-time order.
    /// Everything is sent on the completion channel and also returned.
    pub fn advance(&self, frames: u64) -> Vec<Completion> {
        let mut state = self.state.lock();
        state.now += frames;
        let now = state.now;
        let mut completions = std::mem::take(&mut state.missed);

        let mut done: Vec<ScheduledSlot> = Vec::new();
        state.armed.retain(|slot| {
            if slot.end() <= now {
                done.push(slot.clone());
                false
            } else {
                true
            }
        });
        drop(state);

        done.sort_by_key(|slot| (slot.end(), slot.slot));
        completions.extend(done.iter().map(|slot| Completion::played(slot.slot, slot.end())));

        for completion in &completions {
            // Nobody listening is fine: tests often drive the scheduler directly.
            let _ = self.completion_tx.send(*completion);
        }
        completions
    }

    /// Advance until the next armed slot completes
    pub fn advance_to_next_completion(&self) -> Vec<Completion> {
        let (now, next_end) = {
            let state = self.state.lock();
            if !state.missed.is_empty() {
                (state.now, Some(state.now))
            } else {
                (state.now, state.armed.iter().map(ScheduledSlot::end).min())
            }
        };
        match next_end {
            Some(end) => self.advance(end.saturating_sub(now)),
            None => Vec::new(),
        }
    }

    /// Reject the next `count` schedule calls as if their start were in the past
    pub fn fail_next_schedules(&self, count: usize) {
        self.state.lock().fail_next = count;
    }

    /// Accept the next `count` schedule calls, then report them missed on the
    /// next advance, as a hardware output does when the start passes while
    /// the slot is on its way to the callback
    pub fn miss_next_arms(&self, count: usize) {
        self.state.lock().miss_next = count;
    }

    /// Lead time reported to the scheduler
    pub fn set_lead_time(&self, frames: DeviceTime) {
        self.state.lock().lead = frames;
    }

    /// Every slot ever scheduled, in call order
    pub fn history(&self) -> Vec<ScheduledSlot> {
        self.state.lock().history.clone()
    }

    /// Slots armed and not yet completed or cancelled
    pub fn armed(&self) -> Vec<ScheduledSlot> {
        self.state.lock().armed.clone()
    }

    /// Drive the clock from the wall clock on a background thread
    pub fn spawn_realtime_clock(&self, tick: Duration) -> RealtimeClock {
        let running = Arc::new(AtomicBool::new(true));
        let device = self.clone();
        let flag = running.clone();

        let handle = thread::Builder::new()
            .name("simulated-clock".to_string())
            .spawn(move || {
                let started = Instant::now();
                let mut rendered: u64 = 0;
                while flag.load(Ordering::Relaxed) {
                    thread::sleep(tick);
                    let target = (started.elapsed().as_secs_f64() * device.sample_rate as f64) as u64;
                    if target > rendered {
                        device.advance(target - rendered);
                        rendered = target;
                    }
                }
            })
            .ok();

        if handle.is_none() {
            tracing::error!("Failed to spawn simulated clock thread");
        }

        RealtimeClock { running, handle }
    }
}

impl OutputDevice for SimulatedOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> DeviceTime {
        self.state.lock().now
    }

    fn lead_time(&self) -> DeviceTime {
        self.state.lock().lead
    }

    fn schedule(&self, slot: SlotId, block: SampleBlock, start: DeviceTime) -> Result<(), AudioError> {
        let mut state = self.state.lock();
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(AudioError::StartInPast { start, now: state.now });
        }
        if start < state.now {
            return Err(AudioError::StartInPast { start, now: state.now });
        }

        let missed = state.miss_next > 0;
        let scheduled = ScheduledSlot {
            slot,
            start,
            block,
            cancelled: false,
            missed,
        };
        state.history.push(scheduled.clone());
        if missed {
            state.miss_next -= 1;
            let at = state.now;
            state.missed.push(Completion::missed(slot, at));
        } else {
            state.armed.push(scheduled);
        }
        Ok(())
    }

    fn cancel(&self, slot: SlotId) {
        let mut state = self.state.lock();
        state.armed.retain(|s| s.slot != slot);
        if let Some(entry) = state.history.iter_mut().find(|s| s.slot == slot) {
            entry.cancelled = true;
        }
    }
}

/// Background thread advancing a [`SimulatedOutput`]; stops on drop
pub struct RealtimeClock {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Drop for RealtimeClock {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completes_in_end_order() {
        let (device, rx) = SimulatedOutput::new(1000);
        device.schedule(SlotId(1), SampleBlock::silence(10), 10).unwrap();
        device.schedule(SlotId(0), SampleBlock::silence(10), 0).unwrap();

        assert!(device.advance(5).is_empty());
        let done = device.advance(20);
        assert_eq!(done.len(), 2);
        assert_eq!(done[0], Completion::played(SlotId(0), 10));
        assert_eq!(done[1], Completion::played(SlotId(1), 20));
        assert_eq!(rx.try_iter().count(), 2);
    }

    #[test]
    fn test_rejects_past_start() {
        let (device, _rx) = SimulatedOutput::new(1000);
        device.advance(100);
        let err = device.schedule(SlotId(0), SampleBlock::silence(10), 50).unwrap_err();
        assert_eq!(err, AudioError::StartInPast { start: 50, now: 100 });
    }

    #[test]
    fn test_cancelled_slot_never_completes() {
        let (device, _rx) = SimulatedOutput::new(1000);
        device.schedule(SlotId(7), SampleBlock::silence(10), 0).unwrap();
        device.cancel(SlotId(7));

        assert!(device.advance(100).is_empty());
        assert!(device.history()[0].cancelled);
    }

    #[test]
    fn test_missed_arm_reports_without_playing() {
        let (device, rx) = SimulatedOutput::new(1000);
        device.miss_next_arms(1);
        device.schedule(SlotId(4), SampleBlock::silence(10), 0).unwrap();
        device.schedule(SlotId(5), SampleBlock::silence(10), 10).unwrap();

        assert!(device.armed().iter().all(|s| s.slot == SlotId(5)));
        assert_eq!(device.advance_to_next_completion(), vec![Completion::missed(SlotId(4), 0)]);
        assert_eq!(device.current_time(), 0);
        assert!(!device.history()[0].played());
        assert_eq!(device.advance(20), vec![Completion::played(SlotId(5), 20)]);
        assert_eq!(rx.try_iter().count(), 2);
    }

    #[test]
    fn test_realtime_clock_advances() {
        let (device, _rx) = SimulatedOutput::new(48_000);
        {
            let _clock = device.spawn_realtime_clock(Duration::from_millis(1));
            thread::sleep(Duration::from_millis(30));
        }
        assert!(device.current_time() > 0);
    }
}
