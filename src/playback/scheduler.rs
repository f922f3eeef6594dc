//! Chained slot scheduler
//!
//! Keeps `slot_count` slots armed on the output device at all times. Slots
//! are numbered by a chain index `k` and slot `k` starts at
//!
//! ```text
//! start(k) = origin + (k - origin_index) * block_length
//! ```
//!
//! on the device's sample clock. Priming arms indices `0..slot_count`; every
//! completion arms the next unused index. Since completions arrive in index
//! order, completion of `k` arms `k + slot_count`, i.e. each of the
//! `slot_count` interleaved chains steps by `slot_count` blocks and together
//! they tile the timeline with no gap and no overlap.
//!
//! The origin only moves when the device rejects a start time. The new
//! origin is never earlier than the end of the latest armed slot, so windows
//! still cannot overlap; the cost is a gap of at most one block.
//!
//! Content is decided when a slot is armed: the next feed block while the
//! session is running, silence otherwise or when the feed has nothing
//! queued. Timing never depends on content.

use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use crate::audio::block::SampleBlock;
use crate::audio::output::{Completion, DeviceTime, OutputDevice, SlotId};
use crate::audio::queue::SharedFeedQueue;
use crate::config::PlaybackConfig;
use crate::error::AudioError;
use crate::playback::stats::{PlaybackStats, SchedulerState};
use crate::session::SessionStatus;

#[derive(Debug, Clone, Copy)]
struct ArmedSlot {
    id: SlotId,
    index: u64,
    start: DeviceTime,
}

/// What a completion event led to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// The completed slot was known; these slots were armed in its place
    Rearmed(Vec<SlotId>),
    /// Unknown slot, or the scheduler is not running
    Ignored,
}

/// Slot-chaining state machine over an [`OutputDevice`]
pub struct PlaybackScheduler<D: OutputDevice> {
    device: D,
    queue: SharedFeedQueue,
    status: Arc<SessionStatus>,
    stats: Arc<PlaybackStats>,
    silence: SampleBlock,
    block_length: u64,
    slot_count: usize,
    state: SchedulerState,
    origin: DeviceTime,
    origin_index: u64,
    next_index: u64,
    next_slot_id: u64,
    armed: Vec<ArmedSlot>,
}

impl<D: OutputDevice> PlaybackScheduler<D> {
    pub fn new(
        device: D,
        queue: SharedFeedQueue,
        status: Arc<SessionStatus>,
        config: &PlaybackConfig,
    ) -> Result<Self, AudioError> {
        if device.sample_rate() != config.sample_rate {
            return Err(AudioError::UnsupportedFormat(format!(
                "device runs at {} Hz, feed is {} Hz",
                device.sample_rate(),
                config.sample_rate
            )));
        }
        if queue.block_length() != config.block_length {
            return Err(AudioError::BlockLength {
                expected: config.block_length,
                got: queue.block_length(),
            });
        }

        let stats = Arc::new(PlaybackStats::new());
        stats.set_state(SchedulerState::Idle);

        Ok(Self {
            device,
            queue,
            status,
            stats,
            silence: SampleBlock::silence(config.block_length),
            block_length: config.block_length as u64,
            slot_count: config.slot_count,
            state: SchedulerState::Idle,
            origin: 0,
            origin_index: 0,
            next_index: 0,
            next_slot_id: 0,
            armed: Vec::with_capacity(config.slot_count),
        })
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn stats(&self) -> Arc<PlaybackStats> {
        self.stats.clone()
    }

    /// Number of slots currently armed
    pub fn armed_count(&self) -> usize {
        self.armed.len()
    }

    /// Running but with nothing armed, so no completion will ever arrive
    pub fn is_stalled(&self) -> bool {
        matches!(self.state, SchedulerState::Steady | SchedulerState::Stopped) && self.armed.is_empty()
    }

    /// Arm the initial slots back to back, one device lead time from now
    pub fn prime(&mut self) -> usize {
        if self.state != SchedulerState::Idle {
            debug!("prime() ignored in state {:?}", self.state);
            return 0;
        }

        self.set_state(SchedulerState::Priming);
        self.origin = self.device.current_time() + self.device.lead_time();
        self.origin_index = 0;

        let armed = self.refill();
        info!(
            "Primed {} of {} slots at device time {}",
            armed, self.slot_count, self.origin
        );
        self.settle_state();
        armed
    }

    /// Handle a slot completion: forget the slot and arm its successor
    pub fn on_completion(&mut self, completion: Completion) -> CompletionOutcome {
        if !matches!(self.state, SchedulerState::Steady | SchedulerState::Stopped) {
            trace!("Ignoring {} in state {:?}", completion.slot, self.state);
            return CompletionOutcome::Ignored;
        }

        let Some(pos) = self.armed.iter().position(|s| s.id == completion.slot) else {
            debug!("Ignoring completion of unknown {}", completion.slot);
            return CompletionOutcome::Ignored;
        };
        let done = self.armed.remove(pos);
        if completion.missed {
            // The block is gone; its window stays silent and the lane is refilled
            self.stats.record_schedule_failure();
            warn!(
                "{} (index {}) reached the device after its start {}, missed at {}",
                done.id, done.index, done.start, completion.at
            );
        } else {
            trace!(
                "{} (index {}) completed at {}",
                done.id,
                done.index,
                completion.at
            );
        }

        let before = self.next_slot_id;
        self.refill();
        self.settle_state();

        let rearmed = (before..self.next_slot_id)
            .map(SlotId)
            .filter(|id| self.is_armed(*id))
            .collect();
        CompletionOutcome::Rearmed(rearmed)
    }

    /// Re-arm a stalled chain from the current device time
    pub fn recover(&mut self) -> usize {
        if !self.is_stalled() {
            return 0;
        }
        self.origin = self.earliest_safe_start();
        self.origin_index = self.next_index;
        warn!("Playback chain stalled, restarting at device time {}", self.origin);
        self.refill()
    }

    /// Cancel every armed slot; later completions are ignored
    pub fn terminate(&mut self) -> usize {
        if self.state == SchedulerState::Terminated {
            return 0;
        }
        let cancelled = self.armed.len();
        for slot in self.armed.drain(..) {
            self.device.cancel(slot.id);
        }
        self.stats.set_armed_now(0);
        self.set_state(SchedulerState::Terminated);
        info!("Playback terminated, cancelled {} armed slots", cancelled);
        cancelled
    }

    fn is_armed(&self, id: SlotId) -> bool {
        self.armed.iter().any(|s| s.id == id)
    }

    fn start_of(&self, index: u64) -> DeviceTime {
        self.origin + (index - self.origin_index) * self.block_length
    }

    /// Now plus one block, or the device lead if that is longer
    fn earliest_safe_start(&self) -> DeviceTime {
        self.device.current_time() + self.block_length.max(self.device.lead_time())
    }

    fn latest_end(&self) -> Option<DeviceTime> {
        self.armed.iter().map(|s| s.start + self.block_length).max()
    }

    /// Arm slots until `slot_count` are in flight. Returns how many were armed.
    fn refill(&mut self) -> usize {
        let mut armed = 0;
        let missing = self.slot_count.saturating_sub(self.armed.len());
        for _ in 0..missing {
            match self.arm_next() {
                Ok(_) => armed += 1,
                Err(e) => {
                    warn!("Giving up on slot index {}: {}", self.next_index, e);
                    break;
                }
            }
        }
        armed
    }

    fn arm_next(&mut self) -> Result<SlotId, AudioError> {
        let index = self.next_index;
        let start = self.start_of(index);
        let block = self.next_block();

        let id = self.allocate_id();
        match self.device.schedule(id, block.clone(), start) {
            Ok(()) => {
                self.commit(id, index, start, &block);
                Ok(id)
            }
            Err(e) => {
                self.stats.record_schedule_failure();
                let resume = self.earliest_safe_start().max(self.latest_end().unwrap_or(0));
                warn!(
                    "Device rejected {} at {} ({}), rescheduling at {}",
                    id, start, e, resume
                );

                self.origin = resume;
                self.origin_index = index;

                let retry = self.allocate_id();
                match self.device.schedule(retry, block.clone(), resume) {
                    Ok(()) => {
                        self.commit(retry, index, resume, &block);
                        Ok(retry)
                    }
                    Err(e) => {
                        self.stats.record_schedule_failure();
                        Err(e)
                    }
                }
            }
        }
    }

    fn allocate_id(&mut self) -> SlotId {
        let id = SlotId(self.next_slot_id);
        self.next_slot_id += 1;
        id
    }

    fn commit(&mut self, id: SlotId, index: u64, start: DeviceTime, block: &SampleBlock) {
        self.armed.push(ArmedSlot { id, index, start });
        self.next_index = index + 1;
        self.stats.record_armed(start, block.is_silence(), self.armed.len());
        trace!(
            "Armed {} index {} at {}{}",
            id,
            index,
            start,
            if block.is_silence() { " (silence)" } else { "" }
        );
    }

    /// Content for the next slot
    fn next_block(&mut self) -> SampleBlock {
        if !self.status.is_running() {
            if self.queue.discard_one() {
                self.stats.record_discard();
            }
            return self.silence.clone();
        }

        // The queue only holds blocks of the session block length
        match self.queue.pop() {
            Some(block) => block,
            None => {
                self.stats.record_underrun();
                self.silence.clone()
            }
        }
    }

    fn settle_state(&mut self) {
        let next = if self.status.is_running() {
            SchedulerState::Steady
        } else {
            SchedulerState::Stopped
        };
        self.set_state(next);
    }

    fn set_state(&mut self, state: SchedulerState) {
        if self.state != state {
            debug!("Scheduler {:?} -> {:?}", self.state, state);
            self.state = state;
            self.stats.set_state(state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::queue::FeedQueue;
    use crate::audio::simulated::{ScheduledSlot, SimulatedOutput};
    use crate::session::SessionState;
    use proptest::prelude::*;

    const RATE: u32 = 32_000;
    const LEN: usize = 1024;

    fn config(slot_count: usize) -> PlaybackConfig {
        PlaybackConfig {
            sample_rate: RATE,
            block_length: LEN,
            slot_count,
            channels: 1,
            queue_capacity: 256,
        }
    }

    fn setup(
        slot_count: usize,
    ) -> (
        PlaybackScheduler<SimulatedOutput>,
        SimulatedOutput,
        SharedFeedQueue,
        Arc<SessionStatus>,
    ) {
        let (device, _rx) = SimulatedOutput::new(RATE);
        let queue = Arc::new(FeedQueue::new(256, LEN));
        let status = Arc::new(SessionStatus::new(SessionState::Running));
        let scheduler =
            PlaybackScheduler::new(device.clone(), queue.clone(), status.clone(), &config(slot_count)).unwrap();
        (scheduler, device, queue, status)
    }

    fn data_block(value: f32) -> SampleBlock {
        SampleBlock::from_samples(vec![value; LEN], LEN).unwrap()
    }

    /// Advance the device one completion at a time, feeding each to the scheduler
    fn run(scheduler: &mut PlaybackScheduler<SimulatedOutput>, device: &SimulatedOutput, completions: usize) {
        let mut handled = 0;
        while handled < completions {
            for completion in device.advance_to_next_completion() {
                scheduler.on_completion(completion);
                handled += 1;
            }
        }
    }

    fn live(history: &[ScheduledSlot]) -> Vec<ScheduledSlot> {
        let mut slots: Vec<ScheduledSlot> = history.iter().filter(|s| s.played()).cloned().collect();
        slots.sort_by_key(|s| s.start);
        slots
    }

    #[test]
    fn test_prime_arms_back_to_back() {
        let (mut scheduler, device, _queue, _status) = setup(2);
        device.advance(500);

        assert_eq!(scheduler.prime(), 2);
        assert_eq!(scheduler.state(), SchedulerState::Steady);

        let history = device.history();
        assert_eq!(history[0].start, 500);
        assert_eq!(history[1].start, 500 + LEN as u64);
    }

    #[test]
    fn test_prime_leaves_device_lead_time() {
        let (mut scheduler, device, _queue, _status) = setup(2);
        device.advance(100);
        device.set_lead_time(256);

        scheduler.prime();
        let history = device.history();
        assert_eq!(history[0].start, 356);
        assert_eq!(history[1].start, 356 + LEN as u64);
    }

    #[test]
    fn test_completion_arms_one_chain_step_ahead() {
        for slot_count in [2, 4] {
            let (mut scheduler, device, _queue, _status) = setup(slot_count);
            scheduler.prime();

            let completion = device.advance(LEN as u64);
            assert_eq!(completion.len(), 1);
            let outcome = scheduler.on_completion(completion[0]);

            let history = device.history();
            let newest = history.last().unwrap();
            assert_eq!(outcome, CompletionOutcome::Rearmed(vec![newest.slot]));
            assert_eq!(newest.start, (slot_count * LEN) as u64);
            assert_eq!(scheduler.armed_count(), slot_count);
        }
    }

    #[test]
    fn test_no_gap_no_overlap_steady_state() {
        for slot_count in [2, 4] {
            let (mut scheduler, device, queue, _status) = setup(slot_count);
            for i in 0..20 {
                queue.push(data_block(i as f32 / 100.0)).unwrap();
            }
            scheduler.prime();
            run(&mut scheduler, &device, 50);

            let slots = live(&device.history());
            assert_eq!(slots.len(), 50 + slot_count);
            for pair in slots.windows(2) {
                assert_eq!(pair[1].start, pair[0].start + LEN as u64);
                assert!(pair[0].end() <= pair[1].start);
            }
        }
    }

    #[test]
    fn test_underrun_substitutes_full_silence() {
        let (mut scheduler, device, queue, _status) = setup(2);
        queue.push(data_block(0.5)).unwrap();
        scheduler.prime();

        let history = device.history();
        assert!(!history[0].block.is_silence());
        assert!(history[1].block.is_silence());
        assert_eq!(history[1].block.len(), LEN);
        assert!(history[1].block.samples().iter().all(|&s| s == 0.0));

        let snap = scheduler.stats().snapshot();
        assert_eq!(snap.underruns, 1);
        assert_eq!(snap.data_slots, 1);
    }

    #[test]
    fn test_wrong_length_block_is_rejected_at_queue_not_counted_as_underrun() {
        let (mut scheduler, device, queue, _status) = setup(2);
        let short = SampleBlock::from_samples(vec![0.5; LEN / 2], LEN / 2).unwrap();
        assert!(queue.push(short).is_err());
        queue.push(data_block(0.5)).unwrap();

        scheduler.prime();
        let history = device.history();
        assert_eq!(history[0].block.len(), LEN);
        assert!(!history[0].block.is_silence());

        let snap = scheduler.stats().snapshot();
        assert_eq!(snap.data_slots, 1);
        assert_eq!(snap.underruns, 1);
        assert_eq!(queue.stats().rejected, 1);
    }

    #[test]
    fn test_silence_block_is_shared() {
        let (mut scheduler, device, _queue, _status) = setup(4);
        scheduler.prime();

        let history = device.history();
        assert!(history.iter().all(|s| s.block.is_silence()));
        assert!(history[0].block.ptr_eq(&history[3].block));
    }

    #[test]
    fn test_stop_resume_keeps_timing() {
        let (mut scheduler, device, queue, status) = setup(2);
        for _ in 0..100 {
            queue.push(data_block(0.25)).unwrap();
        }
        scheduler.prime();
        run(&mut scheduler, &device, 5);

        status.set(SessionState::Stopped);
        run(&mut scheduler, &device, 5);
        assert_eq!(scheduler.state(), SchedulerState::Stopped);

        status.set(SessionState::Running);
        run(&mut scheduler, &device, 5);
        assert_eq!(scheduler.state(), SchedulerState::Steady);

        let slots = live(&device.history());
        for (k, slot) in slots.iter().enumerate() {
            assert_eq!(slot.start, k as u64 * LEN as u64);
        }
        // Slots armed while stopped carry silence and consume one feed block each
        let silent: Vec<usize> = slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.block.is_silence())
            .map(|(k, _)| k)
            .collect();
        assert_eq!(silent, vec![7, 8, 9, 10, 11]);
        assert_eq!(scheduler.stats().snapshot().discarded, 5);
        assert_eq!(queue.len(), 100 - 17);
    }

    #[test]
    fn test_rejected_schedule_reschedules_after_now() {
        let (mut scheduler, device, queue, _status) = setup(2);
        queue.push(data_block(0.1)).unwrap();
        scheduler.prime();

        // The device falls behind: both armed slots complete late
        let completions = device.advance(3 * LEN as u64);
        assert_eq!(completions.len(), 2);

        scheduler.on_completion(completions[0]);
        let history = device.history();
        let resumed = history.last().unwrap();
        assert_eq!(resumed.start, 4 * LEN as u64);
        assert_eq!(scheduler.stats().snapshot().schedule_failures, 1);

        scheduler.on_completion(completions[1]);
        let slots = live(&device.history());
        let tail = &slots[slots.len() - 2..];
        assert_eq!(tail[1].start, tail[0].start + LEN as u64);
    }

    #[test]
    fn test_injected_failure_never_overlaps() {
        let (mut scheduler, device, _queue, _status) = setup(4);
        scheduler.prime();

        device.fail_next_schedules(1);
        run(&mut scheduler, &device, 1);
        run(&mut scheduler, &device, 10);

        let slots = live(&device.history());
        for pair in slots.windows(2) {
            assert!(pair[0].end() <= pair[1].start);
        }
        assert_eq!(scheduler.armed_count(), 4);
    }

    #[test]
    fn test_lost_slot_is_restored_on_next_completion() {
        let (mut scheduler, device, _queue, _status) = setup(4);
        scheduler.prime();

        device.fail_next_schedules(2);
        let completion = device.advance_to_next_completion();
        scheduler.on_completion(completion[0]);
        assert_eq!(scheduler.armed_count(), 3);

        let completion = device.advance_to_next_completion();
        scheduler.on_completion(completion[0]);
        assert_eq!(scheduler.armed_count(), 4);

        let slots = live(&device.history());
        for pair in slots.windows(2) {
            assert_eq!(pair[1].start, pair[0].start + LEN as u64);
        }
    }

    #[test]
    fn test_missed_slot_plays_nothing_and_lane_is_refilled() {
        let (mut scheduler, device, queue, _status) = setup(2);
        for _ in 0..8 {
            queue.push(data_block(0.4)).unwrap();
        }
        scheduler.prime();

        // Index 2 is armed on the first completion and then missed
        device.miss_next_arms(1);
        run(&mut scheduler, &device, 1);
        let missed = device.history()[2].clone();
        assert!(missed.missed);

        let completion = device.advance_to_next_completion();
        assert_eq!(completion, vec![Completion::missed(missed.slot, LEN as u64)]);
        let outcome = scheduler.on_completion(completion[0]);

        let newest = device.history().last().unwrap().clone();
        assert_eq!(outcome, CompletionOutcome::Rearmed(vec![newest.slot]));
        assert_eq!(newest.start, 3 * LEN as u64);
        assert_eq!(scheduler.armed_count(), 2);
        assert_eq!(scheduler.stats().snapshot().schedule_failures, 1);

        run(&mut scheduler, &device, 6);
        let slots = live(&device.history());
        for pair in slots.windows(2) {
            assert!(pair[0].end() <= pair[1].start);
        }
        assert!(slots.iter().all(|s| s.start != missed.start));
    }

    #[test]
    fn test_stall_recovery() {
        let (mut scheduler, device, _queue, _status) = setup(2);
        scheduler.prime();

        device.fail_next_schedules(4);
        for completion in device.advance(2 * LEN as u64) {
            scheduler.on_completion(completion);
        }
        assert!(scheduler.is_stalled());

        assert_eq!(scheduler.recover(), 2);
        assert!(!scheduler.is_stalled());
        let armed = device.armed();
        assert_eq!(armed[0].start, 3 * LEN as u64);
        assert_eq!(armed[1].start, 4 * LEN as u64);
    }

    #[test]
    fn test_terminate_cancels_and_ignores_later_completions() {
        let (mut scheduler, device, _queue, _status) = setup(4);
        scheduler.prime();
        let first = device.history()[0].slot;

        assert_eq!(scheduler.terminate(), 4);
        assert_eq!(scheduler.state(), SchedulerState::Terminated);
        assert!(device.armed().is_empty());
        assert!(device.advance(10 * LEN as u64).is_empty());

        let outcome = scheduler.on_completion(Completion::played(first, 0));
        assert_eq!(outcome, CompletionOutcome::Ignored);
        assert_eq!(device.history().len(), 4);
    }

    #[test]
    fn test_unknown_completion_ignored() {
        let (mut scheduler, _device, _queue, _status) = setup(2);
        scheduler.prime();
        let outcome = scheduler.on_completion(Completion::played(SlotId(999), 0));
        assert_eq!(outcome, CompletionOutcome::Ignored);
        assert_eq!(scheduler.armed_count(), 2);
    }

    #[test]
    fn test_rejects_mismatched_rate() {
        let (device, _rx) = SimulatedOutput::new(48_000);
        let queue = Arc::new(FeedQueue::new(16, LEN));
        let status = Arc::new(SessionStatus::new(SessionState::Running));
        assert!(PlaybackScheduler::new(device, queue, status, &config(2)).is_err());
    }

    #[test]
    fn test_end_to_end_realtime_feed() {
        let (mut scheduler, device, queue, _status) = setup(2);
        let blocks: Vec<SampleBlock> = (0..100).map(|i| data_block((i % 50) as f32 / 100.0)).collect();

        // Pre-roll enough for priming, then one block per block duration
        queue.push(blocks[0].clone()).unwrap();
        queue.push(blocks[1].clone()).unwrap();
        scheduler.prime();
        for block in &blocks[2..] {
            queue.push(block.clone()).unwrap();
            for completion in device.advance(LEN as u64) {
                scheduler.on_completion(completion);
            }
        }

        let snap = scheduler.stats().snapshot();
        assert_eq!(snap.data_slots, 100);
        assert_eq!(snap.silence_slots, 0);
        assert_eq!(snap.underruns, 0);

        let slots = live(&device.history());
        let played: u64 = slots.iter().map(|s| s.block.len() as u64).sum();
        let seconds = played as f64 / RATE as f64;
        let expected = 100.0 * LEN as f64 / RATE as f64;
        assert!((seconds - expected).abs() <= LEN as f64 / RATE as f64);
        for (slot, block) in slots.iter().zip(&blocks) {
            assert!(slot.block.ptr_eq(block));
        }
    }

    proptest! {
        #[test]
        fn prop_timeline_is_contiguous(
            slot_count in prop_oneof![Just(2usize), Just(4usize)],
            arrivals in proptest::collection::vec(0usize..3, 1..60),
            toggles in proptest::collection::vec(any::<bool>(), 1..60),
        ) {
            let (mut scheduler, device, queue, status) = setup(slot_count);
            scheduler.prime();

            for (step, count) in arrivals.iter().enumerate() {
                for _ in 0..*count {
                    queue.push(data_block(0.3)).unwrap();
                }
                let running = toggles[step % toggles.len()];
                status.set(if running { SessionState::Running } else { SessionState::Stopped });
                for completion in device.advance_to_next_completion() {
                    scheduler.on_completion(completion);
                }
            }

            let slots = live(&device.history());
            for pair in slots.windows(2) {
                prop_assert_eq!(pair[1].start, pair[0].start + LEN as u64);
            }
            for slot in &slots {
                prop_assert_eq!(slot.block.len(), LEN);
            }
            prop_assert_eq!(scheduler.armed_count(), slot_count);
        }
    }
}
