//! Playback counters shared between the scheduler thread and observers

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use serde::Serialize;

/// Scheduler lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    /// Constructed, nothing armed yet
    Idle,
    /// Initial slots being armed
    Priming,
    /// Re-arming from completions with feed data
    Steady,
    /// Re-arming from completions with silence
    Stopped,
    /// All slots cancelled, completions ignored
    Terminated,
}

impl SchedulerState {
    fn to_u8(self) -> u8 {
        match self {
            SchedulerState::Idle => 0,
            SchedulerState::Priming => 1,
            SchedulerState::Steady => 2,
            SchedulerState::Stopped => 3,
            SchedulerState::Terminated => 4,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => SchedulerState::Priming,
            2 => SchedulerState::Steady,
            3 => SchedulerState::Stopped,
            4 => SchedulerState::Terminated,
            _ => SchedulerState::Idle,
        }
    }
}

/// Lock-free playback counters
#[derive(Debug, Default)]
pub struct PlaybackStats {
    state: AtomicU8,
    slots_armed: AtomicU64,
    data_slots: AtomicU64,
    silence_slots: AtomicU64,
    underruns: AtomicU64,
    discarded: AtomicU64,
    schedule_failures: AtomicU64,
    armed_now: AtomicU64,
    last_start: AtomicU64,
}

impl PlaybackStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_state(&self, state: SchedulerState) {
        self.state.store(state.to_u8(), Ordering::Relaxed);
    }

    pub fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.state.load(Ordering::Relaxed))
    }

    pub(crate) fn record_armed(&self, start: u64, silent: bool, armed_now: usize) {
        self.slots_armed.fetch_add(1, Ordering::Relaxed);
        if silent {
            self.silence_slots.fetch_add(1, Ordering::Relaxed);
        } else {
            self.data_slots.fetch_add(1, Ordering::Relaxed);
        }
        self.last_start.store(start, Ordering::Relaxed);
        self.armed_now.store(armed_now as u64, Ordering::Relaxed);
    }

    pub(crate) fn set_armed_now(&self, armed_now: usize) {
        self.armed_now.store(armed_now as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_underrun(&self) {
        self.underruns.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_discard(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_schedule_failure(&self) {
        self.schedule_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        PlaybackSnapshot {
            state: self.state(),
            slots_armed: self.slots_armed.load(Ordering::Relaxed),
            data_slots: self.data_slots.load(Ordering::Relaxed),
            silence_slots: self.silence_slots.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            schedule_failures: self.schedule_failures.load(Ordering::Relaxed),
            armed_now: self.armed_now.load(Ordering::Relaxed),
            last_start: self.last_start.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`PlaybackStats`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackSnapshot {
    pub state: SchedulerState,
    pub slots_armed: u64,
    /// Slots that carried feed data
    pub data_slots: u64,
    /// Slots that carried silence, for any reason
    pub silence_slots: u64,
    /// Silence slots caused by an empty queue while running
    pub underruns: u64,
    /// Feed blocks dropped unplayed while stopped
    pub discarded: u64,
    pub schedule_failures: u64,
    pub armed_now: u64,
    /// Device time of the most recently armed slot
    pub last_start: u64,
}
