//! Session lifecycle
//!
//! [`SessionStatus`] is the Running/Stopped flag the scheduler reads on every
//! re-arm. [`SessionController`] wires a session together: it owns the feed
//! client and the playback thread, and flips the flag on user request.
//! Toggling never touches the slot chain; only the content of future slots
//! changes.

use chrono::{DateTime, Utc};
use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::audio::output::{Completion, OutputDevice};
use crate::audio::queue::{FeedQueue, SharedFeedQueue};
use crate::config::{AppConfig, PlaybackConfig};
use crate::error::Result;
use crate::network::feed::{FeedClient, FeedStats};
use crate::playback::driver::PlaybackDriver;
use crate::playback::scheduler::PlaybackScheduler;
use crate::playback::stats::PlaybackStats;
use crate::protocol::StatusReport;

/// User-facing playback status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Running,
    Stopped,
}

/// Atomically readable session flag
#[derive(Debug)]
pub struct SessionStatus {
    running: AtomicBool,
}

impl SessionStatus {
    pub fn new(state: SessionState) -> Self {
        Self {
            running: AtomicBool::new(state == SessionState::Running),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn state(&self) -> SessionState {
        if self.is_running() {
            SessionState::Running
        } else {
            SessionState::Stopped
        }
    }

    /// Set the state, returning the previous one
    pub fn set(&self, state: SessionState) -> SessionState {
        let was = self.running.swap(state == SessionState::Running, Ordering::AcqRel);
        if was {
            SessionState::Running
        } else {
            SessionState::Stopped
        }
    }

    /// Flip the state, returning the new one
    pub fn toggle(&self) -> SessionState {
        let was = self.running.fetch_xor(true, Ordering::AcqRel);
        if was {
            SessionState::Stopped
        } else {
            SessionState::Running
        }
    }
}

/// Cloneable view of a running session for observers such as the web UI
#[derive(Clone)]
pub struct SessionHandle {
    status: Arc<SessionStatus>,
    queue: SharedFeedQueue,
    playback: Arc<PlaybackStats>,
    feed: Arc<FeedStats>,
    config: PlaybackConfig,
    started_at: DateTime<Utc>,
}

impl SessionHandle {
    pub fn state(&self) -> SessionState {
        self.status.state()
    }

    /// Switch Running/Stopped, logging the edge
    pub fn set_state(&self, state: SessionState) -> SessionState {
        let was = self.status.set(state);
        if was != state {
            tracing::info!("Session {:?} -> {:?}", was, state);
        }
        state
    }

    pub fn toggle(&self) -> SessionState {
        let now = self.status.toggle();
        tracing::info!("Session toggled to {:?}", now);
        now
    }

    pub fn queue(&self) -> &SharedFeedQueue {
        &self.queue
    }

    pub fn report(&self) -> StatusReport {
        let uptime = (Utc::now() - self.started_at).num_seconds().max(0) as u64;
        StatusReport {
            status: self.state(),
            sample_rate: self.config.sample_rate,
            block_length: self.config.block_length,
            slot_count: self.config.slot_count,
            block_duration_ms: self.config.block_duration().as_secs_f64() * 1000.0,
            started_at: self.started_at,
            uptime_seconds: uptime,
            playback: self.playback.snapshot(),
            queue: self.queue.stats(),
            feed: self.feed.snapshot(),
        }
    }
}

/// Owns the feed connection and the playback chain for one session
pub struct SessionController {
    handle: SessionHandle,
    feed: FeedClient,
    playback: PlaybackDriver,
}

impl SessionController {
    /// Open the feed and start priming playback on `device`.
    ///
    /// Must be called inside a tokio runtime. The session starts Running.
    pub fn start<D>(config: &AppConfig, device: D, completions: Receiver<Completion>) -> Result<Self>
    where
        D: OutputDevice + 'static,
    {
        config.validate()?;
        let playback_config = config.playback.clone();

        let status = Arc::new(SessionStatus::new(SessionState::Running));
        let queue: SharedFeedQueue = Arc::new(FeedQueue::new(
            playback_config.queue_capacity,
            playback_config.block_length,
        ));

        let scheduler = PlaybackScheduler::new(device, queue.clone(), status.clone(), &playback_config)?;
        let stall_check = playback_config.block_duration() * playback_config.slot_count as u32;
        let playback = PlaybackDriver::spawn(scheduler, completions, stall_check.max(Duration::from_millis(10)))?;

        let feed = FeedClient::spawn(config.feed.clone(), queue.clone())?;

        tracing::info!(
            "Session started: {} Hz, {} samples/block ({:.1} ms), {} slots, feed {}",
            playback_config.sample_rate,
            playback_config.block_length,
            playback_config.block_duration().as_secs_f64() * 1000.0,
            playback_config.slot_count,
            config.feed.url
        );

        let handle = SessionHandle {
            status,
            queue,
            playback: playback.stats(),
            feed: feed.stats(),
            config: playback_config,
            started_at: Utc::now(),
        };

        Ok(Self {
            handle,
            feed,
            playback,
        })
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> SessionState {
        self.handle.state()
    }

    /// Handle the user's start/stop toggle
    pub fn toggle(&self) -> SessionState {
        self.handle.toggle()
    }

    pub fn report(&self) -> StatusReport {
        self.handle.report()
    }

    /// Stop the feed, cancel armed slots and end the session
    pub async fn shutdown(self) {
        let Self {
            handle,
            feed,
            mut playback,
        } = self;

        feed.shutdown().await;
        playback.terminate();
        tracing::info!(
            "Session ended after {} slots",
            handle.playback.snapshot().slots_armed
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_toggle() {
        let status = SessionStatus::new(SessionState::Running);
        assert!(status.is_running());
        assert_eq!(status.toggle(), SessionState::Stopped);
        assert_eq!(status.state(), SessionState::Stopped);
        assert_eq!(status.toggle(), SessionState::Running);
    }

    #[test]
    fn test_status_set_returns_previous() {
        let status = SessionStatus::new(SessionState::Stopped);
        assert_eq!(status.set(SessionState::Running), SessionState::Stopped);
        assert_eq!(status.set(SessionState::Running), SessionState::Running);
        assert!(status.is_running());
    }

    #[test]
    fn test_state_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&SessionState::Running).unwrap(), "\"running\"");
    }
}
