//! Playback thread
//!
//! Owns the scheduler and feeds it the device's completion events. The
//! device side only ever does a non-blocking send, so a slow scheduler can
//! never stall the audio callback.

use crossbeam_channel::{bounded, select, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::output::{Completion, OutputDevice};
use crate::error::AudioError;
use crate::playback::scheduler::PlaybackScheduler;
use crate::playback::stats::PlaybackStats;

enum DriverCommand {
    Terminate,
}

/// Handle to the running playback thread. Terminates playback on drop.
pub struct PlaybackDriver {
    control_tx: Sender<DriverCommand>,
    handle: Option<JoinHandle<()>>,
    stats: Arc<PlaybackStats>,
}

impl PlaybackDriver {
    /// Prime `scheduler` and run it on a dedicated thread.
    ///
    /// `stall_check` bounds how long a chain with nothing armed waits before
    /// it is restarted; a healthy chain never hits it.
    pub fn spawn<D>(
        mut scheduler: PlaybackScheduler<D>,
        completions: Receiver<Completion>,
        stall_check: Duration,
    ) -> Result<Self, AudioError>
    where
        D: OutputDevice + 'static,
    {
        let (control_tx, control_rx) = bounded::<DriverCommand>(1);
        let stats = scheduler.stats();

        let handle = thread::Builder::new()
            .name("playback-scheduler".to_string())
            .spawn(move || {
                scheduler.prime();

                loop {
                    select! {
                        recv(completions) -> msg => match msg {
                            Ok(completion) => {
                                scheduler.on_completion(completion);
                                if scheduler.is_stalled() {
                                    scheduler.recover();
                                }
                            }
                            Err(_) => {
                                tracing::warn!("Output device closed its completion stream");
                                break;
                            }
                        },
                        recv(control_rx) -> cmd => match cmd {
                            Ok(DriverCommand::Terminate) | Err(_) => break,
                        },
                        default(stall_check) => {
                            if scheduler.is_stalled() {
                                scheduler.recover();
                            }
                        }
                    }
                }

                scheduler.terminate();
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        Ok(Self {
            control_tx,
            handle: Some(handle),
            stats,
        })
    }

    pub fn stats(&self) -> Arc<PlaybackStats> {
        self.stats.clone()
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Cancel armed slots and join the thread
    pub fn terminate(&mut self) {
        let _ = self.control_tx.try_send(DriverCommand::Terminate);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Playback thread panicked");
            }
        }
    }
}

impl Drop for PlaybackDriver {
    fn drop(&mut self) {
        self.terminate();
    }
}
