//! # Gapless Stream Player
//!
//! Plays a live feed of fixed-size mono sample blocks through an audio
//! output without gaps, clicks or overlaps, riding out feed underruns and
//! disconnects.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                           FEED SERVER                                │
//! │        websocket, one block per message: [s0, s1, ... sN-1]          │
//! └──────────────────────────────────┬───────────────────────────────────┘
//!                                    │ ws://127.0.0.1:9110
//!                                    ▼
//! ┌──────────────────────────────────┼───────────────────────────────────┐
//! │                              RECEIVER                                │
//! │  ┌────────────────────────────────────────────────────────────────┐  │
//! │  │  Feed Client (network::feed)  - tokio task, reconnects         │  │
//! │  └───────────────────────────────┬────────────────────────────────┘  │
//! │                                  │ push (validated, never blocks)    │
//! │                                  ▼                                   │
//! │  ┌────────────────────────────────────────────────────────────────┐  │
//! │  │  Feed Queue (audio::queue)   - lock-free, bounded, drop-oldest │  │
//! │  └───────────────────────────────┬────────────────────────────────┘  │
//! │                                  │ pop-or-silence                    │
//! │                                  ▼                                   │
//! │  ┌────────────────────────────────────────────────────────────────┐  │
//! │  │  Playback Scheduler (playback) - one thread, completion driven │  │
//! │  │     slot k  : [start(k), start(k) + block)                     │  │
//! │  │     slot k+1: [start(k) + block, start(k) + 2*block)   ...     │  │
//! │  └───────────────┬───────────────────────────────▲────────────────┘  │
//! │          schedule│                               │completion         │
//! │                  ▼                               │                   │
//! │  ┌────────────────────────────────────────────────────────────────┐  │
//! │  │  Output Device (audio::device / audio::simulated)              │  │
//! │  └────────────────────────────────────────────────────────────────┘  │
//! │                                                                      │
//! │  Session Controller (session) - Running/Stopped, owns feed + chain   │
//! │  Web UI (ui)                  - status and start/stop over HTTP      │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod network;
pub mod playback;
pub mod protocol;
pub mod session;
pub mod ui;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default feed sample rate
    pub const DEFAULT_SAMPLE_RATE: u32 = 32_000;

    /// Default samples per block
    pub const DEFAULT_BLOCK_LENGTH: usize = 1024;

    /// Default number of slots armed ahead of playback
    pub const DEFAULT_SLOT_COUNT: usize = 2;

    /// Feeds are mono
    pub const DEFAULT_CHANNELS: u16 = 1;

    /// Default feed queue capacity in blocks (~8 s at the defaults)
    pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

    /// Default feed address
    pub const DEFAULT_FEED_URL: &str = "ws://127.0.0.1:9110";

    /// Default HTTP control port
    pub const DEFAULT_HTTP_PORT: u16 = 8080;
}
