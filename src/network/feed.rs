//! Websocket feed client
//!
//! Connects to the sample feed, validates every incoming block into the
//! feed queue, and reconnects whenever the connection drops. The first
//! attempt after a disconnect is immediate; consecutive failed attempts back
//! off exponentially up to the configured ceiling.

use futures_util::StreamExt;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::http::Uri;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::audio::queue::SharedFeedQueue;
use crate::config::FeedConfig;
use crate::error::NetworkError;
use crate::protocol;

/// Feed connection counters
#[derive(Debug, Default)]
pub struct FeedStats {
    connected: AtomicBool,
    connections: AtomicU64,
    disconnects: AtomicU64,
    connect_failures: AtomicU64,
    frames_received: AtomicU64,
    frames_rejected: AtomicU64,
}

impl FeedStats {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        FeedSnapshot {
            connected: self.is_connected(),
            connections: self.connections.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_rejected: self.frames_rejected.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`FeedStats`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedSnapshot {
    pub connected: bool,
    pub connections: u64,
    pub disconnects: u64,
    pub connect_failures: u64,
    pub frames_received: u64,
    pub frames_rejected: u64,
}

/// Delay schedule for consecutive failed connection attempts
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl ReconnectBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: Duration::ZERO,
        }
    }

    /// Delay to wait after a failed attempt
    pub fn next_delay(&mut self) -> Duration {
        self.current = (self.current * 2).max(self.initial).min(self.max);
        self.current
    }

    /// Called after a successful connection
    pub fn reset(&mut self) {
        self.current = Duration::ZERO;
    }
}

/// Handle to the background feed task
pub struct FeedClient {
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
    stats: Arc<FeedStats>,
}

impl FeedClient {
    /// Start receiving into `queue`. Must be called inside a tokio runtime.
    pub fn spawn(config: FeedConfig, queue: SharedFeedQueue) -> Result<Self, NetworkError> {
        validate_url(&config.url)?;

        let stats = Arc::new(FeedStats::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_feed(config, queue, stats.clone(), shutdown_rx));

        Ok(Self {
            shutdown_tx,
            task: Some(task),
            stats,
        })
    }

    pub fn stats(&self) -> Arc<FeedStats> {
        self.stats.clone()
    }

    /// Close the connection and stop reconnecting
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for FeedClient {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Accept only `ws://` and `wss://` URLs with a host
pub fn validate_url(url: &str) -> Result<(), NetworkError> {
    let uri: Uri = url
        .parse()
        .map_err(|e: tokio_tungstenite::tungstenite::http::uri::InvalidUri| {
            NetworkError::InvalidUrl(format!("{}: {}", url, e))
        })?;

    match (uri.scheme_str(), uri.host()) {
        (Some("ws") | Some("wss"), Some(_)) => Ok(()),
        _ => Err(NetworkError::InvalidUrl(url.to_string())),
    }
}

async fn run_feed(
    config: FeedConfig,
    queue: SharedFeedQueue,
    stats: Arc<FeedStats>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut backoff = ReconnectBackoff::new(
        Duration::from_millis(config.reconnect_initial_delay_ms),
        Duration::from_millis(config.reconnect_max_delay_ms),
    );

    loop {
        let connect = tokio::select! {
            result = tokio_tungstenite::connect_async(config.url.as_str()) => result,
            _ = shutdown_rx.changed() => return,
        };

        match connect {
            Ok((mut ws, _response)) => {
                backoff.reset();
                stats.connected.store(true, Ordering::Relaxed);
                stats.connections.fetch_add(1, Ordering::Relaxed);
                info!("Feed connected to {}", config.url);

                let reason = loop {
                    let next = tokio::select! {
                        next = ws.next() => next,
                        _ = shutdown_rx.changed() => {
                            stats.connected.store(false, Ordering::Relaxed);
                            return;
                        }
                    };

                    match next {
                        Some(Ok(Message::Close(frame))) => {
                            break format!("closed by peer ({:?})", frame);
                        }
                        Some(Ok(message)) => handle_message(message, &queue, &stats),
                        Some(Err(e)) => break e.to_string(),
                        None => break "stream ended".to_string(),
                    }
                };

                stats.connected.store(false, Ordering::Relaxed);
                stats.disconnects.fetch_add(1, Ordering::Relaxed);
                warn!("Feed disconnected: {}; reconnecting", reason);
            }
            Err(e) => {
                stats.connect_failures.fetch_add(1, Ordering::Relaxed);
                let delay = backoff.next_delay();
                debug!("Feed connect to {} failed: {}; retry in {:?}", config.url, e, delay);

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown_rx.changed() => return,
                }
            }
        }
    }
}

fn handle_message(message: Message, queue: &SharedFeedQueue, stats: &FeedStats) {
    let decoded = match message {
        Message::Text(text) => protocol::decode_text(&text),
        Message::Binary(data) => protocol::decode_binary(&data),
        // Ping/Pong replies are handled by tungstenite
        _ => return,
    };

    stats.frames_received.fetch_add(1, Ordering::Relaxed);

    let result = match decoded {
        Ok(samples) => queue.push_samples(samples).map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };

    if let Err(e) = result {
        stats.frames_rejected.fetch_add(1, Ordering::Relaxed);
        warn!("Rejected feed frame: {}", e);
    }
}
