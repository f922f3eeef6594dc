//! Network subsystem for the websocket sample feed

pub mod feed;

pub use feed::{FeedClient, FeedStats, ReconnectBackoff};
