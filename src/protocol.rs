//! Feed wire format and control API types
//!
//! The feed sends one block per websocket message, either as a JSON array of
//! numbers (text frame) or as packed little-endian `f32` samples (binary
//! frame). Length validation happens in the feed queue, not here.

use bytes::Buf;
use serde::{Deserialize, Serialize};

use crate::audio::queue::QueueStats;
use crate::error::ProtocolError;
use crate::network::feed::FeedSnapshot;
use crate::playback::stats::PlaybackSnapshot;
use crate::session::SessionState;

/// Decode a text frame: `[0.0, 0.25, -0.5, ...]`
pub fn decode_text(text: &str) -> Result<Vec<f32>, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

/// Decode a binary frame of packed little-endian `f32`
pub fn decode_binary(mut data: &[u8]) -> Result<Vec<f32>, ProtocolError> {
    if data.len() % 4 != 0 {
        return Err(ProtocolError::BinaryLength(data.len()));
    }

    let mut samples = Vec::with_capacity(data.len() / 4);
    while data.has_remaining() {
        samples.push(data.get_f32_le());
    }
    Ok(samples)
}

/// Encode samples as a binary frame
pub fn encode_binary(samples: &[f32]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Full receiver status, served by `GET /api/status`
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub status: SessionState,
    pub sample_rate: u32,
    pub block_length: usize,
    pub slot_count: usize,
    pub block_duration_ms: f64,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub uptime_seconds: u64,
    pub playback: PlaybackSnapshot,
    pub queue: QueueStats,
    pub feed: FeedSnapshot,
}

/// Body of `POST /api/status`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetStatusRequest {
    pub status: SessionState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_text_frame() {
        let samples = decode_text("[0.0, 0.5, -0.25, 1]").unwrap();
        assert_eq!(samples, vec![0.0, 0.5, -0.25, 1.0]);
    }

    #[test]
    fn test_decode_text_rejects_garbage() {
        assert!(matches!(decode_text("{\"a\": 1}"), Err(ProtocolError::Json(_))));
        assert!(decode_text("[0.1, \"x\"]").is_err());
    }

    #[test]
    fn test_binary_frame() {
        let samples = vec![0.125, -0.5, 0.75];
        let encoded = encode_binary(&samples);
        assert_eq!(encoded.len(), 12);
        assert_eq!(decode_binary(&encoded).unwrap(), samples);
    }

    #[test]
    fn test_binary_frame_rejects_partial_sample() {
        assert!(matches!(
            decode_binary(&[0, 0, 0, 0, 1]),
            Err(ProtocolError::BinaryLength(5))
        ));
    }

    #[test]
    fn test_set_status_request_json() {
        let req: SetStatusRequest = serde_json::from_str(r#"{"status":"stopped"}"#).unwrap();
        assert_eq!(req.status, SessionState::Stopped);
    }
}
