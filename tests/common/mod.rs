//! Shared helpers for integration tests

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// JSON text frame of `len` samples all equal to `value`
pub fn frame(value: f32, len: usize) -> Message {
    let samples = vec![value; len];
    Message::Text(serde_json::to_string(&samples).unwrap())
}

/// Accept one websocket connection per entry of `sessions`, send its frames,
/// and close it. The last connection is held open until the peer leaves.
pub async fn serve_sessions(listener: TcpListener, sessions: Vec<Vec<Message>>) {
    let count = sessions.len();
    for (i, frames) in sessions.into_iter().enumerate() {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        for frame in frames {
            ws.send(frame).await.unwrap();
        }

        if i + 1 < count {
            let _ = ws.close(None).await;
            // Drain until the client acknowledges the close
            while let Some(Ok(_)) = ws.next().await {}
        } else {
            while let Some(Ok(_)) = ws.next().await {}
        }
    }
}

/// Poll `condition` until it holds or five seconds pass
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}
