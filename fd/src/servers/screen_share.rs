//! Screen share server
//!
//! Pushes periodic JPEG frames to clients as a `multipart/x-mixed-replace`
//! stream. The capture backend is an external collaborator behind
//! [`FrameSource`]; the daemon ships a synthetic test-pattern source for
//! tests and demos.

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

/// Multipart boundary between frames.
const BOUNDARY: &str = "flowdaemon-frame";

/// Screen share parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScreenShareConfig {
    /// Frames per second.
    pub fps: u32,
    /// JPEG quality, 1-100.
    pub quality: u8,
    /// Capture scale factor, 0-1.
    pub scale: f64,
}

impl Default for ScreenShareConfig {
    fn default() -> Self {
        Self {
            fps: 10,
            quality: 60,
            scale: 0.75,
        }
    }
}

/// Provider of encoded JPEG frames. The OS capture implementation lives
/// outside the core; anything that can produce JPEG bytes plugs in here.
pub trait FrameSource: Send + Sync {
    fn capture_jpeg(&self, scale: f64, quality: u8) -> Result<Vec<u8>, String>;
}

/// Fixed 1x1 JPEG, enough for wire-level tests without a capture backend.
pub struct TestPatternSource;

impl FrameSource for TestPatternSource {
    fn capture_jpeg(&self, _scale: f64, _quality: u8) -> Result<Vec<u8>, String> {
        const MINIMAL_JPEG: &[u8] = &[
            0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00, 0x01, 0x01, 0x00, 0x00, 0x01, 0x00,
            0x01, 0x00, 0x00, 0xFF, 0xD9,
        ];
        Ok(MINIMAL_JPEG.to_vec())
    }
}

/// Rough bandwidth estimate for the configured parameters, shown to the
/// operator when the share starts.
pub fn estimate_bandwidth(fps: u32, quality: u8, scale: f64) -> String {
    // 1080p baseline: ~200KB per frame at quality 100, shrinking with
    // quality and the square of the scale.
    let frame_kb = 200.0 * (quality as f64 / 100.0) * scale * scale;
    let kb_per_sec = frame_kb * fps as f64;
    if kb_per_sec >= 1024.0 {
        format!("~{:.1} MB/s", kb_per_sec / 1024.0)
    } else {
        format!("~{kb_per_sec:.0} KB/s")
    }
}

struct ShareState {
    config: ScreenShareConfig,
    source: Arc<dyn FrameSource>,
}

/// Build the screen share router.
pub fn screen_share_router(config: ScreenShareConfig, source: Arc<dyn FrameSource>) -> Router {
    let state = Arc::new(ShareState { config, source });
    Router::new()
        .route("/", get(share_info))
        .route("/frame", get(single_frame))
        .route("/stream", get(stream_frames))
        .with_state(state)
}

async fn share_info(State(state): State<Arc<ShareState>>) -> impl IntoResponse {
    Json(json!({
        "fps": state.config.fps,
        "quality": state.config.quality,
        "scale": state.config.scale,
        "bandwidth": estimate_bandwidth(state.config.fps, state.config.quality, state.config.scale),
    }))
}

async fn single_frame(State(state): State<Arc<ShareState>>) -> Result<Response, StatusCode> {
    let frame = state
        .source
        .capture_jpeg(state.config.scale, state.config.quality)
        .map_err(|e| {
            warn!(error = %e, "screen share: capture failed");
            StatusCode::SERVICE_UNAVAILABLE
        })?;
    Ok(([(header::CONTENT_TYPE, "image/jpeg")], frame).into_response())
}

async fn stream_frames(State(state): State<Arc<ShareState>>) -> Response {
    let interval = Duration::from_secs_f64(1.0 / state.config.fps.max(1) as f64);

    let stream = futures::stream::unfold(state, move |state| async move {
        tokio::time::sleep(interval).await;
        let part = match state.source.capture_jpeg(state.config.scale, state.config.quality) {
            Ok(frame) => {
                let mut part = Vec::with_capacity(frame.len() + 128);
                part.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
                part.extend_from_slice(b"Content-Type: image/jpeg\r\n");
                part.extend_from_slice(format!("Content-Length: {}\r\n\r\n", frame.len()).as_bytes());
                part.extend_from_slice(&frame);
                part.extend_from_slice(b"\r\n");
                part
            }
            Err(e) => {
                warn!(error = %e, "screen share: capture failed, ending stream");
                return None;
            }
        };
        Some((Ok::<Bytes, std::convert::Infallible>(Bytes::from(part)), state))
    });

    Response::builder()
        .header(
            header::CONTENT_TYPE,
            format!("multipart/x-mixed-replace; boundary={BOUNDARY}"),
        )
        .body(Body::from_stream(stream))
        .expect("valid response")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bandwidth_estimate_scales() {
        let low = estimate_bandwidth(5, 30, 0.5);
        let high = estimate_bandwidth(30, 90, 1.0);
        assert!(low.ends_with("KB/s"));
        assert!(high.ends_with("MB/s"));
    }

    #[test]
    fn test_test_pattern_is_jpeg_shaped() {
        let frame = TestPatternSource.capture_jpeg(1.0, 80).unwrap();
        assert_eq!(&frame[..2], &[0xFF, 0xD8]);
        assert_eq!(&frame[frame.len() - 2..], &[0xFF, 0xD9]);
    }

    #[tokio::test]
    async fn test_single_frame_endpoint() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let router = screen_share_router(ScreenShareConfig::default(), Arc::new(TestPatternSource));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /frame HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        let text = String::from_utf8_lossy(&response);
        assert!(text.contains("200"));
        assert!(text.contains("image/jpeg"));

        server.abort();
    }
}
