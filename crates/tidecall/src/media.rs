//! Collaborator seam for media capture and rendering.
//!
//! The client never touches devices itself: a [`MediaSource`] supplies
//! capability enumeration and local tracks, and a [`RemoteMediaSink`]
//! accepts remote track handles as they arrive. Only the capture-format
//! selection policy lives here.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// One capture format a device can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureCapability {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for StreamConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

/// Local tracks ready to be attached to a peer connection.
pub struct LocalMedia {
    pub tracks: Vec<Arc<dyn TrackLocal + Send + Sync>>,
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("media capture access denied")]
    AccessDenied,
    #[error("no usable capture device")]
    NoDevice,
    #[error("media backend failure: {0}")]
    Backend(String),
}

#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn enumerate_capabilities(&self) -> Result<Vec<CaptureCapability>, MediaError>;

    /// Acquire a local stream honoring `constraints`, preferring `format`
    /// for video capture when one is given.
    async fn acquire_stream(
        &self,
        constraints: StreamConstraints,
        format: Option<CaptureCapability>,
    ) -> Result<LocalMedia, MediaError>;
}

/// Receives remote track handles; rendering is entirely the host
/// application's concern.
#[async_trait]
pub trait RemoteMediaSink: Send + Sync {
    async fn on_remote_track(&self, track: Arc<TrackRemote>);
}

/// Pick the capture format to request: smallest resolution wins, with equal
/// resolutions tie-broken by the lower frame rate. Earlier entries are kept
/// on a full tie, so the result is deterministic for any enumeration order.
pub fn select_capture_format(capabilities: &[CaptureCapability]) -> Option<CaptureCapability> {
    let mut candidates = capabilities.iter().copied();
    let mut best = candidates.next()?;
    for candidate in candidates {
        let smaller = candidate.width < best.width && candidate.height < best.height;
        let same_res_slower = candidate.width == best.width
            && candidate.height == best.height
            && candidate.frame_rate < best.frame_rate;
        if smaller || same_res_slower {
            best = candidate;
        }
    }
    Some(best)
}
