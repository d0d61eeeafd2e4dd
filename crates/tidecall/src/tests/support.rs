//! Shared fixtures: a scripted media source, a discarding sink, and a real
//! answering peer built straight on the `webrtc` crate.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MediaEngine};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

use crate::media::{
    CaptureCapability, LocalMedia, MediaError, MediaSource, RemoteMediaSink, StreamConstraints,
};
use crate::transport::TransportEvent;

pub(crate) fn cap(width: u32, height: u32, frame_rate: u32) -> CaptureCapability {
    CaptureCapability {
        width,
        height,
        frame_rate,
    }
}

pub(crate) struct ScriptedMedia {
    capabilities: Vec<CaptureCapability>,
    deny: bool,
    pub(crate) requested_format: Mutex<Option<CaptureCapability>>,
}

impl ScriptedMedia {
    pub(crate) fn granting(capabilities: Vec<CaptureCapability>) -> Arc<Self> {
        Arc::new(Self {
            capabilities,
            deny: false,
            requested_format: Mutex::new(None),
        })
    }

    pub(crate) fn denying() -> Arc<Self> {
        Arc::new(Self {
            capabilities: Vec::new(),
            deny: true,
            requested_format: Mutex::new(None),
        })
    }
}

#[async_trait]
impl MediaSource for ScriptedMedia {
    async fn enumerate_capabilities(&self) -> Result<Vec<CaptureCapability>, MediaError> {
        if self.deny {
            return Err(MediaError::AccessDenied);
        }
        Ok(self.capabilities.clone())
    }

    async fn acquire_stream(
        &self,
        _constraints: StreamConstraints,
        format: Option<CaptureCapability>,
    ) -> Result<LocalMedia, MediaError> {
        if self.deny {
            return Err(MediaError::AccessDenied);
        }
        *self.requested_format.lock() = format;
        Ok(LocalMedia {
            tracks: vec![audio_test_track()],
        })
    }
}

pub(crate) fn audio_test_track() -> Arc<dyn TrackLocal + Send + Sync> {
    Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            ..Default::default()
        },
        "audio".to_owned(),
        "tidecall-test".to_owned(),
    ))
}

pub(crate) struct NullSink;

#[async_trait]
impl RemoteMediaSink for NullSink {
    async fn on_remote_track(&self, _track: Arc<TrackRemote>) {}
}

pub(crate) async fn next_event(
    events: &mut mpsc::UnboundedReceiver<TransportEvent>,
) -> TransportEvent {
    tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("timed out waiting for transport event")
        .expect("transport event stream ended")
}

/// A real answering peer: applies the offer, produces an answer, and hands
/// out the candidates it gathers.
pub(crate) struct Responder {
    // Held so the answering side keeps gathering candidates for as long as
    // the test needs them.
    pub(crate) _peer_connection: Arc<RTCPeerConnection>,
    pub(crate) candidates: mpsc::UnboundedReceiver<RTCIceCandidateInit>,
    pub(crate) answer_sdp: String,
}

impl Responder {
    pub(crate) async fn answer(offer_sdp: String) -> Responder {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().expect("codecs");
        let registry = register_default_interceptors(Registry::default(), &mut media_engine)
            .expect("interceptors");
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();
        let peer_connection = Arc::new(
            api.new_peer_connection(RTCConfiguration::default())
                .await
                .expect("peer connection"),
        );

        let (candidates_tx, candidates) = mpsc::unbounded_channel();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let candidates_tx = candidates_tx.clone();
            Box::pin(async move {
                if let Some(candidate) = candidate {
                    if let Ok(init) = candidate.to_json() {
                        let _ = candidates_tx.send(init);
                    }
                }
            })
        }));

        let offer = RTCSessionDescription::offer(offer_sdp).expect("offer description");
        peer_connection
            .set_remote_description(offer)
            .await
            .expect("remote description");
        let answer = peer_connection.create_answer(None).await.expect("answer");
        let answer_sdp = answer.sdp.clone();
        peer_connection
            .set_local_description(answer)
            .await
            .expect("local description");

        Responder {
            _peer_connection: peer_connection,
            candidates,
            answer_sdp,
        }
    }
}
