//! Peer-connection negotiation engine.
//!
//! One engine drives one call attempt as the offering side. Every input
//! (decoded coordinator frames, locally gathered ICE candidates, transport
//! closure, shutdown) funnels through a single event loop, so state
//! transitions never interleave. The engine holds the transport only by
//! reference and closes it exclusively through its `close` contract.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::config::RtcSettings;
use crate::media::{MediaSource, RemoteMediaSink, StreamConstraints, select_capture_format};
use crate::protocol::{self, SignalingMessage};
use crate::transport::{
    FAILURE_CLOSE_CODE, NORMAL_CLOSE_CODE, NORMAL_CLOSE_REASON, SendError, SignalingTransport,
    TransportEvent,
};

/// Session lifecycle as observed by the caller. `Failed` and `Closed` are
/// terminal; a caller wanting another attempt builds a fresh session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    AwaitingMedia,
    OfferSent,
    Connected,
    Failed,
    Closed,
}

#[derive(Debug)]
pub(crate) enum EngineEvent {
    Transport(TransportEvent),
    LocalCandidate(RTCIceCandidateInit),
    Shutdown,
}

#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error(transparent)]
    Media(#[from] crate::media::MediaError),
    #[error("peer connection failure: {0}")]
    PeerConnection(#[from] webrtc::Error),
    #[error("signaling codec failure: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("offer could not be sent: {0}")]
    OfferSend(#[from] SendError),
}

pub(crate) struct NegotiationEngine {
    session_id: Uuid,
    transport: Arc<dyn SignalingTransport>,
    media: Arc<dyn MediaSource>,
    sink: Arc<dyn RemoteMediaSink>,
    rtc: RtcSettings,
    constraints: StreamConstraints,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
    state_tx: watch::Sender<EngineState>,
    peer_connection: Option<Arc<RTCPeerConnection>>,
    remote_described: bool,
    // Remote candidates that arrived ahead of the answer, in arrival order.
    pending_remote_candidates: Vec<RTCIceCandidateInit>,
}

impl NegotiationEngine {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        session_id: Uuid,
        transport: Arc<dyn SignalingTransport>,
        media: Arc<dyn MediaSource>,
        sink: Arc<dyn RemoteMediaSink>,
        rtc: RtcSettings,
        constraints: StreamConstraints,
        events_tx: mpsc::UnboundedSender<EngineEvent>,
        state_tx: watch::Sender<EngineState>,
    ) -> Self {
        Self {
            session_id,
            transport,
            media,
            sink,
            rtc,
            constraints,
            events_tx,
            state_tx,
            peer_connection: None,
            remote_described: false,
            pending_remote_candidates: Vec::new(),
        }
    }

    pub(crate) async fn run(mut self, mut events: mpsc::UnboundedReceiver<EngineEvent>) {
        if let Err(err) = self.establish().await {
            warn!(
                target = "negotiation",
                session = %self.session_id,
                error = %err,
                "session setup failed"
            );
            self.fail().await;
            return;
        }

        while let Some(event) = events.recv().await {
            match event {
                EngineEvent::Transport(TransportEvent::Frame(text)) => {
                    match protocol::decode(&text) {
                        Ok(message) => {
                            if let Err(err) = self.apply_remote(message).await {
                                warn!(
                                    target = "negotiation",
                                    session = %self.session_id,
                                    error = %err,
                                    "remote message could not be applied"
                                );
                                self.fail().await;
                                break;
                            }
                        }
                        Err(err) => {
                            debug!(
                                target = "negotiation",
                                session = %self.session_id,
                                error = %err,
                                "dropping undecodable frame"
                            );
                        }
                    }
                }
                EngineEvent::Transport(TransportEvent::Closed {
                    code,
                    reason,
                    graceful,
                }) => {
                    if self.state() == EngineState::Closed {
                        break;
                    }
                    warn!(
                        target = "negotiation",
                        session = %self.session_id,
                        ?code,
                        reason = %reason,
                        graceful,
                        "signaling transport lost"
                    );
                    self.fail().await;
                    break;
                }
                EngineEvent::LocalCandidate(candidate) => {
                    self.forward_local_candidate(candidate).await;
                }
                EngineEvent::Shutdown => {
                    self.teardown().await;
                    break;
                }
            }
        }
    }

    /// Transitions 1 and 2: acquire media, stand up the peer connection,
    /// and put the offer on the wire.
    async fn establish(&mut self) -> Result<(), NegotiationError> {
        self.set_state(EngineState::AwaitingMedia);

        let capabilities = self.media.enumerate_capabilities().await?;
        let format = select_capture_format(&capabilities);
        if let Some(format) = format {
            debug!(
                target = "negotiation",
                session = %self.session_id,
                width = format.width,
                height = format.height,
                frame_rate = format.frame_rate,
                "capture format selected"
            );
        }
        let local = self.media.acquire_stream(self.constraints, format).await?;

        let peer_connection = self.build_peer_connection().await?;
        for track in local.tracks {
            peer_connection.add_track(track).await?;
        }

        let offer = peer_connection.create_offer(None).await?;
        let sdp = offer.sdp.clone();
        peer_connection.set_local_description(offer).await?;
        self.peer_connection = Some(peer_connection);

        let frame = protocol::encode(&SignalingMessage::Offer { sdp })?;
        self.transport.send_text(&frame).await?;
        self.set_state(EngineState::OfferSent);
        info!(target = "negotiation", session = %self.session_id, "offer sent");
        Ok(())
    }

    async fn build_peer_connection(&self) -> Result<Arc<RTCPeerConnection>, NegotiationError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::default(), &mut media_engine)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: self.rtc.ice_servers.clone(),
            bundle_policy: self.rtc.bundle_policy.clone(),
            ice_transport_policy: self.rtc.ice_transport_policy.clone(),
            ..Default::default()
        };
        let peer_connection = Arc::new(api.new_peer_connection(config).await?);

        let events = self.events_tx.clone();
        let session_id = self.session_id;
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let events = events.clone();
            Box::pin(async move {
                // None marks the end of gathering and is not a candidate.
                let Some(candidate) = candidate else { return };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = events.send(EngineEvent::LocalCandidate(init));
                    }
                    Err(err) => warn!(
                        target = "negotiation",
                        session = %session_id,
                        error = %err,
                        "local candidate could not be serialized"
                    ),
                }
            })
        }));

        let sink = Arc::clone(&self.sink);
        let session_id = self.session_id;
        peer_connection.on_track(Box::new(move |track, _receiver, _transceiver| {
            let sink = Arc::clone(&sink);
            Box::pin(async move {
                debug!(
                    target = "negotiation",
                    session = %session_id,
                    kind = ?track.kind(),
                    "remote track received"
                );
                sink.on_remote_track(track).await;
            })
        }));

        let session_id = self.session_id;
        peer_connection.on_peer_connection_state_change(Box::new(
            move |state: RTCPeerConnectionState| {
                Box::pin(async move {
                    debug!(
                        target = "negotiation",
                        session = %session_id,
                        ?state,
                        "peer connection state changed"
                    );
                })
            },
        ));

        Ok(peer_connection)
    }

    async fn apply_remote(&mut self, message: SignalingMessage) -> Result<(), NegotiationError> {
        match message {
            SignalingMessage::Answer { sdp } => {
                if self.remote_described {
                    warn!(
                        target = "negotiation",
                        session = %self.session_id,
                        state = ?self.state(),
                        "duplicate answer ignored"
                    );
                    return Ok(());
                }
                let Some(peer_connection) = self.peer_connection.clone() else {
                    debug!(
                        target = "negotiation",
                        session = %self.session_id,
                        "answer before offer dropped"
                    );
                    return Ok(());
                };
                let answer = RTCSessionDescription::answer(sdp)?;
                peer_connection.set_remote_description(answer).await?;
                self.remote_described = true;
                for candidate in std::mem::take(&mut self.pending_remote_candidates) {
                    peer_connection.add_ice_candidate(candidate).await?;
                }
                self.set_state(EngineState::Connected);
                info!(
                    target = "negotiation",
                    session = %self.session_id,
                    "remote description applied; session connected"
                );
                Ok(())
            }
            SignalingMessage::IceCandidate {
                candidate,
                sdp_mid,
                sdp_mline_index,
            } => {
                let init = RTCIceCandidateInit {
                    candidate,
                    sdp_mid: Some(sdp_mid),
                    sdp_mline_index: Some(sdp_mline_index),
                    username_fragment: None,
                };
                match &self.peer_connection {
                    Some(peer_connection) if self.remote_described => {
                        peer_connection.add_ice_candidate(init).await?;
                        Ok(())
                    }
                    Some(_) => {
                        // The peer connection refuses candidates until a
                        // remote description exists; hold arrivals and flush
                        // them, still in order, once the answer lands.
                        debug!(
                            target = "negotiation",
                            session = %self.session_id,
                            pending = self.pending_remote_candidates.len() + 1,
                            "buffering remote candidate ahead of answer"
                        );
                        self.pending_remote_candidates.push(init);
                        Ok(())
                    }
                    None => {
                        debug!(
                            target = "negotiation",
                            session = %self.session_id,
                            "remote candidate before negotiation started; dropped"
                        );
                        Ok(())
                    }
                }
            }
            SignalingMessage::Offer { .. } => {
                debug!(
                    target = "negotiation",
                    session = %self.session_id,
                    "inbound offer dropped; this side always places the call"
                );
                Ok(())
            }
        }
    }

    /// Local candidates go out immediately, in emission order. A failed
    /// candidate send is not terminal on its own: the transport's closure
    /// event is the authoritative failure signal and follows right behind.
    async fn forward_local_candidate(&mut self, candidate: RTCIceCandidateInit) {
        let message = SignalingMessage::IceCandidate {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid.unwrap_or_default(),
            sdp_mline_index: candidate.sdp_mline_index.unwrap_or(0),
        };
        let frame = match protocol::encode(&message) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(
                    target = "negotiation",
                    session = %self.session_id,
                    error = %err,
                    "local candidate could not be encoded"
                );
                return;
            }
        };
        if let Err(err) = self.transport.send_text(&frame).await {
            warn!(
                target = "negotiation",
                session = %self.session_id,
                error = %err,
                "local candidate send failed"
            );
        }
    }

    async fn teardown(&mut self) {
        if matches!(self.state(), EngineState::Closed | EngineState::Failed) {
            return;
        }
        self.set_state(EngineState::Closed);
        self.transport
            .close(NORMAL_CLOSE_CODE, NORMAL_CLOSE_REASON)
            .await;
        self.discard_peer_connection().await;
        info!(target = "negotiation", session = %self.session_id, "session closed");
    }

    async fn fail(&mut self) {
        if matches!(self.state(), EngineState::Closed | EngineState::Failed) {
            return;
        }
        self.set_state(EngineState::Failed);
        self.transport
            .close(FAILURE_CLOSE_CODE, "session failed")
            .await;
        self.discard_peer_connection().await;
    }

    async fn discard_peer_connection(&mut self) {
        if let Some(peer_connection) = self.peer_connection.take() {
            if let Err(err) = peer_connection.close().await {
                debug!(
                    target = "negotiation",
                    session = %self.session_id,
                    error = %err,
                    "peer connection close reported an error"
                );
            }
        }
    }

    fn state(&self) -> EngineState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: EngineState) {
        let _ = self.state_tx.send(state);
    }
}
