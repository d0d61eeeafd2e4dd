//! Caller-owned session context.
//!
//! A [`Session`] wires one signaling transport to one negotiation engine
//! and spawns the single event loop both feed into. There is no shared
//! state across sessions and no built-in retry: when a session fails, the
//! caller builds a new one.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

use crate::config::{ConfigError, RtcSettings, SessionConfig};
use crate::media::{MediaSource, RemoteMediaSink, StreamConstraints};
use crate::negotiation::{EngineEvent, EngineState, NegotiationEngine};
use crate::transport::{ConnectError, SignalingTransport, TransportEvent};
use crate::transport::websocket::WebSocketTransport;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error("transport event stream already taken")]
    EventStreamTaken,
}

pub struct Session {
    id: Uuid,
    pub(crate) events_tx: mpsc::UnboundedSender<EngineEvent>,
    state_rx: watch::Receiver<EngineState>,
    engine_task: JoinHandle<()>,
    pump_task: JoinHandle<()>,
}

impl Session {
    /// Connect the signaling websocket and start negotiating a call.
    ///
    /// Returns once the transport is open; negotiation progress is
    /// observable through [`Session::state`] and [`Session::wait_for`].
    pub async fn connect(
        config: SessionConfig,
        media: Arc<dyn MediaSource>,
        sink: Arc<dyn RemoteMediaSink>,
    ) -> Result<Self, SessionError> {
        let transport = WebSocketTransport::connect(&config.signaling).await?;
        Self::attach(
            Arc::new(transport),
            config.rtc,
            config.constraints,
            media,
            sink,
        )
    }

    /// Start a session over an already-open transport, e.g. one end of
    /// [`crate::transport::pair::pair`].
    pub fn attach(
        transport: Arc<dyn SignalingTransport>,
        rtc: RtcSettings,
        constraints: StreamConstraints,
        media: Arc<dyn MediaSource>,
        sink: Arc<dyn RemoteMediaSink>,
    ) -> Result<Self, SessionError> {
        let Some(mut transport_events) = transport.take_events() else {
            return Err(SessionError::EventStreamTaken);
        };
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(EngineState::Idle);
        let id = Uuid::new_v4();

        let pump_tx = events_tx.clone();
        let pump_task = tokio::spawn(async move {
            while let Some(event) = transport_events.recv().await {
                let terminal = matches!(event, TransportEvent::Closed { .. });
                if pump_tx.send(EngineEvent::Transport(event)).is_err() {
                    break;
                }
                if terminal {
                    break;
                }
            }
        });

        let engine = NegotiationEngine::new(
            id,
            transport,
            media,
            sink,
            rtc,
            constraints,
            events_tx.clone(),
            state_tx,
        );
        let engine_task = tokio::spawn(engine.run(events_rx));
        info!(target = "session", session = %id, "session started");

        Ok(Self {
            id,
            events_tx,
            state_rx,
            engine_task,
            pump_task,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    /// Watch every state change; useful for callers driving UI from the
    /// session lifecycle.
    pub fn state_changes(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    /// Wait until the engine reaches `target`, passes it, or lands in a
    /// terminal state. Returns the state that satisfied the wait.
    pub async fn wait_for(&self, target: EngineState) -> EngineState {
        let mut rx = self.state_rx.clone();
        loop {
            let current = *rx.borrow_and_update();
            if reached(current, target) || terminal(current) {
                return current;
            }
            if rx.changed().await.is_err() {
                return *rx.borrow();
            }
        }
    }

    /// Graceful teardown: close the signaling channel (1000, Normal
    /// Shutdown) and discard the peer connection. Idempotent; resolves once
    /// the engine reaches a terminal state.
    pub async fn close(&self) {
        if self.events_tx.send(EngineEvent::Shutdown).is_err() {
            return;
        }
        let mut rx = self.state_rx.clone();
        loop {
            if terminal(*rx.borrow_and_update()) {
                break;
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.engine_task.abort();
        self.pump_task.abort();
    }
}

fn terminal(state: EngineState) -> bool {
    matches!(state, EngineState::Failed | EngineState::Closed)
}

// A watch channel only holds the latest value, so a waiter may observe a
// state past its target; count that as reached.
fn reached(current: EngineState, target: EngineState) -> bool {
    use EngineState::*;
    if current == target {
        return true;
    }
    match target {
        Idle => true,
        AwaitingMedia => matches!(current, OfferSent | Connected),
        OfferSent => matches!(current, Connected),
        _ => false,
    }
}
