//! WebSocket-backed signaling transport.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{Connector, connect_async_tls_with_config};
use tracing::{debug, warn};

use super::{ConnectError, ConnectionStatus, SendError, SignalingTransport, TransportEvent};
use crate::config::{SignalingConfig, TrustPolicy};

enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

/// A connected signaling websocket. Owns the socket through its writer and
/// reader tasks; everything else holds it behind `Arc<dyn SignalingTransport>`.
pub struct WebSocketTransport {
    outbound: mpsc::UnboundedSender<Outbound>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    status: Arc<RwLock<ConnectionStatus>>,
    closed_emitted: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WebSocketTransport {
    /// Open a connection to the coordinator; resolves once the websocket
    /// handshake completes or fails. Secure endpoints require a concrete
    /// [`TrustPolicy`] and fail before any socket is opened otherwise.
    pub async fn connect(config: &SignalingConfig) -> Result<Self, ConnectError> {
        let connector = build_connector(config)?;
        let status = Arc::new(RwLock::new(ConnectionStatus::Connecting));

        let (ws_stream, _) =
            connect_async_tls_with_config(config.endpoint.as_str(), None, false, connector)
                .await
                .map_err(|err| ConnectError::Handshake(err.to_string()))?;
        *status.write() = ConnectionStatus::Open;
        debug!(target = "signaling", url = %config.endpoint, "signaling websocket connected");

        let (mut ws_write, mut ws_read) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();
        let (events_tx, events_rx) = mpsc::unbounded_channel::<TransportEvent>();
        let closed_emitted = Arc::new(AtomicBool::new(false));

        let writer = tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                match frame {
                    Outbound::Text(text) => {
                        if ws_write.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Outbound::Close { code, reason } => {
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.into(),
                        };
                        let _ = ws_write.send(Message::Close(Some(frame))).await;
                        break;
                    }
                }
            }
        });

        let reader_status = Arc::clone(&status);
        let reader_events = events_tx.clone();
        let reader_emitted = Arc::clone(&closed_emitted);
        let reader = tokio::spawn(async move {
            while let Some(message) = ws_read.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        if reader_events.send(TransportEvent::Frame(text)).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Binary(data)) => match String::from_utf8(data) {
                        Ok(text) => {
                            if reader_events.send(TransportEvent::Frame(text)).is_err() {
                                break;
                            }
                        }
                        Err(_) => {
                            debug!(target = "signaling", "dropping non-utf8 binary frame");
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        let code = frame.as_ref().map(|f| u16::from(f.code));
                        let reason = frame.map(|f| f.reason.into_owned()).unwrap_or_default();
                        set_terminal(&reader_status, ConnectionStatus::Closed);
                        emit_closed(&reader_events, &reader_emitted, code, reason, true);
                        break;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        match &err {
                            WsError::ConnectionClosed
                            | WsError::AlreadyClosed
                            | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
                                debug!(target = "signaling", "signaling websocket closed: {err}");
                                set_terminal(&reader_status, ConnectionStatus::Closed);
                                emit_closed(
                                    &reader_events,
                                    &reader_emitted,
                                    None,
                                    err.to_string(),
                                    true,
                                );
                            }
                            _ => {
                                warn!(target = "signaling", "signaling websocket error: {err}");
                                set_terminal(&reader_status, ConnectionStatus::Failed);
                                emit_closed(
                                    &reader_events,
                                    &reader_emitted,
                                    None,
                                    err.to_string(),
                                    false,
                                );
                            }
                        }
                        break;
                    }
                }
            }
            set_terminal(&reader_status, ConnectionStatus::Closed);
            emit_closed(&reader_events, &reader_emitted, None, String::new(), true);
        });

        Ok(Self {
            outbound: outbound_tx,
            events_rx: Mutex::new(Some(events_rx)),
            events_tx,
            status,
            closed_emitted,
            tasks: Mutex::new(vec![writer, reader]),
        })
    }
}

#[async_trait::async_trait]
impl SignalingTransport for WebSocketTransport {
    async fn send_text(&self, text: &str) -> Result<(), SendError> {
        let status = self.status();
        if status != ConnectionStatus::Open {
            return Err(SendError::NotOpen { status });
        }
        self.outbound
            .send(Outbound::Text(text.to_string()))
            .map_err(|_| SendError::ChannelClosed)
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events_rx.lock().take()
    }

    fn status(&self) -> ConnectionStatus {
        *self.status.read()
    }

    async fn close(&self, code: u16, reason: &str) {
        {
            let mut guard = self.status.write();
            if matches!(
                *guard,
                ConnectionStatus::Closed | ConnectionStatus::Failed
            ) {
                return;
            }
            *guard = ConnectionStatus::Closed;
        }
        debug!(target = "signaling", code, reason, "closing signaling websocket");
        let _ = self.outbound.send(Outbound::Close {
            code,
            reason: reason.to_string(),
        });
        emit_closed(
            &self.events_tx,
            &self.closed_emitted,
            Some(code),
            reason.to_string(),
            true,
        );
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

fn build_connector(config: &SignalingConfig) -> Result<Option<Connector>, ConnectError> {
    if config.endpoint.scheme() != "wss" {
        return Ok(None);
    }
    match &config.trust {
        TrustPolicy::Unspecified => Err(ConnectError::TrustPolicyUnspecified),
        TrustPolicy::SystemRoots => {
            let connector =
                native_tls::TlsConnector::new().map_err(|err| ConnectError::Tls(err.to_string()))?;
            Ok(Some(Connector::NativeTls(connector)))
        }
        TrustPolicy::PinnedRoot(pem) => {
            let certificate = native_tls::Certificate::from_pem(pem)
                .map_err(|err| ConnectError::Tls(err.to_string()))?;
            let connector = native_tls::TlsConnector::builder()
                .add_root_certificate(certificate)
                .build()
                .map_err(|err| ConnectError::Tls(err.to_string()))?;
            Ok(Some(Connector::NativeTls(connector)))
        }
    }
}

fn set_terminal(status: &RwLock<ConnectionStatus>, terminal: ConnectionStatus) {
    let mut guard = status.write();
    if !matches!(
        *guard,
        ConnectionStatus::Closed | ConnectionStatus::Failed
    ) {
        *guard = terminal;
    }
}

fn emit_closed(
    events: &mpsc::UnboundedSender<TransportEvent>,
    emitted: &AtomicBool,
    code: Option<u16>,
    reason: String,
    graceful: bool,
) {
    if emitted.swap(true, Ordering::SeqCst) {
        return;
    }
    let _ = events.send(TransportEvent::Closed {
        code,
        reason,
        graceful,
    });
}
