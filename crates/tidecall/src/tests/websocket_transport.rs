//! WebSocket transport against a local axum coordinator stub.

use std::net::SocketAddr;

use axum::Router;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use url::Url;

use super::support::next_event;
use crate::config::{SignalingConfig, TrustPolicy};
use crate::transport::websocket::WebSocketTransport;
use crate::transport::{
    ConnectError, ConnectionStatus, NORMAL_CLOSE_CODE, NORMAL_CLOSE_REASON, SendError,
    SignalingTransport, TransportEvent,
};

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

fn ws_config(addr: SocketAddr) -> SignalingConfig {
    SignalingConfig {
        endpoint: Url::parse(&format!("ws://{addr}/signal")).expect("endpoint"),
        trust: TrustPolicy::Unspecified,
    }
}

async fn echo_handler(ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(|mut socket: WebSocket| async move {
        while let Some(Ok(message)) = socket.recv().await {
            if let Message::Text(text) = message {
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        }
    })
}

async fn burst_handler(ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(|mut socket: WebSocket| async move {
        for text in ["one", "two", "three"] {
            if socket.send(Message::Text(text.to_string())).await.is_err() {
                return;
            }
        }
        while socket.recv().await.is_some() {}
    })
}

async fn closing_handler(ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(|mut socket: WebSocket| async move {
        let _ = socket.send(Message::Text("solo".to_string())).await;
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: 4000,
                reason: "done".into(),
            })))
            .await;
    })
}

#[tokio::test]
async fn echo_round_trip() {
    let addr = serve(Router::new().route("/signal", get(echo_handler))).await;
    let transport = WebSocketTransport::connect(&ws_config(addr))
        .await
        .expect("connect");
    assert_eq!(transport.status(), ConnectionStatus::Open);

    let mut events = transport.take_events().expect("events");
    transport.send_text("ping").await.expect("send");
    assert_eq!(
        next_event(&mut events).await,
        TransportEvent::Frame("ping".to_string())
    );
}

#[tokio::test]
async fn inbound_frames_preserve_arrival_order() {
    let addr = serve(Router::new().route("/signal", get(burst_handler))).await;
    let transport = WebSocketTransport::connect(&ws_config(addr))
        .await
        .expect("connect");
    let mut events = transport.take_events().expect("events");
    for expected in ["one", "two", "three"] {
        assert_eq!(
            next_event(&mut events).await,
            TransportEvent::Frame(expected.to_string())
        );
    }
}

#[tokio::test]
async fn close_is_idempotent_and_blocks_further_sends() {
    let addr = serve(Router::new().route("/signal", get(echo_handler))).await;
    let transport = WebSocketTransport::connect(&ws_config(addr))
        .await
        .expect("connect");
    let mut events = transport.take_events().expect("events");

    transport.close(NORMAL_CLOSE_CODE, NORMAL_CLOSE_REASON).await;
    transport.close(NORMAL_CLOSE_CODE, NORMAL_CLOSE_REASON).await;
    assert_eq!(transport.status(), ConnectionStatus::Closed);

    assert!(matches!(
        transport.send_text("late").await,
        Err(SendError::NotOpen { .. })
    ));

    assert_eq!(
        next_event(&mut events).await,
        TransportEvent::Closed {
            code: Some(NORMAL_CLOSE_CODE),
            reason: NORMAL_CLOSE_REASON.to_string(),
            graceful: true,
        }
    );
}

#[tokio::test]
async fn server_close_surfaces_a_terminal_event() {
    let addr = serve(Router::new().route("/signal", get(closing_handler))).await;
    let transport = WebSocketTransport::connect(&ws_config(addr))
        .await
        .expect("connect");
    let mut events = transport.take_events().expect("events");

    assert_eq!(
        next_event(&mut events).await,
        TransportEvent::Frame("solo".to_string())
    );
    match next_event(&mut events).await {
        TransportEvent::Closed { code, graceful, .. } => {
            assert_eq!(code, Some(4000));
            assert!(graceful);
        }
        other => panic!("expected closed event, got {other:?}"),
    }
    assert_eq!(transport.status(), ConnectionStatus::Closed);
}

#[tokio::test]
async fn secure_endpoint_without_trust_policy_fails_fast() {
    let config = SignalingConfig {
        endpoint: Url::parse("wss://127.0.0.1:9/signal").expect("endpoint"),
        trust: TrustPolicy::Unspecified,
    };
    assert!(matches!(
        WebSocketTransport::connect(&config).await,
        Err(ConnectError::TrustPolicyUnspecified)
    ));
}

#[tokio::test]
async fn unreachable_endpoint_is_a_handshake_error() {
    let config = SignalingConfig {
        endpoint: Url::parse("ws://127.0.0.1:1/signal").expect("endpoint"),
        trust: TrustPolicy::Unspecified,
    };
    assert!(matches!(
        WebSocketTransport::connect(&config).await,
        Err(ConnectError::Handshake(_))
    ));
}
