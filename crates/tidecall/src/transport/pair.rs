//! In-process linked transport pair.
//!
//! Both ends start Open and deliver frames to each other in send order.
//! Useful for exercising a session without a coordinator: hand one end to
//! [`crate::session::Session::attach`] and script the other from a test or
//! an embedded responder.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use super::{ConnectionStatus, SendError, SignalingTransport, TransportEvent};

pub struct PairedTransport {
    peer_events: mpsc::UnboundedSender<TransportEvent>,
    local_events: mpsc::UnboundedSender<TransportEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
    status: Arc<RwLock<ConnectionStatus>>,
    peer_status: Arc<RwLock<ConnectionStatus>>,
    closed_emitted: Arc<AtomicBool>,
    peer_closed_emitted: Arc<AtomicBool>,
}

/// Create two connected ends. Closing either end closes both.
pub fn pair() -> (PairedTransport, PairedTransport) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    let a_status = Arc::new(RwLock::new(ConnectionStatus::Open));
    let b_status = Arc::new(RwLock::new(ConnectionStatus::Open));
    let a_emitted = Arc::new(AtomicBool::new(false));
    let b_emitted = Arc::new(AtomicBool::new(false));

    let a = PairedTransport {
        peer_events: b_tx.clone(),
        local_events: a_tx.clone(),
        events_rx: Mutex::new(Some(a_rx)),
        status: Arc::clone(&a_status),
        peer_status: Arc::clone(&b_status),
        closed_emitted: Arc::clone(&a_emitted),
        peer_closed_emitted: Arc::clone(&b_emitted),
    };
    let b = PairedTransport {
        peer_events: a_tx,
        local_events: b_tx,
        events_rx: Mutex::new(Some(b_rx)),
        status: b_status,
        peer_status: a_status,
        closed_emitted: b_emitted,
        peer_closed_emitted: a_emitted,
    };
    (a, b)
}

#[async_trait::async_trait]
impl SignalingTransport for PairedTransport {
    async fn send_text(&self, text: &str) -> Result<(), SendError> {
        let status = self.status();
        if status != ConnectionStatus::Open {
            return Err(SendError::NotOpen { status });
        }
        self.peer_events
            .send(TransportEvent::Frame(text.to_string()))
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
        *self.peer_status.write() = ConnectionStatus::Closed;

        let event = TransportEvent::Closed {
            code: Some(code),
            reason: reason.to_string(),
            graceful: true,
        };
        if !self.closed_emitted.swap(true, Ordering::SeqCst) {
            let _ = self.local_events.send(event.clone());
        }
        if !self.peer_closed_emitted.swap(true, Ordering::SeqCst) {
            let _ = self.peer_events.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{NORMAL_CLOSE_CODE, NORMAL_CLOSE_REASON};

    #[tokio::test]
    async fn frames_arrive_in_send_order() {
        let (a, b) = pair();
        let mut events = b.take_events().expect("events");
        for text in ["one", "two", "three"] {
            a.send_text(text).await.expect("send");
        }
        for expected in ["one", "two", "three"] {
            assert_eq!(
                events.recv().await,
                Some(TransportEvent::Frame(expected.to_string()))
            );
        }
    }

    #[tokio::test]
    async fn event_stream_can_only_be_taken_once() {
        let (a, _b) = pair();
        assert!(a.take_events().is_some());
        assert!(a.take_events().is_none());
    }

    #[tokio::test]
    async fn close_reaches_both_ends_and_blocks_sends() {
        let (a, b) = pair();
        let mut a_events = a.take_events().expect("events");
        let mut b_events = b.take_events().expect("events");

        a.close(NORMAL_CLOSE_CODE, NORMAL_CLOSE_REASON).await;
        a.close(NORMAL_CLOSE_CODE, NORMAL_CLOSE_REASON).await;

        let expected = TransportEvent::Closed {
            code: Some(NORMAL_CLOSE_CODE),
            reason: NORMAL_CLOSE_REASON.to_string(),
            graceful: true,
        };
        assert_eq!(a_events.recv().await, Some(expected.clone()));
        assert_eq!(b_events.recv().await, Some(expected));
        assert_eq!(a.status(), ConnectionStatus::Closed);
        assert_eq!(b.status(), ConnectionStatus::Closed);

        assert!(matches!(
            a.send_text("late").await,
            Err(SendError::NotOpen { .. })
        ));
        assert!(matches!(
            b.send_text("late").await,
            Err(SendError::NotOpen { .. })
        ));
    }
}
