use std::sync::Arc;

use chrono::Utc;
use crossbeam::atomic::AtomicCell;
use tokio::sync::{mpsc, watch};

/// How many outbound frames a connection may have queued before sends to it
/// start dropping.
pub const SEND_QUEUE_SIZE: usize = 16;

/// Consecutive dropped sends after which the connection is declared dead.
const MAX_FULL_STRIKES: u32 = 8;

/// What happened to one enqueue attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// The queue was full, the frame was dropped, the connection stays.
    Dropped,
    /// The consumer is gone or persistently stalled; deregister it.
    Dead,
}

/// One WebSocket participant in a room.
///
/// Exactly one task reads the socket and exactly one task writes it. They
/// share nothing but the bounded send channel carried here, so a stalled
/// writer can never block the room: enqueueing is always non-blocking and a
/// full queue just drops the frame.
pub struct ChatConn {
    pub client_id: String,
    pub user_id: String,
    pub nickname: String,
    /// Nanosecond timestamp of the last read or ping.
    last_seen: AtomicCell<i64>,
    full_strikes: AtomicCell<u32>,
    send: mpsc::Sender<Arc<String>>,
    close: watch::Sender<bool>,
}

/// The receiving halves handed to the writer task.
pub struct ConnReceiver {
    pub frames: mpsc::Receiver<Arc<String>>,
    pub closed: watch::Receiver<bool>,
}

impl ChatConn {
    pub fn new(
        client_id: impl Into<String>,
        user_id: impl Into<String>,
        nickname: impl Into<String>,
    ) -> (Arc<Self>, ConnReceiver) {
        let (send, frames) = mpsc::channel(SEND_QUEUE_SIZE);
        let (close, closed) = watch::channel(false);

        let conn = Arc::new(Self {
            client_id: client_id.into(),
            user_id: user_id.into(),
            nickname: nickname.into(),
            last_seen: AtomicCell::new(now_nanos()),
            full_strikes: AtomicCell::new(0),
            send,
            close,
        });

        (conn, ConnReceiver { frames, closed })
    }

    /// Stamps activity. Called on every read and ping.
    pub fn touch(&self) {
        self.last_seen.store(now_nanos());
    }

    /// Seconds since the connection was last seen alive.
    pub fn idle_seconds(&self) -> i64 {
        (now_nanos() - self.last_seen.load()) / 1_000_000_000
    }

    /// Enqueues a frame without ever blocking. Repeatedly full queues mark
    /// the connection dead so the room can shed it.
    pub fn try_send(&self, payload: &Arc<String>) -> SendOutcome {
        match self.send.try_send(payload.clone()) {
            Ok(()) => {
                self.full_strikes.store(0);
                SendOutcome::Sent
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                let strikes = self.full_strikes.fetch_add(1) + 1;

                if strikes >= MAX_FULL_STRIKES {
                    SendOutcome::Dead
                } else {
                    SendOutcome::Dropped
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => SendOutcome::Dead,
        }
    }

    /// Tells the writer task to shut the socket down.
    pub fn close(&self) {
        let _ = self.close.send(true);
    }
}

fn now_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_and_receive() {
        let (conn, mut receiver) = ChatConn::new("c1", "u1", "tester");
        let payload = Arc::new("hello".to_string());

        assert_eq!(conn.try_send(&payload), SendOutcome::Sent);

        let received = receiver.frames.recv().await.expect("frame arrives");
        assert_eq!(received.as_str(), "hello");
    }

    #[tokio::test]
    async fn test_full_queue_drops_then_dies() {
        let (conn, _receiver) = ChatConn::new("c1", "u1", "tester");
        let payload = Arc::new("x".to_string());

        // Fill the queue; nobody is draining it.
        for _ in 0..SEND_QUEUE_SIZE {
            assert_eq!(conn.try_send(&payload), SendOutcome::Sent);
        }

        let mut outcomes = Vec::new();
        for _ in 0..16 {
            outcomes.push(conn.try_send(&payload));
        }

        assert!(
            outcomes.contains(&SendOutcome::Dropped),
            "a full queue drops frames before giving up"
        );
        assert_eq!(
            *outcomes.last().unwrap(),
            SendOutcome::Dead,
            "persistent fullness eventually kills the connection"
        );
    }

    #[tokio::test]
    async fn test_closed_receiver_is_dead() {
        let (conn, receiver) = ChatConn::new("c1", "u1", "tester");
        drop(receiver);

        let payload = Arc::new("x".to_string());
        assert_eq!(conn.try_send(&payload), SendOutcome::Dead);
    }

    #[tokio::test]
    async fn test_touch_resets_idle() {
        let (conn, _receiver) = ChatConn::new("c1", "u1", "tester");

        conn.touch();
        assert!(conn.idle_seconds() < 2);
    }
}
