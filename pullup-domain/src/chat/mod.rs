mod connection;

pub use connection::*;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use log::{info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use xxhash_rust::xxh3::Xxh3Builder;

use pullup_core::cache::keys;
use pullup_core::util::random_string;

use crate::DomainContext;

/// Concurrent map keyed with xxh3 for low-collision hashing of room and
/// client ids.
pub type XxMap<K, V> = DashMap<K, V, Xxh3Builder>;

/// Nickname used for join/leave announcements.
pub const SYSTEM_SENDER: &str = "pullup";

/// Capacity of the deferred-removal queue.
const RETRY_QUEUE_SIZE: usize = 100;

/// How often the idle sweeper walks the rooms.
const SWEEP_PERIOD: Duration = Duration::from_secs(60);

/// One frame on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub uid: String,
    pub message: String,
    pub user_id: String,
    pub user_nickname: String,
    pub room_id: String,
    /// Milliseconds since the epoch.
    pub timestamp: i64,
}

impl ChatMessage {
    pub fn new(room_id: &str, message: &str, nickname: &str, user_id: &str) -> Self {
        Self {
            uid: random_string(20),
            message: message.to_string(),
            user_id: user_id.to_string(),
            user_nickname: nickname.to_string(),
            room_id: room_id.to_string(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

/// A removal that failed inline and is retried by a single drainer.
#[derive(Debug)]
pub struct RemovalTask {
    pub room_id: String,
    pub client_id: String,
}

/// The room registry: room id to the clients connected on this node.
#[derive(Default)]
pub struct RoomManager {
    rooms: XxMap<String, Arc<XxMap<String, Arc<ChatConn>>>>,
    /// Message UIDs already fanned out on this node, for pub/sub idempotency.
    processed: XxMap<String, ()>,
}

impl RoomManager {
    pub fn new() -> Self {
        Self {
            rooms: XxMap::with_hasher(Xxh3Builder::new()),
            processed: XxMap::with_hasher(Xxh3Builder::new()),
        }
    }

    pub fn register(&self, room_id: &str, conn: Arc<ChatConn>) {
        let room = self
            .rooms
            .entry(room_id.to_string())
            .or_insert_with(|| Arc::new(XxMap::with_hasher(Xxh3Builder::new())))
            .clone();

        room.insert(conn.client_id.clone(), conn);
    }

    /// Removes the client, closing its send channel, and drops the room
    /// when it empties. Returns whether anything was removed.
    pub fn deregister(&self, room_id: &str, client_id: &str) -> bool {
        let Some(room) = self.rooms.get(room_id).map(|r| r.clone()) else {
            return false;
        };

        let removed = room.remove(client_id);

        if let Some((_, conn)) = &removed {
            conn.close();
        }

        if room.is_empty() {
            self.rooms.remove_if(room_id, |_, r| r.is_empty());
        }

        removed.is_some()
    }

    pub fn connections(&self, room_id: &str) -> Option<Arc<XxMap<String, Arc<ChatConn>>>> {
        self.rooms.get(room_id).map(|r| r.clone())
    }

    /// This node's view of the room's population.
    pub fn user_count(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map(|r| r.len()).unwrap_or(0)
    }

    pub fn nickname(&self, room_id: &str, client_id: &str) -> Option<String> {
        self.connections(room_id)?
            .get(client_id)
            .map(|c| c.nickname.clone())
    }

    /// Marks a message UID as handled. False means it was already seen and
    /// must not be fanned out again.
    pub fn mark_processed(&self, uid: &str) -> bool {
        self.processed.insert(uid.to_string(), ()).is_none()
    }

    /// Enqueues an already-serialized frame on every connection in the
    /// room. A slow consumer only ever loses its own frames; one declared
    /// dead is shed on the spot.
    pub fn fan_out(&self, room_id: &str, payload: &Arc<String>) {
        let Some(room) = self.connections(room_id) else {
            return;
        };

        let mut dead = Vec::new();

        for conn in room.iter() {
            if conn.value().try_send(payload) == SendOutcome::Dead {
                dead.push(conn.key().clone());
            }
        }

        for client_id in dead {
            self.deregister(room_id, &client_id);
        }
    }

    /// Visits every connection across all rooms. Iteration never freezes
    /// the maps; concurrent joins and leaves are fine.
    pub fn for_each_connection(&self, mut visit: impl FnMut(&str, &Arc<ChatConn>)) {
        for room in self.rooms.iter() {
            for conn in room.value().iter() {
                visit(room.key(), conn.value());
            }
        }
    }
}

/// WebSocket chat rooms keyed by marker id: fan-out, presence, the idle
/// sweeper, the removal retry queue, and the cross-process pub/sub bridge.
pub struct ChatService {
    context: DomainContext,
    pub manager: Arc<RoomManager>,
    retry_tx: mpsc::Sender<RemovalTask>,
    retry_rx: Mutex<Option<mpsc::Receiver<RemovalTask>>>,
    /// Rooms this node is already subscribed to on the pub/sub side.
    subscribed: XxMap<String, ()>,
}

impl ChatService {
    pub fn new(context: &DomainContext) -> Self {
        let (retry_tx, retry_rx) = mpsc::channel(RETRY_QUEUE_SIZE);

        Self {
            context: context.clone(),
            manager: Arc::new(RoomManager::new()),
            retry_tx,
            retry_rx: Mutex::new(Some(retry_rx)),
            subscribed: XxMap::with_hasher(Xxh3Builder::new()),
        }
    }

    /// Adds a connection to a room and announces the new population. The
    /// first join on this node also bridges the room's pub/sub channel.
    pub fn join_room(&self, room_id: &str, conn: Arc<ChatConn>) {
        self.manager.register(room_id, conn);
        self.ensure_subscribed(room_id);
        self.announce_user_count(room_id);
    }

    /// Removes a connection and announces the shrunken population. A failed
    /// removal goes onto the retry queue.
    pub fn leave_room(&self, room_id: &str, client_id: &str) {
        if !self.manager.deregister(room_id, client_id) {
            let task = RemovalTask {
                room_id: room_id.to_string(),
                client_id: client_id.to_string(),
            };

            if self.retry_tx.try_send(task).is_err() {
                warn!("Retry queue is full, dropping removal for {client_id}");
            }
        }

        self.announce_user_count(room_id);
    }

    /// Serializes the message once and enqueues the identical payload on
    /// every connection in the room, then publishes it for other nodes.
    pub async fn broadcast_message(
        &self,
        room_id: &str,
        message: &str,
        sender_nickname: &str,
        sender_user_id: &str,
    ) {
        let frame = ChatMessage::new(room_id, message, sender_nickname, sender_user_id);

        // Our own publish echoes back through the subscription; marking the
        // UID first keeps the echo from fanning out twice.
        self.manager.mark_processed(&frame.uid);

        let Ok(payload) = serde_json::to_string(&frame) else {
            warn!("Failed to encode chat frame for room {room_id}");
            return;
        };

        self.manager.fan_out(room_id, &Arc::new(payload.clone()));

        self.context
            .pubsub
            .publish(&keys::room_messages(room_id), payload.as_bytes())
            .await;
    }

    /// Broadcasts `<roomId> (<n>명 접속 중)` as a system message.
    fn announce_user_count(&self, room_id: &str) {
        let count = self.manager.user_count(room_id);

        if count == 0 {
            return;
        }

        let message = format!("{room_id} ({count}명 접속 중)");
        let frame = ChatMessage::new(room_id, &message, SYSTEM_SENDER, "");

        self.manager.mark_processed(&frame.uid);

        if let Ok(payload) = serde_json::to_string(&frame) {
            self.manager.fan_out(room_id, &Arc::new(payload));
        }
    }

    /// Bridges a room's pub/sub channel into local fan-out, once per room.
    /// Frames whose UID was already processed on this node are skipped.
    fn ensure_subscribed(&self, room_id: &str) {
        if self
            .subscribed
            .insert(room_id.to_string(), ())
            .is_some()
        {
            return;
        }

        let mut receiver = self.context.pubsub.subscribe(&keys::room_messages(room_id));
        let manager = self.manager.clone();
        let room_id = room_id.to_string();

        tokio::spawn(async move {
            while let Some(payload) = receiver.recv().await {
                let Ok(frame) = serde_json::from_slice::<ChatMessage>(&payload) else {
                    continue;
                };

                if !manager.mark_processed(&frame.uid) {
                    continue;
                }

                if let Ok(text) = serde_json::to_string(&frame) {
                    manager.fan_out(&room_id, &Arc::new(text));
                }
            }
        });
    }

    /// Closes connections that have been silent past the idle threshold.
    pub async fn run_idle_sweeper(&self, mut shutdown: watch::Receiver<bool>) {
        let threshold = self.context.config.chat_idle_seconds;
        let mut ticker = tokio::time::interval(SWEEP_PERIOD);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let mut idle = Vec::new();

                    self.manager.for_each_connection(|room_id, conn| {
                        if conn.idle_seconds() > threshold {
                            idle.push((room_id.to_string(), conn.client_id.clone()));
                        }
                    });

                    for (room_id, client_id) in idle {
                        info!("Sweeping idle connection {client_id} from room {room_id}");
                        self.leave_room(&room_id, &client_id);
                    }
                }
                _ = shutdown.changed() => {
                    info!("Idle sweeper stopped");
                    return;
                }
            }
        }
    }

    /// Drains the removal retry queue until shutdown.
    pub async fn run_retry_queue(&self, mut shutdown: watch::Receiver<bool>) {
        let Some(mut receiver) = self.retry_rx.lock().take() else {
            return;
        };

        loop {
            tokio::select! {
                task = receiver.recv() => {
                    match task {
                        Some(task) => {
                            self.manager.deregister(&task.room_id, &task.client_id);
                        }
                        None => return,
                    }
                }
                _ = shutdown.changed() => {
                    info!("Retry queue drainer stopped");
                    return;
                }
            }
        }
    }

    /// Stages the shipped conversation starters, keyed per room. Failures
    /// are counted and surfaced once; startup continues regardless.
    pub async fn bootstrap_messages(&self, raw: &str) {
        let messages: Vec<ChatMessage> = match serde_json::from_str(raw) {
            Ok(messages) => messages,
            Err(err) => {
                warn!("Failed to decode initial chat messages: {err}");
                return;
            }
        };

        let total = messages.len();
        let mut rooms: std::collections::HashMap<String, Vec<ChatMessage>> = Default::default();

        for message in messages {
            rooms.entry(message.room_id.clone()).or_default().push(message);
        }

        let mut errors = 0;

        for (room_id, seed) in rooms {
            let key = format!("chat:seed:{room_id}");

            if serde_json::to_vec(&seed).is_err() {
                errors += seed.len();
                continue;
            }

            self.context
                .cache
                .set(&key, &seed, Duration::from_secs(24 * 60 * 60))
                .await;
        }

        if errors > 0 {
            warn!("Loaded initial chat messages with {errors} errors out of {total}");
        } else {
            info!("Loaded {total} initial chat messages");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(client: &str) -> (Arc<ChatConn>, ConnReceiver) {
        ChatConn::new(client, format!("user-{client}"), format!("nick-{client}"))
    }

    #[test]
    fn test_register_and_count() {
        let manager = RoomManager::new();

        let (a, _ra) = conn("a");
        let (b, _rb) = conn("b");

        manager.register("5329", a);
        manager.register("5329", b);
        manager.register("77", conn("c").0);

        assert_eq!(manager.user_count("5329"), 2);
        assert_eq!(manager.user_count("77"), 1);
        assert_eq!(manager.user_count("none"), 0);
    }

    #[test]
    fn test_deregister_closes_and_empties() {
        let manager = RoomManager::new();

        let (a, _ra) = conn("a");
        manager.register("5329", a);

        assert!(manager.deregister("5329", "a"));
        assert_eq!(manager.user_count("5329"), 0);
        assert!(!manager.deregister("5329", "a"), "double removal is a no-op");
    }

    #[test]
    fn test_nickname_lookup() {
        let manager = RoomManager::new();
        manager.register("5329", conn("a").0);

        assert_eq!(manager.nickname("5329", "a").as_deref(), Some("nick-a"));
        assert_eq!(manager.nickname("5329", "b"), None);
    }

    #[test]
    fn test_uid_dedup() {
        let manager = RoomManager::new();

        assert!(manager.mark_processed("uid-1"), "first sighting");
        assert!(!manager.mark_processed("uid-1"), "second sighting is a dup");
        assert!(manager.mark_processed("uid-2"));
    }

    #[tokio::test]
    async fn test_fan_out_reaches_everyone() {
        let manager = RoomManager::new();

        let (a, mut ra) = conn("a");
        let (b, mut rb) = conn("b");

        manager.register("5329", a);
        manager.register("5329", b);

        let payload = Arc::new(r#"{"message":"hi"}"#.to_string());
        manager.fan_out("5329", &payload);

        let got_a = ra.frames.recv().await.expect("a receives");
        let got_b = rb.frames.recv().await.expect("b receives");

        assert_eq!(got_a.as_str(), got_b.as_str(), "payload is identical");
    }

    #[tokio::test]
    async fn test_stalled_consumer_never_blocks_the_room() {
        let manager = RoomManager::new();

        let (healthy, mut healthy_rx) = conn("ok");
        let (stalled, _stalled_rx) = conn("stall");

        manager.register("5329", healthy);
        manager.register("5329", stalled);

        // Far more frames than the stalled consumer's queue can hold, with
        // the healthy consumer draining as a live client would.
        let mut received = Vec::new();

        for i in 0..64 {
            let payload = Arc::new(format!("frame-{i}"));
            manager.fan_out("5329", &payload);

            while let Ok(frame) = healthy_rx.frames.try_recv() {
                received.push(frame);
            }
        }

        while let Ok(frame) = healthy_rx.frames.try_recv() {
            received.push(frame);
        }

        assert_eq!(received.len(), 64, "the healthy consumer got every frame");
        assert_eq!(received[0].as_str(), "frame-0", "enqueue order is kept");

        // The stalled one was eventually shed from the room.
        assert_eq!(manager.user_count("5329"), 1);
    }

    #[test]
    fn test_message_frame_shape() {
        let frame = ChatMessage::new("5329", "hi", "tester", "42");
        let json = serde_json::to_string(&frame).expect("frame encodes");

        assert!(json.contains("\"roomId\":\"5329\""));
        assert!(json.contains("\"message\":\"hi\""));
        assert!(json.contains("\"userNickname\":\"tester\""));
        assert!(json.contains("\"uid\":"));
    }
}
