use std::collections::HashMap;

use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::RwLock;
use tracing::debug;

use crate::models::ServerEvent;

/// Sender half of one connection's outbound frame queue. A single writer
/// task per connection drains it, which is what preserves per-client
/// delivery order.
pub type ClientTx = UnboundedSender<String>;

#[derive(Clone)]
pub struct Member {
    pub user_id: String,
    pub username: String,
    pub tx: ClientTx,
}

/// Per-room membership and fan-out. Room-wide events reach every member;
/// private events (terminal output, active-file changes) reach exactly one.
/// Delivery is fire-and-forget: a dead receiver is cleaned up by its own
/// disconnect path, not here.
#[derive(Default)]
pub struct Hub {
    rooms: RwLock<HashMap<String, Vec<Member>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a member; a rejoin by the same user id replaces the stale entry
    /// instead of duplicating it.
    pub async fn join(&self, room: &str, member: Member) {
        let mut rooms = self.rooms.write().await;
        let members = rooms.entry(room.to_string()).or_default();
        match members.iter_mut().find(|m| m.user_id == member.user_id) {
            Some(existing) => *existing = member,
            None => members.push(member),
        }
    }

    /// Remove a member, returning how many remain in the room.
    pub async fn leave(&self, room: &str, user_id: &str) -> usize {
        let mut rooms = self.rooms.write().await;
        let Some(members) = rooms.get_mut(room) else {
            return 0;
        };
        members.retain(|m| m.user_id != user_id);
        let remaining = members.len();
        if remaining == 0 {
            rooms.remove(room);
            debug!("Room {room} has no members left");
        }
        remaining
    }

    pub async fn is_member(&self, room: &str, user_id: &str) -> bool {
        self.rooms
            .read()
            .await
            .get(room)
            .is_some_and(|members| members.iter().any(|m| m.user_id == user_id))
    }

    pub async fn member_count(&self, room: &str) -> usize {
        self.rooms.read().await.get(room).map_or(0, Vec::len)
    }

    pub async fn broadcast(&self, room: &str, event: &ServerEvent) {
        let frame = event.to_frame();
        if let Some(members) = self.rooms.read().await.get(room) {
            for member in members {
                let _ = member.tx.send(frame.clone());
            }
        }
    }

    pub async fn broadcast_except(&self, room: &str, except_user: &str, event: &ServerEvent) {
        let frame = event.to_frame();
        if let Some(members) = self.rooms.read().await.get(room) {
            for member in members.iter().filter(|m| m.user_id != except_user) {
                let _ = member.tx.send(frame.clone());
            }
        }
    }

    /// Deliver to a single member's private channel. Returns false when the
    /// user is not in the room.
    pub async fn send_to(&self, room: &str, user_id: &str, event: &ServerEvent) -> bool {
        if let Some(members) = self.rooms.read().await.get(room) {
            if let Some(member) = members.iter().find(|m| m.user_id == user_id) {
                let _ = member.tx.send(event.to_frame());
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    fn member(user: &str) -> (Member, UnboundedReceiver<String>) {
        let (tx, rx) = unbounded_channel();
        (
            Member {
                user_id: user.to_string(),
                username: user.to_string(),
                tx,
            },
            rx,
        )
    }

    fn probe() -> ServerEvent {
        ServerEvent::ActiveFileChanged {
            file_name: "main.js".into(),
        }
    }

    #[tokio::test]
    async fn rejoin_collapses_duplicates() {
        let hub = Hub::new();
        let (alice1, _rx1) = member("alice");
        let (alice2, _rx2) = member("alice");
        hub.join("R", alice1).await;
        hub.join("R", alice2).await;
        assert_eq!(hub.member_count("R").await, 1);
    }

    #[tokio::test]
    async fn broadcast_except_skips_the_sender() {
        let hub = Hub::new();
        let (alice, mut alice_rx) = member("alice");
        let (bob, mut bob_rx) = member("bob");
        hub.join("R", alice).await;
        hub.join("R", bob).await;

        hub.broadcast_except("R", "alice", &probe()).await;
        assert!(bob_rx.try_recv().is_ok());
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn private_delivery_reaches_only_the_target() {
        let hub = Hub::new();
        let (alice, mut alice_rx) = member("alice");
        let (bob, mut bob_rx) = member("bob");
        hub.join("R", alice).await;
        hub.join("R", bob).await;

        let delivered = hub
            .send_to("R", "alice", &ServerEvent::TerminalOutput("secret".into()))
            .await;
        assert!(delivered);
        assert!(alice_rx.try_recv().is_ok());
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn leave_reports_remaining_members() {
        let hub = Hub::new();
        let (alice, _a) = member("alice");
        let (bob, _b) = member("bob");
        hub.join("R", alice).await;
        hub.join("R", bob).await;
        assert_eq!(hub.leave("R", "alice").await, 1);
        assert_eq!(hub.leave("R", "bob").await, 0);
        assert!(!hub.is_member("R", "bob").await);
    }
}
