use tracing::{debug, warn};

use super::registry::{ConnId, ConnectionRegistry};
use crate::models::SendMessage;

impl ConnectionRegistry {
    /// Deliver `msg` to every connection in `room_id` except `exclude`.
    ///
    /// A connection whose writer has gone away does not stop delivery to the
    /// others; it is dropped from the room once the pass is done. The pass runs
    /// under the registry lock, so per-connection order follows call order.
    pub async fn broadcast(&self, room_id: &str, msg: &SendMessage, exclude: Option<ConnId>) {
        let mut rooms = self.rooms.lock().await;
        let Some(conns) = rooms.get_mut(room_id) else {
            return;
        };

        let mut dead = Vec::new();
        for (id, handle) in conns.iter() {
            if Some(*id) == exclude {
                continue;
            }
            if handle.send(msg.clone()).is_err() {
                dead.push(*id);
            }
        }

        for id in &dead {
            warn!("Dropping unreachable connection {} from room {}", id, room_id);
            conns.remove(id);
        }
        if conns.is_empty() {
            rooms.remove(room_id);
            debug!("Room {} has no connections left", room_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::models::{PresenceMessage, SendMessage};
    use crate::ws::registry::{ConnHandle, ConnectionRegistry};

    fn joined(users: usize) -> SendMessage {
        SendMessage::UserJoined(PresenceMessage { users })
    }

    #[tokio::test]
    async fn delivers_to_everyone_but_the_excluded_connection() {
        let registry = ConnectionRegistry::new();
        let (a, mut rx_a) = ConnHandle::channel();
        let (b, mut rx_b) = ConnHandle::channel();
        let (c, mut rx_c) = ConnHandle::channel();
        registry.add("r1", a.clone()).await;
        registry.add("r1", b).await;
        registry.add("r1", c).await;

        registry.broadcast("r1", &joined(3), Some(a.id())).await;

        assert_eq!(rx_b.try_recv().unwrap(), joined(3));
        assert_eq!(rx_c.try_recv().unwrap(), joined(3));
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn without_exclusion_everyone_receives() {
        let registry = ConnectionRegistry::new();
        let (a, mut rx_a) = ConnHandle::channel();
        registry.add("r1", a).await;

        registry.broadcast("r1", &joined(1), None).await;
        assert_eq!(rx_a.try_recv().unwrap(), joined(1));
    }

    #[tokio::test]
    async fn other_rooms_are_untouched() {
        let registry = ConnectionRegistry::new();
        let (a, _rx_a) = ConnHandle::channel();
        let (b, mut rx_b) = ConnHandle::channel();
        registry.add("r1", a).await;
        registry.add("r2", b).await;

        registry.broadcast("r1", &joined(1), None).await;
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn dead_connections_are_pruned_without_blocking_others() {
        let registry = ConnectionRegistry::new();
        let (a, rx_a) = ConnHandle::channel();
        let (b, mut rx_b) = ConnHandle::channel();
        registry.add("r1", a).await;
        registry.add("r1", b).await;
        drop(rx_a);

        registry.broadcast("r1", &joined(2), None).await;

        assert_eq!(rx_b.try_recv().unwrap(), joined(2));
        assert_eq!(registry.count("r1").await, 1);
    }

    #[tokio::test]
    async fn pruning_the_last_connection_drops_the_room() {
        let registry = ConnectionRegistry::new();
        let (a, rx_a) = ConnHandle::channel();
        registry.add("r1", a).await;
        drop(rx_a);

        registry.broadcast("r1", &joined(1), None).await;
        assert!(!registry.contains_room("r1").await);
    }

    #[tokio::test]
    async fn broadcast_to_unknown_room_is_a_no_op() {
        let registry = ConnectionRegistry::new();
        registry.broadcast("ghost", &joined(0), None).await;
        assert_eq!(registry.count("ghost").await, 0);
    }
}
