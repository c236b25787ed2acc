//! Room directory - what an out-of-room client sees when browsing

use std::sync::Arc;

use crate::models::RoomSummary;
use crate::registry::RoomRegistry;

pub struct RoomDirectory {
    registry: Arc<RoomRegistry>,
}

impl RoomDirectory {
    pub fn new(registry: Arc<RoomRegistry>) -> Self {
        Self { registry }
    }

    /// Every room, ordered by id
    pub async fn snapshot(&self) -> Vec<RoomSummary> {
        self.registry.read().await.summaries()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConnId, Room};

    #[tokio::test]
    async fn test_snapshot_reports_membership() {
        let registry = Arc::new(RoomRegistry::new());
        {
            let mut state = registry.write().await;
            let room = state.insert(Room::new("busy".into(), "pw", Some(ConnId::new())).unwrap());
            room.add_viewer(ConnId::new());
            room.add_viewer(ConnId::new());
            state.insert(Room::new("empty".into(), "pw", None).unwrap());
        }

        let directory = RoomDirectory::new(registry);
        assert_eq!(
            directory.snapshot().await,
            vec![
                RoomSummary {
                    id: "busy".into(),
                    has_speaker: true,
                    viewer_count: 2
                },
                RoomSummary {
                    id: "empty".into(),
                    has_speaker: false,
                    viewer_count: 0
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_registry() {
        let directory = RoomDirectory::new(Arc::new(RoomRegistry::new()));
        assert!(directory.snapshot().await.is_empty());
    }
}
