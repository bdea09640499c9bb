use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;

/// In-flight turns by room id, so a later `stop` can cancel them.
#[derive(Clone, Default)]
pub struct StreamRegistry {
    active: Arc<DashMap<String, (u64, CancellationToken)>>,
    generation: Arc<AtomicU64>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a turn for `room_id`, replacing any previous registration.
    /// The registration is cleared when the guard drops.
    pub fn register(&self, room_id: &str) -> StreamGuard {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        self.active
            .insert(room_id.to_string(), (generation, token.clone()));
        StreamGuard {
            registry: self.clone(),
            room_id: room_id.to_string(),
            generation,
            token,
        }
    }

    /// Cancels the room's in-flight turn; false when nothing was running.
    pub fn stop(&self, room_id: &str) -> bool {
        match self.active.remove(room_id) {
            Some((_, (_, token))) => {
                token.cancel();
                tracing::info!(room_id, "in-flight turn cancelled");
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, room_id: &str) -> bool {
        self.active.contains_key(room_id)
    }
}

pub struct StreamGuard {
    registry: StreamRegistry,
    room_id: String,
    generation: u64,
    token: CancellationToken,
}

impl StreamGuard {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        let generation = self.generation;
        self.registry
            .active
            .remove_if(&self.room_id, |_, (g, _)| *g == generation);
    }
}
