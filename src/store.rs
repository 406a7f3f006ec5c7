use std::collections::HashMap;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::{error::GatewayError, models::notification::Notification};

pub const DEFAULT_MAX_INSERT_ATTEMPTS: usize = 500;

type IdGenerator = Box<dyn Fn() -> Uuid + Send + Sync>;

/// In-flight notifications keyed by correlation id.
///
/// Readers share the lock; only insert, update and delete take it exclusively,
/// and no lock is ever held across an await point.
pub struct NotificationStore {
    entries: RwLock<HashMap<Uuid, Notification>>,
    next_id: IdGenerator,
    max_insert_attempts: usize,
}

impl NotificationStore {
    pub fn new() -> Self {
        Self::with_id_generator(DEFAULT_MAX_INSERT_ATTEMPTS, Box::new(Uuid::new_v4))
    }

    pub fn with_max_insert_attempts(max_insert_attempts: usize) -> Self {
        Self::with_id_generator(max_insert_attempts, Box::new(Uuid::new_v4))
    }

    pub fn with_id_generator(max_insert_attempts: usize, next_id: IdGenerator) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            next_id,
            max_insert_attempts,
        }
    }

    /// Stores a fresh copy of `notification` under a newly generated id and
    /// stamps its admission time.
    pub fn insert(&self, mut notification: Notification) -> Result<Uuid, GatewayError> {
        let mut entries = self.entries.write();

        for _ in 0..self.max_insert_attempts {
            let id = (self.next_id)();
            if entries.contains_key(&id) {
                debug!(notification_id = %id, "Correlation id collision, regenerating");
                continue;
            }

            notification.id = id;
            notification.created_at = Utc::now();
            entries.insert(id, notification);
            return Ok(id);
        }

        Err(GatewayError::StoreExhausted {
            attempts: self.max_insert_attempts,
        })
    }

    /// Overwrites the snapshot for `id`, last write wins.
    ///
    /// Only existing entries are replaced. An unknown id is skipped instead of
    /// inserted so that no entry outlives its request: an outcome arriving
    /// after `delete` would otherwise sit in the map forever. Returns whether
    /// an entry was replaced.
    pub fn update(&self, id: Uuid, notification: Notification) -> bool {
        match self.entries.write().get_mut(&id) {
            Some(entry) => {
                *entry = notification;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<Notification> {
        self.entries.read().get(id).cloned()
    }

    pub fn delete(&self, id: &Uuid) {
        self.entries.write().remove(id);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for NotificationStore {
    fn default() -> Self {
        Self::new()
    }
}
