//! Time-boxed read cache in front of the list/search queries.
//!
//! The cache stores serialized JSON payloads under deterministic keys built
//! from entity, caller scope, location filter and pagination. Mutations
//! delete the key families their scope could have affected; search keys
//! embed their whole filter payload and are never deleted explicitly, they
//! only expire.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

/// Per-endpoint expiry windows.
pub const BUDGET_LIST_TTL: Duration = Duration::from_secs(30);
pub const EXPENSE_LIST_TTL: Duration = Duration::from_secs(30);
pub const REIMBURSEMENT_LIST_TTL: Duration = Duration::from_secs(45);
pub const SEARCH_TTL: Duration = Duration::from_secs(60);

/// A key/value store with per-entry TTL.
///
/// Any in-process or external store satisfies this; the engine only relies
/// on `get`/`set`/`del` plus prefix deletion so one mutation can drop a
/// whole paginated key family.
pub trait Cache: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String, ttl: Duration);
    fn del(&self, key: &str);
    fn del_prefix(&self, prefix: &str);
}

/// In-process [`Cache`] backed by a mutex-guarded map.
///
/// Entries are dropped lazily: an expired entry is evicted on the next
/// `get` that touches it.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (Instant, String)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Cache for MemoryCache {
    fn get(&self, key: &str) -> Option<String> {
        let Ok(mut entries) = self.entries.lock() else {
            return None;
        };
        match entries.get(key) {
            Some((expires_at, value)) if *expires_at > Instant::now() => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn set(&self, key: &str, value: String, ttl: Duration) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_string(), (Instant::now() + ttl, value));
        }
    }

    fn del(&self, key: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(key);
        }
    }

    fn del_prefix(&self, prefix: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.retain(|key, _| !key.starts_with(prefix));
        }
    }
}

/// Deterministic cache key composition.
///
/// `*_prefix` functions return the family prefix a mutation deletes.
pub mod keys {
    pub fn budgets_all(location: &str, page: u64, limit: u64) -> String {
        format!("budgets:all:{location}:{page}:{limit}")
    }

    pub fn budgets_all_prefix() -> String {
        "budgets:all:".to_string()
    }

    pub fn budgets_user(user_id: &str, location: &str, page: u64, limit: u64) -> String {
        format!("budgets:user:{user_id}:{location}:{page}:{limit}")
    }

    pub fn budgets_user_prefix(user_id: &str) -> String {
        format!("budgets:user:{user_id}:")
    }

    pub fn budgets_search(location: &str, page: u64, limit: u64, filter_json: &str) -> String {
        format!("budgets:search:{location}:{page}:{limit}:{filter_json}")
    }

    pub fn expenses_all(location: &str, page: u64, limit: u64) -> String {
        format!("expenses:all:{location}:{page}:{limit}")
    }

    pub fn expenses_all_prefix() -> String {
        "expenses:all:".to_string()
    }

    pub fn expenses_user(user_id: &str, location: &str, page: u64, limit: u64) -> String {
        format!("expenses:user:{user_id}:{location}:{page}:{limit}")
    }

    pub fn expenses_user_prefix(user_id: &str) -> String {
        format!("expenses:user:{user_id}:")
    }

    pub fn expenses_search(page: u64, limit: u64, filter_json: &str) -> String {
        format!("expenses:search:{page}:{limit}:{filter_json}")
    }

    pub fn reimbursements_all(location: &str, page: u64, limit: u64) -> String {
        format!("reimbursements:all:{location}:{page}:{limit}")
    }

    pub fn reimbursements_all_prefix() -> String {
        "reimbursements:all:".to_string()
    }

    pub fn reimbursements_user(user_id: &str) -> String {
        format!("reimbursements:user:{user_id}")
    }
}

/// Deletes every key family a mutation on `user_id`'s ledgers could have
/// made stale: the user-scoped views plus the unscoped admin views.
///
/// Search keys are left alone; they expire by TTL.
pub fn invalidate_user_views(cache: &dyn Cache, user_id: &str) {
    cache.del_prefix(&keys::budgets_user_prefix(user_id));
    cache.del_prefix(&keys::expenses_user_prefix(user_id));
    cache.del(&keys::reimbursements_user(user_id));
    cache.del_prefix(&keys::budgets_all_prefix());
    cache.del_prefix(&keys::expenses_all_prefix());
    cache.del_prefix(&keys::reimbursements_all_prefix());
}
