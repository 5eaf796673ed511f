//! Ban storage.
//!
//! One ban record per client key, stored with a TTL matching its remaining
//! duration so the store drops it on its own. Reads also treat a record past
//! its end time as gone and purge it.

use crate::application::guarded::GuardedStore;
use crate::application::ports::{Clock, StoreError};
use crate::domain::ban::{BanRecord, BanSource, BanStatus};
use crate::domain::keys::KeySpace;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct BanStore {
    store: GuardedStore,
    keys: KeySpace,
    clock: Arc<dyn Clock>,
}

impl BanStore {
    pub fn new(store: GuardedStore, keys: KeySpace, clock: Arc<dyn Clock>) -> Self {
        Self { store, keys, clock }
    }

    /// Whether `identifier` is serving a ban right now.
    ///
    /// # Fail-Safe Behavior
    /// Reports "not banned" when the store cannot be read.
    pub fn check_ban(&self, identifier: &str) -> BanStatus {
        match self.active_ban(identifier) {
            Some(ban) => BanStatus::banned(ban),
            None => BanStatus::not_banned(),
        }
    }

    /// The active ban of `identifier`, purging an expired one.
    pub fn active_ban(&self, identifier: &str) -> Option<BanRecord> {
        self.load_active(identifier).ok().flatten()
    }

    fn load_active(&self, identifier: &str) -> Result<Option<BanRecord>, StoreError> {
        let key = self.keys.ban(identifier);
        let Some(ban) = self.store.get_record::<BanRecord>("ban_read", &key)? else {
            return Ok(None);
        };

        if ban.is_active_at(self.clock.now_millis()) {
            Ok(Some(ban))
        } else {
            let _ = self.store.call("ban_purge", |store| store.delete(&[key]));
            Ok(None)
        }
    }

    /// Store `ban` unless it would shorten an active penalty ban.
    ///
    /// Penalty bans only replace an active ban of a lower level. Admin bans
    /// always replace. Returns whether the ban was written.
    pub fn impose(&self, ban: &BanRecord) -> bool {
        if ban.source == BanSource::Penalty {
            // Without the current ban there is no telling whether this one
            // would shorten it
            match self.load_active(&ban.identifier) {
                Ok(Some(existing)) if existing.ban_level >= ban.ban_level => return false,
                Ok(_) => {}
                Err(_) => return false,
            }
        }

        let now = self.clock.now_millis();
        let ttl = ban.end_time.saturating_sub(now).max(1);
        let key = self.keys.ban(&ban.identifier);
        if self.store.put_record("ban_write", &key, ban, ttl).is_err() {
            return false;
        }
        self.store.metrics().record_ban();
        true
    }

    /// Lift any ban on `identifier`. Returns whether one existed.
    pub fn remove(&self, identifier: &str) -> bool {
        let key = self.keys.ban(identifier);
        self.store
            .call("ban_remove", |store| store.delete(&[key]))
            .map(|removed| removed > 0)
            .unwrap_or(false)
    }
}
