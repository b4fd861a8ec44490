//! The keyspace: a data dictionary plus an expiration dictionary.
//!
//! Expirations live in their own dict, keyed like the data and valued with
//! absolute millisecond deadlines (stored as string-tagged integers). A key
//! with no expire entry is permanent. Expired keys are reclaimed two ways:
//! lazily on access, and actively by a bounded random sweep the server cron
//! runs every tick.

use crate::reactor::now_ms;
use crate::storage::dict::Dict;
use crate::storage::object::Value;
use bytes::Bytes;
use tracing::trace;

/// Upper bound on expire-map samples per active sweep.
pub const EXPIRE_CHECK_COUNT: usize = 100;

pub struct Db {
    pub data: Dict<Bytes, Value>,
    pub expire: Dict<Bytes, Value>,
}

impl Db {
    pub fn new() -> Self {
        Db {
            data: Dict::new(),
            expire: Dict::new(),
        }
    }

    /// Lazily drops the key from both dictionaries if its deadline has
    /// passed. Called on every read path before the data lookup.
    pub fn expire_if_needed(&mut self, key: &Bytes) {
        let Some(when) = self.expire.get(key).map(Value::as_int) else {
            return;
        };
        if when > now_ms() {
            return;
        }
        let _ = self.expire.delete(key);
        let _ = self.data.delete(key);
        trace!(key = %String::from_utf8_lossy(key), "lazily expired key");
    }

    /// Read-path lookup: expiration check first, then the data dict.
    pub fn lookup_read(&mut self, key: &Bytes) -> Option<&Value> {
        self.expire_if_needed(key);
        self.data.get(key)
    }

    /// Attaches an absolute millisecond deadline to the key.
    pub fn set_expire(&mut self, key: Bytes, deadline_ms: i64) {
        self.expire.set(key, Value::from_int(deadline_ms));
    }

    /// Samples up to `limit` random expire entries and removes those whose
    /// deadline has passed. Returns how many keys were dropped.
    pub fn sweep_expired(&mut self, limit: usize) -> usize {
        let now = now_ms();
        let mut removed = 0;
        for _ in 0..limit {
            let stale = match self.expire.random_entry() {
                None => break,
                Some((key, deadline)) if deadline.as_int() <= now => Some(key.clone()),
                Some(_) => None,
            };
            if let Some(key) = stale {
                let _ = self.data.delete(&key);
                let _ = self.expire.delete(&key);
                removed += 1;
            }
        }
        removed
    }
}

impl Default for Db {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bkey(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn permanent_keys_survive_reads_and_sweeps() {
        let mut db = Db::new();
        db.data.set(bkey("k"), Value::str("v"));
        assert_eq!(db.lookup_read(&bkey("k")), Some(&Value::str("v")));
        assert_eq!(db.sweep_expired(EXPIRE_CHECK_COUNT), 0);
        assert_eq!(db.lookup_read(&bkey("k")), Some(&Value::str("v")));
    }

    #[test]
    fn past_deadline_expires_on_access() {
        let mut db = Db::new();
        db.data.set(bkey("k"), Value::str("v"));
        db.set_expire(bkey("k"), now_ms() - 1);
        assert_eq!(db.lookup_read(&bkey("k")), None);
        // Both dictionaries dropped the key.
        assert_eq!(db.data.len(), 0);
        assert_eq!(db.expire.len(), 0);
    }

    #[test]
    fn future_deadline_leaves_the_key_alone() {
        let mut db = Db::new();
        db.data.set(bkey("k"), Value::str("v"));
        db.set_expire(bkey("k"), now_ms() + 60_000);
        assert_eq!(db.lookup_read(&bkey("k")), Some(&Value::str("v")));
        assert_eq!(db.sweep_expired(EXPIRE_CHECK_COUNT), 0);
        assert_eq!(db.data.len(), 1);
        assert_eq!(db.expire.len(), 1);
    }

    #[test]
    fn sweep_drains_expired_keys() {
        let mut db = Db::new();
        for i in 0..20 {
            let key = bkey(&format!("k{i}"));
            db.data.set(key.clone(), Value::str("v"));
            db.set_expire(key, now_ms() - 1);
        }
        db.data.set(bkey("keep"), Value::str("v"));

        let removed = db.sweep_expired(EXPIRE_CHECK_COUNT);
        assert_eq!(removed, 20);
        assert_eq!(db.data.len(), 1);
        assert_eq!(db.expire.len(), 0);
        assert_eq!(db.lookup_read(&bkey("keep")), Some(&Value::str("v")));
    }

    #[test]
    fn deadline_is_stored_as_a_string_tagged_integer() {
        let mut db = Db::new();
        db.set_expire(bkey("k"), 1234);
        let stored = db.expire.get(&bkey("k")).expect("deadline stored");
        assert_eq!(stored.as_int(), 1234);
        assert!(stored.as_str().is_some());
    }
}
