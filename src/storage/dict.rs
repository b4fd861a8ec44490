//! Incrementally-rehashed hash table.
//!
//! A chained hash map that grows without ever stalling the caller: during a
//! resize both the old and the new table stay live, and every operation pays
//! for one small slice of the migration. The reactor thread therefore never
//! sees a latency spike proportional to the table size.
//!
//! ## How rehashing works
//!
//! Steady state holds a single table. When the load factor forces a grow,
//! a second table (at least twice the size) is allocated and a cursor starts
//! at bucket 0 of the old table. Each mutating call, and each lookup or
//! delete, migrates one whole bucket chain across. New insertions go
//! straight into the new table so migrated keys never move twice. Once the
//! old table empties it is dropped and the new table takes its place.
//!
//! Hashing comes from a [`BuildHasher`] bound at creation; equality from
//! `K: Eq`.

use rand::Rng;
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};
use thiserror::Error;

/// Slot count of a freshly allocated table.
const INITIAL_SIZE: usize = 8;
/// Load factor (`used / size`) beyond which a grow is forced.
const FORCE_RATIO: usize = 2;
/// Slot samples attempted by [`Dict::random_entry`] before giving up.
const RANDOM_SAMPLE_LIMIT: usize = 1000;

/// Errors surfaced by dictionary operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DictError {
    #[error("key already exists")]
    KeyExists,
    #[error("no such key")]
    KeyMissing,
    /// A resize was requested while one is already in flight. Growth is
    /// simply deferred; callers ignore this.
    #[error("resize already in progress")]
    ExpandRejected,
}

type Link<K, V> = Option<Box<Entry<K, V>>>;

#[derive(Debug)]
struct Entry<K, V> {
    key: K,
    val: V,
    next: Link<K, V>,
}

#[derive(Debug)]
struct Table<K, V> {
    slots: Vec<Link<K, V>>,
    mask: u64,
    used: usize,
}

impl<K, V> Table<K, V> {
    fn with_size(size: usize) -> Self {
        let mut slots = Vec::with_capacity(size);
        slots.resize_with(size, || None);
        Table {
            slots,
            mask: (size - 1) as u64,
            used: 0,
        }
    }

    fn size(&self) -> usize {
        self.slots.len()
    }
}

/// The two-table incremental dictionary.
#[derive(Debug)]
pub struct Dict<K, V, S = RandomState> {
    /// `tables[1]` exists only while a rehash is in flight.
    tables: [Option<Table<K, V>>; 2],
    /// Next bucket of `tables[0]` to migrate; `None` in steady state.
    rehash_idx: Option<usize>,
    hasher: S,
}

impl<K: Hash + Eq, V> Dict<K, V> {
    pub fn new() -> Self {
        Self::with_hasher(RandomState::new())
    }
}

impl<K: Hash + Eq, V> Default for Dict<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash + Eq, V, S: BuildHasher> Dict<K, V, S> {
    /// Creates an empty dictionary with an explicit hash policy.
    pub fn with_hasher(hasher: S) -> Self {
        Dict {
            tables: [None, None],
            rehash_idx: None,
            hasher,
        }
    }

    /// Live entries across both tables.
    pub fn len(&self) -> usize {
        self.tables.iter().flatten().map(|t| t.used).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_rehashing(&self) -> bool {
        self.rehash_idx.is_some()
    }

    /// Inserts a fresh key. Fails with [`DictError::KeyExists`] if the key
    /// is already present in either live table.
    pub fn add(&mut self, key: K, val: V) -> Result<(), DictError> {
        if self.is_rehashing() {
            self.rehash_step();
        }
        // A rejected grow only defers the resize; the insert proceeds.
        let _ = self.expand_if_needed();
        if self.find_ref(&key).is_some() {
            return Err(DictError::KeyExists);
        }
        let hash = self.hasher.hash_one(&key);
        // While rehashing, fresh keys go straight to the new table so they
        // are never migrated a second time.
        let target = usize::from(self.is_rehashing());
        let table = self.tables[target].get_or_insert_with(|| Table::with_size(INITIAL_SIZE));
        let slot = (hash & table.mask) as usize;
        let entry = Box::new(Entry {
            key,
            val,
            next: table.slots[slot].take(),
        });
        table.slots[slot] = Some(entry);
        table.used += 1;
        Ok(())
    }

    /// Upsert: replaces the value for an existing key (the previous value is
    /// dropped) or inserts a fresh entry.
    ///
    /// The existence probe takes no migration step, so either branch pays
    /// exactly one step like every other mutating call.
    pub fn set(&mut self, key: K, val: V) {
        if self.find_ref(&key).is_none() {
            let _ = self.add(key, val);
            return;
        }
        if let Some(current) = self.get_mut(&key) {
            *current = val;
        }
    }

    /// Looks the key up, paying one migration step if a resize is in flight.
    pub fn find(&mut self, key: &K) -> Option<(&K, &V)> {
        if self.is_rehashing() {
            self.rehash_step();
        }
        self.find_ref(key).map(|e| (&e.key, &e.val))
    }

    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.find(key).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        if self.is_rehashing() {
            self.rehash_step();
        }
        let hash = self.hasher.hash_one(key);
        for table in self.tables.iter_mut().flatten() {
            let slot = (hash & table.mask) as usize;
            let mut cur = &mut table.slots[slot];
            while let Some(entry) = cur {
                if entry.key == *key {
                    return Some(&mut entry.val);
                }
                cur = &mut entry.next;
            }
        }
        None
    }

    /// Removes the key. Fails with [`DictError::KeyMissing`] if absent.
    pub fn delete(&mut self, key: &K) -> Result<(), DictError> {
        if self.tables[0].is_none() {
            return Err(DictError::KeyMissing);
        }
        if self.is_rehashing() {
            self.rehash_step();
        }
        let hash = self.hasher.hash_one(key);
        for table in self.tables.iter_mut().flatten() {
            let slot = (hash & table.mask) as usize;
            if remove_from_chain(&mut table.slots[slot], key).is_some() {
                table.used -= 1;
                return Ok(());
            }
        }
        Err(DictError::KeyMissing)
    }

    /// Picks an approximately uniform live entry, or `None` when empty.
    ///
    /// The slot is sampled uniformly (retrying over empty slots up to a
    /// bounded number of times), then a position along the chain is sampled
    /// uniformly.
    pub fn random_entry(&mut self) -> Option<(&K, &V)> {
        self.tables[0].as_ref()?;
        let mut target = 0;
        if self.is_rehashing() {
            self.rehash_step();
            // The step may have finished the migration; only prefer the new
            // table while it still exists and holds the majority.
            if let (Some(t0), Some(t1)) = (self.tables[0].as_ref(), self.tables[1].as_ref()) {
                if t1.used > t0.used {
                    target = 1;
                }
            }
        }
        let table = self.tables[target].as_ref()?;
        let mut rng = rand::thread_rng();
        let mut slot = rng.gen_range(0..table.size());
        let mut attempts = 0;
        while table.slots[slot].is_none() && attempts < RANDOM_SAMPLE_LIMIT {
            slot = rng.gen_range(0..table.size());
            attempts += 1;
        }
        let head = table.slots[slot].as_deref()?;

        let mut chain_len = 0;
        let mut probe = Some(head);
        while let Some(entry) = probe {
            chain_len += 1;
            probe = entry.next.as_deref();
        }
        let pick = rng.gen_range(0..chain_len);
        let mut entry = head;
        for _ in 0..pick {
            entry = entry.next.as_deref()?;
        }
        Some((&entry.key, &entry.val))
    }

    /// Search without side effects, table 0 first.
    fn find_ref(&self, key: &K) -> Option<&Entry<K, V>> {
        let hash = self.hasher.hash_one(key);
        for table in self.tables.iter().flatten() {
            let slot = (hash & table.mask) as usize;
            let mut cur = &table.slots[slot];
            while let Some(entry) = cur {
                if entry.key == *key {
                    return Some(entry);
                }
                cur = &entry.next;
            }
        }
        None
    }

    fn rehash_step(&mut self) {
        self.rehash(1);
    }

    /// Migrates up to `steps` whole bucket chains from table 0 to table 1,
    /// promoting table 1 once table 0 is drained.
    fn rehash(&mut self, mut steps: usize) {
        while steps > 0 {
            let Some(idx) = self.rehash_idx else { return };
            if self.tables[0].as_ref().map_or(true, |t| t.used == 0) {
                self.tables[0] = self.tables[1].take();
                self.rehash_idx = None;
                return;
            }

            let Dict {
                tables,
                rehash_idx,
                hasher,
            } = self;
            let [front, back] = tables;
            let (Some(t0), Some(t1)) = (front.as_mut(), back.as_mut()) else {
                return;
            };

            // Buckets below the cursor are already drained; `used > 0`
            // guarantees a non-empty bucket at or past it.
            let mut idx = idx;
            while t0.slots[idx].is_none() {
                idx += 1;
            }

            let mut chain = t0.slots[idx].take();
            while let Some(mut entry) = chain {
                chain = entry.next.take();
                let slot = (hasher.hash_one(&entry.key) & t1.mask) as usize;
                entry.next = t1.slots[slot].take();
                t1.slots[slot] = Some(entry);
                t0.used -= 1;
                t1.used += 1;
            }
            *rehash_idx = Some(idx + 1);
            steps -= 1;
        }
    }

    /// Allocates the initial table, or starts a grow to `2 * size` once the
    /// load factor exceeds [`FORCE_RATIO`].
    fn expand_if_needed(&mut self) -> Result<(), DictError> {
        if self.is_rehashing() {
            return Ok(());
        }
        let Some(t0) = self.tables[0].as_ref() else {
            return self.expand(INITIAL_SIZE);
        };
        if t0.used > t0.size() && t0.used / t0.size() > FORCE_RATIO {
            return self.expand(t0.size() * 2);
        }
        Ok(())
    }

    fn expand(&mut self, size: usize) -> Result<(), DictError> {
        let target = next_power(size);
        if self.is_rehashing() || self.tables[0].as_ref().map_or(false, |t| t.size() >= target) {
            return Err(DictError::ExpandRejected);
        }
        let table = Table::with_size(target);
        if self.tables[0].is_none() {
            self.tables[0] = Some(table);
        } else {
            self.tables[1] = Some(table);
            self.rehash_idx = Some(0);
        }
        Ok(())
    }
}

/// Smallest power of two that is both >= `size` and >= the initial size.
fn next_power(size: usize) -> usize {
    let mut n = INITIAL_SIZE;
    while n < size {
        n <<= 1;
    }
    n
}

/// Unlinks the entry matching `key` from a bucket chain, if present.
/// Chain order is not preserved; nothing observes it.
fn remove_from_chain<K: Eq, V>(slot: &mut Link<K, V>, key: &K) -> Option<Box<Entry<K, V>>> {
    let mut removed = None;
    let mut rest = slot.take();
    while let Some(mut entry) = rest {
        rest = entry.next.take();
        if removed.is_none() && entry.key == *key {
            removed = Some(entry);
        } else {
            entry.next = slot.take();
            *slot = Some(entry);
        }
    }
    removed
}

#[cfg(test)]
impl<K: Hash + Eq, V, S: BuildHasher> Dict<K, V, S> {
    fn table_size(&self, i: usize) -> Option<usize> {
        self.tables[i].as_ref().map(Table::size)
    }

    fn table_used(&self, i: usize) -> Option<usize> {
        self.tables[i].as_ref().map(|t| t.used)
    }

    fn table_mask(&self, i: usize) -> Option<u64> {
        self.tables[i].as_ref().map(|t| t.mask)
    }

    fn rehash_cursor(&self) -> Option<usize> {
        self.rehash_idx
    }

    fn nonempty_slots(&self, i: usize) -> usize {
        self.tables[i]
            .as_ref()
            .map_or(0, |t| t.slots.iter().filter(|s| s.is_some()).count())
    }

    fn chain_total(&self, i: usize) -> usize {
        let Some(table) = self.tables[i].as_ref() else {
            return 0;
        };
        let mut total = 0;
        for slot in &table.slots {
            let mut cur = slot;
            while let Some(entry) = cur {
                total += 1;
                cur = &entry.next;
            }
        }
        total
    }

    fn keys_of(&self, i: usize) -> Vec<&K> {
        let mut keys = Vec::new();
        if let Some(table) = self.tables[i].as_ref() {
            for slot in &table.slots {
                let mut cur = slot;
                while let Some(entry) = cur {
                    keys.push(&entry.key);
                    cur = &entry.next;
                }
            }
        }
        keys
    }
}
