//! # Cuckoo Filter
//!
//! Fixed 16-bit fingerprints, bucket size 4, partial-key cuckooing: the
//! alternate bucket is `h1 XOR hash(fp)`. Insertion gives up after 500
//! eviction hops and reports the filter full. Deletions are supported,
//! which is the reason to pick cuckoo over Bloom.

use rand::Rng;
use serde::{Deserialize, Serialize};

use ccache_common::{CacheError, CacheResult, ValueKind};

use crate::db::Db;
use crate::prob::sketch::hash64;

const BUCKET_SLOTS: usize = 4;
const MAX_KICKS: usize = 500;
const FP_SEED: u64 = 0xcf_f1;
const INDEX_SEED: u64 = 0xcf_f2;
const ALT_SEED: u64 = 0xcf_f3;

/// Bytes of bucket payload per SCANDUMP chunk.
const DUMP_CHUNK_BYTES: usize = 4096;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CuckooFilter {
    /// Flattened `n_buckets x BUCKET_SLOTS` slots; 0 means empty.
    slots: Vec<u16>,
    n_buckets: usize,
    items: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct DumpHeader {
    n_buckets: u64,
    items: u64,
}

impl CuckooFilter {
    /// Capacity rounds up to a power-of-two bucket count.
    pub fn new(capacity: u64) -> CacheResult<Self> {
        if capacity == 0 {
            return Err(CacheError::other("capacity should be larger than 0"));
        }
        let n_buckets = ((capacity as usize + BUCKET_SLOTS - 1) / BUCKET_SLOTS)
            .next_power_of_two()
            .max(1);
        Ok(CuckooFilter {
            slots: vec![0; n_buckets * BUCKET_SLOTS],
            n_buckets,
            items: 0,
        })
    }

    fn fingerprint(data: &[u8]) -> u16 {
        let fp = (hash64(data, FP_SEED) & 0xffff) as u16;
        if fp == 0 {
            1
        } else {
            fp
        }
    }

    fn index1(&self, data: &[u8]) -> usize {
        (hash64(data, INDEX_SEED) as usize) & (self.n_buckets - 1)
    }

    fn alt_index(&self, index: usize, fp: u16) -> usize {
        let fp_hash = hash64(&fp.to_le_bytes(), ALT_SEED) as usize;
        (index ^ fp_hash) & (self.n_buckets - 1)
    }

    fn bucket(&self, index: usize) -> &[u16] {
        &self.slots[index * BUCKET_SLOTS..(index + 1) * BUCKET_SLOTS]
    }

    fn bucket_mut(&mut self, index: usize) -> &mut [u16] {
        &mut self.slots[index * BUCKET_SLOTS..(index + 1) * BUCKET_SLOTS]
    }

    fn try_insert(&mut self, index: usize, fp: u16) -> bool {
        for slot in self.bucket_mut(index) {
            if *slot == 0 {
                *slot = fp;
                return true;
            }
        }
        false
    }

    /// Inserts one item (duplicates allowed). Errors when the eviction
    /// budget runs out.
    pub fn add(&mut self, data: &[u8]) -> CacheResult<()> {
        let fp = Self::fingerprint(data);
        let i1 = self.index1(data);
        let i2 = self.alt_index(i1, fp);

        if self.try_insert(i1, fp) || self.try_insert(i2, fp) {
            self.items += 1;
            return Ok(());
        }

        // Evict a random resident fingerprint and relocate it.
        let mut rng = rand::thread_rng();
        let mut index = if rng.gen_bool(0.5) { i1 } else { i2 };
        let mut fp = fp;
        for _ in 0..MAX_KICKS {
            let victim_slot = rng.gen_range(0..BUCKET_SLOTS);
            let bucket = self.bucket_mut(index);
            std::mem::swap(&mut bucket[victim_slot], &mut fp);

            index = self.alt_index(index, fp);
            if self.try_insert(index, fp) {
                self.items += 1;
                return Ok(());
            }
        }
        Err(CacheError::FilterFull)
    }

    /// Insert only when no matching fingerprint is present. Returns whether
    /// an insert happened.
    pub fn add_if_absent(&mut self, data: &[u8]) -> CacheResult<bool> {
        if self.contains(data) {
            return Ok(false);
        }
        self.add(data)?;
        Ok(true)
    }

    pub fn contains(&self, data: &[u8]) -> bool {
        self.count(data) > 0
    }

    /// Number of matching fingerprints across both candidate buckets.
    pub fn count(&self, data: &[u8]) -> u64 {
        let fp = Self::fingerprint(data);
        let i1 = self.index1(data);
        let i2 = self.alt_index(i1, fp);

        let mut matches = self.bucket(i1).iter().filter(|&&s| s == fp).count();
        if i2 != i1 {
            matches += self.bucket(i2).iter().filter(|&&s| s == fp).count();
        }
        matches as u64
    }

    /// Removes one matching fingerprint. Returns whether one was removed.
    pub fn delete(&mut self, data: &[u8]) -> bool {
        let fp = Self::fingerprint(data);
        let i1 = self.index1(data);
        let i2 = self.alt_index(i1, fp);

        for index in [i1, i2] {
            for slot in self.bucket_mut(index) {
                if *slot == fp {
                    *slot = 0;
                    self.items = self.items.saturating_sub(1);
                    return true;
                }
            }
            if i1 == i2 {
                break;
            }
        }
        false
    }

    pub fn items(&self) -> u64 {
        self.items
    }

    pub fn n_buckets(&self) -> usize {
        self.n_buckets
    }

    fn slot_bytes(&self) -> Vec<u8> {
        self.slots.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    /// SCANDUMP step; same protocol as the Bloom filter.
    pub fn scan_dump(&self, iterator: u64) -> (u64, Vec<u8>) {
        if iterator == 0 {
            let header = DumpHeader {
                n_buckets: self.n_buckets as u64,
                items: self.items,
            };
            return (1, bincode::serialize(&header).expect("serializable header"));
        }
        let data = self.slot_bytes();
        let offset = (iterator as usize - 1) * DUMP_CHUNK_BYTES;
        if offset >= data.len() {
            return (0, Vec::new());
        }
        let end = (offset + DUMP_CHUNK_BYTES).min(data.len());
        (iterator + 1, data[offset..end].to_vec())
    }

    pub fn load_chunk(&mut self, iterator: u64, chunk: &[u8]) -> CacheResult<()> {
        if iterator == 0 {
            return Err(CacheError::other("invalid dump iterator"));
        }
        if iterator == 1 {
            let header: DumpHeader = bincode::deserialize(chunk)
                .map_err(|_| CacheError::other("corrupt filter header"))?;
            self.n_buckets = header.n_buckets as usize;
            self.items = header.items;
            self.slots = vec![0; self.n_buckets * BUCKET_SLOTS];
            return Ok(());
        }

        let offset = (iterator as usize - 2) * DUMP_CHUNK_BYTES;
        for (i, byte) in chunk.iter().enumerate() {
            let pos = offset + i;
            let slot = pos / 2;
            if slot >= self.slots.len() {
                return Err(CacheError::other("chunk beyond filter bounds"));
            }
            self.slots[slot] |= (*byte as u16) << ((pos % 2) * 8);
        }
        Ok(())
    }
}

impl Db {
    /// CF.RESERVE. Errors when the key already exists.
    pub fn cf_reserve(&self, key: &str, capacity: u64) -> CacheResult<()> {
        self.expire_if_due(key);
        if self.keyspace.kind_of(key).is_some() {
            return Err(CacheError::other("item exists"));
        }
        let filter = CuckooFilter::new(capacity)?;
        self.keyspace.claim(key, ValueKind::Cuckoo)?;
        self.keyspace.cuckoo.load_or_store(key, move || filter);
        self.touch_write(key);
        Ok(())
    }

    /// CF.ADD. Creates a default filter on demand.
    pub fn cf_add(&self, key: &str, item: &str) -> CacheResult<()> {
        let body = self.cf_body_or_default(key)?;
        body.write().add(item.as_bytes())?;
        self.touch_write(key);
        Ok(())
    }

    /// CF.ADDNX. Returns whether the item was inserted.
    pub fn cf_add_nx(&self, key: &str, item: &str) -> CacheResult<bool> {
        let body = self.cf_body_or_default(key)?;
        let inserted = body.write().add_if_absent(item.as_bytes())?;
        if inserted {
            self.touch_write(key);
        }
        Ok(inserted)
    }

    pub fn cf_del(&self, key: &str, item: &str) -> CacheResult<bool> {
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::Cuckoo)? {
            return Err(CacheError::other("not found"));
        }
        let body = self
            .keyspace
            .cuckoo
            .load(key)
            .ok_or(CacheError::NoSuchKey)?;
        let removed = body.write().delete(item.as_bytes());
        if removed {
            self.touch_write(key);
        }
        Ok(removed)
    }

    pub fn cf_count(&self, key: &str, item: &str) -> CacheResult<u64> {
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::Cuckoo)? {
            return Ok(0);
        }
        Ok(self
            .keyspace
            .cuckoo
            .load(key)
            .map(|body| body.read().count(item.as_bytes()))
            .unwrap_or(0))
    }

    pub fn cf_exists(&self, key: &str, item: &str) -> CacheResult<bool> {
        Ok(self.cf_count(key, item)? > 0)
    }

    /// CF.INFO: (bucket count, items).
    pub fn cf_info(&self, key: &str) -> CacheResult<(u64, u64)> {
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::Cuckoo)? {
            return Err(CacheError::other("not found"));
        }
        let body = self
            .keyspace
            .cuckoo
            .load(key)
            .ok_or(CacheError::NoSuchKey)?;
        let filter = body.read();
        Ok((filter.n_buckets() as u64, filter.items()))
    }

    pub fn cf_scandump(&self, key: &str, iterator: u64) -> CacheResult<(u64, Vec<u8>)> {
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::Cuckoo)? {
            return Err(CacheError::other("not found"));
        }
        let body = self
            .keyspace
            .cuckoo
            .load(key)
            .ok_or(CacheError::NoSuchKey)?;
        let result = body.read().scan_dump(iterator);
        Ok(result)
    }

    pub fn cf_loadchunk(&self, key: &str, iterator: u64, chunk: &[u8]) -> CacheResult<()> {
        let body = self.cf_body_or_default(key)?;
        body.write().load_chunk(iterator, chunk)?;
        self.touch_write(key);
        Ok(())
    }

    fn cf_body_or_default(&self, key: &str) -> CacheResult<crate::shard::Body<CuckooFilter>> {
        self.expire_if_due(key);
        self.keyspace.claim(key, ValueKind::Cuckoo)?;
        Ok(self.keyspace.cuckoo.load_or_store(key, || {
            CuckooFilter::new(1024).expect("default capacity is valid")
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_contains_delete_roundtrip() {
        let mut filter = CuckooFilter::new(1024).unwrap();
        filter.add(b"alpha").unwrap();
        filter.add(b"beta").unwrap();

        assert!(filter.contains(b"alpha"));
        assert!(filter.contains(b"beta"));
        assert!(!filter.contains(b"gamma"));

        assert!(filter.delete(b"alpha"));
        assert!(!filter.delete(b"alpha"));
        assert!(!filter.contains(b"alpha"));
    }

    #[test]
    fn count_tracks_duplicates() {
        let mut filter = CuckooFilter::new(1024).unwrap();
        filter.add(b"dup").unwrap();
        filter.add(b"dup").unwrap();
        filter.add(b"dup").unwrap();
        assert_eq!(filter.count(b"dup"), 3);

        filter.delete(b"dup");
        assert_eq!(filter.count(b"dup"), 2);
    }

    #[test]
    fn add_if_absent_inserts_once() {
        let mut filter = CuckooFilter::new(1024).unwrap();
        assert!(filter.add_if_absent(b"x").unwrap());
        assert!(!filter.add_if_absent(b"x").unwrap());
        assert_eq!(filter.items(), 1);
    }

    #[test]
    fn overfull_filter_reports_full() {
        // Tiny filter: one bucket pair's 8 slots cannot absorb hundreds of
        // distinct items.
        let mut filter = CuckooFilter::new(4).unwrap();
        let mut full = false;
        for i in 0..512 {
            if filter.add(format!("item-{}", i).as_bytes()) == Err(CacheError::FilterFull) {
                full = true;
                break;
            }
        }
        assert!(full);
    }

    #[test]
    fn dump_and_load_restore_membership() {
        let mut filter = CuckooFilter::new(512).unwrap();
        for i in 0..200 {
            filter.add(format!("item-{}", i).as_bytes()).unwrap();
        }

        let mut restored = CuckooFilter::new(4).unwrap();
        let mut iterator = 0;
        loop {
            let (next, chunk) = filter.scan_dump(iterator);
            if next == 0 {
                break;
            }
            restored.load_chunk(next, &chunk).unwrap();
            iterator = next;
        }
        for i in 0..200 {
            assert!(restored.contains(format!("item-{}", i).as_bytes()));
        }
        assert_eq!(restored.items(), filter.items());
    }

    #[test]
    fn cf_commands_roundtrip() {
        let db = Db::new();
        db.cf_reserve("f", 128).unwrap();
        db.cf_add("f", "a").unwrap();
        assert!(db.cf_exists("f", "a").unwrap());
        assert!(!db.cf_exists("f", "b").unwrap());

        assert!(!db.cf_add_nx("f", "a").unwrap());
        assert!(db.cf_add_nx("f", "b").unwrap());

        assert!(db.cf_del("f", "a").unwrap());
        assert!(!db.cf_exists("f", "a").unwrap());

        let (buckets, items) = db.cf_info("f").unwrap();
        assert!(buckets >= 32);
        assert_eq!(items, 1);
    }
}
