//! # Bloom Filter
//!
//! Parameters derive from (capacity, error rate): `m = -n·ln(p)/(ln 2)²`
//! bits and `k = (m/n)·ln 2` probes by double hashing. Dumps serialize the
//! complete state, bitset included; a config-only dump cannot restore
//! membership.

use serde::{Deserialize, Serialize};

use ccache_common::{CacheError, CacheResult, ValueKind};

use crate::db::Db;
use crate::prob::sketch::hash_pair;

/// Bytes of bitset payload per SCANDUMP chunk.
const DUMP_CHUNK_BYTES: usize = 4096;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BloomFilter {
    capacity: u64,
    error_rate: f64,
    n_bits: u64,
    n_hashes: u32,
    words: Vec<u64>,
    inserted: u64,
}

/// Header chunk of a SCANDUMP sequence.
#[derive(Debug, Serialize, Deserialize)]
struct DumpHeader {
    capacity: u64,
    error_rate: f64,
    n_bits: u64,
    n_hashes: u32,
    inserted: u64,
}

impl BloomFilter {
    /// `error_rate` must be in (0, 1) and `capacity` non-zero.
    pub fn new(error_rate: f64, capacity: u64) -> CacheResult<Self> {
        if !(error_rate > 0.0 && error_rate < 1.0) {
            return Err(CacheError::BadErrorRate);
        }
        if capacity == 0 {
            return Err(CacheError::other("capacity should be larger than 0"));
        }

        let ln2 = std::f64::consts::LN_2;
        let n_bits = ((-(capacity as f64) * error_rate.ln()) / (ln2 * ln2)).ceil() as u64;
        let n_bits = n_bits.max(64);
        let n_hashes = (((n_bits as f64 / capacity as f64) * ln2).round() as u32).max(1);

        Ok(BloomFilter {
            capacity,
            error_rate,
            n_bits,
            n_hashes,
            words: vec![0; ((n_bits + 63) / 64) as usize],
            inserted: 0,
        })
    }

    fn bit_positions(&self, data: &[u8]) -> impl Iterator<Item = u64> + '_ {
        let (h1, h2) = hash_pair(data);
        let n_bits = self.n_bits;
        (0..self.n_hashes as u64).map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % n_bits)
    }

    /// Returns true when at least one probe bit was newly set (the item was
    /// not already present).
    pub fn add(&mut self, data: &[u8]) -> bool {
        let positions: Vec<u64> = self.bit_positions(data).collect();
        let mut fresh = false;
        for bit in positions {
            let word = (bit / 64) as usize;
            let mask = 1u64 << (bit % 64);
            if self.words[word] & mask == 0 {
                self.words[word] |= mask;
                fresh = true;
            }
        }
        if fresh {
            self.inserted += 1;
        }
        fresh
    }

    pub fn contains(&self, data: &[u8]) -> bool {
        self.bit_positions(data)
            .all(|bit| self.words[(bit / 64) as usize] & (1u64 << (bit % 64)) != 0)
    }

    /// Cardinality estimate from the set-bit ratio:
    /// `-(m/k)·ln(1 - X/m)`.
    pub fn approximate_count(&self) -> u64 {
        let set_bits: u64 = self.words.iter().map(|w| w.count_ones() as u64).sum();
        if set_bits == 0 {
            return 0;
        }
        let m = self.n_bits as f64;
        let ratio = set_bits as f64 / m;
        if ratio >= 1.0 {
            return self.capacity;
        }
        (-(m / self.n_hashes as f64) * (1.0 - ratio).ln()).round() as u64
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn error_rate(&self) -> f64 {
        self.error_rate
    }

    pub fn n_bits(&self) -> u64 {
        self.n_bits
    }

    pub fn n_hashes(&self) -> u32 {
        self.n_hashes
    }

    pub fn inserted(&self) -> u64 {
        self.inserted
    }

    fn bitset_bytes(&self) -> Vec<u8> {
        self.words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    /// SCANDUMP step. Iterator 0 yields the header; subsequent iterators
    /// index bitset chunks. `(0, empty)` terminates.
    pub fn scan_dump(&self, iterator: u64) -> (u64, Vec<u8>) {
        if iterator == 0 {
            let header = DumpHeader {
                capacity: self.capacity,
                error_rate: self.error_rate,
                n_bits: self.n_bits,
                n_hashes: self.n_hashes,
                inserted: self.inserted,
            };
            return (1, bincode::serialize(&header).expect("serializable header"));
        }

        let data = self.bitset_bytes();
        let offset = (iterator as usize - 1) * DUMP_CHUNK_BYTES;
        if offset >= data.len() {
            return (0, Vec::new());
        }
        let end = (offset + DUMP_CHUNK_BYTES).min(data.len());
        (iterator + 1, data[offset..end].to_vec())
    }

    /// LOADCHUNK inverse of `scan_dump`.
    pub fn load_chunk(&mut self, iterator: u64, chunk: &[u8]) -> CacheResult<()> {
        if iterator == 0 {
            return Err(CacheError::other("invalid dump iterator"));
        }
        if iterator == 1 {
            let header: DumpHeader = bincode::deserialize(chunk)
                .map_err(|_| CacheError::other("corrupt filter header"))?;
            *self = BloomFilter {
                capacity: header.capacity,
                error_rate: header.error_rate,
                n_bits: header.n_bits,
                n_hashes: header.n_hashes,
                words: vec![0; ((header.n_bits + 63) / 64) as usize],
                inserted: header.inserted,
            };
            return Ok(());
        }

        let offset = (iterator as usize - 2) * DUMP_CHUNK_BYTES;
        for (i, byte) in chunk.iter().enumerate() {
            let pos = offset + i;
            let word = pos / 8;
            if word >= self.words.len() {
                return Err(CacheError::other("chunk beyond filter bounds"));
            }
            self.words[word] |= (*byte as u64) << ((pos % 8) * 8);
        }
        Ok(())
    }
}

impl Db {
    /// BF.RESERVE. Errors when the key already exists.
    pub fn bf_reserve(&self, key: &str, error_rate: f64, capacity: u64) -> CacheResult<()> {
        self.expire_if_due(key);
        if self.keyspace.kind_of(key).is_some() {
            return Err(CacheError::other("item exists"));
        }
        let filter = BloomFilter::new(error_rate, capacity)?;
        self.keyspace.claim(key, ValueKind::Bloom)?;
        self.keyspace.bloom.load_or_store(key, move || filter);
        self.touch_write(key);
        Ok(())
    }

    /// BF.ADD / BF.MADD. Creates a default filter on demand.
    pub fn bf_add(&self, key: &str, items: &[String]) -> CacheResult<Vec<bool>> {
        self.expire_if_due(key);
        self.keyspace.claim(key, ValueKind::Bloom)?;
        let body = self.keyspace.bloom.load_or_store(key, || {
            BloomFilter::new(0.01, 1000).expect("default parameters are valid")
        });
        let mut filter = body.write();
        let results: Vec<bool> = items.iter().map(|i| filter.add(i.as_bytes())).collect();
        drop(filter);
        if results.iter().any(|&fresh| fresh) {
            self.touch_write(key);
        }
        Ok(results)
    }

    pub fn bf_exists(&self, key: &str, items: &[String]) -> CacheResult<Vec<bool>> {
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::Bloom)? {
            return Ok(vec![false; items.len()]);
        }
        let Some(body) = self.keyspace.bloom.load(key) else {
            return Ok(vec![false; items.len()]);
        };
        let filter = body.read();
        Ok(items.iter().map(|i| filter.contains(i.as_bytes())).collect())
    }

    /// BF.CARD: estimate from the set-bit ratio.
    pub fn bf_card(&self, key: &str) -> CacheResult<u64> {
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::Bloom)? {
            return Ok(0);
        }
        Ok(self
            .keyspace
            .bloom
            .load(key)
            .map(|body| body.read().approximate_count())
            .unwrap_or(0))
    }

    /// BF.INFO: (capacity, error rate, bits, hashes, inserted).
    pub fn bf_info(&self, key: &str) -> CacheResult<(u64, f64, u64, u32, u64)> {
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::Bloom)? {
            return Err(CacheError::other("not found"));
        }
        let body = self.keyspace.bloom.load(key).ok_or(CacheError::NoSuchKey)?;
        let filter = body.read();
        Ok((
            filter.capacity(),
            filter.error_rate(),
            filter.n_bits(),
            filter.n_hashes(),
            filter.inserted(),
        ))
    }

    pub fn bf_scandump(&self, key: &str, iterator: u64) -> CacheResult<(u64, Vec<u8>)> {
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::Bloom)? {
            return Err(CacheError::other("not found"));
        }
        let body = self.keyspace.bloom.load(key).ok_or(CacheError::NoSuchKey)?;
        let filter = body.read();
        Ok(filter.scan_dump(iterator))
    }

    pub fn bf_loadchunk(&self, key: &str, iterator: u64, chunk: &[u8]) -> CacheResult<()> {
        self.expire_if_due(key);
        self.keyspace.claim(key, ValueKind::Bloom)?;
        let body = self.keyspace.bloom.load_or_store(key, || {
            BloomFilter::new(0.01, 1000).expect("default parameters are valid")
        });
        body.write().load_chunk(iterator, chunk)?;
        self.touch_write(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameters_follow_formulas() {
        let filter = BloomFilter::new(0.01, 10_000).unwrap();
        // m = -n ln p / (ln 2)^2 ≈ 95850 bits, k ≈ 7.
        assert!((filter.n_bits() as i64 - 95_851).abs() < 128);
        assert_eq!(filter.n_hashes(), 7);

        assert_eq!(
            BloomFilter::new(0.0, 10).err(),
            Some(CacheError::BadErrorRate)
        );
        assert_eq!(
            BloomFilter::new(1.5, 10).err(),
            Some(CacheError::BadErrorRate)
        );
    }

    #[test]
    fn added_items_are_always_found() {
        let mut filter = BloomFilter::new(0.01, 1_000).unwrap();
        for i in 0..1_000 {
            filter.add(format!("item-{}", i).as_bytes());
        }
        for i in 0..1_000 {
            assert!(filter.contains(format!("item-{}", i).as_bytes()));
        }
    }

    #[test]
    fn false_positive_rate_within_envelope() {
        let mut filter = BloomFilter::new(0.01, 10_000).unwrap();
        for i in 0..10_000 {
            filter.add(format!("present-{}", i).as_bytes());
        }

        let false_positives = (0..10_000)
            .filter(|i| filter.contains(format!("absent-{}", i).as_bytes()))
            .count();
        let rate = false_positives as f64 / 10_000.0;
        assert!(rate <= 0.02, "observed fp rate {}", rate);
    }

    #[test]
    fn approximate_count_tracks_inserts() {
        let mut filter = BloomFilter::new(0.01, 10_000).unwrap();
        for i in 0..5_000 {
            filter.add(format!("item-{}", i).as_bytes());
        }
        let estimate = filter.approximate_count() as f64;
        assert!((estimate - 5_000.0).abs() / 5_000.0 < 0.05, "estimate {}", estimate);
    }

    #[test]
    fn dump_and_load_restore_membership() {
        let mut filter = BloomFilter::new(0.01, 2_000).unwrap();
        for i in 0..2_000 {
            filter.add(format!("item-{}", i).as_bytes());
        }

        let mut chunks = Vec::new();
        let mut iterator = 0;
        loop {
            let (next, chunk) = filter.scan_dump(iterator);
            if next == 0 {
                break;
            }
            chunks.push((next, chunk));
            iterator = next;
        }
        // Header plus at least one bitset chunk.
        assert!(chunks.len() >= 2);

        let mut restored = BloomFilter::new(0.5, 1).unwrap();
        for (next, chunk) in &chunks {
            restored.load_chunk(*next, chunk).unwrap();
        }
        for i in 0..2_000 {
            assert!(restored.contains(format!("item-{}", i).as_bytes()));
        }
        assert_eq!(restored.inserted(), filter.inserted());
    }

    #[test]
    fn bf_commands_roundtrip() {
        let db = Db::new();
        db.bf_reserve("f", 0.01, 100).unwrap();
        assert!(db.bf_reserve("f", 0.01, 100).is_err());

        let added = db.bf_add("f", &["a".to_string(), "a".to_string()]).unwrap();
        assert_eq!(added, vec![true, false]);

        let exists = db
            .bf_exists("f", &["a".to_string(), "nope".to_string()])
            .unwrap();
        assert_eq!(exists[0], true);

        let (capacity, rate, ..) = db.bf_info("f").unwrap();
        assert_eq!(capacity, 100);
        assert!((rate - 0.01).abs() < 1e-12);
    }
}
