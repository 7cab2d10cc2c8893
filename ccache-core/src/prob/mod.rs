//! # Probabilistic Engines
//!
//! Sketch structures with their own operation families: HyperLogLog, Bloom
//! and cuckoo filters, count-min sketch, t-digest, Top-K, and the
//! autocomplete suggestion dictionary.

pub mod bloom;
pub mod cms;
pub mod cuckoo;
pub mod hll;
pub mod sketch;
pub mod suggest;
pub mod tdigest;
pub mod topk;
