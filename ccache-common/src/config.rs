//! # Configuration
//!
//! Plain structs with defaults; the server binary overrides fields from
//! environment variables. No config-file machinery.

use std::time::Duration;

/// Tunables for the core engine and its background tasks.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Cadence of the expiration sweeper.
    pub sweep_interval: Duration,
    /// Maximum expiration entries examined per sweep tick.
    pub sweep_sample: usize,
    /// Cadence of the defragmenter.
    pub defrag_interval: Duration,
    /// Fragmentation ratio above which the defragmenter rebuilds shards.
    pub frag_threshold: f64,
    /// Optional memory ceiling in bytes; exceeding it evicts string keys.
    pub max_memory: Option<usize>,
    /// Capacity of the compiled glob-pattern cache.
    pub pattern_cache_size: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig {
            sweep_interval: Duration::from_secs(1),
            sweep_sample: 64,
            defrag_interval: Duration::from_secs(30),
            frag_threshold: 1.5,
            max_memory: None,
            pattern_cache_size: 256,
        }
    }
}

/// Tunables for the TCP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address, e.g. "127.0.0.1:6379".
    pub addr: String,
    /// Initial per-connection read buffer capacity.
    pub read_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            addr: "127.0.0.1:6379".to_string(),
            read_buffer: 8 * 1024,
        }
    }
}
