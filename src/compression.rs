//! LZ4 compression for stored commit blobs
//!
//! Commit blobs (commit metadata plus its full snapshot) are mostly source text
//! and compress well. This module wraps `lz4_flex` with a small framing header so
//! compressed and raw blobs can be told apart on load.
//!
//! ## Format
//!
//! Every stored blob starts with a 4-byte magic header:
//! - `LZ4C`: LZ4 compressed data (size-prepended) follows
//! - `\0\0\0\0`: uncompressed data follows
//!
//! ## Examples
//!
//! ```rust
//! use codehub::compression::{CompressionEngine, CompressionStrategy};
//!
//! let mut engine = CompressionEngine::new(CompressionStrategy::Fast);
//! let data = "fn main() {}\n".repeat(200);
//! let compressed = engine.compress(data.as_bytes()).unwrap();
//! assert!(compressed.len() < data.len());
//! assert_eq!(engine.decompress(&compressed).unwrap(), data.as_bytes());
//! ```

use crate::error::{CodehubError, Result};
use lz4_flex::{compress_prepend_size, decompress_size_prepended};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, trace};

// Magic bytes to identify LZ4 compressed data
const LZ4_MAGIC: &[u8] = b"LZ4C";
const RAW_MAGIC: &[u8] = &[0, 0, 0, 0];

/// Compression strategy for stored blobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CompressionStrategy {
    /// Store blobs raw
    None,
    /// LZ4 for every blob of at least 1KB (default)
    #[default]
    Fast,
    /// LZ4 only for blobs of at least `min_size` bytes
    Adaptive {
        /// Skip compression for blobs smaller than this
        min_size: usize,
    },
}

impl CompressionStrategy {
    /// Parse a strategy name as used on the command line
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "none" => Some(Self::None),
            "fast" => Some(Self::Fast),
            "adaptive" => Some(Self::Adaptive { min_size: 4096 }),
            _ => None,
        }
    }

    fn should_compress(&self, size: usize) -> bool {
        match self {
            CompressionStrategy::None => false,
            CompressionStrategy::Fast => size >= 1024,
            CompressionStrategy::Adaptive { min_size } => size >= *min_size,
        }
    }
}

/// Compression statistics for monitoring
#[derive(Debug, Default, Clone)]
pub struct CompressionStats {
    /// Number of blobs compressed
    pub blobs_compressed: usize,
    /// Number of blobs stored raw
    pub blobs_stored_raw: usize,
    /// Total bytes before compression
    pub bytes_in: u64,
    /// Total bytes after compression
    pub bytes_out: u64,
    /// Time spent compressing in milliseconds
    pub compression_time_ms: u64,
}

impl CompressionStats {
    /// Output size relative to input size (1.0 when nothing was written)
    pub fn compression_ratio(&self) -> f64 {
        if self.bytes_in == 0 {
            1.0
        } else {
            self.bytes_out as f64 / self.bytes_in as f64
        }
    }
}

/// Compression engine applying a [`CompressionStrategy`]
#[derive(Debug)]
pub struct CompressionEngine {
    strategy: CompressionStrategy,
    stats: CompressionStats,
}

impl CompressionEngine {
    /// Create a new compression engine with the specified strategy
    pub fn new(strategy: CompressionStrategy) -> Self {
        Self {
            strategy,
            stats: CompressionStats::default(),
        }
    }

    /// Strategy in use
    pub fn strategy(&self) -> CompressionStrategy {
        self.strategy
    }

    /// Get current compression statistics
    pub fn stats(&self) -> &CompressionStats {
        &self.stats
    }

    /// Compress a blob, framing it with the magic header
    ///
    /// Falls back to the raw frame when the strategy skips the blob or when
    /// LZ4 output would not be smaller than the input.
    pub fn compress(&mut self, content: &[u8]) -> Result<Vec<u8>> {
        let start = Instant::now();
        self.stats.bytes_in += content.len() as u64;

        if self.strategy.should_compress(content.len()) {
            let compressed = compress_prepend_size(content);
            if compressed.len() < content.len() {
                self.stats.blobs_compressed += 1;
                self.stats.compression_time_ms += start.elapsed().as_millis() as u64;
                debug!(
                    "Compressed blob: {} -> {} bytes",
                    content.len(),
                    compressed.len()
                );

                let mut result = Vec::with_capacity(LZ4_MAGIC.len() + compressed.len());
                result.extend_from_slice(LZ4_MAGIC);
                result.extend_from_slice(&compressed);
                self.stats.bytes_out += result.len() as u64;
                return Ok(result);
            }
        }

        trace!("Storing {} byte blob raw", content.len());
        self.stats.blobs_stored_raw += 1;
        let mut result = Vec::with_capacity(RAW_MAGIC.len() + content.len());
        result.extend_from_slice(RAW_MAGIC);
        result.extend_from_slice(content);
        self.stats.bytes_out += result.len() as u64;
        Ok(result)
    }

    /// Decompress a framed blob
    ///
    /// # Errors
    ///
    /// Fails when the frame is shorter than its header, carries an unknown
    /// header, or the LZ4 payload is corrupt.
    pub fn decompress(&self, content: &[u8]) -> Result<Vec<u8>> {
        if content.len() < LZ4_MAGIC.len() {
            return Err(CodehubError::decompression("Content too short"));
        }

        let (header, payload) = content.split_at(LZ4_MAGIC.len());
        if header == LZ4_MAGIC {
            decompress_size_prepended(payload).map_err(|e| {
                CodehubError::decompression(format!("LZ4 decompression failed: {}", e))
            })
        } else if header == RAW_MAGIC {
            Ok(payload.to_vec())
        } else {
            Err(CodehubError::decompression(format!(
                "Unknown blob header {}",
                hex::encode(header)
            )))
        }
    }
}
