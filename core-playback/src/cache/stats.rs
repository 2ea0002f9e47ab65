//! Cache statistics and monitoring

use serde::{Deserialize, Serialize};

/// Statistics about the span store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of resources with at least one span
    pub resource_count: usize,

    /// Number of finalized spans
    pub span_count: usize,

    /// Spans currently leased by readers
    pub locked_spans: usize,

    /// In-flight writes registered in the index
    pub pending_writes: usize,

    /// Plaintext bytes held by all spans
    pub total_bytes: u64,

    /// Soft byte budget
    pub capacity_bytes: u64,

    /// Timestamp when stats were calculated
    pub calculated_at: i64,
}

impl CacheStats {
    /// Calculate cache usage as a percentage of the budget.
    pub fn usage_percentage(&self) -> f64 {
        if self.capacity_bytes == 0 {
            return 0.0;
        }

        (self.total_bytes as f64 / self.capacity_bytes as f64) * 100.0
    }

    /// Returns true if the cache is near capacity (>90%).
    pub fn is_near_capacity(&self) -> bool {
        self.usage_percentage() > 90.0
    }

    /// Returns true if the cache is full (>=100%).
    pub fn is_full(&self) -> bool {
        self.total_bytes >= self.capacity_bytes
    }

    /// Bytes held beyond the budget.
    pub fn space_needed(&self) -> u64 {
        self.total_bytes.saturating_sub(self.capacity_bytes)
    }

    /// Returns average bytes per span.
    pub fn average_span_size(&self) -> u64 {
        if self.span_count == 0 {
            0
        } else {
            self.total_bytes / self.span_count as u64
        }
    }

    /// Human-readable usage, e.g. `"12.5 MB / 100.0 MB"`.
    pub fn usage_string(&self) -> String {
        format!(
            "{} / {}",
            format_bytes(self.total_bytes),
            format_bytes(self.capacity_bytes)
        )
    }
}

/// Per-source counters kept by a caching data source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSourceStats {
    /// Plaintext bytes served from spans
    pub bytes_from_cache: u64,

    /// Bytes served from upstream
    pub bytes_from_upstream: u64,

    /// Upstream reads opened
    pub upstream_requests: u64,

    /// Span reads that failed (I/O or authentication)
    pub cache_read_failures: u64,

    /// Span writes abandoned after an error
    pub cache_write_failures: u64,

    /// Spans finalized by this source
    pub spans_written: u64,
}

impl DataSourceStats {
    /// Share of served bytes that came from cache, in percent.
    pub fn cache_hit_ratio(&self) -> f64 {
        let total = self.bytes_from_cache + self.bytes_from_upstream;
        if total == 0 {
            return 0.0;
        }

        (self.bytes_from_cache as f64 / total as f64) * 100.0
    }

    pub fn total_bytes(&self) -> u64 {
        self.bytes_from_cache + self.bytes_from_upstream
    }
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_percentages() {
        let stats = CacheStats {
            span_count: 90,
            total_bytes: 4_500_000_000, // 4.5GB
            capacity_bytes: 5 * 1024 * 1024 * 1024,
            ..Default::default()
        };

        let usage = stats.usage_percentage();
        assert!(usage > 83.0 && usage < 85.0); // ~83.8%
        assert!(!stats.is_full());
        assert!(!stats.is_near_capacity());
        assert_eq!(stats.average_span_size(), 50_000_000);

        let small = CacheStats {
            capacity_bytes: 4 * 1024 * 1024 * 1024,
            ..stats
        };
        assert!(small.is_full());
        assert!(small.is_near_capacity());
    }

    #[test]
    fn test_space_needed() {
        let stats = CacheStats {
            total_bytes: 1200,
            capacity_bytes: 1000,
            ..Default::default()
        };
        assert_eq!(stats.space_needed(), 200);

        let under = CacheStats {
            total_bytes: 800,
            capacity_bytes: 1000,
            ..Default::default()
        };
        assert_eq!(under.space_needed(), 0);
        assert_eq!(CacheStats::default().usage_percentage(), 0.0);
    }

    #[test]
    fn test_data_source_hit_ratio() {
        let stats = DataSourceStats {
            bytes_from_cache: 300,
            bytes_from_upstream: 100,
            ..Default::default()
        };
        assert_eq!(stats.cache_hit_ratio(), 75.0);
        assert_eq!(stats.total_bytes(), 400);
        assert_eq!(DataSourceStats::default().cache_hit_ratio(), 0.0);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1024), "1.0 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.0 MB");
        assert_eq!(format_bytes(1024 * 1024 * 1024), "1.0 GB");
        assert_eq!(
            CacheStats {
                total_bytes: 512,
                capacity_bytes: 2048,
                ..Default::default()
            }
            .usage_string(),
            "512 B / 2.0 KB"
        );
    }
}
