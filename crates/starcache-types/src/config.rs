//! Cache configuration and dialect capability flags.
//!
//! Configuration is explicit per engine instance; there are no ambient
//! globals. Defaults mirror the conservative production settings.

/// Recognized configuration options for the segment cache pipeline.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Allow fusing compatible batches into one grouping-sets query.
    pub enable_grouping_sets: bool,
    /// Allow the loader to target pre-materialized aggregate tables.
    pub use_aggregates: bool,
    /// Skip the in-memory cache worker entirely.
    pub disable_caching: bool,
    /// Upper bound on `IN (...)` list length before a constraint collapses
    /// to TRUE.
    pub max_constraints: usize,
    /// Enable bloat-based constraint elimination before SQL generation.
    pub optimize_predicates: bool,
    /// Emit suggested aggregate-table DDL to the log sink.
    pub generate_aggregate_sql: bool,
    /// Entry cap of the in-memory cache worker.
    pub cache_max_entries: usize,
    /// Observable byte budget of the in-memory cache worker.
    pub cache_max_bytes: usize,
    /// Worker count of the SQL executor pool.
    pub sql_pool_size: usize,
    /// Recorded cell misses before the batch reader raises the quantum
    /// signal so the evaluator can flush early.
    pub request_quantum: usize,
    /// Density at or above which a hydrated dataset is stored dense.
    pub density_threshold: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enable_grouping_sets: false,
            use_aggregates: false,
            disable_caching: false,
            max_constraints: 1000,
            optimize_predicates: true,
            generate_aggregate_sql: false,
            cache_max_entries: 100,
            cache_max_bytes: 256 * 1024 * 1024,
            sql_pool_size: 10,
            request_quantum: 5000,
            density_threshold: 0.5,
        }
    }
}

impl CacheConfig {
    /// Default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle grouping-sets fusion.
    #[must_use]
    pub const fn with_grouping_sets(mut self, enabled: bool) -> Self {
        self.enable_grouping_sets = enabled;
        self
    }

    /// Toggle aggregate-table targeting.
    #[must_use]
    pub const fn with_aggregates(mut self, enabled: bool) -> Self {
        self.use_aggregates = enabled;
        self
    }

    /// Toggle the in-memory cache worker.
    #[must_use]
    pub const fn with_caching_disabled(mut self, disabled: bool) -> Self {
        self.disable_caching = disabled;
        self
    }

    /// Set the IN-list collapse threshold.
    #[must_use]
    pub const fn with_max_constraints(mut self, max: usize) -> Self {
        self.max_constraints = max;
        self
    }

    /// Toggle bloat-based constraint elimination.
    #[must_use]
    pub const fn with_optimize_predicates(mut self, enabled: bool) -> Self {
        self.optimize_predicates = enabled;
        self
    }

    /// Toggle aggregate DDL suggestions.
    #[must_use]
    pub const fn with_generate_aggregate_sql(mut self, enabled: bool) -> Self {
        self.generate_aggregate_sql = enabled;
        self
    }

    /// Set the in-memory worker entry cap.
    #[must_use]
    pub const fn with_cache_max_entries(mut self, max: usize) -> Self {
        self.cache_max_entries = max;
        self
    }

    /// Set the SQL pool size.
    #[must_use]
    pub const fn with_sql_pool_size(mut self, size: usize) -> Self {
        self.sql_pool_size = size;
        self
    }
}

/// Capabilities of the SQL dialect behind the executor.
#[derive(Debug, Clone, Copy)]
pub struct DialectCaps {
    /// Whether the dialect can express `GROUP BY GROUPING SETS`.
    pub supports_grouping_sets: bool,
    /// Whether one statement may contain several `COUNT(DISTINCT ...)`.
    pub allows_multiple_count_distinct: bool,
}

impl Default for DialectCaps {
    fn default() -> Self {
        Self {
            supports_grouping_sets: true,
            allows_multiple_count_distinct: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_production_settings() {
        let config = CacheConfig::default();
        assert!(!config.enable_grouping_sets);
        assert!(!config.use_aggregates);
        assert!(!config.disable_caching);
        assert_eq!(config.max_constraints, 1000);
        assert!(config.optimize_predicates);
        assert_eq!(config.cache_max_entries, 100);
        assert_eq!(config.sql_pool_size, 10);
        assert_eq!(config.request_quantum, 5000);
        assert!((config.density_threshold - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_builder_chaining() {
        let config = CacheConfig::new()
            .with_grouping_sets(true)
            .with_max_constraints(12)
            .with_cache_max_entries(3);
        assert!(config.enable_grouping_sets);
        assert_eq!(config.max_constraints, 12);
        assert_eq!(config.cache_max_entries, 3);
    }
}
