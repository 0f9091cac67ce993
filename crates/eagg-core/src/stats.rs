//! Column statistics for cardinality estimation.
//!
//! Tracks min, max, null_count, distinct_count, and total_count for columns,
//! plus the row count of the relation they describe. A column whose
//! distinct count was never computed is *unknown*.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::{scalar_cmp, Scalar};

/// Statistics for a single column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnStats {
    /// Minimum value observed (None if no non-null values)
    pub min: Option<Scalar>,
    /// Maximum value observed (None if no non-null values)
    pub max: Option<Scalar>,
    /// Number of null values
    pub null_count: u64,
    /// Estimated distinct count (None if not computed)
    pub distinct_count: Option<u64>,
    /// Total number of values (including nulls)
    pub total_count: u64,
}

impl ColumnStats {
    /// Create empty (unknown) statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Statistics with a known distinct count.
    pub fn with_distinct(distinct_count: u64, null_count: u64, total_count: u64) -> Self {
        Self {
            distinct_count: Some(distinct_count),
            null_count,
            total_count,
            ..Self::default()
        }
    }

    /// No distinct count was gathered for this column.
    pub fn is_unknown(&self) -> bool {
        self.distinct_count.is_none()
    }

    /// Get the number of non-null values.
    pub fn non_null_count(&self) -> u64 {
        self.total_count.saturating_sub(self.null_count)
    }

    /// Estimate selectivity for a range predicate (min <= value <= max).
    ///
    /// Returns a value between 0.0 and 1.0 representing the fraction of rows
    /// that would match the predicate.
    pub fn estimate_range_selectivity(
        &self,
        min_val: Option<&Scalar>,
        max_val: Option<&Scalar>,
    ) -> f64 {
        if self.total_count > 0 && self.non_null_count() == 0 {
            return 0.0;
        }

        // Without min/max stats, assume uniform distribution
        let (Some(col_min), Some(col_max)) = (&self.min, &self.max) else {
            return 0.5;
        };

        match (min_val, max_val) {
            (Some(min), Some(max)) => {
                if scalar_cmp(min, col_max).is_gt() || scalar_cmp(max, col_min).is_lt() {
                    return 0.0; // No overlap
                }
                0.3
            }
            (Some(min), None) => {
                // value >= min
                if scalar_cmp(min, col_max).is_gt() {
                    return 0.0;
                }
                if scalar_cmp(min, col_min).is_le() {
                    return 1.0;
                }
                0.5
            }
            (None, Some(max)) => {
                // value <= max
                if scalar_cmp(max, col_min).is_lt() {
                    return 0.0;
                }
                if scalar_cmp(max, col_max).is_ge() {
                    return 1.0;
                }
                0.5
            }
            (None, None) => 1.0,
        }
    }

    /// Estimate selectivity for an equality predicate.
    ///
    /// Uses distinct_count if available, otherwise returns a conservative estimate.
    pub fn estimate_equality_selectivity(&self) -> f64 {
        if self.total_count > 0 && self.non_null_count() == 0 {
            return 0.0;
        }

        if let Some(distinct) = self.distinct_count {
            if distinct > 0 {
                return 1.0 / (distinct as f64);
            }
        }

        // Conservative estimate: assume high cardinality
        0.01
    }
}

/// Statistics for a relation: its row count and per-column statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaStats {
    pub row_count: u64,
    /// Map from column name to its statistics
    pub column_stats: HashMap<String, ColumnStats>,
}

impl SchemaStats {
    pub fn new(row_count: u64) -> Self {
        Self {
            row_count,
            column_stats: HashMap::new(),
        }
    }

    pub fn with_column(mut self, name: impl Into<String>, stats: ColumnStats) -> Self {
        self.column_stats.insert(name.into(), stats);
        self
    }

    /// Get statistics for a column by name.
    pub fn get(&self, column_name: &str) -> Option<&ColumnStats> {
        self.column_stats.get(column_name)
    }
}
