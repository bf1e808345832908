//! Min/max/null-count accumulator kept per block and per segment.
//!
//! Readers use block statistics to skip blocks whose range cannot match a
//! predicate, the same job zone maps do for whole segments.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::schema::Value;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ColumnStatistics {
    /// Non-null values seen.
    pub value_count: u64,
    pub null_count: u64,
    pub min: Option<Value>,
    pub max: Option<Value>,
}

impl ColumnStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, value: &Value) {
        if value.is_null() {
            self.null_count += 1;
            return;
        }
        self.value_count += 1;

        let replace_min = match &self.min {
            None => true,
            Some(min) => value.compare(min) == Some(Ordering::Less),
        };
        if replace_min {
            self.min = Some(value.clone());
        }

        let replace_max = match &self.max {
            None => true,
            Some(max) => value.compare(max) == Some(Ordering::Greater),
        };
        if replace_max {
            self.max = Some(value.clone());
        }
    }

    /// Fold a block's statistics into segment totals.
    pub fn merge(&mut self, other: &ColumnStatistics) {
        self.value_count += other.value_count;
        self.null_count += other.null_count;
        if let Some(min) = &other.min {
            self.update_bound(min, Ordering::Less);
        }
        if let Some(max) = &other.max {
            self.update_bound(max, Ordering::Greater);
        }
    }

    fn update_bound(&mut self, candidate: &Value, direction: Ordering) {
        let slot = match direction {
            Ordering::Less => &mut self.min,
            _ => &mut self.max,
        };
        let replace = match slot {
            None => true,
            Some(current) => candidate.compare(current) == Some(direction),
        };
        if replace {
            *slot = Some(candidate.clone());
        }
    }

    pub fn row_count(&self) -> u64 {
        self.value_count + self.null_count
    }

    /// Whether `value` can fall inside `[min, max]`. Columns with no
    /// non-null values can only hold NULL.
    pub fn may_contain(&self, value: &Value) -> bool {
        if value.is_null() {
            return self.null_count > 0;
        }
        match (&self.min, &self.max) {
            (Some(min), Some(max)) => {
                value.compare(min) != Some(Ordering::Less)
                    && value.compare(max) != Some(Ordering::Greater)
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_tracks_bounds_and_nulls() {
        let mut stats = ColumnStatistics::new();
        for v in [Value::Int(5), Value::Null, Value::Int(-3), Value::Int(9)] {
            stats.update(&v);
        }
        assert_eq!(stats.value_count, 3);
        assert_eq!(stats.null_count, 1);
        assert_eq!(stats.min, Some(Value::Int(-3)));
        assert_eq!(stats.max, Some(Value::Int(9)));
        assert_eq!(stats.row_count(), 4);
    }

    #[test]
    fn test_merge() {
        let mut a = ColumnStatistics::new();
        a.update(&Value::Varchar("m".into()));
        let mut b = ColumnStatistics::new();
        b.update(&Value::Varchar("a".into()));
        b.update(&Value::Varchar("z".into()));
        b.update(&Value::Null);
        a.merge(&b);
        assert_eq!(a.min, Some(Value::Varchar("a".into())));
        assert_eq!(a.max, Some(Value::Varchar("z".into())));
        assert_eq!(a.value_count, 3);
        assert_eq!(a.null_count, 1);
    }

    #[test]
    fn test_merge_into_empty() {
        let mut a = ColumnStatistics::new();
        let mut b = ColumnStatistics::new();
        b.update(&Value::Double(1.5));
        a.merge(&b);
        assert_eq!(a, b);
    }

    #[test]
    fn test_may_contain() {
        let mut stats = ColumnStatistics::new();
        stats.update(&Value::BigInt(10));
        stats.update(&Value::BigInt(20));
        assert!(stats.may_contain(&Value::BigInt(15)));
        assert!(!stats.may_contain(&Value::BigInt(21)));
        assert!(!stats.may_contain(&Value::Null));

        let empty = ColumnStatistics::new();
        assert!(!empty.may_contain(&Value::BigInt(1)));
    }
}
