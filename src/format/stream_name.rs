//! Logical stream identity and its on-disk ordering.
//!
//! Every column owns up to a handful of streams. The order streams are laid
//! out in the file is fixed by `StreamName`'s `Ord`: all row index streams
//! come first (by column), then every other stream grouped by column and
//! ordered by kind inside the column. Readers locate streams by walking the
//! stream-info table in that order, so the comparison must never change.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Role of a stream inside its column (stored as u8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum StreamKind {
    RowIndex = 0,
    Present = 1,
    Data = 2,
    Length = 3,
    DictionaryData = 4,
    BloomFilter = 5,
}

impl StreamKind {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::RowIndex),
            1 => Some(Self::Present),
            2 => Some(Self::Data),
            3 => Some(Self::Length),
            4 => Some(Self::DictionaryData),
            5 => Some(Self::BloomFilter),
            _ => None,
        }
    }

    /// Index-section streams count toward `index_length`, the rest toward
    /// `data_length`.
    pub fn is_index(self) -> bool {
        matches!(self, Self::RowIndex | Self::BloomFilter)
    }
}

/// `(column_id, kind)` pair naming one stream of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamName {
    pub column_id: u32,
    pub kind: StreamKind,
}

impl StreamName {
    pub fn new(column_id: u32, kind: StreamKind) -> Self {
        Self { column_id, kind }
    }
}

impl Ord for StreamName {
    fn cmp(&self, other: &Self) -> Ordering {
        let self_index = self.kind == StreamKind::RowIndex;
        let other_index = other.kind == StreamKind::RowIndex;
        match (self_index, other_index) {
            (true, true) => self.column_id.cmp(&other.column_id),
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => self
                .column_id
                .cmp(&other.column_id)
                .then(self.kind.cmp(&other.kind)),
        }
    }
}

impl PartialOrd for StreamName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for StreamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:?}", self.column_id, self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ALL_KINDS: [StreamKind; 6] = [
        StreamKind::RowIndex,
        StreamKind::Present,
        StreamKind::Data,
        StreamKind::Length,
        StreamKind::DictionaryData,
        StreamKind::BloomFilter,
    ];

    fn name_strategy() -> impl Strategy<Value = StreamName> {
        (0u32..8, 0usize..ALL_KINDS.len()).prop_map(|(id, k)| StreamName::new(id, ALL_KINDS[k]))
    }

    #[test]
    fn test_kind_from_u8() {
        for kind in ALL_KINDS {
            assert_eq!(StreamKind::from_u8(kind as u8), Some(kind));
        }
        assert_eq!(StreamKind::from_u8(6), None);
    }

    #[test]
    fn test_row_index_sorts_first() {
        let mut names = vec![
            StreamName::new(0, StreamKind::Data),
            StreamName::new(2, StreamKind::RowIndex),
            StreamName::new(1, StreamKind::Present),
            StreamName::new(0, StreamKind::BloomFilter),
            StreamName::new(0, StreamKind::RowIndex),
            StreamName::new(1, StreamKind::Data),
            StreamName::new(0, StreamKind::Present),
        ];
        names.sort();
        assert_eq!(
            names,
            vec![
                StreamName::new(0, StreamKind::RowIndex),
                StreamName::new(2, StreamKind::RowIndex),
                StreamName::new(0, StreamKind::Present),
                StreamName::new(0, StreamKind::Data),
                StreamName::new(0, StreamKind::BloomFilter),
                StreamName::new(1, StreamKind::Present),
                StreamName::new(1, StreamKind::Data),
            ]
        );
    }

    #[test]
    fn test_index_kinds() {
        assert!(StreamKind::RowIndex.is_index());
        assert!(StreamKind::BloomFilter.is_index());
        assert!(!StreamKind::Present.is_index());
        assert!(!StreamKind::DictionaryData.is_index());
    }

    proptest! {
        #[test]
        fn prop_order_irreflexive_and_antisymmetric(a in name_strategy(), b in name_strategy()) {
            prop_assert!(!(a < a));
            if a < b {
                prop_assert!(!(b < a));
            }
            prop_assert_eq!(a.cmp(&b) == Ordering::Equal, a == b);
        }

        #[test]
        fn prop_order_transitive(a in name_strategy(), b in name_strategy(), c in name_strategy()) {
            if a < b && b < c {
                prop_assert!(a < c);
            }
        }

        #[test]
        fn prop_order_survives_bincode(mut names in proptest::collection::vec(name_strategy(), 0..20)) {
            names.sort();
            names.dedup();
            let bytes = bincode::serialize(&names).unwrap();
            let back: Vec<StreamName> = bincode::deserialize(&bytes).unwrap();
            let mut resorted = back.clone();
            resorted.sort();
            prop_assert_eq!(&back, &names);
            prop_assert_eq!(resorted, names);
        }
    }
}
