//! Aggregate function classes for splitting.

use serde::Serialize;

/// How an aggregate function can be split into a partial and a final phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AggFuncClass {
    /// Partial results combine with the same function.
    Basic,
    /// Partial phase needs `<f>State`, final phase `<f>Merge`.
    NeedMerge,
    /// Cannot be split.
    Unknown,
}

const BASIC: &[&str] = &[
    "any",
    "anyLast",
    "min",
    "max",
    "sum",
    "sumWithOverflow",
    "groupBitAnd",
    "groupBitOr",
    "groupBitXor",
    "sumMap",
    "minMap",
    "maxMap",
    "sumMappedArrays",
    "minMappedArrays",
    "maxMappedArrays",
    "groupArrayArray",
    "groupArrayLastArray",
    "groupUniqArrayArray",
];

const NEED_MERGE: &[&str] = &["count", "uniqExact"];

/// Functions whose result does not change when an input row is repeated.
const DUPLICATE_INSENSITIVE: &[&str] = &[
    "any",
    "anyLast",
    "min",
    "max",
    "groupBitAnd",
    "groupBitOr",
    "uniqExact",
];

fn listed(list: &[&str], name: &str) -> bool {
    list.iter().any(|f| f.eq_ignore_ascii_case(name))
}

pub fn classify(name: &str) -> AggFuncClass {
    if listed(BASIC, name) {
        AggFuncClass::Basic
    } else if listed(NEED_MERGE, name) {
        AggFuncClass::NeedMerge
    } else {
        AggFuncClass::Unknown
    }
}

/// Safe to evaluate over a partially aggregated input that still carries
/// the argument as a grouping key.
pub fn is_duplicate_insensitive(name: &str) -> bool {
    listed(DUPLICATE_INSENSITIVE, name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes() {
        assert_eq!(classify("sum"), AggFuncClass::Basic);
        assert_eq!(classify("SUM"), AggFuncClass::Basic);
        assert_eq!(classify("groupbitxor"), AggFuncClass::Basic);
        assert_eq!(classify("count"), AggFuncClass::NeedMerge);
        assert_eq!(classify("UniqExact"), AggFuncClass::NeedMerge);
        assert_eq!(classify("avg"), AggFuncClass::Unknown);
        assert_eq!(classify("countMerge"), AggFuncClass::Unknown);
        assert_eq!(classify("sumState"), AggFuncClass::Unknown);
    }

    #[test]
    fn map_and_array_variants_are_basic() {
        for name in ["sumMap", "maxMap", "minMappedArrays", "groupArrayArray", "groupUniqArrayArray"] {
            assert_eq!(classify(name), AggFuncClass::Basic, "{}", name);
        }
        assert!(!is_duplicate_insensitive("sumMap"));
        assert_eq!(classify("groupArray"), AggFuncClass::Unknown);
    }

    #[test]
    fn duplicate_insensitivity() {
        assert!(is_duplicate_insensitive("max"));
        assert!(is_duplicate_insensitive("uniqexact"));
        assert!(!is_duplicate_insensitive("sum"));
        assert!(!is_duplicate_insensitive("count"));
        assert!(!is_duplicate_insensitive("groupBitXor"));
    }
}
