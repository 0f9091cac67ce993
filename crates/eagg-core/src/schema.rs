//! Logical schema types. Pure data.
//!
//! Every plan node exposes an ordered list of `Field`s; the field name is the
//! node's *symbol* for that column.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::stats::SchemaStats;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Boolean,
    Int32,
    Int64,
    UInt64,
    Float32,
    Float64,
    Utf8,
    Binary,
    Date64,
    Decimal128,
    /// Intermediate state of an aggregate function, produced by `<f>State`
    /// and consumed by `<f>Merge`.
    AggregateState {
        function: String,
        arguments: Vec<DataType>,
    },
}

impl DataType {
    pub fn parse(s: &str) -> Option<DataType> {
        match s {
            "Boolean" | "bool" => Some(DataType::Boolean),
            "Int32" | "i32" => Some(DataType::Int32),
            "Int64" | "i64" => Some(DataType::Int64),
            "UInt64" | "u64" => Some(DataType::UInt64),
            "Float32" | "f32" => Some(DataType::Float32),
            "Float64" | "f64" => Some(DataType::Float64),
            "Utf8" | "String" | "string" => Some(DataType::Utf8),
            "Binary" | "bytes" => Some(DataType::Binary),
            "Date64" | "date" => Some(DataType::Date64),
            "Decimal128" | "decimal" => Some(DataType::Decimal128),
            _ => None,
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, DataType::Int32 | DataType::Int64 | DataType::UInt64)
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DataType::Float32 | DataType::Float64)
    }

    pub fn is_aggregate_state(&self) -> bool {
        matches!(self, DataType::AggregateState { .. })
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::AggregateState {
                function,
                arguments,
            } => {
                write!(f, "AggregateFunction({}", function)?;
                for arg in arguments {
                    write!(f, ", {}", arg)?;
                }
                write!(f, ")")
            }
            other => write!(f, "{:?}", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<Field>,
    /// Optional statistics, only attached to scan schemas
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<SchemaStats>,
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
        // Note: stats are not compared for equality (HashMap + floats make this complex)
    }
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self {
            fields,
            stats: None,
        }
    }

    pub fn new_with_stats(fields: Vec<Field>, stats: Option<SchemaStats>) -> Self {
        Self { fields, stats }
    }

    pub fn field(&self, idx: usize) -> Option<&Field> {
        self.fields.get(idx)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    pub fn type_of(&self, name: &str) -> Option<&DataType> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| &f.data_type)
    }

    pub fn names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    pub fn name_set(&self) -> BTreeSet<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    pub fn name_to_type(&self) -> HashMap<String, DataType> {
        self.fields
            .iter()
            .map(|f| (f.name.clone(), f.data_type.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_type_display() {
        let t = DataType::AggregateState {
            function: "count".into(),
            arguments: vec![DataType::Int64],
        };
        assert_eq!(t.to_string(), "AggregateFunction(count, Int64)");
        assert!(t.is_aggregate_state());
    }

    #[test]
    fn lookups_by_name() {
        let schema = Schema::new(vec![
            Field::new("a", DataType::Int64, false),
            Field::new("b", DataType::Utf8, true),
        ]);
        assert_eq!(schema.index_of("b"), Some(1));
        assert_eq!(schema.type_of("a"), Some(&DataType::Int64));
        assert!(!schema.contains("c"));
        assert_eq!(schema.names(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn parse_type_aliases() {
        assert_eq!(DataType::parse("i64"), Some(DataType::Int64));
        assert_eq!(DataType::parse("String"), Some(DataType::Utf8));
        assert_eq!(DataType::parse("Nope"), None);
    }
}
