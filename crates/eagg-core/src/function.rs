//! Aggregate function signatures and resolution.
//!
//! A [`FunctionRegistry`] binds a function name plus concrete argument types
//! to an [`AggregateFunction`]. The built-in registry understands the
//! `<f>State` / `<f>Merge` combinators used to split an aggregate into a
//! partial phase and a final phase.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schema::DataType;
use crate::types::Scalar;

pub const STATE_SUFFIX: &str = "State";
pub const MERGE_SUFFIX: &str = "Merge";

/// A resolved aggregate function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateFunction {
    pub name: String,
    pub argument_types: Vec<DataType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Scalar>,
    pub return_type: DataType,
}

impl AggregateFunction {
    /// Signature as printed by EXPLAIN, e.g. `sum(Int64) -> Int64`.
    pub fn signature(&self) -> String {
        let args: Vec<String> = self.argument_types.iter().map(|t| t.to_string()).collect();
        format!("{}({}) -> {}", self.name, args.join(", "), self.return_type)
    }
}

/// Resolves aggregate functions by name and argument types.
pub trait FunctionRegistry: Send + Sync {
    fn resolve(
        &self,
        name: &str,
        argument_types: &[DataType],
        parameters: &[Scalar],
    ) -> Result<AggregateFunction>;
}

pub fn state_name(name: &str) -> String {
    format!("{}{}", name, STATE_SUFFIX)
}

pub fn merge_name(name: &str) -> String {
    format!("{}{}", name, MERGE_SUFFIX)
}

/// Built-in aggregate functions plus the State/Merge combinators.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinFunctions;

const BUILTINS: &[&str] = &[
    "count",
    "uniqExact",
    "sum",
    "sumWithOverflow",
    "min",
    "max",
    "any",
    "anyLast",
    "groupBitAnd",
    "groupBitOr",
    "groupBitXor",
    "avg",
];

fn canonical(name: &str) -> Option<&'static str> {
    BUILTINS
        .iter()
        .copied()
        .find(|b| b.eq_ignore_ascii_case(name))
}

fn strip_suffix_ci<'a>(name: &'a str, suffix: &str) -> Option<&'a str> {
    if name.len() > suffix.len() {
        let split = name.len() - suffix.len();
        if name.is_char_boundary(split) && name[split..].eq_ignore_ascii_case(suffix) {
            return Some(&name[..split]);
        }
    }
    None
}

fn single_argument<'a>(name: &str, argument_types: &'a [DataType]) -> Result<&'a DataType> {
    match argument_types {
        [t] => Ok(t),
        _ => Err(Error::Function(format!(
            "{} expects exactly one argument, got {}",
            name,
            argument_types.len()
        ))),
    }
}

impl BuiltinFunctions {
    pub fn new() -> Self {
        Self
    }

    fn resolve_base(
        &self,
        name: &'static str,
        argument_types: &[DataType],
        parameters: &[Scalar],
    ) -> Result<AggregateFunction> {
        let unary = || single_argument(name, argument_types);
        let return_type = match name {
            "count" => DataType::UInt64,
            "uniqExact" => {
                if argument_types.is_empty() {
                    return Err(Error::Function("uniqExact expects at least one argument".into()));
                }
                DataType::UInt64
            }
            "sum" => match unary()? {
                t if t.is_integer() => DataType::Int64,
                t if t.is_float() => DataType::Float64,
                DataType::Decimal128 => DataType::Decimal128,
                other => {
                    return Err(Error::Function(format!("sum is not defined for {}", other)))
                }
            },
            "sumWithOverflow" => match unary()? {
                t if t.is_integer() || t.is_float() || *t == DataType::Decimal128 => t.clone(),
                other => {
                    return Err(Error::Function(format!(
                        "sumWithOverflow is not defined for {}",
                        other
                    )))
                }
            },
            "min" | "max" | "any" | "anyLast" => unary()?.clone(),
            "groupBitAnd" | "groupBitOr" | "groupBitXor" => match unary()? {
                t if t.is_integer() => t.clone(),
                other => {
                    return Err(Error::Function(format!(
                        "{} expects an integer argument, got {}",
                        name, other
                    )))
                }
            },
            "avg" => match unary()? {
                t if t.is_integer() || t.is_float() || *t == DataType::Decimal128 => {
                    DataType::Float64
                }
                other => {
                    return Err(Error::Function(format!("avg is not defined for {}", other)))
                }
            },
            other => return Err(Error::Function(format!("unknown aggregate function '{}'", other))),
        };
        Ok(AggregateFunction {
            name: name.to_string(),
            argument_types: argument_types.to_vec(),
            parameters: parameters.to_vec(),
            return_type,
        })
    }
}

impl FunctionRegistry for BuiltinFunctions {
    fn resolve(
        &self,
        name: &str,
        argument_types: &[DataType],
        parameters: &[Scalar],
    ) -> Result<AggregateFunction> {
        if let Some(base) = canonical(name) {
            return self.resolve_base(base, argument_types, parameters);
        }

        if let Some(base) = strip_suffix_ci(name, STATE_SUFFIX) {
            let inner = self.resolve(base, argument_types, parameters)?;
            return Ok(AggregateFunction {
                name: state_name(&inner.name),
                argument_types: argument_types.to_vec(),
                parameters: parameters.to_vec(),
                return_type: DataType::AggregateState {
                    function: inner.name,
                    arguments: argument_types.to_vec(),
                },
            });
        }

        if let Some(base) = strip_suffix_ci(name, MERGE_SUFFIX) {
            let (function, arguments) = match argument_types {
                [DataType::AggregateState {
                    function,
                    arguments,
                }] => (function, arguments),
                _ => {
                    return Err(Error::Function(format!(
                        "{} expects a single aggregate-state argument, got {:?}",
                        name, argument_types
                    )))
                }
            };
            if !function.eq_ignore_ascii_case(base) {
                return Err(Error::Function(format!(
                    "{} cannot merge the state of {}",
                    name, function
                )));
            }
            let inner = self.resolve(base, arguments, parameters)?;
            return Ok(AggregateFunction {
                name: merge_name(&inner.name),
                argument_types: argument_types.to_vec(),
                parameters: parameters.to_vec(),
                return_type: inner.return_type,
            });
        }

        Err(Error::Function(format!("unknown aggregate function '{}'", name)))
    }
}
