#![forbid(unsafe_code)]
//! eagg-core: shared kernel for the eager-aggregation planner.
//!
//! This crate contains only *pure* types and small helpers: the logical plan
//! IR, expressions, schemas and statistics, the aggregate-function registry,
//! symbol and node-id allocation, configuration and the error type. There is
//! **no I/O** here.
//!
//! Crates that use this:
//! - eagg-planner: rule framework, cardinality estimation and the eager
//!   aggregation rewrite.
//! - eagg-cli: loads plans, runs the optimizer and prints the result.

pub mod config;
pub mod error;
pub mod expr;
pub mod function;
pub mod id;
pub mod plan;
pub mod prelude;
pub mod schema;
pub mod stats;
pub mod symbol;
pub mod types;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
