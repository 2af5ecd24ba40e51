//! SQL compilation for tenant queries
//!
//! Provides identifier validation, literal escaping, condition rendering and
//! the per-node statement compiler.

pub mod compiler;
pub mod condition;
pub mod sanitize;

pub use compiler::{SqlCompiler, compile};
pub use condition::{build_condition_clause, build_order_by_clause};
pub use sanitize::{escape_literal, quote_literal, validate_identifier};
