//! Schema-aware expression core
//!
//! Lets tools that never write SQL build, repair, validate, and execute
//! computed filters and fields against a relational schema. An expression
//! tree referencing a logical [`Schema`](types::Schema) is normalized by
//! the [`Cleaner`](semantic::Cleaner), diagnosed by the
//! [`Validator`](semantic::Validator), lowered into a structured query IR
//! by the [`Compiler`](planning::Compiler) for server execution, or walked
//! directly against in-memory rows by the
//! [`Evaluator`](execution::Evaluator).
//!
//! Schemas evolve while expressions persist, so a stale reference is an
//! expected condition throughout: lookups miss instead of erroring, the
//! cleaner repairs what it can and degrades the rest to null, and the
//! compiler reserves its one distinguished error for the column that
//! genuinely no longer exists.
//!
//! All services are stateless over an immutable schema: construct once per
//! schema, share freely across concurrent flows.

pub mod catalog;
pub mod error;
pub mod execution;
pub mod planning;
pub mod semantic;
pub mod types;

pub use catalog::{AggrItem, OpItem, OpSearch, TypeCatalog};
pub use error::{Error, Result};
pub use execution::{Evaluator, FieldValue, Row};
pub use planning::{Compiler, Ir};
pub use semantic::{AggrStatus, CleanOptions, Cleaner, Validator};
pub use types::{DataType, Expr, Schema, Value};
