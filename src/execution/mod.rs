//! Client-side evaluation of expressions against a row capability.

pub mod evaluator;
pub mod row;

pub use evaluator::Evaluator;
pub use row::{FieldValue, Row};
