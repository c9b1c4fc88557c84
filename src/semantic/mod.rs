//! Semantic passes over expression trees
//!
//! Two structurally mirrored passes share the catalog's inference rules:
//! the cleaner repairs what it can and drops what it cannot, the validator
//! diagnoses without ever repairing. Any expression produced by the cleaner
//! validates.

pub mod cleaner;
pub mod validator;

pub use cleaner::Cleaner;
pub use validator::Validator;

use crate::types::{DataType, Expr};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Both passes count computed-column hops against the same cap, so an
/// expression the cleaner keeps is one the validator can also unfold.
pub(crate) const MAX_DEPTH: usize = 100;

/// Classification of an expression as row-level, constant, or collapsed by
/// an aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggrStatus {
    Individual,
    Literal,
    Aggregate,
}

/// Constraints the enclosing context places on an expression. Both passes
/// take the same options; sub-expression recursion derives narrowed copies.
#[derive(Debug, Clone, Default)]
pub struct CleanOptions {
    /// The table every non-literal node must be anchored to.
    pub table: Option<String>,
    /// Acceptable inferred types; `Unknown` always passes.
    pub types: Option<Vec<DataType>>,
    /// Enum value ids the context allows.
    pub enum_value_ids: Option<BTreeSet<String>>,
    /// For id-typed expressions, the table the id must identify a row of.
    pub id_table: Option<String>,
    /// Acceptable aggregation classifications.
    pub aggr_statuses: Option<Vec<AggrStatus>>,
}

impl CleanOptions {
    pub fn for_table(table: impl Into<String>) -> Self {
        CleanOptions {
            table: Some(table.into()),
            ..Default::default()
        }
    }

    pub fn forcing(mut self, types: Vec<DataType>) -> Self {
        self.types = Some(types);
        self
    }

    pub(crate) fn type_allowed(&self, t: DataType) -> bool {
        match &self.types {
            None => true,
            Some(types) => t == DataType::Unknown || types.contains(&t),
        }
    }
}

/// Top-level aggregation classification of an expression.
pub(crate) fn aggr_status(expr: &Expr) -> AggrStatus {
    match expr {
        Expr::Literal { .. } => AggrStatus::Literal,
        Expr::Scalar { aggr: Some(_), .. } => AggrStatus::Aggregate,
        _ => AggrStatus::Individual,
    }
}
