//! The expression tree users build against a logical schema
//!
//! Expressions are a closed tagged union, immutable once built and never
//! cyclic. They are produced by external builders, persisted as JSON, and
//! passed into the cleaner, validator, compiler, and evaluators per call.
//! A JSON `null` in any operand position is a valid "no expression"
//! placeholder, modelled as `Option<Expr>`.

use super::data_type::DataType;
use super::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Expr {
    /// A constant tagged with its declared value type.
    #[serde(rename_all = "camelCase")]
    Literal { value_type: DataType, value: Value },

    /// The primary key of the context table's current row.
    Id { table: String },

    /// A column reference.
    Field { table: String, column: String },

    /// An operator application. The operator id is looked up in the catalog.
    Op {
        table: String,
        op: String,
        #[serde(default)]
        exprs: Vec<Option<Expr>>,
    },

    /// Traverses zero or more joins from the owning table to reach the table
    /// of the inner expression, aggregating if the traversal is to-many.
    #[serde(rename_all = "camelCase")]
    Scalar {
        table: String,
        #[serde(default)]
        joins: Vec<String>,
        expr: Option<Box<Expr>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        aggr: Option<String>,
        #[serde(
            default,
            rename = "where",
            skip_serializing_if = "Option::is_none"
        )]
        where_clause: Option<Box<Expr>>,
    },

    /// First matching branch wins; no operand form.
    Case {
        #[serde(default)]
        cases: Vec<CaseBranch>,
        #[serde(default, rename = "else", skip_serializing_if = "Option::is_none")]
        otherwise: Option<Box<Expr>>,
    },

    /// Sums per-enum-value sub-expressions over an enum or enumset input.
    Score {
        input: Option<Box<Expr>>,
        #[serde(default)]
        scores: BTreeMap<String, Expr>,
    },

    /// Builds an enumset from per-value boolean conditions.
    #[serde(rename = "buildEnumset")]
    BuildEnumset {
        #[serde(default)]
        values: BTreeMap<String, Expr>,
    },

    /// A reference to a declared variable, bound at evaluation time.
    #[serde(rename_all = "camelCase")]
    Variable {
        variable_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        table: Option<String>,
    },

    /// Legacy binary comparison; desugared to an `Op` node when cleaned.
    Comparison {
        lhs: Option<Box<Expr>>,
        op: String,
        rhs: Option<Box<Expr>>,
    },

    /// Legacy and/or; desugared to an `Op` node when cleaned.
    Logical {
        op: String,
        #[serde(default)]
        exprs: Vec<Option<Expr>>,
    },

    /// Legacy row count over the context table.
    Count { table: String },
}

/// One `when`/`then` pair of a case expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseBranch {
    pub when: Option<Expr>,
    pub then: Option<Expr>,
}

impl Expr {
    /// The table this node is anchored to, for nodes that carry one.
    pub fn table(&self) -> Option<&str> {
        match self {
            Expr::Id { table }
            | Expr::Field { table, .. }
            | Expr::Op { table, .. }
            | Expr::Scalar { table, .. }
            | Expr::Count { table } => Some(table),
            Expr::Variable { table, .. } => table.as_deref(),
            _ => None,
        }
    }

    pub fn field(table: impl Into<String>, column: impl Into<String>) -> Expr {
        Expr::Field {
            table: table.into(),
            column: column.into(),
        }
    }

    pub fn literal(value_type: DataType, value: Value) -> Expr {
        Expr::Literal { value_type, value }
    }

    pub fn bool_literal(b: bool) -> Expr {
        Expr::Literal {
            value_type: DataType::Boolean,
            value: Value::Bool(b),
        }
    }

    pub fn op(table: impl Into<String>, op: impl Into<String>, exprs: Vec<Expr>) -> Expr {
        Expr::Op {
            table: table.into(),
            op: op.into(),
            exprs: exprs.into_iter().map(Some).collect(),
        }
    }
}
