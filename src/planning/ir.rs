//! The query intermediate representation
//!
//! A structured, SQL-adjacent tree the compiler emits and a downstream
//! executor translates into real SQL. Also embedded in schema objects as
//! raw overrides: a table backed by a subquery fragment, a column backed by
//! an IR fragment, or a join with a custom condition. Overrides use
//! placeholder aliases (`{alias}`, `{from}`, `{to}`) that the compiler
//! substitutes during lowering.

use crate::types::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Ir {
    #[serde(rename_all = "camelCase")]
    Field { table_alias: String, column: String },

    Literal { value: Value },

    Op {
        op: String,
        #[serde(default)]
        exprs: Vec<Ir>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        modifier: Option<String>,
    },

    Case {
        cases: Vec<IrCaseBranch>,
        #[serde(default, rename = "else", skip_serializing_if = "Option::is_none")]
        otherwise: Option<Box<Ir>>,
    },

    /// A scalar subquery. Only the clauses the lowering actually needed are
    /// present; a scalar with none of them degenerates to its bare `expr`
    /// before ever being emitted.
    #[serde(rename_all = "camelCase")]
    Scalar {
        expr: Option<Box<Ir>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<Box<Ir>>,
        #[serde(
            default,
            rename = "where",
            skip_serializing_if = "Option::is_none"
        )]
        where_clause: Option<Box<Ir>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        order_by: Option<OrderBy>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<u64>,
    },

    Table { table: String, alias: String },

    Subquery { query: Box<Ir>, alias: String },

    Join {
        left: Box<Ir>,
        right: Box<Ir>,
        kind: JoinKind,
        on: Box<Ir>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrCaseBranch {
    pub when: Ir,
    pub then: Ir,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub expr: Box<Ir>,
    pub dir: Direction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "asc")]
    Ascending,
    #[serde(rename = "desc")]
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinKind {
    #[serde(rename = "left")]
    Left,
}

impl Ir {
    /// Rewrites placeholder table aliases throughout the fragment. Aliases
    /// not present in the map pass through untouched.
    pub fn substitute_aliases(&self, map: &HashMap<&str, &str>) -> Ir {
        let sub = |alias: &str| -> String {
            map.get(alias).map(|a| a.to_string()).unwrap_or_else(|| alias.to_string())
        };
        match self {
            Ir::Field {
                table_alias,
                column,
            } => Ir::Field {
                table_alias: sub(table_alias),
                column: column.clone(),
            },
            Ir::Literal { value } => Ir::Literal {
                value: value.clone(),
            },
            Ir::Op {
                op,
                exprs,
                modifier,
            } => Ir::Op {
                op: op.clone(),
                exprs: exprs.iter().map(|e| e.substitute_aliases(map)).collect(),
                modifier: modifier.clone(),
            },
            Ir::Case { cases, otherwise } => Ir::Case {
                cases: cases
                    .iter()
                    .map(|c| IrCaseBranch {
                        when: c.when.substitute_aliases(map),
                        then: c.then.substitute_aliases(map),
                    })
                    .collect(),
                otherwise: otherwise
                    .as_ref()
                    .map(|e| Box::new(e.substitute_aliases(map))),
            },
            Ir::Scalar {
                expr,
                from,
                where_clause,
                order_by,
                limit,
            } => Ir::Scalar {
                expr: expr.as_ref().map(|e| Box::new(e.substitute_aliases(map))),
                from: from.as_ref().map(|e| Box::new(e.substitute_aliases(map))),
                where_clause: where_clause
                    .as_ref()
                    .map(|e| Box::new(e.substitute_aliases(map))),
                order_by: order_by.as_ref().map(|o| OrderBy {
                    expr: Box::new(o.expr.substitute_aliases(map)),
                    dir: o.dir,
                }),
                limit: *limit,
            },
            Ir::Table { table, alias } => Ir::Table {
                table: table.clone(),
                alias: sub(alias),
            },
            Ir::Subquery { query, alias } => Ir::Subquery {
                query: Box::new(query.substitute_aliases(map)),
                alias: sub(alias),
            },
            Ir::Join {
                left,
                right,
                kind,
                on,
            } => Ir::Join {
                left: Box::new(left.substitute_aliases(map)),
                right: Box::new(right.substitute_aliases(map)),
                kind: *kind,
                on: Box::new(on.substitute_aliases(map)),
            },
        }
    }
}
