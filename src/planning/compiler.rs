//! Lowering expression trees into query IR
//!
//! The compiler assumes cleaned or validated input and prefers best-effort
//! partial IR over refusal: anything that is merely no longer meaningful
//! lowers to `None`, and only two conditions are fatal. An unknown column
//! raises the distinguished [`Error::ColumnNotFound`] so callers can kick
//! off a schema refresh, and an unknown operator raises
//! [`Error::Unsupported`].
//!
//! Relative date windows are resolved against the wall clock at compile
//! time; [`Compiler::compile_as_of`] pins the clock for deterministic
//! output.

use super::ir::{Direction, Ir, IrCaseBranch, JoinKind, OrderBy};
use crate::catalog::TypeCatalog;
use crate::error::{Error, Result};
use crate::semantic::cleaner::{desugar_legacy, is_passthrough, split_range};
use crate::types::calendar::{date_window, day_end, day_start, is_window_op};
use crate::types::{CaseBranch, DataType, Expr, Schema, Table, Value};
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Numbered aliases for join targets, fresh per compile call.
#[derive(Default)]
struct AliasGen(usize);

impl AliasGen {
    fn next(&mut self) -> String {
        self.0 += 1;
        format!("t{}", self.0)
    }
}

pub struct Compiler {
    schema: Arc<Schema>,
    catalog: TypeCatalog,
    variables: HashMap<String, Value>,
}

impl Compiler {
    pub fn new(schema: Arc<Schema>) -> Self {
        let catalog = TypeCatalog::new(schema.clone());
        Compiler {
            schema,
            catalog,
            variables: HashMap::new(),
        }
    }

    /// A compiler that lowers variable references to the given bindings.
    /// Unbound variables lower to `None`.
    pub fn with_variables(schema: Arc<Schema>, variables: HashMap<String, Value>) -> Self {
        let catalog = TypeCatalog::new(schema.clone());
        Compiler {
            schema,
            catalog,
            variables,
        }
    }

    /// Lowers an expression in the scope of the given table alias. `None`
    /// in means no filter; `None` out means the expression is not
    /// expressible as IR.
    pub fn compile(&self, expr: Option<&Expr>, alias: &str) -> Result<Option<Ir>> {
        self.compile_as_of(expr, alias, chrono::Local::now().date_naive())
    }

    /// Same as [`compile`](Self::compile) with the wall-clock date pinned,
    /// so date-window operators lower deterministically.
    pub fn compile_as_of(
        &self,
        expr: Option<&Expr>,
        alias: &str,
        today: NaiveDate,
    ) -> Result<Option<Ir>> {
        let mut aliases = AliasGen::default();
        self.compile_expr(expr, alias, today, &mut aliases)
    }

    /// An aliased reference to a table: plain when the table is physical,
    /// an aliased subquery when it carries an inline IR override.
    pub fn compile_table(&self, table_id: &str, alias: &str) -> Result<Ir> {
        let table = self
            .schema
            .get_table(table_id)
            .ok_or_else(|| Error::ColumnNotFound(table_id.to_string()))?;
        Ok(table_reference(table, alias))
    }

    fn compile_expr(
        &self,
        expr: Option<&Expr>,
        alias: &str,
        today: NaiveDate,
        aliases: &mut AliasGen,
    ) -> Result<Option<Ir>> {
        let expr = match expr {
            Some(e) => e,
            None => return Ok(None),
        };
        match expr {
            Expr::Literal { value, .. } => Ok(Some(Ir::Literal {
                value: value.clone(),
            })),
            Expr::Id { table } => {
                let table = self
                    .schema
                    .get_table(table)
                    .ok_or_else(|| Error::ColumnNotFound(table.to_string()))?;
                Ok(Some(Ir::Field {
                    table_alias: alias.to_string(),
                    column: table.primary_key.clone(),
                }))
            }
            Expr::Field { table, column } => self.compile_field(table, column, alias, today, aliases),
            Expr::Op { op, exprs, .. } => self.compile_op(op, exprs, alias, today, aliases),
            Expr::Scalar {
                table,
                joins,
                expr: inner,
                aggr,
                where_clause,
            } => self.compile_scalar(
                table,
                joins,
                inner.as_deref(),
                aggr.as_deref(),
                where_clause.as_deref(),
                alias,
                today,
                aliases,
            ),
            Expr::Case { cases, otherwise } => {
                self.compile_case(cases, otherwise.as_deref(), alias, today, aliases)
            }
            // Score and enumset construction are client-side computations
            // with no IR counterpart; they lower to no filter.
            Expr::Score { .. } | Expr::BuildEnumset { .. } => Ok(None),
            Expr::Variable { variable_id, .. } => {
                Ok(self.variables.get(variable_id).map(|v| Ir::Literal {
                    value: v.clone(),
                }))
            }
            Expr::Count { .. } => Ok(Some(Ir::Op {
                op: "count".to_string(),
                exprs: vec![],
                modifier: None,
            })),
            Expr::Comparison { .. } | Expr::Logical { .. } => {
                match desugar_legacy(&self.catalog, expr, None) {
                    Some(desugared) => self.compile_expr(Some(&desugared), alias, today, aliases),
                    None => {
                        // A comparison that cannot be rewritten because the
                        // operand type never resolves is a configuration
                        // problem, not stale data.
                        if let Expr::Comparison { lhs: Some(lhs), .. } = expr {
                            if self.catalog.get_expr_type(Some(lhs.as_ref())) == DataType::Unknown {
                                return Err(Error::Unsupported(
                                    "cannot resolve comparison operand type".into(),
                                ));
                            }
                        }
                        Ok(None)
                    }
                }
            }
        }
    }

    fn compile_field(
        &self,
        table: &str,
        column_id: &str,
        alias: &str,
        today: NaiveDate,
        aliases: &mut AliasGen,
    ) -> Result<Option<Ir>> {
        let column = self
            .schema
            .get_column(table, column_id)
            .ok_or_else(|| Error::ColumnNotFound(format!("{}.{}", table, column_id)))?;
        // A raw IR override stands in for the column name, anchored to the
        // current alias.
        if let Some(fragment) = &column.query {
            let map = HashMap::from([("{alias}", alias)]);
            return Ok(Some(fragment.substitute_aliases(&map)));
        }
        // Computed columns compile through in the same alias scope.
        if let Some(computed) = &column.expr {
            return self.compile_expr(Some(computed), alias, today, aliases);
        }
        Ok(Some(Ir::Field {
            table_alias: alias.to_string(),
            column: column_id.to_string(),
        }))
    }

    fn compile_op(
        &self,
        op: &str,
        exprs: &[Option<Expr>],
        alias: &str,
        today: NaiveDate,
        aliases: &mut AliasGen,
    ) -> Result<Option<Ir>> {
        if !self.catalog.ops().iter().any(|o| o.op == op) {
            return Err(Error::Unsupported(format!("unknown operator: {}", op)));
        }

        if is_window_op(op) {
            return self.compile_window(op, exprs.first().and_then(|e| e.as_ref()), alias, today, aliases);
        }

        if is_passthrough(op) {
            let mut lowered = Vec::new();
            for operand in exprs {
                if let Some(ir) = self.compile_expr(operand.as_ref(), alias, today, aliases)? {
                    lowered.push(ir);
                }
            }
            return Ok(match lowered.len() {
                0 => None,
                1 => Some(lowered.remove(0)),
                _ => Some(Ir::Op {
                    op: op.to_string(),
                    exprs: lowered,
                    modifier: None,
                }),
            });
        }

        match op {
            "= any" => self.compile_any(exprs, alias, today, aliases),
            "between" => self.compile_between(exprs, alias, today, aliases),
            "contains" => self.compile_contains(exprs, alias, today, aliases),
            _ => {
                // Strict operators: a missing operand makes the whole
                // application inexpressible, so it lowers to no filter.
                let mut lowered = Vec::with_capacity(exprs.len());
                for operand in exprs {
                    match self.compile_expr(operand.as_ref(), alias, today, aliases)? {
                        Some(ir) => lowered.push(ir),
                        None => {
                            debug!("operator {} vanished: operand lowered to null", op);
                            return Ok(None);
                        }
                    }
                }
                Ok(Some(Ir::Op {
                    op: op.to_string(),
                    exprs: lowered,
                    modifier: None,
                }))
            }
        }
    }

    /// `= any` against a literal empty collection is a no-filter
    /// simplification, a deliberate approximation rather than a constant
    /// false.
    fn compile_any(
        &self,
        exprs: &[Option<Expr>],
        alias: &str,
        today: NaiveDate,
        aliases: &mut AliasGen,
    ) -> Result<Option<Ir>> {
        let lhs = exprs.first().and_then(|e| e.as_ref());
        let rhs = exprs.get(1).and_then(|e| e.as_ref());
        if let Some(Expr::Literal { value, .. }) = rhs {
            if value.as_list().is_some_and(|items| items.is_empty()) {
                return Ok(None);
            }
        }
        let lhs = match self.compile_expr(lhs, alias, today, aliases)? {
            Some(ir) => ir,
            None => return Ok(None),
        };
        let rhs = match self.compile_expr(rhs, alias, today, aliases)? {
            Some(ir) => ir,
            None => return Ok(None),
        };
        Ok(Some(Ir::Op {
            op: "= any".to_string(),
            exprs: vec![lhs, rhs],
            modifier: None,
        }))
    }

    /// Ternary `between` degrades to a one-sided comparison when only one
    /// bound survives. The binary form against a range literal is split
    /// into boundary literals first.
    fn compile_between(
        &self,
        exprs: &[Option<Expr>],
        alias: &str,
        today: NaiveDate,
        aliases: &mut AliasGen,
    ) -> Result<Option<Ir>> {
        let subject = exprs.first().and_then(|e| e.as_ref());
        let (lo, hi) = match (subject, exprs.get(1).and_then(|e| e.as_ref())) {
            (Some(lhs), Some(Expr::Literal { value_type, value })) if value_type.is_range() => {
                match split_range(&self.catalog, lhs, value) {
                    Some((lo, hi)) => (Some(lo), Some(hi)),
                    None => return Ok(None),
                }
            }
            _ => (
                exprs.get(1).and_then(|e| e.clone()),
                exprs.get(2).and_then(|e| e.clone()),
            ),
        };

        let subject = match self.compile_expr(subject, alias, today, aliases)? {
            Some(ir) => ir,
            None => return Ok(None),
        };
        let lo = self.compile_expr(lo.as_ref(), alias, today, aliases)?;
        let hi = self.compile_expr(hi.as_ref(), alias, today, aliases)?;
        Ok(match (lo, hi) {
            (Some(lo), Some(hi)) => Some(Ir::Op {
                op: "between".to_string(),
                exprs: vec![subject, lo, hi],
                modifier: None,
            }),
            (Some(lo), None) => Some(binary(">=", subject, lo)),
            (None, Some(hi)) => Some(binary("<=", subject, hi)),
            (None, None) => None,
        })
    }

    /// Set containment runs over a structured container representation, so
    /// both operands carry a cast modifier unless this is plain substring
    /// containment over text.
    fn compile_contains(
        &self,
        exprs: &[Option<Expr>],
        alias: &str,
        today: NaiveDate,
        aliases: &mut AliasGen,
    ) -> Result<Option<Ir>> {
        let lhs_type = self
            .catalog
            .get_expr_type(exprs.first().and_then(|e| e.as_ref()));
        let mut lowered = Vec::with_capacity(exprs.len());
        for operand in exprs {
            match self.compile_expr(operand.as_ref(), alias, today, aliases)? {
                Some(ir) => lowered.push(ir),
                None => return Ok(None),
            }
        }
        let modifier = (lhs_type != DataType::Text).then(|| "jsonb".to_string());
        Ok(Some(Ir::Op {
            op: "contains".to_string(),
            exprs: lowered,
            modifier,
        }))
    }

    /// A date-window operator becomes an AND of two boundary comparisons
    /// against literals computed from the clock, matched to the operand's
    /// temporal kind.
    fn compile_window(
        &self,
        op: &str,
        operand: Option<&Expr>,
        alias: &str,
        today: NaiveDate,
        aliases: &mut AliasGen,
    ) -> Result<Option<Ir>> {
        let operand_type = self.catalog.get_expr_type(operand);
        let subject = match self.compile_expr(operand, alias, today, aliases)? {
            Some(ir) => ir,
            None => return Ok(None),
        };
        let (lo, hi) = match date_window(op, today) {
            Some(bounds) => bounds,
            None => return Err(Error::Unsupported(format!("unknown operator: {}", op))),
        };
        let (lo, hi) = if operand_type == DataType::DateTime {
            (Value::DateTime(day_start(lo)), Value::DateTime(day_end(hi)))
        } else {
            (Value::Date(lo), Value::Date(hi))
        };
        Ok(Some(Ir::Op {
            op: "and".to_string(),
            exprs: vec![
                binary(">=", subject.clone(), Ir::Literal { value: lo }),
                binary("<=", subject, Ir::Literal { value: hi }),
            ],
            modifier: None,
        }))
    }

    #[allow(clippy::too_many_arguments)]
    fn compile_scalar(
        &self,
        table: &str,
        joins: &[String],
        inner: Option<&Expr>,
        aggr: Option<&str>,
        where_clause: Option<&Expr>,
        alias: &str,
        today: NaiveDate,
        aliases: &mut AliasGen,
    ) -> Result<Option<Ir>> {
        // Zero joins: no subquery is needed, the inner expression lives in
        // the current scope.
        if joins.is_empty() {
            return self.compile_expr(inner, alias, today, aliases);
        }

        let mut current_table = table.to_string();
        let mut current_alias = alias.to_string();
        let mut from: Option<Ir> = None;
        let mut condition: Option<Ir> = None;

        for join_id in joins {
            let column = self
                .schema
                .get_column(&current_table, join_id)
                .ok_or_else(|| {
                    Error::ColumnNotFound(format!("{}.{}", current_table, join_id))
                })?;
            let join = column.join.as_ref().ok_or_else(|| {
                Error::Configuration(format!(
                    "column {}.{} is not a join",
                    current_table, join_id
                ))
            })?;
            let target = self.schema.get_table(&join.to_table).ok_or_else(|| {
                Error::ColumnNotFound(join.to_table.clone())
            })?;

            let fresh = aliases.next();
            let target_ref = table_reference(target, &fresh);
            let on = match &join.on {
                Some(fragment) => {
                    let map = HashMap::from([
                        ("{from}", current_alias.as_str()),
                        ("{to}", fresh.as_str()),
                    ]);
                    fragment.substitute_aliases(&map)
                }
                None => binary(
                    "=",
                    Ir::Field {
                        table_alias: current_alias.clone(),
                        column: join.from_column.clone(),
                    },
                    Ir::Field {
                        table_alias: fresh.clone(),
                        column: join.to_column.clone(),
                    },
                ),
            };

            // The first hop's condition correlates the subquery with the
            // enclosing scope, so it belongs in the where clause; later
            // hops chain as left joins carrying their condition inline.
            from = Some(match from {
                None => {
                    condition = Some(on);
                    target_ref
                }
                Some(left) => Ir::Join {
                    left: Box::new(left),
                    right: Box::new(target_ref),
                    kind: JoinKind::Left,
                    on: Box::new(on),
                },
            });
            current_table = join.to_table.clone();
            current_alias = fresh;
        }

        if let Some(w) = self.compile_expr(where_clause, &current_alias, today, aliases)? {
            condition = Some(match condition {
                Some(c) => Ir::Op {
                    op: "and".to_string(),
                    exprs: vec![c, w],
                    modifier: None,
                },
                None => w,
            });
        }

        let inner_ir = self.compile_expr(inner, &current_alias, today, aliases)?;

        let mut order_by = None;
        let mut limit = None;
        let expr = match aggr {
            None => inner_ir,
            Some("last") => {
                let terminal = self
                    .schema
                    .get_table(&current_table)
                    .ok_or_else(|| Error::ColumnNotFound(current_table.clone()))?;
                let ordering = terminal.ordering.as_ref().ok_or_else(|| {
                    Error::Configuration(format!(
                        "table {} has no ordering column, cannot take last",
                        current_table
                    ))
                })?;
                order_by = Some(OrderBy {
                    expr: Box::new(Ir::Field {
                        table_alias: current_alias.clone(),
                        column: ordering.clone(),
                    }),
                    dir: Direction::Descending,
                });
                limit = Some(1);
                inner_ir
            }
            Some("count") => Some(Ir::Op {
                op: "count".to_string(),
                exprs: inner_ir.into_iter().collect(),
                modifier: None,
            }),
            Some(aggr) => match inner_ir {
                Some(inner_ir) => Some(Ir::Op {
                    op: aggr.to_string(),
                    exprs: vec![inner_ir],
                    modifier: None,
                }),
                // An aggregation over nothing is nothing.
                None => return Ok(None),
            },
        };

        Ok(Some(Ir::Scalar {
            expr: expr.map(Box::new),
            from: from.map(Box::new),
            where_clause: condition.map(Box::new),
            order_by,
            limit,
        }))
    }

    fn compile_case(
        &self,
        cases: &[CaseBranch],
        otherwise: Option<&Expr>,
        alias: &str,
        today: NaiveDate,
        aliases: &mut AliasGen,
    ) -> Result<Option<Ir>> {
        let mut lowered = Vec::new();
        for branch in cases {
            let when = match self.compile_expr(branch.when.as_ref(), alias, today, aliases)? {
                Some(ir) => ir,
                None => continue,
            };
            let then = self
                .compile_expr(branch.then.as_ref(), alias, today, aliases)?
                .unwrap_or(Ir::Literal { value: Value::Null });
            lowered.push(IrCaseBranch { when, then });
        }
        let otherwise = self.compile_expr(otherwise, alias, today, aliases)?;
        if lowered.is_empty() {
            return Ok(otherwise);
        }
        Ok(Some(Ir::Case {
            cases: lowered,
            otherwise: otherwise.map(Box::new),
        }))
    }
}

fn binary(op: &str, lhs: Ir, rhs: Ir) -> Ir {
    Ir::Op {
        op: op.to_string(),
        exprs: vec![lhs, rhs],
        modifier: None,
    }
}

fn table_reference(table: &Table, alias: &str) -> Ir {
    match &table.query {
        Some(fragment) => Ir::Subquery {
            query: Box::new(fragment.clone()),
            alias: alias.to_string(),
        },
        None => Ir::Table {
            table: table.id.clone(),
            alias: alias.to_string(),
        },
    }
}
