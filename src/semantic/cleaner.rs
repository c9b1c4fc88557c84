//! Self-healing expression normalizer
//!
//! Expressions persist while schemas evolve, so a stored tree routinely
//! goes stale: columns vanish, enum values are retired, join chains change
//! multiplicity. The cleaner repairs what it can and degrades the rest to
//! null. It never mutates its input and never fails: irreparable input
//! cleans to `None`.
//!
//! Cleaning is idempotent: re-cleaning an already-clean expression under
//! the same options is a fixed point.

use super::{aggr_status, CleanOptions, MAX_DEPTH};
use crate::catalog::{OpItem, TypeCatalog};
use crate::types::{CaseBranch, DataType, Expr, Schema, Value, Variable};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

pub struct Cleaner {
    schema: Arc<Schema>,
    catalog: TypeCatalog,
}

impl Cleaner {
    pub fn new(schema: Arc<Schema>) -> Self {
        let catalog = TypeCatalog::new(schema.clone());
        Cleaner { schema, catalog }
    }

    /// Returns the repaired expression, or `None` if the expression is
    /// irreparable under the given options.
    pub fn clean(&self, expr: Option<&Expr>, opts: &CleanOptions) -> Option<Expr> {
        self.clean_at(expr, opts, 0)
    }

    fn clean_at(&self, expr: Option<&Expr>, opts: &CleanOptions, depth: usize) -> Option<Expr> {
        if depth > MAX_DEPTH {
            return None;
        }
        let expr = expr?;

        // Legacy nodes are rewritten to canonical form first, then cleaned
        // like anything else.
        if matches!(expr, Expr::Comparison { .. } | Expr::Logical { .. }) {
            let desugared = desugar_legacy(&self.catalog, expr, opts.table.as_deref())?;
            return self.clean_at(Some(&desugared), opts, depth);
        }

        // Every table-anchored node must sit on the expected table, and
        // that table must still exist.
        if let Some(table) = expr.table() {
            if table.is_empty() {
                return None;
            }
            if let Some(expected) = &opts.table {
                if table != expected {
                    debug!("dropping node anchored to {} in {} context", table, expected);
                    return None;
                }
            }
            if self.schema.get_table(table).is_none() {
                debug!("dropping node anchored to unknown table {}", table);
                return None;
            }
        }

        let cleaned = match expr {
            Expr::Literal { value_type, value } => self.clean_literal(*value_type, value, opts),
            Expr::Id { table } => match &opts.id_table {
                Some(id_table) if id_table != table => None,
                _ => Some(expr.clone()),
            },
            Expr::Field { table, column } => self.clean_field(table, column, opts, depth),
            Expr::Op { table, op, exprs } => self.clean_op(table, op, exprs, depth),
            Expr::Scalar {
                table,
                joins,
                expr: inner,
                aggr,
                where_clause,
            } => {
                return self.clean_scalar(
                    table,
                    joins,
                    inner.as_deref(),
                    aggr.as_deref(),
                    where_clause.as_deref(),
                    opts,
                    depth,
                )
            }
            Expr::Case { cases, otherwise } => {
                return self.clean_case(cases, otherwise.as_deref(), opts, depth)
            }
            Expr::Score { input, scores } => {
                self.clean_score(input.as_deref(), scores, opts, depth)
            }
            Expr::BuildEnumset { values } => self.clean_build_enumset(values, opts, depth),
            Expr::Variable { variable_id, .. } => self
                .schema
                .get_variable(variable_id)
                .and_then(|var| self.clean_variable(var, opts))
                .map(|_| expr.clone()),
            Expr::Count { .. } => Some(expr.clone()),
            Expr::Comparison { .. } | Expr::Logical { .. } => unreachable!("desugared above"),
        }?;

        self.finish(cleaned, opts)
    }

    /// Context checks applied to every cleaned node: inferred type and
    /// aggregation classification.
    fn finish(&self, cleaned: Expr, opts: &CleanOptions) -> Option<Expr> {
        let inferred = self.catalog.get_expr_type(Some(&cleaned));
        if !opts.type_allowed(inferred) {
            debug!("dropping node of type {} not allowed by context", inferred);
            return None;
        }
        if let Some(statuses) = &opts.aggr_statuses {
            if !statuses.contains(&aggr_status(&cleaned)) {
                return None;
            }
        }
        Some(cleaned)
    }

    fn clean_literal(
        &self,
        value_type: DataType,
        value: &Value,
        opts: &CleanOptions,
    ) -> Option<Expr> {
        match value_type {
            // An enum literal whose value was retired is irreparable.
            DataType::Enum => {
                if let Some(allowed) = &opts.enum_value_ids {
                    match value.as_text() {
                        Some(v) if allowed.contains(v) => {}
                        _ => return None,
                    }
                }
                Some(Expr::literal(value_type, value.clone()))
            }
            // An enumset survives partially: retired members are dropped,
            // the rest of the set keeps filtering.
            DataType::EnumSet => {
                let kept = match (&opts.enum_value_ids, value.as_list()) {
                    (Some(allowed), Some(items)) => items
                        .iter()
                        .filter(|v| v.as_text().is_some_and(|s| allowed.contains(s)))
                        .cloned()
                        .collect(),
                    (_, Some(items)) => items.to_vec(),
                    (_, None) => Vec::new(),
                };
                Some(Expr::literal(DataType::EnumSet, Value::List(kept)))
            }
            _ => Some(Expr::literal(value_type, value.clone())),
        }
    }

    fn clean_field(
        &self,
        table: &str,
        column_id: &str,
        opts: &CleanOptions,
        depth: usize,
    ) -> Option<Expr> {
        let column = match self.schema.get_column(table, column_id) {
            Some(c) => c,
            None => {
                debug!("dropping reference to missing column {}.{}", table, column_id);
                return None;
            }
        };
        if matches!(column.data_type, DataType::Enum | DataType::EnumSet) {
            if let Some(allowed) = &opts.enum_value_ids {
                let ids = column.value_ids().unwrap_or_default();
                if !ids.iter().all(|id| allowed.contains(*id)) {
                    return None;
                }
            }
        }
        // A reference to a computed column is only as good as its
        // definition: a circular or irreparable definition drops the field.
        if let Some(computed) = &column.expr {
            self.clean_at(Some(computed), &CleanOptions::for_table(table), depth + 1)?;
        }
        Some(Expr::field(table, column_id))
    }

    fn clean_op(
        &self,
        table: &str,
        op: &str,
        exprs: &[Option<Expr>],
        depth: usize,
    ) -> Option<Expr> {
        let overloads: Vec<&OpItem> =
            self.catalog.ops().iter().filter(|o| o.op == op).collect();
        if overloads.is_empty() {
            debug!("dropping application of unknown operator {}", op);
            return None;
        }
        if !is_passthrough(op) {
            let count = exprs.len();
            let arity_ok = overloads.iter().any(|o| {
                count >= o.operands.len() && (count == o.operands.len() || o.variadic.is_some())
            });
            if !arity_ok {
                return None;
            }
        }

        let mut cleaned: Vec<Option<Expr>> = Vec::with_capacity(exprs.len());
        let mut head_enum_ids: Option<BTreeSet<String>> = None;
        let mut head_id_table: Option<String> = None;
        for (i, operand) in exprs.iter().enumerate() {
            let allowed = operand_types_at(&overloads, i);
            let child = CleanOptions {
                table: Some(table.to_string()),
                types: (!allowed.is_empty()).then_some(allowed),
                enum_value_ids: if i > 0 { head_enum_ids.clone() } else { None },
                id_table: if i > 0 { head_id_table.clone() } else { None },
                aggr_statuses: None,
            };
            let c = self.clean_at(operand.as_ref(), &child, depth);
            if i == 0 {
                if let Some(head) = &c {
                    let (enum_ids, id_table) = operand_context(&self.schema, head);
                    head_enum_ids = enum_ids;
                    head_id_table = id_table;
                }
            }
            cleaned.push(c);
        }

        if is_passthrough(op) {
            // N-ary pass-through: dead operands drop out, a sole survivor
            // replaces the node, an empty node cleans away entirely.
            let mut survivors: Vec<Expr> = cleaned.into_iter().flatten().collect();
            match survivors.len() {
                0 => None,
                1 => Some(survivors.remove(0)),
                _ => Some(Expr::Op {
                    table: table.to_string(),
                    op: op.to_string(),
                    exprs: survivors.into_iter().map(Some).collect(),
                }),
            }
        } else {
            // Strict operators are not expressible with a missing operand.
            if cleaned.iter().any(|c| c.is_none()) {
                return None;
            }
            Some(Expr::Op {
                table: table.to_string(),
                op: op.to_string(),
                exprs: cleaned,
            })
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn clean_scalar(
        &self,
        table: &str,
        joins: &[String],
        inner: Option<&Expr>,
        aggr: Option<&str>,
        where_clause: Option<&Expr>,
        opts: &CleanOptions,
        depth: usize,
    ) -> Option<Expr> {
        // With no joins the scalar wrapper is pure ceremony.
        if joins.is_empty() {
            return self.clean_at(inner, opts, depth);
        }

        let (terminal, multiple) = match self.catalog.resolve_joins(table, joins) {
            Some(resolved) => resolved,
            None => {
                debug!("dropping scalar with broken join chain from {}", table);
                return None;
            }
        };

        let inner_opts = CleanOptions::for_table(terminal.clone());
        let inner_c = match inner {
            Some(e) => Some(self.clean_at(Some(e), &inner_opts, depth)?),
            None => None,
        };
        let where_opts =
            CleanOptions::for_table(terminal).forcing(vec![DataType::Boolean]);
        let where_c = self.clean_at(where_clause, &where_opts, depth);

        // Aggregation is mandatory over a to-many chain and forbidden over
        // a to-one chain.
        let aggr_c = if multiple {
            let aggrs = self.catalog.get_aggrs(inner_c.as_ref());
            match aggr {
                Some(a) if aggrs.iter().any(|item| item.id == a) => Some(a.to_string()),
                _ => {
                    let replacement = aggrs.first().map(|item| item.id.to_string());
                    debug!(
                        "replacing aggregation {:?} with {:?}",
                        aggr, replacement
                    );
                    replacement
                }
            }
        } else {
            None
        };

        let cleaned = Expr::Scalar {
            table: table.to_string(),
            joins: joins.to_vec(),
            expr: inner_c.map(Box::new),
            aggr: aggr_c,
            where_clause: where_c.map(Box::new),
        };
        self.finish(cleaned, opts)
    }

    fn clean_case(
        &self,
        cases: &[CaseBranch],
        otherwise: Option<&Expr>,
        opts: &CleanOptions,
        depth: usize,
    ) -> Option<Expr> {
        let when_opts = CleanOptions {
            table: opts.table.clone(),
            types: Some(vec![DataType::Boolean]),
            ..Default::default()
        };
        let branch_opts = CleanOptions {
            table: opts.table.clone(),
            types: opts.types.clone(),
            enum_value_ids: opts.enum_value_ids.clone(),
            id_table: opts.id_table.clone(),
            aggr_statuses: None,
        };

        let mut kept = Vec::new();
        for branch in cases {
            // A branch without a viable condition can never fire.
            let when = match self.clean_at(branch.when.as_ref(), &when_opts, depth) {
                Some(w) => w,
                None => continue,
            };
            let then = self.clean_at(branch.then.as_ref(), &branch_opts, depth);
            kept.push(CaseBranch {
                when: Some(when),
                then,
            });
        }
        let otherwise_c = self.clean_at(otherwise, &branch_opts, depth);
        if kept.is_empty() {
            return otherwise_c;
        }
        self.finish(
            Expr::Case {
                cases: kept,
                otherwise: otherwise_c.map(Box::new),
            },
            opts,
        )
    }

    fn clean_score(
        &self,
        input: Option<&Expr>,
        scores: &BTreeMap<String, Expr>,
        opts: &CleanOptions,
        depth: usize,
    ) -> Option<Expr> {
        let input_opts = CleanOptions {
            table: opts.table.clone(),
            types: Some(vec![DataType::Enum, DataType::EnumSet]),
            ..Default::default()
        };
        let input_c = self.clean_at(input, &input_opts, depth)?;
        let (input_ids, _) = operand_context(&self.schema, &input_c);

        let score_opts = CleanOptions {
            table: opts.table.clone(),
            types: Some(vec![DataType::Number]),
            ..Default::default()
        };
        let mut kept = BTreeMap::new();
        for (key, sub) in scores {
            if let Some(ids) = &input_ids {
                if !ids.contains(key) {
                    continue;
                }
            }
            if let Some(sub_c) = self.clean_at(Some(sub), &score_opts, depth) {
                kept.insert(key.clone(), sub_c);
            }
        }
        Some(Expr::Score {
            input: Some(Box::new(input_c)),
            scores: kept,
        })
    }

    fn clean_build_enumset(
        &self,
        values: &BTreeMap<String, Expr>,
        opts: &CleanOptions,
        depth: usize,
    ) -> Option<Expr> {
        let entry_opts = CleanOptions {
            table: opts.table.clone(),
            types: Some(vec![DataType::Boolean]),
            ..Default::default()
        };
        let mut kept = BTreeMap::new();
        for (key, sub) in values {
            if let Some(allowed) = &opts.enum_value_ids {
                if !allowed.contains(key) {
                    continue;
                }
            }
            if let Some(sub_c) = self.clean_at(Some(sub), &entry_opts, depth) {
                kept.insert(key.clone(), sub_c);
            }
        }
        Some(Expr::BuildEnumset { values: kept })
    }

    fn clean_variable(&self, var: &Variable, opts: &CleanOptions) -> Option<()> {
        if let Some(id_table) = &opts.id_table {
            if var.data_type == DataType::Id && var.id_table.as_deref() != Some(id_table.as_str())
            {
                return None;
            }
        }
        if matches!(var.data_type, DataType::Enum | DataType::EnumSet) {
            if let Some(allowed) = &opts.enum_value_ids {
                let ids: Vec<&str> = var
                    .values
                    .as_ref()
                    .map(|vs| vs.iter().map(|v| v.id.as_str()).collect())
                    .unwrap_or_default();
                if !ids.iter().all(|id| allowed.contains(*id)) {
                    return None;
                }
            }
        }
        Some(())
    }
}

pub(crate) fn is_passthrough(op: &str) -> bool {
    matches!(op, "and" | "or" | "+" | "*")
}

/// The union of accepted types at operand position `i` across an
/// operator's overloads.
pub(crate) fn operand_types_at(overloads: &[&OpItem], i: usize) -> Vec<DataType> {
    let mut out = Vec::new();
    for item in overloads {
        if let Some(t) = item.operand_at(i) {
            if !out.contains(&t) {
                out.push(t);
            }
        }
    }
    out
}

/// Enum value ids and id-table constraints the head operand of an operator
/// imposes on its remaining operands: comparing against an enum column
/// restricts the literal side to that column's declared values.
pub(crate) fn operand_context(
    schema: &Schema,
    expr: &Expr,
) -> (Option<BTreeSet<String>>, Option<String>) {
    match expr {
        Expr::Field { table, column } => {
            if let Some(col) = schema.get_column(table, column) {
                if matches!(col.data_type, DataType::Enum | DataType::EnumSet) {
                    let ids = col
                        .values
                        .as_ref()
                        .map(|vs| vs.iter().map(|v| v.id.clone()).collect());
                    return (ids, None);
                }
            }
            (None, None)
        }
        Expr::Id { table } => (None, Some(table.clone())),
        Expr::Variable { variable_id, .. } => match schema.get_variable(variable_id) {
            Some(var) => {
                let ids = var
                    .values
                    .as_ref()
                    .map(|vs| vs.iter().map(|v| v.id.clone()).collect());
                (ids, var.id_table.clone())
            }
            None => (None, None),
        },
        Expr::Scalar { expr: inner, aggr: None, .. } => match inner {
            Some(inner) => operand_context(schema, inner),
            None => (None, None),
        },
        _ => (None, None),
    }
}

/// Rewrites a legacy comparison or logical node into canonical `Op` form.
/// Shared by the cleaner and the validator so both passes agree on what a
/// legacy node means.
pub(crate) fn desugar_legacy(
    catalog: &TypeCatalog,
    expr: &Expr,
    context_table: Option<&str>,
) -> Option<Expr> {
    match expr {
        Expr::Logical { op, exprs } => {
            let table = context_table
                .map(str::to_string)
                .or_else(|| exprs.iter().flatten().find_map(|e| e.table().map(str::to_string)))?;
            Some(Expr::Op {
                table,
                op: op.clone(),
                exprs: exprs.clone(),
            })
        }
        Expr::Comparison { lhs, op, rhs } => {
            let lhs = lhs.as_deref()?;
            let table = context_table
                .map(str::to_string)
                .or_else(|| lhs.table().map(str::to_string))?;
            match (op.as_str(), rhs.as_deref()) {
                // "= true" is the bare expression, "= false" its negation.
                (
                    "=",
                    Some(Expr::Literal {
                        value: Value::Bool(true),
                        ..
                    }),
                ) => Some(lhs.clone()),
                (
                    "=",
                    Some(Expr::Literal {
                        value: Value::Bool(false),
                        ..
                    }),
                ) => Some(Expr::Op {
                    table,
                    op: "not".to_string(),
                    exprs: vec![Some(lhs.clone())],
                }),
                (
                    "between",
                    Some(Expr::Literal {
                        value_type,
                        value,
                    }),
                ) if value_type.is_range() => {
                    let (lo, hi) = split_range(catalog, lhs, value)?;
                    Some(Expr::Op {
                        table,
                        op: "between".to_string(),
                        exprs: vec![Some(lhs.clone()), Some(lo), Some(hi)],
                    })
                }
                _ => {
                    let mut operands = vec![Some(lhs.clone())];
                    if let Some(rhs) = rhs.as_deref() {
                        operands.push(Some(rhs.clone()));
                    }
                    Some(Expr::Op {
                        table,
                        op: op.clone(),
                        exprs: operands,
                    })
                }
            }
        }
        _ => None,
    }
}

/// Splits a date/datetime range literal into two boundary literals matched
/// to the lhs type: a date-typed lhs gets date bounds (time components
/// truncated), a datetime-typed lhs gets datetime bounds spanning whole
/// days. A lhs whose type cannot be resolved refuses the split rather than
/// guessing a boundary representation.
pub(crate) fn split_range(
    catalog: &TypeCatalog,
    lhs: &Expr,
    value: &Value,
) -> Option<(Expr, Expr)> {
    let items = value.as_list()?;
    if items.len() != 2 {
        return None;
    }
    let (lo, hi) = (&items[0], &items[1]);
    match catalog.get_expr_type(Some(lhs)) {
        DataType::Date => Some((
            Expr::literal(DataType::Date, Value::Date(lo.as_date()?)),
            Expr::literal(DataType::Date, Value::Date(hi.as_date()?)),
        )),
        DataType::DateTime => {
            let lo_dt = match lo {
                Value::DateTime(dt) => *dt,
                _ => lo.as_date()?.and_hms_opt(0, 0, 0)?,
            };
            let hi_dt = match hi {
                Value::DateTime(dt) => *dt,
                _ => hi.as_date()?.and_hms_opt(23, 59, 59)?,
            };
            Some((
                Expr::literal(DataType::DateTime, Value::DateTime(lo_dt)),
                Expr::literal(DataType::DateTime, Value::DateTime(hi_dt)),
            ))
        }
        _ => None,
    }
}
