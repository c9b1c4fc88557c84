//! Pure expression checker
//!
//! Structurally mirrors the cleaner but never repairs: the result is either
//! `None` (valid) or a short user-facing diagnostic. Validation recurses
//! into computed-column sub-expressions with a depth cap, so circular
//! column definitions surface as a diagnostic instead of unbounded
//! recursion.

use super::cleaner::{desugar_legacy, is_passthrough, operand_context, operand_types_at};
use super::{aggr_status, CleanOptions, MAX_DEPTH};
use crate::catalog::{OpItem, TypeCatalog};
use crate::types::{CaseBranch, DataType, Expr, Schema, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct Validator {
    schema: Arc<Schema>,
    catalog: TypeCatalog,
}

impl Validator {
    pub fn new(schema: Arc<Schema>) -> Self {
        let catalog = TypeCatalog::new(schema.clone());
        Validator { schema, catalog }
    }

    /// Returns `None` when the expression is valid under the options, or a
    /// short diagnostic describing the first problem found. Never panics
    /// and never repairs.
    pub fn validate(&self, expr: Option<&Expr>, opts: &CleanOptions) -> Option<String> {
        self.check(expr, opts, 0)
    }

    fn check(&self, expr: Option<&Expr>, opts: &CleanOptions, depth: usize) -> Option<String> {
        let expr = match expr {
            Some(e) => e,
            // "No expression" is a valid placeholder.
            None => return None,
        };
        if depth > MAX_DEPTH {
            return Some("circular reference".to_string());
        }

        if matches!(expr, Expr::Comparison { .. } | Expr::Logical { .. }) {
            return match desugar_legacy(&self.catalog, expr, opts.table.as_deref()) {
                Some(desugared) => self.check(Some(&desugared), opts, depth),
                None => Some("incomplete comparison expression".to_string()),
            };
        }

        if let Some(table) = expr.table() {
            if table.is_empty() {
                return Some("expression has no table".to_string());
            }
            if let Some(expected) = &opts.table {
                if table != expected {
                    return Some(format!(
                        "table mismatch: expected {}, found {}",
                        expected, table
                    ));
                }
            }
            if self.schema.get_table(table).is_none() {
                return Some(format!("unknown table: {}", table));
            }
        }

        let structural = match expr {
            Expr::Literal { value_type, value } => {
                self.check_literal(*value_type, value, opts)
            }
            Expr::Id { table } => match &opts.id_table {
                Some(id_table) if id_table != table => Some(format!(
                    "id must reference table {}, found {}",
                    id_table, table
                )),
                _ => None,
            },
            Expr::Field { table, column } => self.check_field(table, column, opts, depth),
            Expr::Op { table, op, exprs } => self.check_op(table, op, exprs, depth),
            Expr::Scalar {
                table,
                joins,
                expr: inner,
                aggr,
                where_clause,
            } => {
                return self.check_scalar(
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
                self.check_case(cases, otherwise.as_deref(), opts, depth)
            }
            Expr::Score { input, scores } => {
                self.check_score(input.as_deref(), scores, opts, depth)
            }
            Expr::BuildEnumset { values } => self.check_build_enumset(values, opts, depth),
            Expr::Variable { variable_id, .. } => self.check_variable(variable_id, opts),
            Expr::Count { .. } => None,
            Expr::Comparison { .. } | Expr::Logical { .. } => unreachable!("desugared above"),
        };
        if structural.is_some() {
            return structural;
        }

        self.check_context(expr, opts)
    }

    /// Re-validates a node's own inferred type and aggregation status
    /// against the options, after its structure checked out.
    fn check_context(&self, expr: &Expr, opts: &CleanOptions) -> Option<String> {
        let inferred = self.catalog.get_expr_type(Some(expr));
        if !opts.type_allowed(inferred) {
            let expected: Vec<String> = opts
                .types
                .iter()
                .flatten()
                .map(|t| t.to_string())
                .collect();
            return Some(format!(
                "type mismatch: expected {}, found {}",
                expected.join(" or "),
                inferred
            ));
        }
        if let Some(statuses) = &opts.aggr_statuses {
            if !statuses.contains(&aggr_status(expr)) {
                return Some("aggregation status not allowed here".to_string());
            }
        }
        None
    }

    fn check_literal(
        &self,
        value_type: DataType,
        value: &Value,
        opts: &CleanOptions,
    ) -> Option<String> {
        let allowed = opts.enum_value_ids.as_ref()?;
        match value_type {
            DataType::Enum => match value.as_text() {
                Some(v) if allowed.contains(v) => None,
                Some(v) => Some(format!("enum value not allowed: {}", v)),
                None => Some("enum literal must be a value id".to_string()),
            },
            DataType::EnumSet => {
                for item in value.as_list().unwrap_or_default() {
                    match item.as_text() {
                        Some(v) if allowed.contains(v) => {}
                        Some(v) => return Some(format!("enum value not allowed: {}", v)),
                        None => return Some("enumset literal must hold value ids".to_string()),
                    }
                }
                None
            }
            _ => None,
        }
    }

    fn check_field(
        &self,
        table: &str,
        column_id: &str,
        opts: &CleanOptions,
        depth: usize,
    ) -> Option<String> {
        let column = match self.schema.get_column(table, column_id) {
            Some(c) => c,
            None => return Some(format!("unknown column: {}.{}", table, column_id)),
        };
        if matches!(column.data_type, DataType::Enum | DataType::EnumSet) {
            if let Some(allowed) = &opts.enum_value_ids {
                let ids = column.value_ids().unwrap_or_default();
                if !ids.iter().all(|id| allowed.contains(*id)) {
                    return Some(format!(
                        "column {} carries enum values not allowed here",
                        column_id
                    ));
                }
            }
        }
        // Computed columns are validated through, with the depth counter
        // guarding against definition cycles.
        if let Some(computed) = &column.expr {
            let sub_opts = CleanOptions::for_table(table);
            if let Some(diag) = self.check(Some(computed), &sub_opts, depth + 1) {
                return Some(format!(
                    "computed column {}.{}: {}",
                    table, column_id, diag
                ));
            }
        }
        None
    }

    fn check_op(
        &self,
        table: &str,
        op: &str,
        exprs: &[Option<Expr>],
        depth: usize,
    ) -> Option<String> {
        let overloads: Vec<&OpItem> =
            self.catalog.ops().iter().filter(|o| o.op == op).collect();
        if overloads.is_empty() {
            return Some(format!("unknown operator: {}", op));
        }

        if is_passthrough(op) {
            if exprs.iter().all(|e| e.is_none()) {
                return Some(format!("operator {} has no operands", op));
            }
        } else {
            let count = exprs.len();
            let arity_ok = overloads.iter().any(|o| {
                count >= o.operands.len()
                    && (count == o.operands.len() || o.variadic.is_some())
            });
            if !arity_ok {
                return Some(format!("wrong operand count for operator {}", op));
            }
            if exprs.iter().any(|e| e.is_none()) {
                return Some(format!("missing operand for operator {}", op));
            }
        }

        let mut head_enum_ids = None;
        let mut head_id_table = None;
        for (i, operand) in exprs.iter().enumerate() {
            let allowed = operand_types_at(&overloads, i);
            let child = CleanOptions {
                table: Some(table.to_string()),
                types: (!allowed.is_empty()).then_some(allowed),
                enum_value_ids: if i > 0 { head_enum_ids.clone() } else { None },
                id_table: if i > 0 { head_id_table.clone() } else { None },
                aggr_statuses: None,
            };
            if let Some(diag) = self.check(operand.as_ref(), &child, depth) {
                return Some(diag);
            }
            if i == 0 {
                if let Some(head) = operand {
                    let (enum_ids, id_table) = operand_context(&self.schema, head);
                    head_enum_ids = enum_ids;
                    head_id_table = id_table;
                }
            }
        }
        None
    }

    #[allow(clippy::too_many_arguments)]
    fn check_scalar(
        &self,
        table: &str,
        joins: &[String],
        inner: Option<&Expr>,
        aggr: Option<&str>,
        where_clause: Option<&Expr>,
        opts: &CleanOptions,
        depth: usize,
    ) -> Option<String> {
        if joins.is_empty() {
            return self.check(inner, opts, depth);
        }

        let (terminal, multiple) = match self.catalog.resolve_joins(table, joins) {
            Some(resolved) => resolved,
            None => return Some(format!("invalid join chain from table {}", table)),
        };

        let inner_opts = CleanOptions::for_table(terminal.clone());
        if let Some(diag) = self.check(inner, &inner_opts, depth) {
            return Some(diag);
        }
        let where_opts =
            CleanOptions::for_table(terminal).forcing(vec![DataType::Boolean]);
        if let Some(diag) = self.check(where_clause, &where_opts, depth) {
            return Some(diag);
        }

        match (multiple, aggr) {
            (true, None) => {
                return Some("aggregation required over a to-many join chain".to_string())
            }
            (true, Some(a)) => {
                let aggrs = self.catalog.get_aggrs(inner);
                if !aggrs.iter().any(|item| item.id == a) {
                    return Some(format!("illegal aggregation: {}", a));
                }
            }
            (false, Some(a)) => {
                return Some(format!(
                    "aggregation {} not allowed over a to-one join chain",
                    a
                ))
            }
            (false, None) => {}
        }

        // Context checks need the full scalar node back.
        let node = Expr::Scalar {
            table: table.to_string(),
            joins: joins.to_vec(),
            expr: inner.cloned().map(Box::new),
            aggr: aggr.map(str::to_string),
            where_clause: where_clause.cloned().map(Box::new),
        };
        self.check_context(&node, opts)
    }

    fn check_case(
        &self,
        cases: &[CaseBranch],
        otherwise: Option<&Expr>,
        opts: &CleanOptions,
        depth: usize,
    ) -> Option<String> {
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
        for branch in cases {
            if branch.when.is_none() {
                return Some("missing case condition".to_string());
            }
            if let Some(diag) = self.check(branch.when.as_ref(), &when_opts, depth) {
                return Some(diag);
            }
            if let Some(diag) = self.check(branch.then.as_ref(), &branch_opts, depth) {
                return Some(diag);
            }
        }
        self.check(otherwise, &branch_opts, depth)
    }

    fn check_score(
        &self,
        input: Option<&Expr>,
        scores: &BTreeMap<String, Expr>,
        opts: &CleanOptions,
        depth: usize,
    ) -> Option<String> {
        let input = match input {
            Some(e) => e,
            None => return Some("missing score input".to_string()),
        };
        let input_opts = CleanOptions {
            table: opts.table.clone(),
            types: Some(vec![DataType::Enum, DataType::EnumSet]),
            ..Default::default()
        };
        if let Some(diag) = self.check(Some(input), &input_opts, depth) {
            return Some(diag);
        }
        let (input_ids, _) = operand_context(&self.schema, input);
        let score_opts = CleanOptions {
            table: opts.table.clone(),
            types: Some(vec![DataType::Number]),
            ..Default::default()
        };
        for (key, sub) in scores {
            if let Some(ids) = &input_ids {
                if !ids.contains(key) {
                    return Some(format!("score key not in enum set: {}", key));
                }
            }
            if let Some(diag) = self.check(Some(sub), &score_opts, depth) {
                return Some(diag);
            }
        }
        None
    }

    fn check_build_enumset(
        &self,
        values: &BTreeMap<String, Expr>,
        opts: &CleanOptions,
        depth: usize,
    ) -> Option<String> {
        let entry_opts = CleanOptions {
            table: opts.table.clone(),
            types: Some(vec![DataType::Boolean]),
            ..Default::default()
        };
        for (key, sub) in values {
            if let Some(allowed) = &opts.enum_value_ids {
                if !allowed.contains(key) {
                    return Some(format!("enum value not allowed: {}", key));
                }
            }
            if let Some(diag) = self.check(Some(sub), &entry_opts, depth) {
                return Some(diag);
            }
        }
        None
    }

    fn check_variable(&self, variable_id: &str, opts: &CleanOptions) -> Option<String> {
        let var = match self.schema.get_variable(variable_id) {
            Some(v) => v,
            None => return Some(format!("unknown variable: {}", variable_id)),
        };
        if let Some(id_table) = &opts.id_table {
            if var.data_type == DataType::Id
                && var.id_table.as_deref() != Some(id_table.as_str())
            {
                return Some(format!(
                    "variable {} does not identify rows of table {}",
                    variable_id, id_table
                ));
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
                    return Some(format!(
                        "variable {} carries enum values not allowed here",
                        variable_id
                    ));
                }
            }
        }
        None
    }
}
