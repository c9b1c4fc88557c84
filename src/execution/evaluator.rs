//! Direct tree-walking evaluation against in-memory rows
//!
//! The evaluator computes an expression client-side instead of lowering it
//! to a query. Sub-expressions evaluate strictly depth-first, left to
//! right; suspension happens only at the row capability. Scalar traversal
//! supports a single to-one hop; multi-hop and aggregating traversals are
//! a documented limitation and fail rather than silently approximate.

use super::row::{FieldValue, Row};
use crate::catalog::TypeCatalog;
use crate::error::{Error, Result};
use crate::semantic::cleaner::desugar_legacy;
use crate::types::calendar::{date_window, is_window_op};
use crate::types::{CaseBranch, Expr, Schema, Value};
use chrono::NaiveDate;
use futures::future::BoxFuture;
use regex::RegexBuilder;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

const EARTH_RADIUS_KM: f64 = 6371.0;

pub struct Evaluator {
    schema: Arc<Schema>,
    catalog: TypeCatalog,
    variables: HashMap<String, Value>,
}

impl Evaluator {
    pub fn new(schema: Arc<Schema>) -> Self {
        let catalog = TypeCatalog::new(schema.clone());
        Evaluator {
            schema,
            catalog,
            variables: HashMap::new(),
        }
    }

    /// An evaluator resolving variable references to the given bindings.
    /// Unbound variables evaluate to null.
    pub fn with_variables(schema: Arc<Schema>, variables: HashMap<String, Value>) -> Self {
        let catalog = TypeCatalog::new(schema.clone());
        Evaluator {
            schema,
            catalog,
            variables,
        }
    }

    pub async fn evaluate(&self, expr: Option<&Expr>, row: &Arc<dyn Row>) -> Result<Value> {
        self.evaluate_as_of(expr, row, chrono::Local::now().date_naive())
            .await
    }

    /// Same as [`evaluate`](Self::evaluate) with the wall-clock date
    /// pinned, so date-window predicates are deterministic.
    pub async fn evaluate_as_of(
        &self,
        expr: Option<&Expr>,
        row: &Arc<dyn Row>,
        today: NaiveDate,
    ) -> Result<Value> {
        self.eval(expr, row, today).await
    }

    fn eval<'a>(
        &'a self,
        expr: Option<&'a Expr>,
        row: &'a Arc<dyn Row>,
        today: NaiveDate,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            let expr = match expr {
                Some(e) => e,
                None => return Ok(Value::Null),
            };
            match expr {
                Expr::Literal { value, .. } => Ok(value.clone()),
                Expr::Id { .. } => row.primary_key().await,
                Expr::Field { table, column } => self.eval_field(table, column, row, today).await,
                Expr::Op { op, exprs, .. } => self.eval_op(op, exprs, row, today).await,
                Expr::Scalar {
                    joins,
                    expr: inner,
                    aggr,
                    where_clause,
                    ..
                } => {
                    self.eval_scalar(
                        joins,
                        inner.as_deref(),
                        aggr.as_deref(),
                        where_clause.as_deref(),
                        row,
                        today,
                    )
                    .await
                }
                Expr::Case { cases, otherwise } => {
                    self.eval_case(cases, otherwise.as_deref(), row, today).await
                }
                Expr::Score { input, scores } => {
                    self.eval_score(input.as_deref(), scores, row, today).await
                }
                Expr::BuildEnumset { values } => {
                    self.eval_build_enumset(values, row, today).await
                }
                Expr::Variable { variable_id, .. } => Ok(self
                    .variables
                    .get(variable_id)
                    .cloned()
                    .unwrap_or(Value::Null)),
                Expr::Comparison { .. } | Expr::Logical { .. } => {
                    match desugar_legacy(&self.catalog, expr, None) {
                        Some(desugared) => self.eval(Some(&desugared), row, today).await,
                        None => Ok(Value::Null),
                    }
                }
                Expr::Count { .. } => Err(Error::Unsupported(
                    "count evaluation requires query execution".to_string(),
                )),
            }
        })
    }

    async fn eval_field(
        &self,
        table: &str,
        column_id: &str,
        row: &Arc<dyn Row>,
        today: NaiveDate,
    ) -> Result<Value> {
        // Computed columns evaluate through against the same row.
        if let Some(column) = self.schema.get_column(table, column_id) {
            if let Some(computed) = &column.expr {
                return self.eval(Some(computed), row, today).await;
            }
        }
        match row.field(column_id).await? {
            FieldValue::Value(v) => Ok(v),
            FieldValue::Missing => Ok(Value::Null),
            FieldValue::Row(_) | FieldValue::Rows(_) => Err(Error::Evaluation(format!(
                "column {} is a join, not a value",
                column_id
            ))),
        }
    }

    async fn eval_op(
        &self,
        op: &str,
        exprs: &[Option<Expr>],
        row: &Arc<dyn Row>,
        today: NaiveDate,
    ) -> Result<Value> {
        let mut operands = Vec::with_capacity(exprs.len());
        for operand in exprs {
            operands.push(self.eval(operand.as_ref(), row, today).await?);
        }

        if is_window_op(op) {
            let window = date_window(op, today)
                .ok_or_else(|| Error::Unsupported(format!("unknown operator: {}", op)))?;
            let inside = operands
                .first()
                .and_then(|v| v.as_date())
                .map(|d| d >= window.0 && d <= window.1)
                .unwrap_or(false);
            return Ok(Value::Bool(inside));
        }

        match op {
            // Null operands do not participate in the fold: a missing
            // conjunct neither fails "and" nor satisfies "or".
            "and" => Ok(Value::Bool(
                operands.iter().filter(|v| !v.is_null()).all(truthy),
            )),
            "or" => Ok(Value::Bool(operands.iter().any(truthy))),
            "not" => Ok(Value::Bool(!operands.first().map(truthy).unwrap_or(false))),

            "+" => eval_add(&operands),
            "*" => fold_numbers(&operands, |a, b| a * b),
            "-" => binary_number(&operands, |a, b| Some(a - b)),
            "/" => binary_number(&operands, |a, b| {
                if b.is_zero() {
                    None
                } else {
                    Some(a / b)
                }
            }),
            "round" => Ok(operands
                .first()
                .and_then(Value::as_number)
                .map(|n| Value::Number(n.round()))
                .unwrap_or(Value::Null)),

            "=" => Ok(Value::Bool(equal(&operands))),
            "<>" => Ok(Value::Bool(!equal(&operands))),
            "<" => ordered(&operands, |o| o == Ordering::Less),
            ">" => ordered(&operands, |o| o == Ordering::Greater),
            "<=" => ordered(&operands, |o| o != Ordering::Greater),
            ">=" => ordered(&operands, |o| o != Ordering::Less),

            "is null" => Ok(Value::Bool(
                operands.first().map(Value::is_null).unwrap_or(true),
            )),
            "is not null" => Ok(Value::Bool(
                !operands.first().map(Value::is_null).unwrap_or(true),
            )),

            "~*" => eval_match(&operands),
            "= any" => Ok(Value::Bool(eval_any(&operands))),
            "contains" => Ok(Value::Bool(eval_contains(&operands))),
            "between" => eval_between(&operands),
            "distance" => eval_distance(&operands),

            _ => Err(Error::Unsupported(format!("unknown operator: {}", op))),
        }
    }

    async fn eval_scalar(
        &self,
        joins: &[String],
        inner: Option<&Expr>,
        aggr: Option<&str>,
        where_clause: Option<&Expr>,
        row: &Arc<dyn Row>,
        today: NaiveDate,
    ) -> Result<Value> {
        if joins.is_empty() {
            return self.eval(inner, row, today).await;
        }
        if joins.len() > 1 {
            return Err(Error::Unsupported(
                "multi-hop scalar evaluation requires query execution".to_string(),
            ));
        }
        if let Some(aggr) = aggr {
            return Err(Error::Unsupported(format!(
                "aggregated ({}) scalar evaluation requires query execution",
                aggr
            )));
        }
        let related = match row.field(&joins[0]).await? {
            FieldValue::Row(r) => r,
            FieldValue::Missing | FieldValue::Value(_) => return Ok(Value::Null),
            FieldValue::Rows(_) => {
                return Err(Error::Unsupported(
                    "to-many scalar evaluation requires query execution".to_string(),
                ))
            }
        };
        if where_clause.is_some() {
            let keep = self.eval(where_clause, &related, today).await?;
            if !truthy(&keep) {
                return Ok(Value::Null);
            }
        }
        self.eval(inner, &related, today).await
    }

    async fn eval_case(
        &self,
        cases: &[CaseBranch],
        otherwise: Option<&Expr>,
        row: &Arc<dyn Row>,
        today: NaiveDate,
    ) -> Result<Value> {
        for branch in cases {
            let when = self.eval(branch.when.as_ref(), row, today).await?;
            if truthy(&when) {
                return self.eval(branch.then.as_ref(), row, today).await;
            }
        }
        self.eval(otherwise, row, today).await
    }

    /// Each input id present in the score map contributes its mapped
    /// sub-expression's value to a running sum; absent ids contribute zero.
    async fn eval_score(
        &self,
        input: Option<&Expr>,
        scores: &BTreeMap<String, Expr>,
        row: &Arc<dyn Row>,
        today: NaiveDate,
    ) -> Result<Value> {
        let input = self.eval(input, row, today).await?;
        let ids: Vec<String> = match &input {
            Value::List(items) => items
                .iter()
                .filter_map(|v| v.as_text().map(str::to_string))
                .collect(),
            Value::Text(id) => vec![id.clone()],
            _ => Vec::new(),
        };
        let mut total = Decimal::ZERO;
        for id in ids {
            if let Some(sub) = scores.get(&id) {
                let v = self.eval(Some(sub), row, today).await?;
                total += v.as_number().unwrap_or(Decimal::ZERO);
            }
        }
        Ok(Value::Number(total))
    }

    async fn eval_build_enumset(
        &self,
        values: &BTreeMap<String, Expr>,
        row: &Arc<dyn Row>,
        today: NaiveDate,
    ) -> Result<Value> {
        let mut out = Vec::new();
        for (id, condition) in values {
            let v = self.eval(Some(condition), row, today).await?;
            if truthy(&v) {
                out.push(Value::Text(id.clone()));
            }
        }
        Ok(Value::List(out))
    }
}

fn truthy(v: &Value) -> bool {
    v.as_bool().unwrap_or(false)
}

fn equal(operands: &[Value]) -> bool {
    match operands {
        [a, b] => {
            if a.is_null() || b.is_null() {
                false
            } else {
                a.compare(b) == Some(Ordering::Equal) || a == b
            }
        }
        _ => false,
    }
}

fn ordered(operands: &[Value], pred: impl Fn(Ordering) -> bool) -> Result<Value> {
    let holds = match operands {
        [a, b] => a.compare(b).map(&pred).unwrap_or(false),
        _ => false,
    };
    Ok(Value::Bool(holds))
}

/// Numeric addition, or day offsetting when the lhs is temporal.
fn eval_add(operands: &[Value]) -> Result<Value> {
    match operands.first() {
        Some(Value::Date(d)) => {
            let days = operands.get(1).and_then(Value::as_number);
            Ok(match days.and_then(|n| n.to_i64()) {
                Some(n) => Value::Date(*d + chrono::Duration::days(n)),
                None => Value::Null,
            })
        }
        Some(Value::DateTime(dt)) => {
            let days = operands.get(1).and_then(Value::as_number);
            Ok(match days.and_then(|n| n.to_i64()) {
                Some(n) => Value::DateTime(*dt + chrono::Duration::days(n)),
                None => Value::Null,
            })
        }
        _ => fold_numbers(operands, |a, b| a + b),
    }
}

fn fold_numbers(operands: &[Value], f: impl Fn(Decimal, Decimal) -> Decimal) -> Result<Value> {
    let mut numbers = operands.iter().filter_map(Value::as_number);
    let first = match numbers.next() {
        Some(n) => n,
        None => return Ok(Value::Null),
    };
    Ok(Value::Number(numbers.fold(first, f)))
}

fn binary_number(
    operands: &[Value],
    f: impl Fn(Decimal, Decimal) -> Option<Decimal>,
) -> Result<Value> {
    let a = operands.first().and_then(Value::as_number);
    let b = operands.get(1).and_then(Value::as_number);
    Ok(match (a, b) {
        (Some(a), Some(b)) => f(a, b).map(Value::Number).unwrap_or(Value::Null),
        _ => Value::Null,
    })
}

fn eval_match(operands: &[Value]) -> Result<Value> {
    let subject = operands.first().and_then(Value::as_text);
    let pattern = operands.get(1).and_then(Value::as_text);
    let (subject, pattern) = match (subject, pattern) {
        (Some(s), Some(p)) => (s, p),
        _ => return Ok(Value::Bool(false)),
    };
    let re = RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| Error::InvalidValue(format!("bad pattern {}: {}", pattern, e)))?;
    Ok(Value::Bool(re.is_match(subject)))
}

fn eval_any(operands: &[Value]) -> bool {
    match (operands.first(), operands.get(1)) {
        (Some(needle), Some(Value::List(haystack))) => {
            !needle.is_null() && haystack.iter().any(|v| equal(&[needle.clone(), v.clone()]))
        }
        _ => false,
    }
}

/// Set containment when the lhs is a collection, substring containment
/// over text otherwise.
fn eval_contains(operands: &[Value]) -> bool {
    match (operands.first(), operands.get(1)) {
        (Some(Value::List(outer)), Some(Value::List(inner))) => {
            inner.iter().all(|v| outer.contains(v))
        }
        (Some(Value::List(outer)), Some(single)) => outer.contains(single),
        (Some(Value::Text(outer)), Some(Value::Text(inner))) => outer.contains(inner.as_str()),
        _ => false,
    }
}

fn eval_between(operands: &[Value]) -> Result<Value> {
    let (subject, lo, hi) = match operands {
        [subject, Value::List(bounds)] if bounds.len() == 2 => {
            (subject, &bounds[0], &bounds[1])
        }
        [subject, lo, hi] => (subject, lo, hi),
        _ => return Ok(Value::Bool(false)),
    };
    let holds = subject.compare(lo).map(|o| o != Ordering::Less).unwrap_or(false)
        && subject
            .compare(hi)
            .map(|o| o != Ordering::Greater)
            .unwrap_or(false);
    Ok(Value::Bool(holds))
}

/// Equirectangular approximation of the great-circle distance between two
/// latitude/longitude pairs, in kilometers.
fn eval_distance(operands: &[Value]) -> Result<Value> {
    let coords: Vec<f64> = operands
        .iter()
        .filter_map(|v| v.as_number().and_then(|n| n.to_f64()))
        .collect();
    let [lat1, lon1, lat2, lon2] = match coords.as_slice() {
        [a, b, c, d] => [*a, *b, *c, *d],
        _ => return Ok(Value::Null),
    };
    let mean_lat = ((lat1 + lat2) / 2.0).to_radians();
    let dx = (lon2 - lon1).to_radians() * mean_lat.cos();
    let dy = (lat2 - lat1).to_radians();
    let km = EARTH_RADIUS_KM * (dx * dx + dy * dy).sqrt();
    Ok(Decimal::from_f64(km)
        .map(Value::Number)
        .unwrap_or(Value::Null))
}
