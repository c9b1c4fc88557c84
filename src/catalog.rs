//! The operator catalog and type inference
//!
//! Operators are data: a table of signatures consumed by a single inference
//! routine, so adding an operator means adding one catalog row. The same
//! rules feed the cleaner, the validator, and the compiler; keeping them in
//! one place is what keeps those three consistent.

use crate::types::{DataType, Expr, Multiplicity, Schema};
use std::collections::HashSet;
use std::sync::Arc;

/// One catalog entry: an operator's accepted operand types and result type.
/// `variadic` is the type accepted at every position past the fixed arity.
#[derive(Debug, Clone, PartialEq)]
pub struct OpItem {
    pub op: String,
    pub name: String,
    pub result: DataType,
    pub operands: Vec<DataType>,
    pub variadic: Option<DataType>,
}

impl OpItem {
    fn new(op: &str, name: &str, result: DataType, operands: &[DataType]) -> Self {
        OpItem {
            op: op.into(),
            name: name.into(),
            result,
            operands: operands.to_vec(),
            variadic: None,
        }
    }

    fn variadic(mut self, tail: DataType) -> Self {
        self.variadic = Some(tail);
        self
    }

    /// The accepted type at operand position `i`, honoring the variadic
    /// tail beyond the fixed arity.
    pub fn operand_at(&self, i: usize) -> Option<DataType> {
        self.operands.get(i).copied().or(self.variadic)
    }

    fn matches_operands(&self, operands: &[DataType]) -> bool {
        if operands.len() < self.operands.len() {
            return false;
        }
        if operands.len() > self.operands.len() && self.variadic.is_none() {
            return false;
        }
        operands
            .iter()
            .enumerate()
            .all(|(i, t)| self.operand_at(i) == Some(*t))
    }
}

/// One aggregation an inner expression may be collapsed with.
#[derive(Debug, Clone, PartialEq)]
pub struct AggrItem {
    pub id: &'static str,
    pub name: &'static str,
    pub result: DataType,
}

/// A catalog search: every set field must match.
#[derive(Debug, Clone, Default)]
pub struct OpSearch {
    pub op: Option<String>,
    pub result: Option<DataType>,
    pub operands: Option<Vec<DataType>>,
}

/// Operator signatures plus the type-inference and join-resolution rules
/// built over a schema. Stateless and safe to share across concurrent
/// flows.
#[derive(Debug, Clone)]
pub struct TypeCatalog {
    schema: Arc<Schema>,
    ops: Vec<OpItem>,
}

impl TypeCatalog {
    pub fn new(schema: Arc<Schema>) -> Self {
        TypeCatalog {
            schema,
            ops: default_ops(),
        }
    }

    /// A catalog with extra operator rows appended to the seeded set.
    pub fn with_ops(schema: Arc<Schema>, extra: Vec<OpItem>) -> Self {
        let mut ops = default_ops();
        ops.extend(extra);
        TypeCatalog { schema, ops }
    }

    pub fn ops(&self) -> &[OpItem] {
        &self.ops
    }

    /// Infers the type of an expression bottom-up. Never fails: anything
    /// the catalog cannot disambiguate is `Unknown`.
    pub fn get_expr_type(&self, expr: Option<&Expr>) -> DataType {
        let expr = match expr {
            Some(e) => e,
            None => return DataType::Unknown,
        };
        match expr {
            Expr::Literal { value_type, .. } => *value_type,
            Expr::Id { .. } => DataType::Id,
            Expr::Field { table, column } => self
                .schema
                .get_column(table, column)
                .map(|c| c.data_type)
                .unwrap_or(DataType::Unknown),
            Expr::Op { op, exprs, .. } => self.op_type(op, exprs),
            Expr::Scalar {
                expr: inner,
                aggr: Some(aggr),
                ..
            } => self
                .get_aggrs(inner.as_deref())
                .into_iter()
                .find(|a| a.id == aggr.as_str())
                .map(|a| a.result)
                .unwrap_or(DataType::Unknown),
            Expr::Scalar {
                expr: inner,
                aggr: None,
                ..
            } => self.get_expr_type(inner.as_deref()),
            Expr::Case { cases, otherwise } => match cases.first() {
                Some(branch) => self.get_expr_type(branch.then.as_ref()),
                None => self.get_expr_type(otherwise.as_deref()),
            },
            Expr::Score { .. } => DataType::Number,
            Expr::BuildEnumset { .. } => DataType::EnumSet,
            Expr::Variable { variable_id, .. } => self
                .schema
                .get_variable(variable_id)
                .map(|v| v.data_type)
                .unwrap_or(DataType::Unknown),
            Expr::Comparison { .. } | Expr::Logical { .. } => DataType::Boolean,
            Expr::Count { .. } => DataType::Count,
        }
    }

    fn op_type(&self, op: &str, exprs: &[Option<Expr>]) -> DataType {
        let overloads: Vec<&OpItem> = self.ops.iter().filter(|o| o.op == op).collect();
        if overloads.is_empty() {
            return DataType::Unknown;
        }
        // First try resolving by op id alone: if every overload agrees on
        // the result type, operand types are irrelevant. This is what makes
        // and/or/* total over any operand count.
        let results: HashSet<DataType> = overloads.iter().map(|o| o.result).collect();
        if results.len() == 1 {
            return overloads[0].result;
        }
        // Otherwise infer each operand and re-filter by exact operand match.
        let operand_types: Vec<DataType> = exprs
            .iter()
            .map(|e| self.get_expr_type(e.as_ref()))
            .collect();
        let candidates: Vec<&&OpItem> = overloads
            .iter()
            .filter(|o| o.matches_operands(&operand_types))
            .collect();
        match candidates.as_slice() {
            [single] => single.result,
            _ => DataType::Unknown,
        }
    }

    /// The aggregations legal for collapsing a to-many traversal over the
    /// given inner expression, in replacement-preference order. Count is
    /// always offered, so the set is never empty.
    pub fn get_aggrs(&self, inner: Option<&Expr>) -> Vec<AggrItem> {
        let inner_type = self.get_expr_type(inner);
        let owner = inner
            .and_then(|e| e.table())
            .and_then(|id| self.schema.get_table(id));
        let mut aggrs = Vec::new();
        if let Some(table) = owner {
            if table.ordering.is_some() && inner_type != DataType::Count {
                aggrs.push(AggrItem {
                    id: "last",
                    name: "Last",
                    result: inner_type,
                });
            }
        }
        if matches!(
            inner_type,
            DataType::Date | DataType::DateTime | DataType::Number
        ) {
            aggrs.push(AggrItem {
                id: "min",
                name: "Min",
                result: inner_type,
            });
            aggrs.push(AggrItem {
                id: "max",
                name: "Max",
                result: inner_type,
            });
        }
        if inner_type == DataType::Number {
            for (id, name) in [
                ("sum", "Sum"),
                ("avg", "Average"),
                ("stdev", "Standard deviation"),
                ("stdevp", "Population standard deviation"),
            ] {
                aggrs.push(AggrItem {
                    id,
                    name,
                    result: DataType::Number,
                });
            }
        }
        aggrs.push(AggrItem {
            id: "count",
            name: "Count",
            result: DataType::Count,
        });
        aggrs
    }

    /// Walks a join-id chain from a start table; `None` if any hop fails to
    /// resolve. Returns the terminal table id and whether any hop is
    /// to-many.
    pub fn resolve_joins(&self, table: &str, joins: &[String]) -> Option<(String, bool)> {
        let mut current = table.to_string();
        let mut multiple = false;
        for join_id in joins {
            let column = self.schema.get_column(&current, join_id)?;
            let join = column.join.as_ref()?;
            self.schema.get_table(&join.to_table)?;
            if join.multiplicity.is_many() {
                multiple = true;
            }
            current = join.to_table.clone();
        }
        Some((current, multiple))
    }

    /// Terminal table of a join chain, or `None` if the chain is invalid.
    pub fn follow_joins(&self, table: &str, joins: &[String]) -> Option<String> {
        self.resolve_joins(table, joins).map(|(t, _)| t)
    }

    /// Whether a join chain crosses any to-many hop.
    pub fn is_multiple_joins(&self, table: &str, joins: &[String]) -> Option<bool> {
        self.resolve_joins(table, joins).map(|(_, m)| m)
    }

    /// Filters the catalog by any combination of result type, op id, and
    /// operand types.
    pub fn find_matching_op_items(&self, search: &OpSearch) -> Vec<&OpItem> {
        self.ops
            .iter()
            .filter(|item| {
                search.op.as_ref().map_or(true, |op| &item.op == op)
                    && search.result.map_or(true, |r| item.result == r)
                    && search
                        .operands
                        .as_ref()
                        .map_or(true, |ops| item.matches_operands(ops))
            })
            .collect()
    }
}

/// The seeded operator set: arithmetic, comparison, boolean, null-check,
/// pattern-match, membership, range, date-window, and geo operators.
fn default_ops() -> Vec<OpItem> {
    use DataType::*;
    let mut ops = Vec::new();

    ops.push(OpItem::new("and", "And", Boolean, &[Boolean]).variadic(Boolean));
    ops.push(OpItem::new("or", "Or", Boolean, &[Boolean]).variadic(Boolean));
    ops.push(OpItem::new("not", "Not", Boolean, &[Boolean]));

    // "+" is the catalog's one deliberately ambiguous op: its overloads
    // disagree on result type, so resolution has to look at operand types,
    // and unresolvable operands yield Unknown.
    ops.push(OpItem::new("+", "Add", Number, &[Number, Number]).variadic(Number));
    ops.push(OpItem::new("+", "Add days", Date, &[Date, Number]));
    ops.push(OpItem::new("+", "Add days", DateTime, &[DateTime, Number]));
    ops.push(OpItem::new("*", "Multiply", Number, &[Number, Number]).variadic(Number));
    ops.push(OpItem::new("-", "Subtract", Number, &[Number, Number]));
    ops.push(OpItem::new("/", "Divide", Number, &[Number, Number]));
    ops.push(OpItem::new("round", "Round", Number, &[Number]));

    for t in [Number, Text, Date, DateTime, Boolean, Enum, Id] {
        ops.push(OpItem::new("=", "Equals", Boolean, &[t, t]));
        ops.push(OpItem::new("<>", "Not equals", Boolean, &[t, t]));
    }
    for t in [Number, Text, Date, DateTime] {
        ops.push(OpItem::new("<", "Less than", Boolean, &[t, t]));
        ops.push(OpItem::new(">", "Greater than", Boolean, &[t, t]));
        ops.push(OpItem::new("<=", "At most", Boolean, &[t, t]));
        ops.push(OpItem::new(">=", "At least", Boolean, &[t, t]));
    }

    ops.push(OpItem::new("~*", "Matches", Boolean, &[Text, Text]));

    for t in [
        Text, Number, Date, DateTime, Boolean, Enum, EnumSet, Id, Json,
    ] {
        ops.push(OpItem::new("is null", "Is empty", Boolean, &[t]));
        ops.push(OpItem::new("is not null", "Is not empty", Boolean, &[t]));
    }

    ops.push(OpItem::new("= any", "Is any of", Boolean, &[Text, TextList]));
    ops.push(OpItem::new("= any", "Is any of", Boolean, &[Number, NumberList]));
    ops.push(OpItem::new("= any", "Is any of", Boolean, &[Id, IdList]));
    ops.push(OpItem::new("= any", "Is any of", Boolean, &[Enum, EnumSet]));

    ops.push(OpItem::new("contains", "Contains", Boolean, &[EnumSet, EnumSet]));
    ops.push(OpItem::new("contains", "Contains", Boolean, &[EnumSet, Enum]));
    ops.push(OpItem::new("contains", "Contains", Boolean, &[Text, Text]));

    for t in [Number, Text, Date, DateTime] {
        ops.push(OpItem::new("between", "Between", Boolean, &[t, t, t]));
    }
    ops.push(OpItem::new("between", "Between", Boolean, &[Date, DateRange]));
    ops.push(OpItem::new(
        "between",
        "Between",
        Boolean,
        &[DateTime, DateTimeRange],
    ));

    for (op, name) in [
        ("thisyear", "This year"),
        ("lastyear", "Last year"),
        ("thismonth", "This month"),
        ("lastmonth", "Last month"),
        ("today", "Today"),
        ("yesterday", "Yesterday"),
        ("last7days", "Last 7 days"),
        ("last30days", "Last 30 days"),
        ("last365days", "Last 365 days"),
    ] {
        ops.push(OpItem::new(op, name, Boolean, &[Date]));
        ops.push(OpItem::new(op, name, Boolean, &[DateTime]));
    }

    ops.push(OpItem::new(
        "distance",
        "Distance",
        Number,
        &[Number, Number, Number, Number],
    ));

    ops
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    fn schema() -> Arc<Schema> {
        use crate::types::{Column, Table, TableItem};
        let table = Table {
            id: "t".into(),
            name: "T".into(),
            primary_key: "id".into(),
            ordering: None,
            contents: vec![
                TableItem::Column(Column::new("id", "Id", DataType::Id)),
                TableItem::Column(Column::new("n", "N", DataType::Number)),
                TableItem::Column(Column::new("d", "D", DataType::Date)),
            ],
            query: None,
        };
        Arc::new(Schema::new(vec![table], vec![]))
    }

    fn num(n: i64) -> Expr {
        Expr::literal(DataType::Number, Value::Number(n.into()))
    }

    #[test]
    fn test_op_id_alone_resolves_agreeing_overloads() {
        let catalog = TypeCatalog::new(schema());
        // "and" resolves regardless of operand count or types.
        for count in [0, 1, 3] {
            let e = Expr::op("t", "and", vec![Expr::bool_literal(true); count]);
            assert_eq!(catalog.get_expr_type(Some(&e)), DataType::Boolean);
        }
    }

    #[test]
    fn test_ambiguous_op_falls_back_to_operand_filtering() {
        let catalog = TypeCatalog::new(schema());
        let plus_numbers = Expr::op("t", "+", vec![num(1), num(2)]);
        assert_eq!(catalog.get_expr_type(Some(&plus_numbers)), DataType::Number);

        let plus_date = Expr::op("t", "+", vec![Expr::field("t", "d"), num(7)]);
        assert_eq!(catalog.get_expr_type(Some(&plus_date)), DataType::Date);

        // Operands the catalog cannot type leave "+" unresolved.
        let plus_unknown = Expr::op("t", "+", vec![Expr::field("t", "gone"), num(7)]);
        assert_eq!(catalog.get_expr_type(Some(&plus_unknown)), DataType::Unknown);
    }

    #[test]
    fn test_unknown_op_is_unknown_not_error() {
        let catalog = TypeCatalog::new(schema());
        let e = Expr::op("t", "frobnicate", vec![num(1)]);
        assert_eq!(catalog.get_expr_type(Some(&e)), DataType::Unknown);
        assert_eq!(catalog.get_expr_type(None), DataType::Unknown);
    }

    #[test]
    fn test_find_matching_honors_variadic_tail() {
        let catalog = TypeCatalog::new(schema());
        let found = catalog.find_matching_op_items(&OpSearch {
            op: Some("and".into()),
            operands: Some(vec![DataType::Boolean; 4]),
            ..Default::default()
        });
        assert_eq!(found.len(), 1);

        let none = catalog.find_matching_op_items(&OpSearch {
            op: Some("-".into()),
            operands: Some(vec![DataType::Number; 3]),
            ..Default::default()
        });
        assert!(none.is_empty());
    }
}
