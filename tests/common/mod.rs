//! Shared fixture schema and an in-memory row for evaluation tests.

#![allow(dead_code)]

use async_trait::async_trait;
use sieve::error::Result;
use sieve::execution::{FieldValue, Row};
use sieve::types::{
    Column, DataType, EnumValue, Expr, Join, Multiplicity, Schema, Section, Table, TableItem,
    Value, Variable,
};
use std::collections::HashMap;
use std::sync::Arc;

fn col(id: &str, name: &str, data_type: DataType) -> TableItem {
    TableItem::Column(Column::new(id, name, data_type))
}

fn enum_col(id: &str, name: &str, data_type: DataType, values: &[&str]) -> TableItem {
    let mut c = Column::new(id, name, data_type);
    c.values = Some(
        values
            .iter()
            .map(|v| EnumValue {
                id: v.to_string(),
                name: v.to_string(),
            })
            .collect(),
    );
    TableItem::Column(c)
}

fn join_col(
    id: &str,
    name: &str,
    from_column: &str,
    to_table: &str,
    to_column: &str,
    multiplicity: Multiplicity,
) -> TableItem {
    let mut c = Column::new(id, name, DataType::Join);
    c.join = Some(Join {
        from_column: from_column.to_string(),
        to_table: to_table.to_string(),
        to_column: to_column.to_string(),
        on: None,
        multiplicity,
    });
    TableItem::Column(c)
}

fn computed_col(id: &str, name: &str, data_type: DataType, expr: Expr) -> TableItem {
    let mut c = Column::new(id, name, data_type);
    c.expr = Some(expr);
    TableItem::Column(c)
}

/// A project-tracker schema: tasks order by creation date and join up to
/// projects; projects fan out to tasks and users; users have no ordering
/// column. The loops table carries mutually recursive computed columns.
pub fn schema() -> Arc<Schema> {
    let t1 = Table {
        id: "t1".into(),
        name: "T1".into(),
        primary_key: "id".into(),
        ordering: None,
        contents: vec![
            col("id", "Id", DataType::Id),
            col("name", "Name", DataType::Text),
            col("flag", "Flag", DataType::Boolean),
        ],
        query: None,
    };

    let tasks = Table {
        id: "tasks".into(),
        name: "Tasks".into(),
        primary_key: "id".into(),
        ordering: Some("created".into()),
        contents: vec![
            col("id", "Id", DataType::Id),
            col("name", "Name", DataType::Text),
            TableItem::Section(Section {
                name: "Tracking".into(),
                contents: vec![
                    col("estimate", "Estimate", DataType::Number),
                    col("done", "Done", DataType::Boolean),
                ],
            }),
            enum_col("status", "Status", DataType::Enum, &["open", "closed", "blocked"]),
            enum_col("tags", "Tags", DataType::EnumSet, &["red", "green", "blue"]),
            col("created", "Created", DataType::Date),
            col("due", "Due", DataType::DateTime),
            col("project_id", "Project id", DataType::Id),
            join_col(
                "project",
                "Project",
                "project_id",
                "projects",
                "id",
                Multiplicity::ManyToOne,
            ),
        ],
        query: None,
    };

    let projects = Table {
        id: "projects".into(),
        name: "Projects".into(),
        primary_key: "id".into(),
        ordering: None,
        contents: vec![
            col("id", "Id", DataType::Id),
            col("title", "Title", DataType::Text),
            col("budget", "Budget", DataType::Number),
            computed_col(
                "twice_budget",
                "Twice budget",
                DataType::Number,
                Expr::op(
                    "projects",
                    "*",
                    vec![
                        Expr::field("projects", "budget"),
                        Expr::literal(DataType::Number, Value::Number(2.into())),
                    ],
                ),
            ),
            join_col(
                "tasks",
                "Tasks",
                "id",
                "tasks",
                "project_id",
                Multiplicity::OneToMany,
            ),
            join_col(
                "members",
                "Members",
                "id",
                "users",
                "project_id",
                Multiplicity::OneToMany,
            ),
        ],
        query: None,
    };

    let users = Table {
        id: "users".into(),
        name: "Users".into(),
        primary_key: "id".into(),
        ordering: None,
        contents: vec![
            col("id", "Id", DataType::Id),
            col("name", "Name", DataType::Text),
            col("project_id", "Project id", DataType::Id),
        ],
        query: None,
    };

    let loops = Table {
        id: "loops".into(),
        name: "Loops".into(),
        primary_key: "id".into(),
        ordering: None,
        contents: vec![
            col("id", "Id", DataType::Id),
            computed_col("a", "A", DataType::Number, Expr::field("loops", "b")),
            computed_col("b", "B", DataType::Number, Expr::field("loops", "a")),
        ],
        query: None,
    };

    let me = Variable {
        id: "me".into(),
        name: "Me".into(),
        description: None,
        data_type: DataType::Id,
        table: None,
        values: None,
        id_table: Some("users".into()),
    };
    let threshold = Variable {
        id: "threshold".into(),
        name: "Threshold".into(),
        description: None,
        data_type: DataType::Number,
        table: None,
        values: None,
        id_table: None,
    };

    Arc::new(Schema::new(
        vec![t1, tasks, projects, users, loops],
        vec![me, threshold],
    ))
}

pub fn num(n: i64) -> Expr {
    Expr::literal(DataType::Number, Value::Number(n.into()))
}

pub fn text(s: &str) -> Expr {
    Expr::literal(DataType::Text, Value::Text(s.into()))
}

pub struct MemRow {
    pk: Value,
    fields: HashMap<String, FieldValue>,
}

impl MemRow {
    pub fn new(pk: i64, fields: Vec<(&str, FieldValue)>) -> Arc<dyn Row> {
        Arc::new(MemRow {
            pk: Value::Number(pk.into()),
            fields: fields
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        })
    }
}

#[async_trait]
impl Row for MemRow {
    async fn primary_key(&self) -> Result<Value> {
        Ok(self.pk.clone())
    }

    async fn field(&self, column_id: &str) -> Result<FieldValue> {
        Ok(self
            .fields
            .get(column_id)
            .cloned()
            .unwrap_or(FieldValue::Missing))
    }
}

pub fn val(v: Value) -> FieldValue {
    FieldValue::Value(v)
}
