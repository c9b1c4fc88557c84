//! The logical schema: tables, columns, sections, joins, and variables
//!
//! A schema is built once per session and shared read-only by every
//! service. Mutation methods are copy-on-write: they return a new `Schema`
//! sharing the untouched tables with the receiver, which stays valid for
//! concurrent use.

use super::data_type::DataType;
use super::expression::Expr;
use crate::planning::Ir;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::sync::Arc;

/// An immutable table/column/join/variable catalog with id-indexed lookup
/// maps. Lookups return `None` on miss rather than erroring: expressions
/// persist while schemas evolve, so a dangling reference is an expected
/// condition, not a crash.
#[derive(Debug, Clone)]
pub struct Schema {
    tables: Vec<Arc<Table>>,
    variables: Vec<Arc<Variable>>,
    table_map: HashMap<String, Arc<Table>>,
    column_map: HashMap<String, HashMap<String, Arc<Column>>>,
    column_order: HashMap<String, Vec<Arc<Column>>>,
    variable_map: HashMap<String, Arc<Variable>>,
}

impl Schema {
    pub fn new(tables: Vec<Table>, variables: Vec<Variable>) -> Self {
        Self::from_arcs(
            tables.into_iter().map(Arc::new).collect(),
            variables.into_iter().map(Arc::new).collect(),
        )
    }

    fn from_arcs(tables: Vec<Arc<Table>>, variables: Vec<Arc<Variable>>) -> Self {
        let mut table_map = HashMap::new();
        let mut column_map = HashMap::new();
        let mut column_order = HashMap::new();
        for table in &tables {
            let mut ordered = Vec::new();
            flatten_contents(&table.contents, &mut ordered);
            let mut by_id = HashMap::new();
            for column in &ordered {
                by_id.insert(column.id.clone(), column.clone());
            }
            table_map.insert(table.id.clone(), table.clone());
            column_map.insert(table.id.clone(), by_id);
            column_order.insert(table.id.clone(), ordered);
        }
        let mut variable_map = HashMap::new();
        for variable in &variables {
            variable_map.insert(variable.id.clone(), variable.clone());
        }
        Schema {
            tables,
            variables,
            table_map,
            column_map,
            column_order,
            variable_map,
        }
    }

    /// Parses the persisted `{tables: [...], variables: [...]}` format.
    pub fn from_json(json: &str) -> crate::error::Result<Schema> {
        serde_json::from_str(json).map_err(|e| crate::error::Error::InvalidValue(e.to_string()))
    }

    pub fn get_table(&self, id: &str) -> Option<&Table> {
        self.table_map.get(id).map(|t| t.as_ref())
    }

    pub fn get_column(&self, table_id: &str, column_id: &str) -> Option<&Column> {
        self.column_map
            .get(table_id)
            .and_then(|m| m.get(column_id))
            .map(|c| c.as_ref())
    }

    /// The flattened, declaration-ordered column list of a table, with
    /// section groupings inlined depth-first.
    pub fn get_columns(&self, table_id: &str) -> Option<&[Arc<Column>]> {
        self.column_order.get(table_id).map(|v| v.as_slice())
    }

    pub fn get_variable(&self, id: &str) -> Option<&Variable> {
        self.variable_map.get(id).map(|v| v.as_ref())
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.iter().map(|t| t.as_ref())
    }

    pub fn variables(&self) -> impl Iterator<Item = &Variable> {
        self.variables.iter().map(|v| v.as_ref())
    }

    /// Returns a new schema with the table added, replacing any prior table
    /// with the same id in place. The receiver is unaffected.
    pub fn add_table(&self, table: Table) -> Schema {
        let mut tables = self.tables.clone();
        let table = Arc::new(table);
        match tables.iter().position(|t| t.id == table.id) {
            Some(pos) => tables[pos] = table,
            None => tables.push(table),
        }
        Schema::from_arcs(tables, self.variables.clone())
    }

    /// Returns a new schema with the variable added, replacing by id.
    pub fn add_variable(&self, variable: Variable) -> Schema {
        let mut variables = self.variables.clone();
        let variable = Arc::new(variable);
        match variables.iter().position(|v| v.id == variable.id) {
            Some(pos) => variables[pos] = variable,
            None => variables.push(variable),
        }
        Schema::from_arcs(self.tables.clone(), variables)
    }
}

fn flatten_contents(contents: &[TableItem], out: &mut Vec<Arc<Column>>) {
    for item in contents {
        match item {
            TableItem::Column(column) => out.push(Arc::new(column.clone())),
            TableItem::Section(section) => flatten_contents(&section.contents, out),
        }
    }
}

// The persisted format carries only tables and variables; the lookup maps
// are rebuilt on deserialization.
impl Serialize for Schema {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Schema", 2)?;
        state.serialize_field("tables", &self.tables)?;
        state.serialize_field("variables", &self.variables)?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for Schema {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Doc {
            #[serde(default)]
            tables: Vec<Table>,
            #[serde(default)]
            variables: Vec<Variable>,
        }
        let doc = Doc::deserialize(deserializer)?;
        Ok(Schema::new(doc.tables, doc.variables))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub id: String,
    pub name: String,
    /// Id of the primary key column.
    pub primary_key: String,
    /// Id of the column rows order by; enables the "last" aggregation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ordering: Option<String>,
    /// Ordered mix of columns and sections.
    #[serde(default)]
    pub contents: Vec<TableItem>,
    /// Inline IR override: the table is backed by a subquery fragment
    /// instead of a physical relation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<Ir>,
}

/// One entry of a table's contents: either a column or a named grouping of
/// further contents. Sections are presentation-only and are inlined
/// depth-first when columns are resolved.
///
/// Column must come first: untagged deserialization tries variants in
/// order, and a serialized column also satisfies Section (`name` is its
/// only required field). A real section lacks `id`/`type`, so Column
/// parsing fails on it and falls through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TableItem {
    Column(Column),
    Section(Section),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub name: String,
    #[serde(default)]
    pub contents: Vec<TableItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
    /// Declared value set for enum and enumset columns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<EnumValue>>,
    /// Join descriptor for join columns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join: Option<Join>,
    /// Computed-column sub-expression, compiled or evaluated in place of a
    /// stored value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expr: Option<Expr>,
    /// Raw IR override in place of a plain column name, with an `{alias}`
    /// placeholder for the referencing table alias.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<Ir>,
}

impl Column {
    pub fn new(id: impl Into<String>, name: impl Into<String>, data_type: DataType) -> Self {
        Column {
            id: id.into(),
            name: name.into(),
            data_type,
            values: None,
            join: None,
            expr: None,
            query: None,
        }
    }

    /// Ids of the declared enum values, if any.
    pub fn value_ids(&self) -> Option<Vec<&str>> {
        self.values
            .as_ref()
            .map(|vs| vs.iter().map(|v| v.id.as_str()).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumValue {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Join {
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
    /// Custom IR condition with `{from}`/`{to}` placeholder aliases; when
    /// present it replaces the synthesized from/to column equality.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on: Option<Ir>,
    pub multiplicity: Multiplicity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Multiplicity {
    #[serde(rename = "1-1")]
    OneToOne,
    #[serde(rename = "n-1")]
    ManyToOne,
    #[serde(rename = "1-n")]
    OneToMany,
    #[serde(rename = "n-n")]
    ManyToMany,
}

impl Multiplicity {
    /// True when the join relates one row to many rows on the far side.
    pub fn is_many(&self) -> bool {
        matches!(self, Multiplicity::OneToMany | Multiplicity::ManyToMany)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub data_type: DataType,
    /// Set for expression-valued variables; those must be non-aggregate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<EnumValue>>,
    /// For id-typed variables, the table the id identifies a row of.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_table: Option<String>,
}
