//! The expression data model: data types, values, expression trees, and the
//! logical schema they reference.

pub(crate) mod calendar;
pub mod data_type;
pub mod expression;
pub mod schema;
pub mod value;

pub use data_type::DataType;
pub use expression::{CaseBranch, Expr};
pub use schema::{
    Column, EnumValue, Join, Multiplicity, Schema, Section, Table, TableItem, Variable,
};
pub use value::Value;
