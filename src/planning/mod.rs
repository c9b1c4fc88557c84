//! Lowering expressions into the query intermediate representation a
//! downstream executor turns into SQL.

pub mod compiler;
pub mod ir;

pub use compiler::Compiler;
pub use ir::{Direction, Ir, IrCaseBranch, JoinKind, OrderBy};
