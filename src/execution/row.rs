//! The row capability evaluation consumes
//!
//! Rows are provided by out-of-scope adapters (cached, queued, remote);
//! evaluation treats them uniformly through this one contract. A fetch of a
//! join column yields the related row or rows instead of a plain value.

use crate::error::Result;
use crate::types::Value;
use async_trait::async_trait;
use std::sync::Arc;

/// What fetching one column of a row yields.
#[derive(Clone)]
pub enum FieldValue {
    /// A plain stored value.
    Value(Value),
    /// The related row of a to-one join.
    Row(Arc<dyn Row>),
    /// The related rows of a to-many join.
    Rows(Vec<Arc<dyn Row>>),
    /// The column holds nothing, or a to-one join target is absent.
    Missing,
}

#[async_trait]
pub trait Row: Send + Sync {
    async fn primary_key(&self) -> Result<Value>;
    async fn field(&self, column_id: &str) -> Result<FieldValue>;
}
