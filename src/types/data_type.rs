//! Logical data types for columns, literals, and inferred expression types

use serde::{Deserialize, Serialize};
use std::fmt;

/// The type vocabulary shared by columns, literal values, operator
/// signatures, and the inference rules of the catalog.
///
/// `Unknown` is a first-class member: type inference returns it whenever the
/// operator catalog cannot disambiguate, and it is never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    #[serde(rename = "text")]
    Text,
    #[serde(rename = "number")]
    Number,
    #[serde(rename = "date")]
    Date,
    #[serde(rename = "datetime")]
    DateTime,
    #[serde(rename = "boolean")]
    Boolean,
    #[serde(rename = "enum")]
    Enum,
    #[serde(rename = "enumset")]
    EnumSet,
    #[serde(rename = "id")]
    Id,
    #[serde(rename = "json")]
    Json,
    #[serde(rename = "join")]
    Join,
    /// Result type of the count aggregation and of legacy count nodes.
    #[serde(rename = "count")]
    Count,
    /// Inference could not settle on a type.
    #[serde(rename = "unknown")]
    Unknown,
    // Literal-only collection and range types.
    #[serde(rename = "text[]")]
    TextList,
    #[serde(rename = "number[]")]
    NumberList,
    #[serde(rename = "id[]")]
    IdList,
    #[serde(rename = "daterange")]
    DateRange,
    #[serde(rename = "datetimerange")]
    DateTimeRange,
}

impl DataType {
    /// True for types whose values order meaningfully.
    pub fn is_ordered(&self) -> bool {
        matches!(
            self,
            DataType::Number | DataType::Text | DataType::Date | DataType::DateTime
        )
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, DataType::Date | DataType::DateTime)
    }

    pub fn is_list(&self) -> bool {
        matches!(
            self,
            DataType::TextList | DataType::NumberList | DataType::IdList | DataType::EnumSet
        )
    }

    pub fn is_range(&self) -> bool {
        matches!(self, DataType::DateRange | DataType::DateTimeRange)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Text => "text",
            DataType::Number => "number",
            DataType::Date => "date",
            DataType::DateTime => "datetime",
            DataType::Boolean => "boolean",
            DataType::Enum => "enum",
            DataType::EnumSet => "enumset",
            DataType::Id => "id",
            DataType::Json => "json",
            DataType::Join => "join",
            DataType::Count => "count",
            DataType::Unknown => "unknown",
            DataType::TextList => "text[]",
            DataType::NumberList => "number[]",
            DataType::IdList => "id[]",
            DataType::DateRange => "daterange",
            DataType::DateTimeRange => "datetimerange",
        };
        write!(f, "{}", name)
    }
}
