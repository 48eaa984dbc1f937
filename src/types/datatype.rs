//! Column data types stored by the engine.

use std::fmt;

use arrow::datatypes::{DataType as ArrowDataType, TimeUnit as ArrowTimeUnit};
use arrow::datatypes::Field as ArrowField;

use crate::error::{CascadeError, Result};

/// Data types the reference storage engines accept.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DataType {
    /// Null type (unknown type)
    Null,
    /// Boolean type
    Boolean,
    /// 8-bit signed integer
    Int8,
    /// 16-bit signed integer
    Int16,
    /// 32-bit signed integer
    Int32,
    /// 64-bit signed integer
    Int64,
    /// 8-bit unsigned integer
    UInt8,
    /// 16-bit unsigned integer
    UInt16,
    /// 32-bit unsigned integer
    UInt32,
    /// 64-bit unsigned integer
    UInt64,
    /// 32-bit floating point
    Float32,
    /// 64-bit floating point
    Float64,
    /// UTF-8 encoded string
    Utf8,
    /// Binary data
    Binary,
    /// Date (days since epoch)
    Date32,
    /// Timestamp with optional timezone
    Timestamp {
        unit: TimeUnit,
        timezone: Option<String>,
    },
    /// Variable-length list of values (array columns, including the
    /// sibling arrays of nested groups)
    List(Box<DataType>),
}

/// Time unit for timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeUnit {
    Second,
    Millisecond,
    Microsecond,
    Nanosecond,
}

impl TimeUnit {
    fn to_arrow(self) -> ArrowTimeUnit {
        match self {
            TimeUnit::Second => ArrowTimeUnit::Second,
            TimeUnit::Millisecond => ArrowTimeUnit::Millisecond,
            TimeUnit::Microsecond => ArrowTimeUnit::Microsecond,
            TimeUnit::Nanosecond => ArrowTimeUnit::Nanosecond,
        }
    }

    fn from_arrow(unit: &ArrowTimeUnit) -> Self {
        match unit {
            ArrowTimeUnit::Second => TimeUnit::Second,
            ArrowTimeUnit::Millisecond => TimeUnit::Millisecond,
            ArrowTimeUnit::Microsecond => TimeUnit::Microsecond,
            ArrowTimeUnit::Nanosecond => TimeUnit::Nanosecond,
        }
    }
}

impl DataType {
    /// Convert to the equivalent Arrow data type.
    pub fn to_arrow(&self) -> ArrowDataType {
        match self {
            DataType::Null => ArrowDataType::Null,
            DataType::Boolean => ArrowDataType::Boolean,
            DataType::Int8 => ArrowDataType::Int8,
            DataType::Int16 => ArrowDataType::Int16,
            DataType::Int32 => ArrowDataType::Int32,
            DataType::Int64 => ArrowDataType::Int64,
            DataType::UInt8 => ArrowDataType::UInt8,
            DataType::UInt16 => ArrowDataType::UInt16,
            DataType::UInt32 => ArrowDataType::UInt32,
            DataType::UInt64 => ArrowDataType::UInt64,
            DataType::Float32 => ArrowDataType::Float32,
            DataType::Float64 => ArrowDataType::Float64,
            DataType::Utf8 => ArrowDataType::Utf8,
            DataType::Binary => ArrowDataType::Binary,
            DataType::Date32 => ArrowDataType::Date32,
            DataType::Timestamp { unit, timezone } => ArrowDataType::Timestamp(
                unit.to_arrow(),
                timezone.as_ref().map(|tz| tz.as_str().into()),
            ),
            DataType::List(element) => ArrowDataType::List(std::sync::Arc::new(ArrowField::new(
                "item",
                element.to_arrow(),
                true,
            ))),
        }
    }

    /// Convert from an Arrow data type.
    pub fn from_arrow(arrow_type: &ArrowDataType) -> Result<Self> {
        Ok(match arrow_type {
            ArrowDataType::Null => DataType::Null,
            ArrowDataType::Boolean => DataType::Boolean,
            ArrowDataType::Int8 => DataType::Int8,
            ArrowDataType::Int16 => DataType::Int16,
            ArrowDataType::Int32 => DataType::Int32,
            ArrowDataType::Int64 => DataType::Int64,
            ArrowDataType::UInt8 => DataType::UInt8,
            ArrowDataType::UInt16 => DataType::UInt16,
            ArrowDataType::UInt32 => DataType::UInt32,
            ArrowDataType::UInt64 => DataType::UInt64,
            ArrowDataType::Float32 => DataType::Float32,
            ArrowDataType::Float64 => DataType::Float64,
            ArrowDataType::Utf8 => DataType::Utf8,
            ArrowDataType::Binary => DataType::Binary,
            ArrowDataType::Date32 => DataType::Date32,
            ArrowDataType::Timestamp(unit, timezone) => DataType::Timestamp {
                unit: TimeUnit::from_arrow(unit),
                timezone: timezone.as_ref().map(|tz| tz.to_string()),
            },
            ArrowDataType::List(field) => {
                DataType::List(Box::new(DataType::from_arrow(field.data_type())?))
            }
            other => {
                return Err(CascadeError::schema(format!(
                    "Unsupported column type: {:?}",
                    other
                )))
            }
        })
    }

    /// Whether values of this type are variable-length arrays.
    pub fn is_list(&self) -> bool {
        matches!(self, DataType::List(_))
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Timestamp { unit, timezone } => match timezone {
                Some(tz) => write!(f, "Timestamp({:?}, {})", unit, tz),
                None => write!(f, "Timestamp({:?})", unit),
            },
            DataType::List(element) => write!(f, "List({})", element),
            other => write!(f, "{:?}", other),
        }
    }
}
