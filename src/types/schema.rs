//! Header definitions for cascade.

use std::collections::HashMap;
use std::sync::Arc;

use arrow::datatypes::{Field as ArrowField, Schema as ArrowSchema, SchemaRef as ArrowSchemaRef};

use super::DataType;
use crate::error::{CascadeError, Result};

/// A named, typed column in a header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    name: String,
    data_type: DataType,
    nullable: bool,
}

impl Field {
    /// Create a new field.
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
        }
    }

    /// Get the field name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the data type.
    pub fn data_type(&self) -> &DataType {
        &self.data_type
    }

    /// Check if the field is nullable.
    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    /// For columns named `group.field`, the nested group prefix.
    pub fn nested_group(&self) -> Option<&str> {
        self.name.split_once('.').map(|(group, _)| group)
    }

    /// Convert to an Arrow field.
    pub fn to_arrow(&self) -> ArrowField {
        ArrowField::new(&self.name, self.data_type.to_arrow(), self.nullable)
    }

    /// Convert from an Arrow field.
    pub fn from_arrow(arrow_field: &ArrowField) -> Result<Self> {
        Ok(Self {
            name: arrow_field.name().clone(),
            data_type: DataType::from_arrow(arrow_field.data_type())?,
            nullable: arrow_field.is_nullable(),
        })
    }
}

/// A header: the ordered column layout of a table or batch, without data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    fields: Vec<Field>,
    field_index: HashMap<String, usize>,
}

impl Schema {
    /// Create a new empty header.
    pub fn empty() -> Self {
        Self {
            fields: Vec::new(),
            field_index: HashMap::new(),
        }
    }

    /// Create a new header from fields.
    pub fn new(fields: Vec<Field>) -> Self {
        let field_index = fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name().to_string(), i))
            .collect();
        Self {
            fields,
            field_index,
        }
    }

    /// Get the fields in this header.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Get a field by index.
    pub fn field(&self, index: usize) -> Option<&Field> {
        self.fields.get(index)
    }

    /// Get a field by name.
    pub fn field_by_name(&self, name: &str) -> Option<&Field> {
        self.field_index.get(name).map(|&i| &self.fields[i])
    }

    /// Get the index of a field by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.field_index.get(name).copied()
    }

    /// Get the number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check if the header is empty.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Check if a field exists.
    pub fn contains(&self, name: &str) -> bool {
        self.field_index.contains_key(name)
    }

    /// Project the header to the named columns, in the given order.
    pub fn project_names<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Result<Self> {
        let fields: Result<Vec<Field>> = names
            .into_iter()
            .map(|name| {
                self.field_by_name(name).cloned().ok_or_else(|| {
                    CascadeError::schema_with_suggestions(name, &self.field_names_vec(), "Column")
                })
            })
            .collect();
        Ok(Self::new(fields?))
    }

    /// Extend this header with fields from another, skipping name collisions.
    pub fn merge(&self, other: &Schema) -> Self {
        let mut fields = self.fields.clone();
        for field in other.fields() {
            if !self.contains(field.name()) {
                fields.push(field.clone());
            }
        }
        Self::new(fields)
    }

    /// Convert to an Arrow schema.
    pub fn to_arrow(&self) -> ArrowSchema {
        ArrowSchema::new(
            self.fields
                .iter()
                .map(|f| f.to_arrow())
                .collect::<Vec<ArrowField>>(),
        )
    }

    /// Convert to a shared Arrow schema reference.
    pub fn to_arrow_ref(&self) -> ArrowSchemaRef {
        Arc::new(self.to_arrow())
    }

    /// Convert from an Arrow schema.
    pub fn from_arrow(arrow_schema: &ArrowSchema) -> Result<Self> {
        let fields: Result<Vec<Field>> = arrow_schema
            .fields()
            .iter()
            .map(|f| Field::from_arrow(f))
            .collect();
        Ok(Self::new(fields?))
    }

    /// Get an iterator over field names.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name())
    }

    fn field_names_vec(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name().to_string()).collect()
    }

    /// Two headers match when they agree on names and types in order.
    pub fn same_layout(&self, other: &Schema) -> bool {
        self.fields.len() == other.fields.len()
            && self
                .fields
                .iter()
                .zip(other.fields.iter())
                .all(|(a, b)| a.name() == b.name() && a.data_type() == b.data_type())
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Vec<Field>> for Schema {
    fn from(fields: Vec<Field>) -> Self {
        Self::new(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
            Field::new("age", DataType::Int32, true),
        ])
    }

    #[test]
    fn test_schema_creation() {
        let schema = sample();
        assert_eq!(schema.len(), 3);
        assert_eq!(schema.field(0).unwrap().name(), "id");
        assert_eq!(schema.index_of("name"), Some(1));
        assert!(schema.contains("age"));
        assert!(!schema.contains("unknown"));
    }

    #[test]
    fn test_project_names() {
        let schema = sample();
        let projected = schema.project_names(["age", "id"]).unwrap();
        assert_eq!(projected.len(), 2);
        assert_eq!(projected.field(0).unwrap().name(), "age");
        assert_eq!(projected.field(1).unwrap().name(), "id");

        let err = schema.project_names(["nam"]).unwrap_err();
        assert!(err.to_string().contains("Did you mean"));
    }

    #[test]
    fn test_merge_skips_collisions() {
        let schema = sample();
        let virtuals = Schema::new(vec![
            Field::new("_block_number", DataType::UInt64, false),
            Field::new("id", DataType::Int64, false),
        ]);

        let merged = schema.merge(&virtuals);
        assert_eq!(merged.len(), 4);
        assert!(merged.contains("_block_number"));
    }

    #[test]
    fn test_nested_group() {
        let field = Field::new("metrics.value", DataType::List(Box::new(DataType::Int64)), true);
        assert_eq!(field.nested_group(), Some("metrics"));
        assert_eq!(Field::new("plain", DataType::Int64, false).nested_group(), None);
    }

    #[test]
    fn test_arrow_roundtrip() {
        let schema = sample();
        let back = Schema::from_arrow(&schema.to_arrow()).unwrap();
        assert_eq!(schema, back);
    }
}
