//! Column conversion between producer and consumer headers.

use arrow::array::{new_null_array, ArrayRef};
use arrow::compute::cast;
use arrow::record_batch::RecordBatch;

use crate::error::{CascadeError, Result};
use crate::types::Schema;

/// Reorder (and if needed cast) a batch's columns to match `header` by name.
///
/// Every header column must exist in the batch; extra batch columns are
/// dropped.
pub fn convert_by_name(batch: &RecordBatch, header: &Schema) -> Result<RecordBatch> {
    let source_schema = batch.schema();
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(header.len());

    for field in header.fields() {
        let index = source_schema.index_of(field.name()).map_err(|_| {
            let available: Vec<String> = source_schema
                .fields()
                .iter()
                .map(|f| f.name().clone())
                .collect();
            CascadeError::schema_with_suggestions(field.name(), &available, "Column")
        })?;

        let column = batch.column(index);
        let wanted = field.data_type().to_arrow();
        if column.data_type() == &wanted {
            columns.push(column.clone());
        } else {
            columns.push(cast(column.as_ref(), &wanted)?);
        }
    }

    Ok(RecordBatch::try_new(header.to_arrow_ref(), columns)?)
}

/// Widen a batch to `header`, filling columns the batch lacks with nulls.
///
/// Used when a synthesized insert covers only a subset of the target's
/// physical columns; the remainder is completed here.
pub fn pad_to_header(batch: &RecordBatch, header: &Schema) -> Result<RecordBatch> {
    let source_schema = batch.schema();
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(header.len());

    for field in header.fields() {
        match source_schema.index_of(field.name()) {
            Ok(index) => {
                let column = batch.column(index);
                let wanted = field.data_type().to_arrow();
                if column.data_type() == &wanted {
                    columns.push(column.clone());
                } else {
                    columns.push(cast(column.as_ref(), &wanted)?);
                }
            }
            Err(_) => {
                columns.push(new_null_array(&field.data_type().to_arrow(), batch.num_rows()));
            }
        }
    }

    Ok(RecordBatch::try_new(header.to_arrow_ref(), columns)?)
}
