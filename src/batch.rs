//! Row-batch helpers shared by the write path.
//!
//! The shape check mirrors what the storage engines assume: all sibling
//! array columns of a nested group (`group.a`, `group.b`, ...) carry the
//! same number of elements in every row. It runs on every batch entering
//! and leaving a view transformation, before any sink is touched.

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use arrow::array::{Array, LargeListArray, ListArray};
use arrow::array::ArrayData;
use arrow::record_batch::RecordBatch;

use crate::error::{CascadeError, Result};

/// Per-row element counts of an array column, or None for non-array columns.
fn list_lengths(array: &dyn Array) -> Option<Vec<usize>> {
    if let Some(list) = array.as_any().downcast_ref::<ListArray>() {
        let offsets = list.value_offsets();
        return Some(
            offsets
                .windows(2)
                .map(|w| (w[1] - w[0]) as usize)
                .collect(),
        );
    }
    if let Some(list) = array.as_any().downcast_ref::<LargeListArray>() {
        let offsets = list.value_offsets();
        return Some(
            offsets
                .windows(2)
                .map(|w| (w[1] - w[0]) as usize)
                .collect(),
        );
    }
    None
}

/// Verify that sibling array columns of every nested group have equal
/// per-row sizes.
///
/// Returns `ShapeMismatch` naming the group, the offending columns and the
/// first row where they disagree.
pub fn validate_array_sizes(batch: &RecordBatch) -> Result<()> {
    // group name -> (first array column name, its per-row lengths)
    let mut groups: BTreeMap<String, (String, Vec<usize>)> = BTreeMap::new();

    let schema = batch.schema();
    for (i, field) in schema.fields().iter().enumerate() {
        let Some((group, _)) = field.name().split_once('.') else {
            continue;
        };
        let Some(lengths) = list_lengths(batch.column(i).as_ref()) else {
            continue;
        };

        match groups.get(group) {
            None => {
                groups.insert(group.to_string(), (field.name().clone(), lengths));
            }
            Some((first_name, first_lengths)) => {
                if &lengths != first_lengths {
                    let row = first_lengths
                        .iter()
                        .zip(lengths.iter())
                        .position(|(a, b)| a != b)
                        .unwrap_or(0);
                    return Err(CascadeError::shape_mismatch(format!(
                        "elements '{}' and '{}' of nested group '{}' have different array sizes at row {}",
                        first_name,
                        field.name(),
                        group,
                        row
                    )));
                }
            }
        }
    }

    Ok(())
}

/// Total in-memory size of a batch, used for squashing thresholds.
pub fn batch_bytes(batch: &RecordBatch) -> usize {
    batch.get_array_memory_size()
}

fn hash_array_data(data: &ArrayData, hasher: &mut impl Hasher) {
    data.null_count().hash(hasher);
    for buffer in data.buffers() {
        buffer.as_slice().hash(hasher);
    }
    for child in data.child_data() {
        hash_array_data(child, hasher);
    }
}

/// Content fingerprint of a batch, used by deduplicating storage to detect
/// a block it has already written.
pub fn block_fingerprint(batch: &RecordBatch) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    batch.num_rows().hash(&mut hasher);
    let schema = batch.schema();
    for (field, column) in schema.fields().iter().zip(batch.columns()) {
        field.name().hash(&mut hasher);
        hash_array_data(&column.to_data(), &mut hasher);
    }
    hasher.finish()
}
