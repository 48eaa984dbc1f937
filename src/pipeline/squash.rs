//! Coalescing of tiny batches into insert-sized blocks.

use arrow::compute::concat_batches;
use arrow::record_batch::RecordBatch;

use crate::batch::batch_bytes;
use crate::error::Result;

/// Accumulates upstream batches until they reach a minimum row or byte
/// threshold, then emits one concatenated block.
///
/// A view query can produce many small batches for a single inserted block
/// (a grouped aggregation with two-level hashing, for instance); writing
/// them through unsquashed would litter the target with tiny parts.
#[derive(Debug)]
pub struct Squasher {
    min_rows: usize,
    min_bytes: usize,
    pending: Vec<RecordBatch>,
    pending_rows: usize,
    pending_bytes: usize,
}

impl Squasher {
    /// Thresholds of zero disable squashing on that dimension; if both are
    /// zero every batch passes through unchanged.
    pub fn new(min_rows: usize, min_bytes: usize) -> Self {
        Self {
            min_rows,
            min_bytes,
            pending: Vec::new(),
            pending_rows: 0,
            pending_bytes: 0,
        }
    }

    /// Offer one batch; returns a block once enough is accumulated.
    pub fn add(&mut self, batch: RecordBatch) -> Result<Option<RecordBatch>> {
        if self.min_rows == 0 && self.min_bytes == 0 {
            return Ok(Some(batch));
        }

        self.pending_rows += batch.num_rows();
        self.pending_bytes += batch_bytes(&batch);
        self.pending.push(batch);

        if (self.min_rows > 0 && self.pending_rows >= self.min_rows)
            || (self.min_bytes > 0 && self.pending_bytes >= self.min_bytes)
        {
            return self.drain().map(Some);
        }
        Ok(None)
    }

    /// Emit whatever remains accumulated, if anything.
    pub fn finish(&mut self) -> Result<Option<RecordBatch>> {
        if self.pending.is_empty() {
            return Ok(None);
        }
        self.drain().map(Some)
    }

    fn drain(&mut self) -> Result<RecordBatch> {
        let batches = std::mem::take(&mut self.pending);
        self.pending_rows = 0;
        self.pending_bytes = 0;

        if batches.len() == 1 {
            return Ok(batches.into_iter().next().unwrap());
        }
        let schema = batches[0].schema();
        Ok(concat_batches(&schema, batches.iter())?)
    }
}
