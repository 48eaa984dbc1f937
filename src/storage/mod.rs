//! Reference storage for cascade.
//!
//! In-memory engines exercising every contract the write path consumes: a
//! plain columnar store, a deduplicating variant with the replicated-sink
//! surface, the single-block virtual source view queries read from, and the
//! live/materialized view storage objects.

mod live;
mod materialized;
mod memory;
mod values;

pub use live::{LiveViewTable, RefreshCallback};
pub use materialized::MaterializedViewTable;
pub use memory::{DedupMemoryTable, MemoryTable};
pub use values::SingleBlockTable;
