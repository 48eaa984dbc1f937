//! Batch adapters between a view's SELECT output and its downstream sink.

mod convert;
mod squash;

pub use convert::{convert_by_name, pad_to_header};
pub use squash::Squasher;
