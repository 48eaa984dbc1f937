//! Column types and headers for cascade.
//!
//! A header (the [`Schema`]) names and types the columns of a row batch
//! without carrying data, with mappings to Apache Arrow for execution.

mod datatype;
mod schema;

pub use datatype::{DataType, TimeUnit};
pub use schema::{Field, Schema};
