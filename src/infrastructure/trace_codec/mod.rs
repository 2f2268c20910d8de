//! Trace codec
//!
//! - `rows`: trace <-> fixed-schema rows
//! - `columnar`: rows <-> parquet bytes

pub mod columnar;
pub mod error;
pub mod rows;

pub use columnar::{read_rows, row_schema, validate_schema, write_rows};
pub use error::{CodecError, CodecResult};
pub use rows::{agent_trace_to_rows, rows_to_trace, TraceRow};
