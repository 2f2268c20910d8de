//! Parquet encoding of [`TraceRow`]s.
//!
//! The column set is fixed and only ever grows. Reading validates that every
//! known column is present with the expected type; extra columns written by
//! newer versions are ignored.

use std::sync::{Arc, OnceLock};

use arrow_array::{Array, ArrayRef, Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use bytes::Bytes;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;

use super::error::{CodecError, CodecResult};
use super::rows::TraceRow;

/// The row schema, in column order.
pub fn row_schema() -> SchemaRef {
    static SCHEMA: OnceLock<SchemaRef> = OnceLock::new();
    SCHEMA
        .get_or_init(|| {
            Arc::new(Schema::new(vec![
                Field::new("trajectory_id", DataType::Utf8, false),
                Field::new("seq", DataType::Int64, false),
                Field::new("ts", DataType::Utf8, false),
                Field::new("component", DataType::Utf8, false),
                Field::new("event", DataType::Utf8, false),
                Field::new("level", DataType::Utf8, false),
                Field::new("message", DataType::Utf8, false),
                Field::new("turn", DataType::Int64, true),
                Field::new("part", DataType::Int64, true),
                Field::new("git_commit", DataType::Utf8, true),
                Field::new("session_id", DataType::Utf8, true),
                Field::new("source", DataType::Utf8, true),
                Field::new("fields", DataType::Utf8, true),
            ]))
        })
        .clone()
}

fn strings<'a>(rows: &'a [TraceRow], get: impl Fn(&'a TraceRow) -> &'a str) -> ArrayRef {
    Arc::new(StringArray::from(rows.iter().map(get).collect::<Vec<_>>()))
}

fn opt_strings<'a>(rows: &'a [TraceRow], get: impl Fn(&'a TraceRow) -> Option<&'a str>) -> ArrayRef {
    Arc::new(StringArray::from(rows.iter().map(get).collect::<Vec<_>>()))
}

fn opt_ints(rows: &[TraceRow], get: impl Fn(&TraceRow) -> Option<i64>) -> ArrayRef {
    Arc::new(Int64Array::from(rows.iter().map(get).collect::<Vec<_>>()))
}

/// Encode rows as one snappy-compressed parquet file.
pub fn write_rows(rows: &[TraceRow]) -> CodecResult<Bytes> {
    let schema = row_schema();
    let columns: Vec<ArrayRef> = vec![
        strings(rows, |r| r.trajectory_id.as_str()),
        Arc::new(Int64Array::from(rows.iter().map(|r| r.seq).collect::<Vec<_>>())),
        strings(rows, |r| r.ts.as_str()),
        strings(rows, |r| r.component.as_str()),
        strings(rows, |r| r.event.as_str()),
        strings(rows, |r| r.level.as_str()),
        strings(rows, |r| r.message.as_str()),
        opt_ints(rows, |r| r.turn),
        opt_ints(rows, |r| r.part),
        opt_strings(rows, |r| r.git_commit.as_deref()),
        opt_strings(rows, |r| r.session_id.as_deref()),
        opt_strings(rows, |r| r.source.as_deref()),
        opt_strings(rows, |r| r.fields.as_deref()),
    ];

    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut buffer = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buffer, Arc::clone(&schema), Some(props))?;
    if !rows.is_empty() {
        let batch = RecordBatch::try_new(schema, columns)?;
        writer.write(&batch)?;
    }
    writer.close()?;
    Ok(Bytes::from(buffer))
}

/// Check that `found` carries every row column with the expected type.
pub fn validate_schema(found: &Schema) -> CodecResult<()> {
    for expected in row_schema().fields() {
        let field = found
            .field_with_name(expected.name())
            .map_err(|_| CodecError::Schema(format!("missing column '{}'", expected.name())))?;
        if field.data_type() != expected.data_type() {
            return Err(CodecError::Schema(format!(
                "column '{}' has type {}, expected {}",
                expected.name(),
                field.data_type(),
                expected.data_type()
            )));
        }
    }
    Ok(())
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> CodecResult<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| CodecError::Schema(format!("column '{name}' unreadable")))
}

fn required_str(array: &StringArray, i: usize, name: &str) -> CodecResult<String> {
    if array.is_null(i) {
        return Err(CodecError::Schema(format!("null in required column '{name}'")));
    }
    Ok(array.value(i).to_string())
}

fn optional_str(array: &StringArray, i: usize) -> Option<String> {
    (!array.is_null(i)).then(|| array.value(i).to_string())
}

fn optional_int(array: &Int64Array, i: usize) -> Option<i64> {
    (!array.is_null(i)).then(|| array.value(i))
}

/// Decode a parquet file written by [`write_rows`].
pub fn read_rows(bytes: Bytes) -> CodecResult<Vec<TraceRow>> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(bytes)?;
    validate_schema(builder.schema())?;
    let reader = builder.build()?;

    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch?;
        let trajectory_id = column::<StringArray>(&batch, "trajectory_id")?;
        let seq = column::<Int64Array>(&batch, "seq")?;
        let ts = column::<StringArray>(&batch, "ts")?;
        let component = column::<StringArray>(&batch, "component")?;
        let event = column::<StringArray>(&batch, "event")?;
        let level = column::<StringArray>(&batch, "level")?;
        let message = column::<StringArray>(&batch, "message")?;
        let turn = column::<Int64Array>(&batch, "turn")?;
        let part = column::<Int64Array>(&batch, "part")?;
        let git_commit = column::<StringArray>(&batch, "git_commit")?;
        let session_id = column::<StringArray>(&batch, "session_id")?;
        let source = column::<StringArray>(&batch, "source")?;
        let fields = column::<StringArray>(&batch, "fields")?;

        for i in 0..batch.num_rows() {
            if seq.is_null(i) {
                return Err(CodecError::Schema("null in required column 'seq'".to_string()));
            }
            rows.push(TraceRow {
                trajectory_id: required_str(trajectory_id, i, "trajectory_id")?,
                seq: seq.value(i),
                ts: required_str(ts, i, "ts")?,
                component: required_str(component, i, "component")?,
                event: required_str(event, i, "event")?,
                level: required_str(level, i, "level")?,
                message: required_str(message, i, "message")?,
                turn: optional_int(turn, i),
                part: optional_int(part, i),
                git_commit: optional_str(git_commit, i),
                session_id: optional_str(session_id, i),
                source: optional_str(source, i),
                fields: optional_str(fields, i),
            });
        }
    }
    Ok(rows)
}
