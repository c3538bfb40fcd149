//! Chunk persistence: a slice of records → one Snappy-compressed Parquet file.
//!
//! Rows follow the dataset schema `(id, query, image, language)`. The `id`
//! is a fresh random UUID assigned at write time, so ids stay unique across
//! chunks and across runs that append to the same output directory.
//!
//! Files are written to a temporary sibling and renamed into place once the
//! Parquet footer is flushed; a reader listing the output directory never
//! sees a half-written chunk.

use crate::error::PersistError;
use crate::record::Record;
use arrow::array::{ArrayRef, BinaryArray, RecordBatch, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use once_cell::sync::Lazy;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::path::Path;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::debug;
use uuid::Uuid;

/// Persists one chunk of records at `path`.
///
/// Called from a blocking thread; implementations may do synchronous I/O.
pub trait ChunkSink: Send + Sync {
    fn write_chunk(&self, records: &[Record], path: &Path) -> Result<(), PersistError>;
}

static SCHEMA: Lazy<SchemaRef> = Lazy::new(|| {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("query", DataType::Utf8, false),
        Field::new("image", DataType::Binary, false),
        Field::new("language", DataType::Utf8, false),
    ]))
});

/// The Arrow schema every chunk is written with.
pub fn dataset_schema() -> SchemaRef {
    Arc::clone(&SCHEMA)
}

/// Fresh record id.
pub fn new_record_id() -> String {
    Uuid::new_v4().to_string()
}

/// [`ChunkSink`] writing Parquet files.
#[derive(Debug, Clone)]
pub struct ParquetSink {
    compression: Compression,
}

impl Default for ParquetSink {
    fn default() -> Self {
        Self {
            compression: Compression::SNAPPY,
        }
    }
}

impl ParquetSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the Arrow batch for `records`, assigning ids.
    pub fn to_record_batch(records: &[Record]) -> Result<RecordBatch, arrow::error::ArrowError> {
        let ids = StringArray::from_iter_values(records.iter().map(|_| new_record_id()));
        let queries = StringArray::from_iter_values(records.iter().map(|r| r.query.as_str()));
        let images = BinaryArray::from_iter_values(records.iter().map(|r| &r.image[..]));
        let languages = StringArray::from_iter_values(records.iter().map(|r| r.language.as_str()));

        let columns: Vec<ArrayRef> = vec![
            Arc::new(ids),
            Arc::new(queries),
            Arc::new(images),
            Arc::new(languages),
        ];
        RecordBatch::try_new(dataset_schema(), columns)
    }
}

impl ChunkSink for ParquetSink {
    fn write_chunk(&self, records: &[Record], path: &Path) -> Result<(), PersistError> {
        let encode_err = |detail: String| PersistError::Encode {
            path: path.to_path_buf(),
            detail,
        };
        let io_err = |source: std::io::Error| PersistError::Io {
            path: path.to_path_buf(),
            source,
        };

        let batch = Self::to_record_batch(records).map_err(|e| encode_err(e.to_string()))?;

        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;

        let props = WriterProperties::builder()
            .set_compression(self.compression)
            .build();
        let mut writer = ArrowWriter::try_new(&mut tmp, dataset_schema(), Some(props))
            .map_err(|e| encode_err(e.to_string()))?;
        writer.write(&batch).map_err(|e| encode_err(e.to_string()))?;
        writer.close().map_err(|e| encode_err(e.to_string()))?;

        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(path).map_err(|e| io_err(e.error))?;

        debug!("Wrote {} rows → {}", records.len(), path.display());
        Ok(())
    }
}
