//! Serialization strategies for stored values.

use crate::errors::SerializationError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::Debug;
use std::io::{Read, Write};

/// Name of the strategy every type uses unless it declares its own.
pub const DEFAULT_STRATEGY_NAME: &str = "json";

/// Whether a strategy reads and writes text or raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerializationMode {
    /// UTF-8 text, suitable for line-oriented formats.
    Text,
    /// Opaque bytes.
    Binary,
}

/// Converts values to and from a byte stream.
pub trait SerializationStrategy: Send + Sync + Debug {
    /// Returns the strategy name.
    fn name(&self) -> &str;

    /// Mode used when reading stored data.
    fn read_mode(&self) -> SerializationMode {
        SerializationMode::Binary
    }

    /// Mode used when writing stored data.
    fn write_mode(&self) -> SerializationMode {
        SerializationMode::Binary
    }

    /// Writes `value` to `sink`.
    fn serialize(&self, value: &Value, sink: &mut dyn Write) -> Result<(), SerializationError>;

    /// Reads a value from `source`.
    fn deserialize(&self, source: &mut dyn Read) -> Result<Value, SerializationError>;
}

/// The default strategy: structural JSON written as bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializationStrategy;

impl SerializationStrategy for JsonSerializationStrategy {
    fn name(&self) -> &str {
        DEFAULT_STRATEGY_NAME
    }

    fn serialize(&self, value: &Value, sink: &mut dyn Write) -> Result<(), SerializationError> {
        serde_json::to_writer(sink, value).map_err(|e| SerializationError::strategy(self.name(), e))
    }

    fn deserialize(&self, source: &mut dyn Read) -> Result<Value, SerializationError> {
        serde_json::from_reader(source).map_err(|e| SerializationError::strategy(self.name(), e))
    }
}

/// Text-mode strategy storing a row set (list of flat objects) as CSV.
///
/// Only rows of strings sharing one set of columns can be stored, so that
/// reading back yields exactly the value written.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvSerializationStrategy;

impl CsvSerializationStrategy {
    const NAME: &'static str = "csv";

    fn error(reason: impl std::fmt::Display) -> SerializationError {
        SerializationError::strategy(Self::NAME, reason)
    }

    fn string_cells<'a>(
        header: &[&String],
        row: &'a Map<String, Value>,
        index: usize,
    ) -> Result<Vec<&'a str>, SerializationError> {
        if row.len() != header.len() || header.iter().any(|column| !row.contains_key(*column)) {
            return Err(Self::error(format!(
                "row {index} has columns [{}], expected [{}]",
                row.keys().cloned().collect::<Vec<_>>().join(", "),
                header.iter().map(|c| c.as_str()).collect::<Vec<_>>().join(", ")
            )));
        }
        header
            .iter()
            .map(|column| match &row[column.as_str()] {
                Value::String(cell) => Ok(cell.as_str()),
                other => Err(Self::error(format!(
                    "row {index} column '{column}' holds {other}; only string cells are supported"
                ))),
            })
            .collect()
    }
}

impl SerializationStrategy for CsvSerializationStrategy {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn read_mode(&self) -> SerializationMode {
        SerializationMode::Text
    }

    fn write_mode(&self) -> SerializationMode {
        SerializationMode::Text
    }

    fn serialize(&self, value: &Value, sink: &mut dyn Write) -> Result<(), SerializationError> {
        let rows = value
            .as_array()
            .ok_or_else(|| Self::error("value is not a list of rows"))?;
        let mut objects = Vec::with_capacity(rows.len());
        for (index, row) in rows.iter().enumerate() {
            objects.push(
                row.as_object()
                    .ok_or_else(|| Self::error(format!("row {index} is not an object")))?,
            );
        }
        let Some(first) = objects.first() else {
            return Ok(());
        };
        let header: Vec<&String> = first.keys().collect();

        let mut records = Vec::with_capacity(objects.len());
        for (index, row) in objects.iter().enumerate() {
            records.push(Self::string_cells(&header, row, index)?);
        }

        let mut writer = csv::Writer::from_writer(sink);
        writer.write_record(&header).map_err(Self::error)?;
        for record in records {
            writer.write_record(record).map_err(Self::error)?;
        }
        writer.flush().map_err(Self::error)
    }

    fn deserialize(&self, source: &mut dyn Read) -> Result<Value, SerializationError> {
        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(source);
        let header = reader.headers().map_err(Self::error)?.clone();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(Self::error)?;
            let row: Map<String, Value> = header
                .iter()
                .zip(record.iter())
                .map(|(column, cell)| (column.to_string(), Value::String(cell.to_string())))
                .collect();
            rows.push(Value::Object(row));
        }
        Ok(Value::Array(rows))
    }
}
