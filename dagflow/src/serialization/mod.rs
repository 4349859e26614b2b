//! Serialization strategies and the type storage plugin registry.

mod registry;
mod strategy;

pub use registry::{TypeStoragePlugin, TypeStoragePluginRegistry};
pub use strategy::{
    CsvSerializationStrategy, JsonSerializationStrategy, SerializationMode,
    SerializationStrategy, DEFAULT_STRATEGY_NAME,
};
