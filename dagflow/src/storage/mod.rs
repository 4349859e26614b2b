//! Durable artifact storage.
//!
//! [`ObjectStore`] backends move raw bytes. [`IntermediateStore`] scopes them
//! to one run and serializes values through the type registry.
//! [`IntermediatesManager`] addresses step outputs within a run.

mod filesystem;
#[cfg(feature = "http")]
mod http;
mod intermediate_store;
mod intermediates;
mod memory;
mod object_store;

pub use filesystem::FilesystemObjectStore;
#[cfg(feature = "http")]
pub use http::HttpObjectStore;
pub use intermediate_store::{IntermediateStore, StoredObject, DEFAULT_PREFIX};
pub use intermediates::IntermediatesManager;
pub use memory::InMemoryObjectStore;
pub use object_store::{BackendKind, ObjectStore};
