//! Step output addressing on top of [`IntermediateStore`].

use super::{IntermediateStore, StoredObject};
use crate::context::ExecutionContext;
use crate::definition::RuntimeType;
use crate::errors::DagflowError;
use crate::plan::StepOutputHandle;
use serde_json::Value;

const INTERMEDIATES_DIR: &str = "intermediates";

/// Stores step outputs at `intermediates/{step_key}/{output_name}`.
#[derive(Debug, Clone)]
pub struct IntermediatesManager {
    store: IntermediateStore,
}

impl IntermediatesManager {
    /// Wraps a run's store.
    #[must_use]
    pub fn new(store: IntermediateStore) -> Self {
        Self { store }
    }

    /// Returns the wrapped store.
    #[must_use]
    pub fn store(&self) -> &IntermediateStore {
        &self.store
    }

    /// Returns the path segments of a step output.
    #[must_use]
    pub fn paths_for_handle(handle: &StepOutputHandle) -> Vec<String> {
        vec![
            INTERMEDIATES_DIR.to_string(),
            handle.step_key.clone(),
            handle.output_name.clone(),
        ]
    }

    /// Returns the backend URI of a step output.
    #[must_use]
    pub fn uri_for_handle(&self, handle: &StepOutputHandle) -> String {
        self.store.uri_for_paths(&Self::paths_for_handle(handle))
    }

    /// Stores a step output.
    ///
    /// # Errors
    ///
    /// See [`IntermediateStore::set_object`].
    pub async fn set_intermediate(
        &self,
        ctx: &ExecutionContext,
        runtime_type: &RuntimeType,
        handle: &StepOutputHandle,
        value: &Value,
    ) -> Result<StoredObject, DagflowError> {
        self.store
            .set_object(value, ctx, runtime_type, &Self::paths_for_handle(handle))
            .await
    }

    /// Loads a step output.
    ///
    /// # Errors
    ///
    /// See [`IntermediateStore::get_object`].
    pub async fn get_intermediate(
        &self,
        ctx: &ExecutionContext,
        runtime_type: &RuntimeType,
        handle: &StepOutputHandle,
    ) -> Result<StoredObject, DagflowError> {
        self.store
            .get_object(ctx, runtime_type, &Self::paths_for_handle(handle))
            .await
    }

    /// True if the step output is stored.
    ///
    /// # Errors
    ///
    /// Propagates backend errors.
    pub async fn has_intermediate(
        &self,
        ctx: &ExecutionContext,
        handle: &StepOutputHandle,
    ) -> Result<bool, DagflowError> {
        self.store
            .has_object(ctx, &Self::paths_for_handle(handle))
            .await
    }

    /// Removes a step output.
    ///
    /// # Errors
    ///
    /// Propagates backend errors.
    pub async fn rm_intermediate(
        &self,
        ctx: &ExecutionContext,
        handle: &StepOutputHandle,
    ) -> Result<(), DagflowError> {
        self.store
            .rm_object(ctx, &Self::paths_for_handle(handle))
            .await
    }

    /// Copies a step output of another run into this run.
    ///
    /// # Errors
    ///
    /// See [`IntermediateStore::copy_object_from_run`].
    pub async fn copy_intermediate_from_run(
        &self,
        ctx: &ExecutionContext,
        run_id: &str,
        handle: &StepOutputHandle,
    ) -> Result<(), DagflowError> {
        self.store
            .copy_object_from_run(ctx, run_id, &Self::paths_for_handle(handle))
            .await
    }
}
