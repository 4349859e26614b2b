//! Re-locatable pointers to pipelines and repositories.
//!
//! A [`ReconstructablePipeline`] or [`ReconstructableRepository`] is plain
//! data naming where a definition lives. It can be serialized, sent to
//! another process and resolved there against a [`CodeLoader`].

mod loader;
mod pipeline;
mod pointer;
mod repository;

pub use loader::{CodeLoader, EntryPoint, EntryPointRegistry};
#[cfg(test)]
pub use loader::MockCodeLoader;
pub use pipeline::{reconstructable, ReconstructablePipeline, ReconstructablePipelineFromRepo};
pub use pointer::{normalize_path, CodePointer, IntoTarget, Target, TargetFactory};
pub use repository::ReconstructableRepository;
