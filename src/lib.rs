//! Local retrieval-augmented-generation engine.
//!
//! The pipeline: format-specific processors extract and chunk source
//! files, an embedding provider (with a content-addressed cache) turns
//! chunks into vectors, a vector store ranks them by cosine similarity,
//! and the manager orchestrates ingestion, retrieval, and
//! retrieve-then-generate answering against local model services.

pub mod chunker;
pub mod core;
pub mod embedding;
pub mod llm;
pub mod logging;
pub mod manager;
pub mod processors;
pub mod resource;
pub mod store;
pub mod types;
pub mod vector_math;

pub use crate::core::config::RagConfig;
pub use crate::core::errors::RagError;
pub use manager::{AnswerOptions, AnswerResult, RagManager};
