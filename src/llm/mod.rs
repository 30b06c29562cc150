//! Text generation against a local model server.

mod ollama;
mod provider;

pub use ollama::OllamaGenerator;
pub use provider::{ChatMessage, GenerationOptions, GenerationResponse, TextGenerator};
