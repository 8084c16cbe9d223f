mod client;
mod http;
mod provider;

pub use client::EmbeddingClient;
pub use http::{HttpEmbeddingConfig, HttpEmbeddingProvider};
#[cfg(test)]
pub use provider::MockEmbeddingProvider;
pub use provider::EmbeddingProvider;
