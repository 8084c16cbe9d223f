mod client;
mod config;

pub use client::QdrantStore;
pub use config::QdrantConfig;
