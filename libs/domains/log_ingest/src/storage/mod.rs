pub mod qdrant;
mod store;

#[cfg(test)]
pub use store::MockVectorStore;
pub use store::VectorStore;
