mod client;

pub use client::{Embedder, MockEmbedder, WorkersAiEmbedder};
