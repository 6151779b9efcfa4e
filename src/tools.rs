//! Agent-facing tools.

pub mod vector_search;

pub use vector_search::{VectorSearchArgs, VectorSearchError, VectorSearchOutput, VectorSearchTool};
