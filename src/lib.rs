//! semantic-store: per-workspace semantic vector storage and search over
//! embedded LanceDB.

pub mod config;
pub mod embedding;
pub mod error;
pub mod logging;
pub mod tools;
pub mod vector;

pub use self::config::StoreConfig;
pub use embedding::{Embedder, FastEmbedder};
pub use error::{Error, Result};
pub use vector::VectorEngine;
