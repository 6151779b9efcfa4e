//! Per-workspace semantic vector store.
//!
//! Each workspace gets a private LanceDB database holding one table per
//! collection kind. The [`VectorEngine`] provisions tables on demand,
//! embeds and appends records, maintains an IVF-PQ index once a table is
//! large enough, and fans searches out across collections.

mod ann;
mod collections;
pub mod engine;
pub mod filter;
mod indexer;
pub mod models;
mod search;
pub mod state;
pub mod status;
pub mod table;
pub mod workspace;

pub use engine::VectorEngine;
pub use models::{
    ArticleRef, CollectionKind, CollectionStats, Record, SearchHit, SearchScope, SourceLocation,
    SourceProgress, StoreState, SymbolInfo,
};
pub use search::similarity_from_distance;
pub use status::{
    BroadcastNotifier, LogNotifier, Notifier, PROGRESS_EVENT, STATS_EVENT, StoreEvent,
};
pub use table::CollectionTable;
pub use workspace::WorkspaceKey;
