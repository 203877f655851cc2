//! Ingestion pipeline: scan, parse, embed, upsert; plus per-project status,
//! zero-downtime reindex and a debounced filesystem watcher.

pub mod indexer;
pub mod scanner;
pub mod status;
pub mod watcher;

pub use indexer::{IndexOutcome, ProjectIndexer};
pub use ragd_parsers::ParserRegistry;
pub use scanner::FileScanner;
pub use status::StatusMap;
pub use watcher::ProjectWatcher;
