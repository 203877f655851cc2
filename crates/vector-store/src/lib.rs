//! Engine-agnostic vector-store contract with two backends.
//!
//! `VectorStore` is the only surface the rest of the system sees. The REST
//! backend talks to a Qdrant-compatible server; the in-memory backend powers
//! tests and small single-node deployments with identical semantics
//! (alias resolution, the filter language, grouped search, hybrid fusion).

pub mod filter;
pub mod memory_store;
pub mod qdrant;
pub mod resilient;
pub mod store;
pub mod types;

pub use filter::{Condition, Filter, MatchClause};
pub use memory_store::MemoryStore;
pub use qdrant::QdrantStore;
pub use resilient::ResilientStore;
pub use store::{alias_target, VectorStore, PAYLOAD_INDEX_FIELDS};
pub use types::{CollectionInfo, Point, PointGroup, ScoredPoint, ScrollResult};
