//! Retrieval engine: semantic, hybrid, grouped, similar and graph-expanded
//! search, plus LLM-grounded answering and token-budgeted context packs.

pub mod engine;

pub use engine::{SearchEngine, CODE_BOOST};
