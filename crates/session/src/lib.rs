//! Session context service, background predictive prefetch and usage
//! analytics.

pub mod analytics;
pub mod prefetch;
pub mod service;

pub use analytics::{KnowledgeGap, SimilarQuery, ToolAnalytics, UsagePatterns, UsageTracker};
pub use prefetch::PredictiveLoader;
pub use service::SessionService;
