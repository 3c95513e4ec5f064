//! 编排层：评估流水线与缓存状态机

pub mod cache;
pub mod evaluator;

pub use cache::{CacheService, LiveOutcome, SiteOutcome};
pub use evaluator::Evaluator;
