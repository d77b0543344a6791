//! 융합 모듈 - 가중 RRF와 리랭크 블렌딩

pub mod orchestrator;
pub mod rrf;

pub use orchestrator::{FusionOrchestrator, FusionOutput, ScoredCandidate};
pub use rrf::{compare_fused, fuse, rrf_contribution, source_weight, FusedCandidate};
