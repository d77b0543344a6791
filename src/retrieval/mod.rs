//! 검색 모듈 - 후보 생성과 인덱스 백엔드
//!
//! - [`filter`]: 소스 / 타입 / 섹션 필터
//! - [`index`]: 키워드 / 벡터 인덱스 트레이트
//! - [`store`]: SQLite FTS5 키워드 인덱스
//! - [`lance`]: LanceDB 벡터 인덱스
//! - [`generators`]: 세 전략 동시 실행

pub mod candidate;
pub mod filter;
pub mod generators;
pub mod index;
pub mod lance;
pub mod store;

pub use candidate::{rank_hits, Candidate, CandidateLists, CandidateSource};
pub use filter::SearchFilter;
pub use generators::{graph_candidates, CandidateGenerators, GeneratorOutput};
pub use index::{IndexedChunk, LexicalIndex, ScoredChunk, VectorIndex};
pub use lance::{LanceChunkIndex, EMBEDDING_DIMENSION};
pub use store::{ChunkStore, StoreStats};
