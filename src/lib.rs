//! tdrag - 기술 문서용 그래프 보조 RAG 엔진
//!
//! 키워드(SQLite FTS5), 벡터(LanceDB), 지식 그래프 세 가지 후보를
//! 가중 RRF로 융합하고 cross-encoder로 리랭크한 뒤,
//! 인접 페이지와 테이블을 붙여 컨텍스트를 조립합니다.

pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod fusion;
pub mod graph;
pub mod llm;
pub mod memory;
pub mod pipeline;
pub mod retrieval;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports
pub use config::{get_data_dir, MemoryConfig, RagConfig, RetrievalConfig, ScoreNormalization};
pub use error::{Backend, RagError, RagResult};
pub use graph::{GraphHandle, KnowledgeGraph};
pub use llm::{AnswerGenerator, EmbeddingProvider, Reranker, Summarizer};
pub use pipeline::{Confidence, PipelineBackends, RagPipeline, RagResponse, SourceRef};
pub use retrieval::{LexicalIndex, SearchFilter, VectorIndex};
