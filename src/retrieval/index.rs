//! 인덱스 서비스 트레이트 - 키워드 / 벡터 검색 백엔드
//!
//! 코어는 인덱스 자료구조를 구현하지 않고, 점수가 매겨진
//! (chunk id, score) 목록만 소비합니다.

use anyhow::Result;
use async_trait::async_trait;

use crate::graph::{Chunk, ChunkId, ContentType, KnowledgeGraph};

use super::filter::SearchFilter;

// ============================================================================
// Types
// ============================================================================

/// 인덱스 검색 결과 (점수 내림차순)
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk_id: ChunkId,
    /// 높을수록 좋음
    pub score: f32,
}

/// 인덱스 적재용 청크 (필터 컬럼 포함)
#[derive(Debug, Clone)]
pub struct IndexedChunk {
    pub chunk_id: ChunkId,
    pub source_file: String,
    pub page: u32,
    pub content_type: ContentType,
    pub section: Option<String>,
    pub text: String,
    pub embedding: Option<Vec<f32>>,
}

impl IndexedChunk {
    /// 그래프 청크에서 적재용 레코드 생성
    pub fn from_graph(graph: &KnowledgeGraph, chunk: &Chunk) -> Self {
        Self {
            chunk_id: chunk.id.clone(),
            source_file: graph
                .source_name(&chunk.id)
                .unwrap_or(chunk.document.as_str())
                .to_string(),
            page: chunk.page,
            content_type: chunk.content_type,
            section: graph.heading_path(&chunk.id).map(str::to_string),
            text: chunk.text.clone(),
            embedding: chunk.embedding.clone(),
        }
    }
}

// ============================================================================
// Traits
// ============================================================================

/// 키워드(BM25) 인덱스
#[async_trait]
pub trait LexicalIndex: Send + Sync {
    /// 필터 적용 후 상위 `limit`개 반환
    async fn search(&self, query: &str, filter: &SearchFilter, limit: usize)
        -> Result<Vec<ScoredChunk>>;

    /// 인덱스 이름
    fn name(&self) -> &str;
}

/// 벡터(ANN) 인덱스
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// 필터 적용 후 상위 `limit`개 반환
    async fn search(
        &self,
        embedding: &[f32],
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>>;

    /// 저장된 벡터 수
    async fn count(&self) -> Result<usize>;
}
