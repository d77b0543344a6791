//! Fusion & Rerank 오케스트레이터
//!
//! 1. RRF 융합
//! 2. 그래프에 없는 청크 / 필터 위반 청크 제거
//! 3. 상위 N개를 리랭커에 한 번에 전달
//! 4. `final = rrf_blend * norm(rrf) + rerank_blend * rerank`
//! 5. 상위 K개 반환
//!
//! 리랭커가 실패하거나 시간을 넘기면 `final = norm(rrf)`로 계속 진행합니다.

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::{RetrievalConfig, ScoreNormalization};
use crate::error::{Backend, RagError, RagResult};
use crate::graph::{ChunkId, KnowledgeGraph};
use crate::llm::Reranker;
use crate::retrieval::{CandidateLists, SearchFilter};

use super::rrf::{fuse, FusedCandidate};

// ============================================================================
// Types
// ============================================================================

/// 최종 점수 분해
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredCandidate {
    pub chunk_id: ChunkId,
    pub lexical_rank: Option<usize>,
    pub vector_rank: Option<usize>,
    pub graph_rank: Option<usize>,
    pub rrf: f32,
    /// degraded 배치에서는 None
    pub rerank: Option<f32>,
    pub final_score: f32,
}

/// 융합 결과
#[derive(Debug, Clone, Default)]
pub struct FusionOutput {
    /// final 내림차순
    pub results: Vec<ScoredCandidate>,
    pub rerank_degraded: bool,
    pub warnings: Vec<String>,
}

/// 융합 + 리랭크 오케스트레이터
pub struct FusionOrchestrator {
    reranker: Arc<dyn Reranker>,
    config: RetrievalConfig,
}

// ============================================================================
// Impl
// ============================================================================

impl FusionOrchestrator {
    pub fn new(reranker: Arc<dyn Reranker>, config: RetrievalConfig) -> Self {
        Self { reranker, config }
    }

    pub async fn fuse_and_rerank(
        &self,
        query: &str,
        lists: &CandidateLists,
        graph: &KnowledgeGraph,
        filter: &SearchFilter,
        cancel: &CancellationToken,
    ) -> RagResult<FusionOutput> {
        let fused = fuse(lists, &self.config);
        let fused_count = fused.len();

        let mut batch: Vec<FusedCandidate> = fused
            .into_iter()
            .filter(|c| match graph.chunk(&c.chunk_id) {
                Some(chunk) => filter.matches(graph, chunk),
                None => {
                    tracing::debug!("Dropping unknown chunk {}", c.chunk_id);
                    false
                }
            })
            .collect();
        batch.truncate(self.config.rerank_top_n);

        tracing::debug!(
            "Fused {} candidates, {} kept for rerank",
            fused_count,
            batch.len()
        );

        let mut output = FusionOutput::default();
        if batch.is_empty() {
            return Ok(output);
        }

        let rerank_scores = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RagError::Cancelled),
            scores = self.rerank_batch(query, &batch, graph) => scores,
        };

        let rerank_scores = match rerank_scores {
            Ok(scores) => Some(scores),
            Err(e) => {
                tracing::warn!("Rerank degraded: {}", e);
                output.rerank_degraded = true;
                output.warnings.push(format!("rerank degraded: {}", e));
                None
            }
        };

        output.results = self.blend(batch, rerank_scores.as_deref());
        Ok(output)
    }

    /// 배치 한 번 호출 (타임아웃 포함)
    async fn rerank_batch(
        &self,
        query: &str,
        batch: &[FusedCandidate],
        graph: &KnowledgeGraph,
    ) -> RagResult<Vec<f32>> {
        let texts: Vec<String> = batch
            .iter()
            .map(|c| {
                graph
                    .chunk(&c.chunk_id)
                    .map(|chunk| chunk.text.clone())
                    .unwrap_or_default()
            })
            .collect();

        let timeout = self.config.rerank_timeout();
        let scores = tokio::time::timeout(timeout, self.reranker.rerank(query, &texts))
            .await
            .map_err(|_| {
                RagError::backend(
                    Backend::Reranker,
                    format!("timed out after {}ms", timeout.as_millis()),
                )
            })?
            .map_err(|e| RagError::backend(Backend::Reranker, e))?;

        if scores.len() != texts.len() {
            return Err(RagError::backend(
                Backend::Reranker,
                format!("expected {} scores, got {}", texts.len(), scores.len()),
            ));
        }
        Ok(scores)
    }

    /// 점수 블렌딩 후 final 내림차순 상위 K개
    fn blend(&self, batch: Vec<FusedCandidate>, rerank: Option<&[f32]>) -> Vec<ScoredCandidate> {
        let max_rrf = batch.iter().map(|c| c.rrf).fold(0.0_f32, f32::max);
        let normalize = |rrf: f32| match self.config.normalization {
            ScoreNormalization::MaxScaled if max_rrf > 0.0 => rrf / max_rrf,
            _ => rrf,
        };

        let mut results: Vec<ScoredCandidate> = batch
            .into_iter()
            .enumerate()
            .map(|(i, c)| {
                let norm = normalize(c.rrf);
                let rerank_score = rerank.map(|scores| scores[i]);
                let final_score = match rerank_score {
                    Some(r) => self.config.rrf_blend * norm + self.config.rerank_blend * r,
                    None => norm,
                };
                ScoredCandidate {
                    chunk_id: c.chunk_id,
                    lexical_rank: c.lexical_rank,
                    vector_rank: c.vector_rank,
                    graph_rank: c.graph_rank,
                    rrf: c.rrf,
                    rerank: rerank_score,
                    final_score,
                }
            })
            .collect();

        // 안정 정렬: 동점이면 융합 순서 유지
        results.sort_by(|a, b| b.final_score.total_cmp(&a.final_score));
        results.truncate(self.config.final_top_k);
        results
    }
}

// ============================================================================
// Tests
// ============================================================================
