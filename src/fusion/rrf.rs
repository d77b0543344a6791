//! 가중 Reciprocal Rank Fusion
//!
//! `rrf(d) = Σ w(list) / (K + rank_list(d))`, 목록에 없으면 0.
//! 동점은 (1) 더 많은 목록에 등장, (2) 더 낮은 최소 순위, (3) chunk id 순으로 깹니다.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::Serialize;

use crate::config::RetrievalConfig;
use crate::graph::ChunkId;
use crate::retrieval::{CandidateLists, CandidateSource};

/// 융합된 후보 (목록별 순위 포함)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusedCandidate {
    pub chunk_id: ChunkId,
    pub lexical_rank: Option<usize>,
    pub vector_rank: Option<usize>,
    pub graph_rank: Option<usize>,
    pub rrf: f32,
}

impl FusedCandidate {
    fn new(chunk_id: ChunkId) -> Self {
        Self {
            chunk_id,
            lexical_rank: None,
            vector_rank: None,
            graph_rank: None,
            rrf: 0.0,
        }
    }

    pub fn rank(&self, source: CandidateSource) -> Option<usize> {
        match source {
            CandidateSource::Lexical => self.lexical_rank,
            CandidateSource::Vector => self.vector_rank,
            CandidateSource::Graph => self.graph_rank,
        }
    }

    fn rank_mut(&mut self, source: CandidateSource) -> &mut Option<usize> {
        match source {
            CandidateSource::Lexical => &mut self.lexical_rank,
            CandidateSource::Vector => &mut self.vector_rank,
            CandidateSource::Graph => &mut self.graph_rank,
        }
    }

    /// 등장한 목록 수
    pub fn list_count(&self) -> usize {
        CandidateSource::ALL
            .iter()
            .filter(|s| self.rank(**s).is_some())
            .count()
    }

    /// 가장 좋은(낮은) 순위
    pub fn min_rank(&self) -> usize {
        CandidateSource::ALL
            .iter()
            .filter_map(|s| self.rank(*s))
            .min()
            .unwrap_or(usize::MAX)
    }
}

/// 목록 가중치
pub fn source_weight(source: CandidateSource, config: &RetrievalConfig) -> f32 {
    match source {
        CandidateSource::Lexical => config.lexical_weight,
        CandidateSource::Vector => config.vector_weight,
        CandidateSource::Graph => config.graph_weight,
    }
}

/// 순위 하나의 RRF 기여분
pub fn rrf_contribution(weight: f32, rank: usize, k: f32) -> f32 {
    weight / (k + rank as f32)
}

/// 세 목록을 융합해 RRF 내림차순으로 반환
pub fn fuse(lists: &CandidateLists, config: &RetrievalConfig) -> Vec<FusedCandidate> {
    let mut fused: HashMap<&str, FusedCandidate> = HashMap::new();

    for source in CandidateSource::ALL {
        let weight = source_weight(source, config);
        for candidate in lists.get(source) {
            let entry = fused
                .entry(candidate.chunk_id.as_str())
                .or_insert_with(|| FusedCandidate::new(candidate.chunk_id.clone()));

            // 같은 목록에 중복으로 나오면 첫(가장 좋은) 순위만 사용
            let slot = entry.rank_mut(source);
            if slot.is_none() {
                *slot = Some(candidate.rank);
                entry.rrf += rrf_contribution(weight, candidate.rank, config.rrf_k);
            }
        }
    }

    let mut fused: Vec<FusedCandidate> = fused.into_values().collect();
    fused.sort_by(compare_fused);
    fused
}

/// RRF 내림차순 + 동점 규칙
pub fn compare_fused(a: &FusedCandidate, b: &FusedCandidate) -> Ordering {
    b.rrf
        .total_cmp(&a.rrf)
        .then_with(|| b.list_count().cmp(&a.list_count()))
        .then_with(|| a.min_rank().cmp(&b.min_rank()))
        .then_with(|| a.chunk_id.cmp(&b.chunk_id))
}

// ============================================================================
// Tests
// ============================================================================
