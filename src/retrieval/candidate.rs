//! 후보 타입 - 각 검색 전략이 만든 순위 목록

use std::fmt;

use serde::Serialize;

use crate::graph::ChunkId;

use super::index::ScoredChunk;

/// 후보 생성 전략
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    /// BM25 키워드 검색
    Lexical,
    /// 임베딩 벡터 검색
    Vector,
    /// 엔티티 그래프
    Graph,
}

impl CandidateSource {
    pub const ALL: [CandidateSource; 3] = [
        CandidateSource::Lexical,
        CandidateSource::Vector,
        CandidateSource::Graph,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateSource::Lexical => "lexical",
            CandidateSource::Vector => "vector",
            CandidateSource::Graph => "graph",
        }
    }
}

impl fmt::Display for CandidateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 순위가 매겨진 후보
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub chunk_id: ChunkId,
    /// 1부터 시작
    pub rank: usize,
    /// 백엔드 원시 점수
    pub score: f32,
}

/// 세 전략의 후보 목록
#[derive(Debug, Clone, Default)]
pub struct CandidateLists {
    pub lexical: Vec<Candidate>,
    pub vector: Vec<Candidate>,
    pub graph: Vec<Candidate>,
}

impl CandidateLists {
    pub fn get(&self, source: CandidateSource) -> &[Candidate] {
        match source {
            CandidateSource::Lexical => &self.lexical,
            CandidateSource::Vector => &self.vector,
            CandidateSource::Graph => &self.graph,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lexical.is_empty() && self.vector.is_empty() && self.graph.is_empty()
    }

    pub fn total(&self) -> usize {
        self.lexical.len() + self.vector.len() + self.graph.len()
    }
}

/// 점수 순 결과에 1-based 순위 부여 (K개로 자름)
pub fn rank_hits(hits: Vec<ScoredChunk>, k: usize) -> Vec<Candidate> {
    hits.into_iter()
        .take(k)
        .enumerate()
        .map(|(i, hit)| Candidate {
            chunk_id: hit.chunk_id,
            rank: i + 1,
            score: hit.score,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_hits_is_one_based_and_truncated() {
        let hits = (0..5)
            .map(|i| ScoredChunk {
                chunk_id: format!("c{}", i),
                score: 10.0 - i as f32,
            })
            .collect();

        let ranked = rank_hits(hits, 3);
        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[0].chunk_id, "c0");
        assert_eq!(ranked[2].rank, 3);
    }
}
