//! 컨텍스트 빌더 - 리랭크 결과에서 생성용 컨텍스트 조립
//!
//! 1. 점수 필터 (top 대비 비율 미만 제거)
//! 2. 같은 문서 ±1 페이지 청크를 supporting으로 추가
//! 3. 빌드 때 계산한 테이블 링크를 따라가고, 남은 "Table N - 제목" 참조를 테이블 청크에 매칭
//! 4. 문자 수 한도까지 패킹

pub mod packer;
pub mod tables;

use std::collections::{BTreeSet, HashSet};

use serde::Serialize;

use crate::config::RetrievalConfig;
use crate::fusion::ScoredCandidate;
use crate::graph::{Chunk, ChunkId, KnowledgeGraph};
use crate::retrieval::SearchFilter;

pub use packer::{block_header, pack, PackedBlock, PackedContext};
pub use tables::{best_table_match, find_table_titles, TableTitleRef};

// ============================================================================
// Types
// ============================================================================

/// 컨텍스트 안에서의 역할 (정렬 순서 = 동점 우선순위)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextRole {
    /// 검색 결과
    Primary,
    /// 인접 페이지
    Supporting,
    /// 테이블 제목 참조로 연결된 테이블
    LinkedTable,
}

/// 패킹 전 컨텍스트 항목
#[derive(Debug, Clone, PartialEq)]
pub struct ContextItem {
    pub chunk_id: ChunkId,
    pub role: ContextRole,
    /// 패킹 순서용 점수 (supporting / table은 끌어온 청크의 점수를 물려받음)
    pub score: f32,
}

/// 컨텍스트 조립 결과
#[derive(Debug, Clone, Default)]
pub struct ContextOutput {
    pub packed: PackedContext,
    pub warnings: Vec<String>,
}

/// 컨텍스트 빌더
pub struct ContextBuilder {
    config: RetrievalConfig,
}

// ============================================================================
// Impl
// ============================================================================

impl ContextBuilder {
    pub fn new(config: RetrievalConfig) -> Self {
        Self { config }
    }

    pub fn build(
        &self,
        query: &str,
        results: &[ScoredCandidate],
        graph: &KnowledgeGraph,
        filter: &SearchFilter,
    ) -> ContextOutput {
        let mut output = ContextOutput::default();

        let retained = filter_by_score(results, self.config.min_score_ratio);
        let mut items: Vec<ContextItem> = retained
            .iter()
            .filter(|r| graph.chunk(&r.chunk_id).is_some())
            .map(|r| ContextItem {
                chunk_id: r.chunk_id.clone(),
                role: ContextRole::Primary,
                score: r.final_score,
            })
            .collect();

        expand_adjacent(&mut items, graph, filter);
        let table_warnings = link_tables(query, &mut items, graph, filter);
        output.warnings.extend(table_warnings);

        output.packed = pack(&items, graph, self.config.max_context_chars);

        tracing::debug!(
            "Context: {} retained, {} items, {} packed ({} chars)",
            retained.len(),
            items.len(),
            output.packed.blocks.len(),
            output.packed.char_count
        );
        output
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// `final < ratio * top` 제거 (top ≤ 0이면 전부 유지)
pub fn filter_by_score(results: &[ScoredCandidate], ratio: f32) -> Vec<&ScoredCandidate> {
    let top = results
        .iter()
        .map(|r| r.final_score)
        .fold(f32::NEG_INFINITY, f32::max);

    if results.is_empty() || top <= 0.0 {
        return results.iter().collect();
    }

    let threshold = top * ratio;
    results.iter().filter(|r| r.final_score >= threshold).collect()
}

/// 인접 페이지 청크를 supporting으로 추가
fn expand_adjacent(items: &mut Vec<ContextItem>, graph: &KnowledgeGraph, filter: &SearchFilter) {
    let mut included: HashSet<ChunkId> = items.iter().map(|i| i.chunk_id.clone()).collect();
    let primaries: Vec<(ChunkId, f32)> = items
        .iter()
        .map(|i| (i.chunk_id.clone(), i.score))
        .collect();

    for (chunk_id, score) in primaries {
        for adjacent in graph.adjacent_chunks(&chunk_id) {
            let Some(chunk) = graph.chunk(&adjacent) else {
                continue;
            };
            if !filter.matches(graph, chunk) || !included.insert(adjacent.clone()) {
                continue;
            }
            items.push(ContextItem {
                chunk_id: adjacent,
                role: ContextRole::Supporting,
                score,
            });
        }
    }
}

/// 테이블 제목 참조 연결
///
/// 그래프의 `TableLink` 엣지를 먼저 따라가고, 그다음 제목 매칭을 합니다.
/// 제목 매칭 범위: 컨텍스트에 이미 들어온 문서들의 테이블 중 아직 포함되지 않은 것.
/// 이미 포함된 테이블이 참조를 만족하면 경고하지 않습니다.
fn link_tables(
    query: &str,
    items: &mut Vec<ContextItem>,
    graph: &KnowledgeGraph,
    filter: &SearchFilter,
) -> Vec<String> {
    let mut warnings = Vec::new();
    let top_score = items.iter().map(|i| i.score).fold(0.0_f32, f32::max);

    let mut included: HashSet<ChunkId> = items.iter().map(|i| i.chunk_id.clone()).collect();

    // 빌드 때 계산된 링크
    let linked: Vec<(ChunkId, f32)> = items
        .iter()
        .flat_map(|item| {
            graph
                .table_links(&item.chunk_id)
                .into_iter()
                .map(move |table| (table, item.score))
        })
        .collect();
    for (table_id, score) in linked {
        let Some(table) = graph.chunk(&table_id) else {
            continue;
        };
        if !filter.matches(graph, table) || !included.insert(table_id.clone()) {
            continue;
        }
        tracing::debug!("Linked {} via precomputed table link", table_id);
        items.push(ContextItem {
            chunk_id: table_id,
            role: ContextRole::LinkedTable,
            score,
        });
    }

    // (참조, 끌어온 점수): 질의 참조는 top 점수를 받음
    let mut references: Vec<(TableTitleRef, f32)> = find_table_titles(query)
        .into_iter()
        .map(|r| (r, top_score))
        .collect();
    for item in items.iter() {
        let Some(chunk) = graph.chunk(&item.chunk_id) else {
            continue;
        };
        if chunk.is_table() {
            continue;
        }
        references.extend(find_table_titles(&chunk.text).into_iter().map(|r| (r, item.score)));
    }

    let documents: BTreeSet<&str> = items
        .iter()
        .filter_map(|i| graph.chunk(&i.chunk_id))
        .map(|c| c.document.as_str())
        .collect();
    let in_scope: Vec<&Chunk> = documents
        .iter()
        .flat_map(|doc| graph.tables_in_document(doc))
        .filter(|t| filter.matches(graph, t))
        .collect();

    let mut seen: BTreeSet<TableTitleRef> = BTreeSet::new();

    for (reference, score) in references {
        if !seen.insert(reference.clone()) {
            continue;
        }

        let candidates = in_scope.iter().copied().filter(|t| !included.contains(&t.id));
        match best_table_match(&reference, candidates) {
            Some((table, match_score)) => {
                tracing::debug!(
                    "Linked Table {} \"{}\" -> {} (score {})",
                    reference.number,
                    reference.title,
                    table.id,
                    match_score
                );
                included.insert(table.id.clone());
                items.push(ContextItem {
                    chunk_id: table.id.clone(),
                    role: ContextRole::LinkedTable,
                    score,
                });
            }
            None => {
                let already = in_scope.iter().copied().filter(|t| included.contains(&t.id));
                if best_table_match(&reference, already).is_none() {
                    let warning = format!(
                        "no table match found for Table {} - {}",
                        reference.number, reference.title
                    );
                    tracing::warn!("{}", warning);
                    warnings.push(warning);
                }
            }
        }
    }

    warnings
}

// ============================================================================
// Tests
// ============================================================================
