//! 후보 생성기 - lexical / vector / graph 세 전략을 동시에 실행
//!
//! 각 생성기는 독립적인 타임아웃 아래에서 실행되고, 실패하면 빈 목록과
//! 경고 하나로 강등됩니다. 취소 토큰이 발동하면 진행 중인 future를
//! 모두 버리고 `Cancelled`를 반환합니다.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::RetrievalConfig;
use crate::error::{Backend, RagError, RagResult};
use crate::graph::{EntityKey, KnowledgeGraph};
use crate::llm::EmbeddingProvider;

use super::candidate::{rank_hits, Candidate, CandidateLists};
use super::filter::SearchFilter;
use super::index::{LexicalIndex, VectorIndex};

// ============================================================================
// Types
// ============================================================================

/// 후보 생성 결과
#[derive(Debug, Clone, Default)]
pub struct GeneratorOutput {
    pub lists: CandidateLists,
    pub warnings: Vec<String>,
}

/// 세 후보 생성기 묶음
pub struct CandidateGenerators {
    lexical: Arc<dyn LexicalIndex>,
    vector: Arc<dyn VectorIndex>,
    encoder: Arc<dyn EmbeddingProvider>,
    config: RetrievalConfig,
}

// ============================================================================
// Impl
// ============================================================================

impl CandidateGenerators {
    pub fn new(
        lexical: Arc<dyn LexicalIndex>,
        vector: Arc<dyn VectorIndex>,
        encoder: Arc<dyn EmbeddingProvider>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            lexical,
            vector,
            encoder,
            config,
        }
    }

    /// 세 전략 동시 실행
    pub async fn generate(
        &self,
        query: &str,
        entities: &BTreeSet<EntityKey>,
        filter: &SearchFilter,
        graph: &KnowledgeGraph,
        cancel: &CancellationToken,
    ) -> RagResult<GeneratorOutput> {
        let timeout = self.config.generator_timeout();

        let all = async {
            tokio::join!(
                guarded(Backend::LexicalIndex, timeout, self.lexical_candidates(query, filter)),
                guarded(Backend::VectorIndex, timeout, self.vector_candidates(query, filter)),
                async { Ok::<_, RagError>(graph_candidates(graph, entities, filter, self.config.graph_k)) },
            )
        };

        let (lexical, vector, graph_list) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RagError::Cancelled),
            lists = all => lists,
        };

        let mut output = GeneratorOutput::default();
        output.lists.lexical = degrade(lexical, &mut output.warnings);
        output.lists.vector = degrade(vector, &mut output.warnings);
        output.lists.graph = degrade(graph_list, &mut output.warnings);

        tracing::debug!(
            "Candidates: {} total (lexical={}, vector={}, graph={})",
            output.lists.total(),
            output.lists.lexical.len(),
            output.lists.vector.len(),
            output.lists.graph.len()
        );
        Ok(output)
    }

    async fn lexical_candidates(
        &self,
        query: &str,
        filter: &SearchFilter,
    ) -> RagResult<Vec<Candidate>> {
        let k = self.config.lexical_k;
        let hits = self
            .lexical
            .search(query, filter, k)
            .await
            .map_err(|e| RagError::backend(Backend::LexicalIndex, e))?;
        Ok(rank_hits(hits, k))
    }

    async fn vector_candidates(
        &self,
        query: &str,
        filter: &SearchFilter,
    ) -> RagResult<Vec<Candidate>> {
        let k = self.config.vector_k;
        let embedding = self
            .encoder
            .embed(query)
            .await
            .map_err(|e| RagError::backend(Backend::Encoder, e))?;
        let hits = self
            .vector
            .search(&embedding, filter, k)
            .await
            .map_err(|e| RagError::backend(Backend::VectorIndex, e))?;
        Ok(rank_hits(hits, k))
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 생성기 하나를 타임아웃으로 감쌈
async fn guarded<F>(backend: Backend, timeout: Duration, fut: F) -> RagResult<Vec<Candidate>>
where
    F: Future<Output = RagResult<Vec<Candidate>>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(RagError::backend(
            backend,
            format!("timed out after {}ms", timeout.as_millis()),
        )),
    }
}

/// 실패한 생성기는 빈 목록 + 경고
fn degrade(result: RagResult<Vec<Candidate>>, warnings: &mut Vec<String>) -> Vec<Candidate> {
    match result {
        Ok(list) => list,
        Err(e) => {
            tracing::warn!("Candidate generator degraded: {}", e);
            warnings.push(e.to_string());
            Vec::new()
        }
    }
}

/// 그래프 후보: 추출된 엔티티를 언급하는 청크의 합집합
///
/// 엔티티 매칭 수 내림차순, 페이지 오름차순, 청크 id 순.
/// 필터는 K개로 자르기 전에 적용합니다.
pub fn graph_candidates(
    graph: &KnowledgeGraph,
    entities: &BTreeSet<EntityKey>,
    filter: &SearchFilter,
    k: usize,
) -> Vec<Candidate> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for key in entities {
        let Some(entity) = graph.entity(key) else {
            continue;
        };
        for chunk_id in &entity.chunks {
            *counts.entry(chunk_id.as_str()).or_default() += 1;
        }
    }

    let mut matched: Vec<_> = counts
        .into_iter()
        .filter_map(|(id, count)| graph.chunk(id).map(|chunk| (chunk, count)))
        .filter(|(chunk, _)| filter.matches(graph, chunk))
        .collect();

    matched.sort_by(|(a, a_count), (b, b_count)| {
        b_count
            .cmp(a_count)
            .then_with(|| a.page.cmp(&b.page))
            .then_with(|| a.id.cmp(&b.id))
    });

    matched
        .into_iter()
        .take(k)
        .enumerate()
        .map(|(i, (chunk, count))| Candidate {
            chunk_id: chunk.id.clone(),
            rank: i + 1,
            score: count as f32,
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixture_graph, MockEmbedder, MockLexical, MockVector};

    fn keys(keys: &[&str]) -> BTreeSet<EntityKey> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    fn ids(list: &[Candidate]) -> Vec<&str> {
        list.iter().map(|c| c.chunk_id.as_str()).collect()
    }

    fn generators(
        lexical: MockLexical,
        vector: MockVector,
        encoder: MockEmbedder,
    ) -> CandidateGenerators {
        let config = RetrievalConfig {
            generator_timeout_ms: 50,
            ..RetrievalConfig::default()
        };
        CandidateGenerators::new(Arc::new(lexical), Arc::new(vector), Arc::new(encoder), config)
    }

    #[test]
    fn test_graph_candidates_order() {
        let graph = fixture_graph();
        let list = graph_candidates(
            &graph,
            &keys(&["IEC-60815", "BS-EN-62217"]),
            &SearchFilter::default(),
            20,
        );
        // b-1은 두 엔티티 모두 언급, 나머지는 페이지 순
        assert_eq!(ids(&list), vec!["b-1", "a-1", "b-2"]);
        assert_eq!(list[0].rank, 1);
        assert_eq!(list[0].score, 2.0);
    }

    #[test]
    fn test_graph_candidates_filter_before_truncation() {
        let graph = fixture_graph();
        let filter = SearchFilter::parse("file=spec-b.pdf").unwrap();
        let list = graph_candidates(&graph, &keys(&["IEC-60815"]), &filter, 1);
        assert_eq!(ids(&list), vec!["b-1"]);

        let none = graph_candidates(&graph, &keys(&["UNKNOWN-1"]), &SearchFilter::default(), 20);
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_generate_runs_all_strategies() {
        let graph = fixture_graph();
        let gens = generators(
            MockLexical::returning(&["a-2", "a-1"]),
            MockVector::returning(&["b-1"]),
            MockEmbedder::ok(),
        );

        let output = gens
            .generate(
                "IEC 60815 creepage",
                &keys(&["IEC-60815"]),
                &SearchFilter::default(),
                &graph,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(ids(&output.lists.lexical), vec!["a-2", "a-1"]);
        assert_eq!(output.lists.lexical[1].rank, 2);
        assert_eq!(ids(&output.lists.vector), vec!["b-1"]);
        assert_eq!(ids(&output.lists.graph), vec!["a-1", "b-1"]);
        assert!(output.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_failed_and_slow_generators_degrade() {
        let graph = fixture_graph();
        let gens = generators(
            MockLexical::failing(),
            MockVector::slow(Duration::from_secs(5)),
            MockEmbedder::ok(),
        );

        let output = gens
            .generate(
                "IEC 60815",
                &keys(&["IEC-60815"]),
                &SearchFilter::default(),
                &graph,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(output.lists.lexical.is_empty());
        assert!(output.lists.vector.is_empty());
        assert_eq!(output.lists.graph.len(), 2);
        assert_eq!(output.warnings.len(), 2);
        assert!(output.warnings.iter().any(|w| w.contains("lexical index")));
        assert!(output.warnings.iter().any(|w| w.contains("timed out")));
    }

    #[tokio::test]
    async fn test_encoder_failure_degrades_vector_only() {
        let graph = fixture_graph();
        let gens = generators(
            MockLexical::returning(&["a-1"]),
            MockVector::returning(&["b-1"]),
            MockEmbedder::failing(),
        );

        let output = gens
            .generate("q", &BTreeSet::new(), &SearchFilter::default(), &graph, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(ids(&output.lists.lexical), vec!["a-1"]);
        assert!(output.lists.vector.is_empty());
        assert!(output.warnings[0].contains("encoder"));
    }

    #[tokio::test]
    async fn test_cancelled_generation() {
        let graph = fixture_graph();
        let gens = generators(
            MockLexical::returning(&["a-1"]),
            MockVector::slow(Duration::from_secs(5)),
            MockEmbedder::ok(),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = gens
            .generate("q", &BTreeSet::new(), &SearchFilter::default(), &graph, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Cancelled));
    }
}
