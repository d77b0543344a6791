//! RAG 파이프라인 - 검색, 컨텍스트 조립, 답변 생성
//!
//! 한 턴은 `SEARCH -> BUILD_CONTEXT -> GENERATE -> DONE` 순서로 진행됩니다.
//! 백엔드 장애는 경고로 흡수되고, 답변 생성 실패만 턴 전체를 실패시킵니다.

pub mod confidence;
pub mod state;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::RagConfig;
use crate::context::{ContextBuilder, ContextRole};
use crate::error::{Backend, RagError, RagResult};
use crate::fusion::{FusionOrchestrator, ScoredCandidate};
use crate::graph::{ContentType, EntityKey, GraphHandle, KnowledgeGraph};
use crate::llm::{AnswerGenerator, EmbeddingProvider, Reranker, Summarizer};
use crate::memory::{preview, ConversationMemory, Exchange, SessionStore};
use crate::retrieval::{CandidateGenerators, LexicalIndex, SearchFilter, VectorIndex};

pub use confidence::Confidence;
pub use state::{AnswerRecord, ContextRecord, QueryInput, SearchRecord, Stage};

/// 컨텍스트가 비었을 때의 고정 답변
pub const NO_CONTEXT_ANSWER: &str = "No relevant documents found.";

/// 출처 미리보기 길이 (문자)
const SOURCE_PREVIEW_CHARS: usize = 150;

// ============================================================================
// Types
// ============================================================================

/// 파이프라인 협력자 묶음
#[derive(Clone)]
pub struct PipelineBackends {
    pub lexical: Arc<dyn LexicalIndex>,
    pub vector: Arc<dyn VectorIndex>,
    pub encoder: Arc<dyn EmbeddingProvider>,
    pub reranker: Arc<dyn Reranker>,
    pub generator: Arc<dyn AnswerGenerator>,
    pub summarizer: Arc<dyn Summarizer>,
}

/// 인용 출처
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceRef {
    pub chunk_id: String,
    pub file: String,
    pub page: u32,
    pub score: f32,
    pub content_type: ContentType,
    pub section: Option<String>,
    pub role: ContextRole,
    pub preview: String,
}

/// 응답 메타데이터
#[derive(Debug, Clone, Serialize)]
pub struct ResponseMetadata {
    pub results: Vec<ScoredCandidate>,
    pub entities: BTreeSet<EntityKey>,
    pub rerank_degraded: bool,
    pub graph_generation: u64,
    pub corpus_version: String,
    pub elapsed_ms: u64,
}

/// 질의 응답
#[derive(Debug, Clone, Serialize)]
pub struct RagResponse {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub confidence: Confidence,
    pub warnings: Vec<String>,
    pub metadata: ResponseMetadata,
}

/// RAG 파이프라인
pub struct RagPipeline {
    graph: Arc<GraphHandle>,
    generators: CandidateGenerators,
    fusion: FusionOrchestrator,
    context: ContextBuilder,
    generator: Arc<dyn AnswerGenerator>,
    summarizer: Arc<dyn Summarizer>,
    sessions: SessionStore,
    config: RagConfig,
}

// ============================================================================
// Impl
// ============================================================================

impl RagPipeline {
    pub fn new(graph: Arc<GraphHandle>, backends: PipelineBackends, config: RagConfig) -> Self {
        let retrieval = config.retrieval.clone();
        Self {
            graph,
            generators: CandidateGenerators::new(
                backends.lexical,
                backends.vector,
                backends.encoder,
                retrieval.clone(),
            ),
            fusion: FusionOrchestrator::new(backends.reranker, retrieval.clone()),
            context: ContextBuilder::new(retrieval),
            generator: backends.generator,
            summarizer: backends.summarizer,
            sessions: SessionStore::new(config.memory.clone()),
            config,
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn graph(&self) -> &Arc<GraphHandle> {
        &self.graph
    }

    /// 질의 한 턴 실행
    ///
    /// `session_id`가 없으면 대화 메모리 없이 단발 질의로 처리합니다.
    /// 같은 세션의 턴은 직렬화됩니다.
    pub async fn query(
        &self,
        session_id: Option<&str>,
        question: &str,
        filter: SearchFilter,
        cancel: &CancellationToken,
    ) -> RagResult<RagResponse> {
        let started = Instant::now();
        filter.validate()?;
        if cancel.is_cancelled() {
            return Err(RagError::Cancelled);
        }

        let session = session_id.map(|id| self.sessions.get_or_create(id));
        let mut guard = match &session {
            Some(memory) => Some(tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RagError::Cancelled),
                guard = memory.lock() => guard,
            }),
            None => None,
        };
        let mut scratch = ConversationMemory::new(self.config.memory.clone());
        let memory: &mut ConversationMemory = match guard.as_mut() {
            Some(guard) => &mut **guard,
            None => &mut scratch,
        };

        let input = QueryInput {
            question: question.to_string(),
            session_id: session_id.map(str::to_string),
            filter,
        };

        let search = self.search(input, memory, cancel).await?;
        let context = self.build_context(search);
        let history = memory.get_recent_context(self.config.memory.recent_context);
        let mut answer = self.generate(context, &history, cancel).await?;

        if answer.generated && session.is_some() {
            let exchange = Exchange::new(
                answer.context.search.input.question.clone(),
                answer.answer.clone(),
                answer.context.search.entities.clone(),
                answer
                    .context
                    .context
                    .blocks
                    .iter()
                    .map(|b| b.chunk_id.clone())
                    .collect(),
            );
            let memory_warnings = memory.record(exchange, self.summarizer.as_ref()).await;
            answer.push_warnings(memory_warnings);
        }

        let response = finish(answer, started);
        tracing::info!(
            "Query done: confidence={}, sources={}, warnings={}, {}ms",
            response.confidence,
            response.sources.len(),
            response.warnings.len(),
            response.metadata.elapsed_ms
        );
        Ok(response)
    }

    /// SEARCH: 엔티티 추출, 후보 생성, 융합 + 리랭크
    async fn search(
        &self,
        input: QueryInput,
        memory: &ConversationMemory,
        cancel: &CancellationToken,
    ) -> RagResult<SearchRecord> {
        let (graph_generation, graph) = self.graph.current_with_generation();

        let entities = memory.resolve_entities(graph.extract_entities(&input.question));

        let candidates = self
            .generators
            .generate(&input.question, &entities, &input.filter, &graph, cancel)
            .await?;
        let fused = self
            .fusion
            .fuse_and_rerank(&input.question, &candidates.lists, &graph, &input.filter, cancel)
            .await?;

        let mut warnings = candidates.warnings;
        warnings.extend(fused.warnings);

        let top = fused.results.first().map(|r| r.final_score);
        let confidence = Confidence::from_top_score(top, &self.config.retrieval);

        tracing::info!(
            "{}: {} results, entities={:?}, degraded={}",
            SearchRecord::STAGE,
            fused.results.len(),
            entities,
            fused.rerank_degraded
        );

        Ok(SearchRecord {
            input,
            graph,
            graph_generation,
            entities,
            results: fused.results,
            rerank_degraded: fused.rerank_degraded,
            confidence,
            warnings,
        })
    }

    /// BUILD_CONTEXT: 점수 필터, 확장, 패킹
    fn build_context(&self, search: SearchRecord) -> ContextRecord {
        let output = self.context.build(
            &search.input.question,
            &search.results,
            &search.graph,
            &search.input.filter,
        );
        let record = ContextRecord::from_search(search, output.packed, output.warnings);

        tracing::info!(
            "{}: {} blocks, {} chars, {} skipped",
            ContextRecord::STAGE,
            record.context.blocks.len(),
            record.context.char_count,
            record.context.skipped
        );
        record
    }

    /// GENERATE: 컨텍스트가 비면 생성 생략
    async fn generate(
        &self,
        context: ContextRecord,
        history: &str,
        cancel: &CancellationToken,
    ) -> RagResult<AnswerRecord> {
        if context.context.is_empty() {
            tracing::info!("{}: no context, skipping generation", AnswerRecord::STAGE);
            return Ok(AnswerRecord::from_context(
                context,
                NO_CONTEXT_ANSWER.to_string(),
                false,
            ));
        }

        let prompt_context = with_history(
            history,
            &context.context.text,
            self.config.retrieval.max_context_chars,
        );
        let timeout = self.config.retrieval.generation_timeout();
        let call = tokio::time::timeout(
            timeout,
            self.generator
                .generate(&context.search.input.question, &prompt_context),
        );

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RagError::Cancelled),
            result = call => result,
        };

        let reason = match result {
            Ok(Ok(answer)) => {
                tracing::info!("{}: {} chars", AnswerRecord::STAGE, answer.chars().count());
                return Ok(AnswerRecord::from_context(context, answer, true));
            }
            Ok(Err(e)) => RagError::backend(Backend::Generator, format!("{:#}", e)).to_string(),
            Err(_) => RagError::backend(
                Backend::Generator,
                format!("timed out after {}ms", timeout.as_millis()),
            )
            .to_string(),
        };

        tracing::warn!("Generation failed: {}", reason);
        Err(RagError::GenerationFailed {
            reason,
            warnings: context.warnings,
        })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 대화 이력 머리말
const HISTORY_HEADER: &str = "Conversation so far:\n";

/// 대화 이력을 검색 컨텍스트 앞에 붙임
///
/// 이력은 `max_chars`에서 검색 컨텍스트를 뺀 나머지 안에서만 들어가고,
/// 넘치면 가장 최근 쪽 문자만 남깁니다.
fn with_history(history: &str, context: &str, max_chars: usize) -> String {
    let history = history.trim();
    if history.is_empty() {
        return context.to_string();
    }

    let overhead = HISTORY_HEADER.chars().count() + 2;
    let budget = max_chars.saturating_sub(context.chars().count() + overhead);
    if budget == 0 {
        tracing::debug!("No room for conversation history in prompt");
        return context.to_string();
    }

    let count = history.chars().count();
    let kept: String = if count > budget {
        history.chars().skip(count - budget).collect()
    } else {
        history.to_string()
    };
    format!("{}{}\n\n{}", HISTORY_HEADER, kept, context)
}

/// DONE: 응답 조립
fn finish(record: AnswerRecord, started: Instant) -> RagResponse {
    let search = &record.context.search;
    let sources = record
        .context
        .context
        .blocks
        .iter()
        .filter_map(|block| {
            let chunk = search.graph.chunk(&block.chunk_id)?;
            Some(SourceRef {
                chunk_id: block.chunk_id.clone(),
                file: source_file(&search.graph, &block.chunk_id),
                page: chunk.page,
                score: block.score,
                content_type: chunk.content_type,
                section: search.graph.heading_path(&block.chunk_id).map(str::to_string),
                role: block.role,
                preview: preview(&chunk.text, SOURCE_PREVIEW_CHARS),
            })
        })
        .collect();

    RagResponse {
        answer: record.answer,
        sources,
        confidence: record.confidence,
        warnings: record.warnings,
        metadata: ResponseMetadata {
            results: search.results.clone(),
            entities: search.entities.clone(),
            rerank_degraded: search.rerank_degraded,
            graph_generation: search.graph_generation,
            corpus_version: search.graph.corpus_version().to_string(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        },
    }
}

fn source_file(graph: &KnowledgeGraph, chunk_id: &str) -> String {
    match graph.source_name(chunk_id) {
        Some(name) => name.to_string(),
        None => graph
            .chunk(chunk_id)
            .map(|c| c.document.clone())
            .unwrap_or_default(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use crate::config::RetrievalConfig;
    use crate::testing::{
        fixture_graph, MockEmbedder, MockGenerator, MockLexical, MockReranker, MockSummarizer,
        MockVector,
    };

    fn backends(
        lexical: MockLexical,
        vector: MockVector,
        reranker: MockReranker,
        generator: MockGenerator,
    ) -> PipelineBackends {
        PipelineBackends {
            lexical: Arc::new(lexical),
            vector: Arc::new(vector),
            encoder: Arc::new(MockEmbedder::ok()),
            reranker: Arc::new(reranker),
            generator: Arc::new(generator),
            summarizer: Arc::new(MockSummarizer::ok()),
        }
    }

    fn pipeline_with(backends: PipelineBackends, config: RagConfig) -> RagPipeline {
        RagPipeline::new(Arc::new(GraphHandle::new(fixture_graph())), backends, config)
    }

    fn pipeline(backends: PipelineBackends) -> RagPipeline {
        pipeline_with(backends, RagConfig::default())
    }

    #[tokio::test]
    async fn test_query_end_to_end() {
        let generator = MockGenerator::answering("Use pollution class creepage.");
        let contexts = generator.contexts();
        let pipeline = pipeline(backends(
            MockLexical::returning(&["a-1", "b-1"]),
            MockVector::returning(&["a-1"]),
            MockReranker::constant(2.0),
            generator,
        ));

        let response = pipeline
            .query(
                None,
                "What does IEC 60815 require?",
                SearchFilter::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(response.answer, "Use pollution class creepage.");
        assert_eq!(response.confidence, Confidence::High);
        assert!(response.warnings.is_empty());
        assert!(!response.metadata.rerank_degraded);
        assert_eq!(response.metadata.graph_generation, 1);
        assert_eq!(response.metadata.corpus_version, "fixture-v1");
        assert!(response.metadata.entities.contains("IEC-60815"));

        assert_eq!(response.sources[0].chunk_id, "a-1");
        assert_eq!(response.sources[0].file, "spec-a.pdf");
        assert_eq!(response.sources[0].role, ContextRole::Primary);
        assert!(response.sources.iter().any(|s| s.chunk_id == "b-1"));

        let seen = contexts.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].starts_with("[spec-a.pdf | Page 1"));
    }

    #[tokio::test]
    async fn test_empty_context_skips_generation() {
        let generator = MockGenerator::answering("should not be called");
        let contexts = generator.contexts();
        let reranker = MockReranker::constant(2.0);
        let rerank_calls = reranker.calls();
        let pipeline = pipeline(backends(
            MockLexical::returning(&[]),
            MockVector::returning(&[]),
            reranker,
            generator,
        ));

        let response = pipeline
            .query(Some("s"), "hello there", SearchFilter::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(response.answer, NO_CONTEXT_ANSWER);
        assert_eq!(response.confidence, Confidence::None);
        assert!(response.sources.is_empty());
        assert!(contexts.lock().unwrap().is_empty());
        assert_eq!(rerank_calls.load(Ordering::SeqCst), 0);

        let memory = pipeline.sessions().get("s").unwrap();
        assert!(memory.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_rerank_failure_degrades_to_medium() {
        let pipeline = pipeline(backends(
            MockLexical::returning(&["a-1", "b-1"]),
            MockVector::returning(&["a-1"]),
            MockReranker::failing(),
            MockGenerator::answering("answer"),
        ));

        let response = pipeline
            .query(None, "IEC 60815", SearchFilter::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(response.metadata.rerank_degraded);
        assert_eq!(response.confidence, Confidence::Medium);
        assert!(response.warnings.iter().any(|w| w.starts_with("rerank degraded")));
        assert!(response.metadata.results.iter().all(|r| r.rerank.is_none()));
    }

    #[tokio::test]
    async fn test_backend_failures_become_warnings() {
        let pipeline = pipeline(backends(
            MockLexical::failing(),
            MockVector::returning(&["b-2"]),
            MockReranker::constant(0.5),
            MockGenerator::answering("answer"),
        ));

        let response = pipeline
            .query(None, "routine tests", SearchFilter::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(response.answer, "answer");
        assert!(response.warnings.iter().any(|w| w.contains("lexical index")));
        assert_eq!(response.sources[0].chunk_id, "b-2");
    }

    #[tokio::test]
    async fn test_generation_failure_leaves_memory_untouched() {
        let pipeline = pipeline(backends(
            MockLexical::returning(&["a-1"]),
            MockVector::failing(),
            MockReranker::constant(1.0),
            MockGenerator::failing(),
        ));

        let err = pipeline
            .query(Some("s"), "insulators", SearchFilter::default(), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            RagError::GenerationFailed { reason, warnings } => {
                assert!(reason.starts_with("generator unavailable:"));
                assert!(reason.contains("generator offline"));
                assert!(warnings.iter().any(|w| w.contains("vector index")));
            }
            other => panic!("unexpected error: {other}"),
        }

        let memory = pipeline.sessions().get("s").unwrap();
        assert!(memory.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_generation_timeout_fails_turn() {
        let config = RagConfig {
            retrieval: RetrievalConfig {
                generation_timeout_ms: 50,
                ..RetrievalConfig::default()
            },
            ..RagConfig::default()
        };
        let pipeline = pipeline_with(
            backends(
                MockLexical::returning(&["a-1"]),
                MockVector::returning(&[]),
                MockReranker::constant(1.0),
                MockGenerator::slow(Duration::from_secs(5)),
            ),
            config,
        );

        let err = pipeline
            .query(None, "insulators", SearchFilter::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::GenerationFailed { .. }));
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_invalid_filter_rejected_before_search() {
        let reranker = MockReranker::constant(1.0);
        let calls = reranker.calls();
        let pipeline = pipeline(backends(
            MockLexical::returning(&["a-1"]),
            MockVector::returning(&[]),
            reranker,
            MockGenerator::answering("answer"),
        ));
        let filter = SearchFilter {
            section: Some("4..2".to_string()),
            ..SearchFilter::default()
        };

        let err = pipeline
            .query(None, "insulators", filter, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::InvalidFilter(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_filter_restricts_sources() {
        let pipeline = pipeline(backends(
            MockLexical::returning(&["a-1", "b-1"]),
            MockVector::returning(&["a-2"]),
            MockReranker::constant(1.0),
            MockGenerator::answering("answer"),
        ));
        let filter = SearchFilter::parse("file=spec-b.pdf").unwrap();

        let response = pipeline
            .query(None, "IEC 60815", filter, &CancellationToken::new())
            .await
            .unwrap();

        assert!(!response.sources.is_empty());
        assert!(response.sources.iter().all(|s| s.file == "spec-b.pdf"));
    }

    #[tokio::test]
    async fn test_cancelled_query() {
        let pipeline = pipeline(backends(
            MockLexical::returning(&["a-1"]),
            MockVector::returning(&[]),
            MockReranker::constant(1.0),
            MockGenerator::answering("answer"),
        ));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = pipeline
            .query(Some("s"), "insulators", SearchFilter::default(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Cancelled));
    }

    #[tokio::test]
    async fn test_follow_up_carries_entities_and_history() {
        let generator = MockGenerator::answering("Class A needs 16 mm/kV.");
        let contexts = generator.contexts();
        let pipeline = pipeline(backends(
            MockLexical::returning(&[]),
            MockVector::returning(&[]),
            MockReranker::constant(2.0),
            generator,
        ));
        let cancel = CancellationToken::new();

        let first = pipeline
            .query(Some("s"), "IEC 60815 insulators", SearchFilter::default(), &cancel)
            .await
            .unwrap();
        assert!(first.metadata.entities.contains("IEC-60815"));

        let second = pipeline
            .query(Some("s"), "and the creepage values?", SearchFilter::default(), &cancel)
            .await
            .unwrap();
        assert_eq!(
            second.metadata.entities.iter().cloned().collect::<Vec<_>>(),
            vec!["IEC-60815".to_string()]
        );
        assert!(!second.sources.is_empty());

        let seen = contexts.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(!seen[0].contains("Conversation so far"));
        assert!(seen[1].starts_with("Conversation so far:\nUser: IEC 60815 insulators"));

        let memory = pipeline.sessions().get("s").unwrap();
        assert_eq!(memory.lock().await.unsummarized(), 2);
    }

    #[tokio::test]
    async fn test_graph_swap_visible_to_next_query() {
        let pipeline = pipeline(backends(
            MockLexical::returning(&["a-1"]),
            MockVector::returning(&[]),
            MockReranker::constant(1.0),
            MockGenerator::answering("answer"),
        ));
        assert_eq!(pipeline.graph().swap(fixture_graph()), 2);

        let response = pipeline
            .query(None, "insulators", SearchFilter::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.metadata.graph_generation, 2);
    }

    #[test]
    fn test_with_history() {
        assert_eq!(with_history("", "ctx", 1_000), "ctx");
        assert_eq!(
            with_history("User: q\nAssistant: a", "ctx", 1_000),
            "Conversation so far:\nUser: q\nAssistant: a\n\nctx"
        );
    }

    #[test]
    fn test_history_counts_against_context_limit() {
        let history = "User: first question\nAssistant: first answer";
        let context = "x".repeat(40);
        let limit = 80;

        let prompt = with_history(history, &context, limit);
        assert!(prompt.chars().count() <= limit);
        assert!(prompt.starts_with("Conversation so far:\n"));
        // 가장 최근 쪽이 남음
        assert!(prompt.contains("first answer"));
        assert!(prompt.ends_with(&context));

        // 여유가 없으면 이력 없이 컨텍스트만
        assert_eq!(with_history(history, &context, 40), context);
    }
}
