//! 테스트 픽스처 - 작은 2문서 코퍼스와 협력자 목(mock)

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::graph::{ChunkRecord, ExtractionArtifact, GraphBuilder, GraphData, KnowledgeGraph};
use crate::llm::{AnswerGenerator, EmbeddingProvider, Reranker, Summarizer};
use crate::memory::Exchange;
use crate::retrieval::{LexicalIndex, ScoredChunk, SearchFilter, VectorIndex};

// ============================================================================
// Fixture Corpus
// ============================================================================

fn record(
    id: &str,
    file: &str,
    page: u32,
    sections: &[&str],
    text: &str,
    table_title: Option<&str>,
) -> ChunkRecord {
    ChunkRecord {
        chunk_id: id.to_string(),
        file_name: file.to_string(),
        page_number: page,
        content_type: None,
        has_table: table_title.is_some(),
        chunk_text: text.to_string(),
        parent_sections: sections.iter().map(|s| s.to_string()).collect(),
        table_title: table_title.map(str::to_string),
        table_data: None,
        embedding: None,
    }
}

/// spec-a.pdf (p1-p3, 섹션 4 / 4.2 / 5) + spec-b.pdf (p4-p5, 섹션 2)
pub fn fixture_artifact() -> ExtractionArtifact {
    ExtractionArtifact {
        corpus_version: Some("fixture-v1".to_string()),
        chunks: vec![
            record(
                "a-1",
                "spec-a.pdf",
                1,
                &["4"],
                "Insulators shall comply with IEC 60815 for pollution classes.",
                None,
            ),
            record(
                "a-2",
                "spec-a.pdf",
                2,
                &["4", "4.2"],
                "Creepage requirements are listed in Table 3 - Requirements for each class.",
                None,
            ),
            ChunkRecord {
                table_data: Some(vec![
                    vec!["Class".to_string(), "Creepage".to_string()],
                    vec!["A".to_string(), "16 mm/kV".to_string()],
                ]),
                ..record(
                    "a-2-table",
                    "spec-a.pdf",
                    2,
                    &["4", "4.2"],
                    "| Class | Creepage |\n| A | 16 mm/kV |",
                    Some("Table 3 – Requirements"),
                )
            },
            record(
                "a-3",
                "spec-a.pdf",
                3,
                &["5"],
                "Site works follow HSE guidance and the CDM regulations.",
                None,
            ),
            record(
                "b-1",
                "spec-b.pdf",
                4,
                &["2"],
                "Composite insulators tested to IEC 60815 and BS EN 62217.",
                None,
            ),
            record(
                "b-2",
                "spec-b.pdf",
                5,
                &["2"],
                "Routine tests per BS EN 62217.",
                None,
            ),
        ],
    }
}

pub fn fixture_graph() -> KnowledgeGraph {
    GraphBuilder::new(fixture_artifact())
        .build()
        .expect("fixture graph builds")
}

pub fn fixture_data() -> GraphData {
    fixture_graph().to_data()
}

// ============================================================================
// Mock Collaborators
// ============================================================================

/// 목 동작
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    Ok,
    Fail,
    Slow(Duration),
}

impl Behavior {
    async fn run(self, what: &str) -> Result<()> {
        match self {
            Behavior::Ok => Ok(()),
            Behavior::Fail => anyhow::bail!("{} offline", what),
            Behavior::Slow(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }
}

fn scored(ids: &[String], limit: usize) -> Vec<ScoredChunk> {
    ids.iter()
        .take(limit)
        .enumerate()
        .map(|(i, id)| ScoredChunk {
            chunk_id: id.clone(),
            score: 1.0 / (i + 1) as f32,
        })
        .collect()
}

/// 고정 결과를 돌려주는 키워드 인덱스
pub struct MockLexical {
    ids: Vec<String>,
    behavior: Behavior,
}

impl MockLexical {
    pub fn returning(ids: &[&str]) -> Self {
        Self {
            ids: ids.iter().map(|s| s.to_string()).collect(),
            behavior: Behavior::Ok,
        }
    }

    pub fn failing() -> Self {
        Self {
            ids: vec![],
            behavior: Behavior::Fail,
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            ids: vec![],
            behavior: Behavior::Slow(delay),
        }
    }
}

#[async_trait]
impl LexicalIndex for MockLexical {
    async fn search(&self, _query: &str, _filter: &SearchFilter, limit: usize) -> Result<Vec<ScoredChunk>> {
        self.behavior.run("lexical").await?;
        Ok(scored(&self.ids, limit))
    }

    fn name(&self) -> &str {
        "mock-lexical"
    }
}

/// 고정 결과를 돌려주는 벡터 인덱스
pub struct MockVector {
    ids: Vec<String>,
    behavior: Behavior,
}

impl MockVector {
    pub fn returning(ids: &[&str]) -> Self {
        Self {
            ids: ids.iter().map(|s| s.to_string()).collect(),
            behavior: Behavior::Ok,
        }
    }

    pub fn failing() -> Self {
        Self {
            ids: vec![],
            behavior: Behavior::Fail,
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            ids: vec![],
            behavior: Behavior::Slow(delay),
        }
    }
}

#[async_trait]
impl VectorIndex for MockVector {
    async fn search(&self, _embedding: &[f32], _filter: &SearchFilter, limit: usize) -> Result<Vec<ScoredChunk>> {
        self.behavior.run("vector").await?;
        Ok(scored(&self.ids, limit))
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.ids.len())
    }
}

/// 4차원 고정 임베딩
pub struct MockEmbedder {
    behavior: Behavior,
}

impl MockEmbedder {
    pub fn ok() -> Self {
        Self {
            behavior: Behavior::Ok,
        }
    }

    pub fn failing() -> Self {
        Self {
            behavior: Behavior::Fail,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        self.behavior.run("embedder").await?;
        Ok(vec![0.5; 4])
    }

    fn dimension(&self) -> usize {
        4
    }

    fn name(&self) -> &str {
        "mock-embedder"
    }
}

/// 키워드 포함 여부로 점수를 매기는 리랭커
pub struct MockReranker {
    keyword: Option<(String, f32)>,
    base: f32,
    behavior: Behavior,
    calls: Arc<AtomicUsize>,
}

impl MockReranker {
    fn with(keyword: Option<(String, f32)>, base: f32, behavior: Behavior) -> Self {
        Self {
            keyword,
            base,
            behavior,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// 키워드를 포함한 텍스트는 `score`, 나머지는 0
    pub fn keyword(keyword: &str, score: f32) -> Self {
        Self::with(Some((keyword.to_string(), score)), 0.0, Behavior::Ok)
    }

    pub fn constant(score: f32) -> Self {
        Self::with(None, score, Behavior::Ok)
    }

    pub fn failing() -> Self {
        Self::with(None, 0.0, Behavior::Fail)
    }

    pub fn slow(delay: Duration) -> Self {
        Self::with(None, 0.0, Behavior::Slow(delay))
    }

    /// 호출 횟수 카운터
    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl Reranker for MockReranker {
    async fn rerank(&self, _query: &str, texts: &[String]) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.behavior.run("reranker").await?;
        Ok(texts
            .iter()
            .map(|text| match &self.keyword {
                Some((keyword, score)) if text.contains(keyword.as_str()) => *score,
                _ => self.base,
            })
            .collect())
    }

    fn name(&self) -> &str {
        "mock-reranker"
    }
}

/// 고정 답변 생성기 (받은 컨텍스트 기록)
pub struct MockGenerator {
    answer: String,
    behavior: Behavior,
    contexts: Arc<Mutex<Vec<String>>>,
}

impl MockGenerator {
    pub fn answering(answer: &str) -> Self {
        Self {
            answer: answer.to_string(),
            behavior: Behavior::Ok,
            contexts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing() -> Self {
        Self {
            behavior: Behavior::Fail,
            ..Self::answering("")
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            behavior: Behavior::Slow(delay),
            ..Self::answering("late answer")
        }
    }

    /// 지금까지 받은 컨텍스트
    pub fn contexts(&self) -> Arc<Mutex<Vec<String>>> {
        self.contexts.clone()
    }
}

#[async_trait]
impl AnswerGenerator for MockGenerator {
    async fn generate(&self, _question: &str, context: &str) -> Result<String> {
        self.contexts
            .lock()
            .expect("contexts lock")
            .push(context.to_string());
        self.behavior.run("generator").await?;
        Ok(self.answer.clone())
    }
}

/// "summary of q1, q2" 형태로 접는 요약기
pub struct MockSummarizer {
    behavior: Behavior,
}

impl MockSummarizer {
    pub fn ok() -> Self {
        Self {
            behavior: Behavior::Ok,
        }
    }

    pub fn failing() -> Self {
        Self {
            behavior: Behavior::Fail,
        }
    }
}

#[async_trait]
impl Summarizer for MockSummarizer {
    async fn summarize(&self, previous: Option<&str>, exchanges: &[Exchange]) -> Result<String> {
        self.behavior.run("summarizer").await?;
        let questions = exchanges
            .iter()
            .map(|e| e.question.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        Ok(match previous {
            Some(previous) => format!("summary of [{}] + {}", previous, questions),
            None => format!("summary of {}", questions),
        })
    }
}
