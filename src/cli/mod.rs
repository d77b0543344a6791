//! CLI 모듈
//!
//! tdrag CLI 명령어 정의 및 구현

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::config::RagConfig;
use crate::error::RagError;
use crate::graph::{load_snapshot, save_snapshot, ExtractionArtifact, GraphBuilder, GraphHandle};
use crate::llm::{has_api_key, GeminiClient, HttpReranker};
use crate::pipeline::{PipelineBackends, RagPipeline, RagResponse};
use crate::retrieval::{ChunkStore, IndexedChunk, LanceChunkIndex, SearchFilter, VectorIndex};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "tdrag")]
#[command(version, about = "기술 문서 그래프 보조 RAG 엔진", long_about = None)]
pub struct Cli {
    /// 설정 파일 경로 (기본: <data_dir>/config.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 추출 산출물에서 지식 그래프 스냅샷 생성
    BuildGraph {
        /// 추출 산출물 JSON
        #[arg(short, long)]
        input: PathBuf,

        /// 스냅샷 출력 경로 (기본: <data_dir>/graph.json)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// 추출 산출물을 키워드(FTS5) + 벡터(LanceDB) 인덱스에 적재
    Index {
        /// 추출 산출물 JSON
        #[arg(short, long)]
        input: PathBuf,
    },

    /// 단발 질의
    Query {
        /// 질문
        question: String,

        /// 검색 필터 (예: file=spec.pdf,type=table,section=4.2)
        #[arg(short, long)]
        filter: Option<String>,

        /// 응답을 JSON으로 출력
        #[arg(long)]
        json: bool,
    },

    /// 대화형 세션 (대화 메모리 사용)
    Chat {
        /// 검색 필터
        #[arg(short, long)]
        filter: Option<String>,
    },

    /// 그래프 통계
    Stats,

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => RagConfig::load(path)?,
        None => RagConfig::load_default()?,
    };

    match cli.command {
        Commands::BuildGraph { input, output } => cmd_build_graph(&config, &input, output),
        Commands::Index { input } => cmd_index(&config, &input).await,
        Commands::Query {
            question,
            filter,
            json,
        } => cmd_query(&config, &question, filter.as_deref(), json).await,
        Commands::Chat { filter } => cmd_chat(&config, filter.as_deref()).await,
        Commands::Stats => cmd_stats(&config),
        Commands::Status => cmd_status(&config).await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 그래프 생성 명령어 (build-graph)
fn cmd_build_graph(config: &RagConfig, input: &Path, output: Option<PathBuf>) -> Result<()> {
    println!("[*] 추출 산출물 읽는 중: {}", input.display());

    let artifact = ExtractionArtifact::from_path(input)?;
    let graph = GraphBuilder::new(artifact)
        .build()
        .context("그래프 생성 실패")?;

    let output = output.unwrap_or_else(|| config.graph_path());
    save_snapshot(&graph, &output).context("스냅샷 저장 실패")?;

    let stats = graph.stats();
    println!("[OK] 그래프 스냅샷 저장: {}", output.display());
    println!("     코퍼스 버전: {}", graph.corpus_version());
    for (kind, count) in &stats.node_counts {
        println!("     {:<10} {}", kind, count);
    }
    println!("     엣지: {}", stats.edge_count);

    Ok(())
}

/// 인덱스 적재 명령어 (index)
async fn cmd_index(config: &RagConfig, input: &Path) -> Result<()> {
    println!("[*] 추출 산출물 읽는 중: {}", input.display());

    let artifact = ExtractionArtifact::from_path(input)?;
    let graph = GraphBuilder::new(artifact)
        .build()
        .context("그래프 생성 실패")?;
    let chunks: Vec<IndexedChunk> = graph
        .chunks()
        .map(|chunk| IndexedChunk::from_graph(&graph, chunk))
        .collect();

    let store = ChunkStore::open(&config.chunk_db_path()).context("ChunkStore 열기 실패")?;
    let lexical = store
        .replace_all(&chunks, graph.corpus_version())
        .context("키워드 인덱스 적재 실패")?;
    println!("[OK] 키워드 인덱스: {} 청크", lexical);

    let vectors = open_vectors(config).await?;
    let embedded = vectors
        .replace_all(&chunks)
        .await
        .context("벡터 인덱스 적재 실패")?;
    println!("[OK] 벡터 인덱스: {} 청크", embedded);

    if embedded < chunks.len() {
        println!(
            "[!] 임베딩이 없거나 차원이 맞지 않는 청크 {} 개는 벡터 인덱스에서 제외되었습니다",
            chunks.len() - embedded
        );
    }

    Ok(())
}

/// 질의 명령어 (query)
async fn cmd_query(config: &RagConfig, question: &str, filter: Option<&str>, json: bool) -> Result<()> {
    let filter = parse_filter(filter)?;
    let pipeline = open_pipeline(config).await?;

    if !json {
        println!("[*] 질의 중: \"{}\"", question);
    }

    let cancel = cancel_on_ctrl_c();
    let response = pipeline.query(None, question, filter, &cancel).await;
    let response = report_failure(response)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_response(&response);
    }
    Ok(())
}

/// 대화 명령어 (chat)
async fn cmd_chat(config: &RagConfig, filter: Option<&str>) -> Result<()> {
    let filter = parse_filter(filter)?;
    let pipeline = open_pipeline(config).await?;
    let session = pipeline.sessions().create_session();

    println!("[*] 대화 세션 시작 ({})", session);
    println!("    /clear: 대화 기록 초기화, /exit: 종료");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        match question {
            "" => continue,
            "/exit" | "/quit" => break,
            "/clear" => {
                if let Some(memory) = pipeline.sessions().get(&session) {
                    memory.lock().await.clear();
                }
                println!("[OK] 대화 기록을 지웠습니다");
                continue;
            }
            _ => {}
        }

        let cancel = cancel_on_ctrl_c();
        match pipeline
            .query(Some(&session), question, filter.clone(), &cancel)
            .await
        {
            Ok(response) => print_response(&response),
            Err(RagError::Cancelled) => println!("[!] 취소되었습니다"),
            Err(e) => println!("[!] {}", e),
        }
        cancel.cancel();
        println!();
    }

    pipeline.sessions().end_session(&session);
    Ok(())
}

/// 그래프 통계 명령어 (stats)
fn cmd_stats(config: &RagConfig) -> Result<()> {
    let path = config.graph_path();
    let graph = load_snapshot(&path)
        .with_context(|| format!("그래프 스냅샷 로드 실패: {}", path.display()))?;
    let stats = graph.stats();

    println!("[OK] 그래프: {}", path.display());
    println!("     코퍼스 버전: {}", graph.corpus_version());
    println!();
    for (kind, count) in &stats.node_counts {
        println!("  {:<10} {}", kind, count);
    }
    println!("  {:<10} {}", "entities", stats.entity_count);
    println!("  {:<10} {}", "sections", stats.section_count);
    println!("  {:<10} {}", "edges", stats.edge_count);

    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status(config: &RagConfig) -> Result<()> {
    println!("tdrag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("[*] 데이터 디렉토리: {}", config.data_dir().display());
    println!("[*] 리랭커: {}", config.backends.rerank_url);
    println!("[*] 생성 모델: {}", config.backends.generation_model);

    if has_api_key() {
        println!("[OK] API 키: 설정됨");
    } else {
        println!("[!] API 키: 미설정");
        println!("    설정: export GEMINI_API_KEY=your-key");
    }

    let graph_path = config.graph_path();
    if graph_path.exists() {
        match load_snapshot(&graph_path) {
            Ok(graph) => println!(
                "[OK] 그래프: {} 청크 (코퍼스 {})",
                graph.chunks().count(),
                graph.corpus_version()
            ),
            Err(e) => println!("[!] 그래프 스냅샷 오류: {}", e),
        }
    } else {
        println!("[!] 그래프: 없음 (tdrag build-graph 실행 필요)");
    }

    match ChunkStore::open(&config.chunk_db_path()).and_then(|store| store.stats()) {
        Ok(stats) => {
            println!("[OK] 키워드 인덱스: {} 청크", stats.chunk_count);
            println!("     총 텍스트: {}", format_bytes(stats.total_text_bytes));
        }
        Err(e) => println!("[!] 키워드 인덱스 통계 조회 실패: {}", e),
    }

    match open_vectors(config).await {
        Ok(vectors) => match vectors.count().await {
            Ok(count) => println!("[OK] 벡터 인덱스: {} 청크", count),
            Err(e) => tracing::debug!("Vector count failed: {}", e),
        },
        Err(e) => tracing::debug!("LanceChunkIndex open failed: {}", e),
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 스냅샷과 백엔드로 파이프라인 구성
async fn open_pipeline(config: &RagConfig) -> Result<RagPipeline> {
    if !has_api_key() {
        bail!(
            "API 키가 설정되지 않았습니다.\n\
             설정: export GEMINI_API_KEY=your-key"
        );
    }

    let graph_path = config.graph_path();
    let graph = GraphHandle::load(&graph_path)
        .with_context(|| format!("그래프 스냅샷 로드 실패: {}", graph_path.display()))?;

    let store = ChunkStore::open(&config.chunk_db_path()).context("ChunkStore 열기 실패")?;
    let vectors = open_vectors(config).await?;
    let gemini = Arc::new(GeminiClient::from_env(
        config.backends.generation_model.clone(),
        config.backends.embedding_dimension,
    )?);
    let reranker = HttpReranker::new(&config.backends.rerank_url)?;

    let backends = PipelineBackends {
        lexical: Arc::new(store),
        vector: Arc::new(vectors),
        encoder: gemini.clone(),
        reranker: Arc::new(reranker),
        generator: gemini.clone(),
        summarizer: gemini,
    };
    Ok(RagPipeline::new(Arc::new(graph), backends, config.clone()))
}

async fn open_vectors(config: &RagConfig) -> Result<LanceChunkIndex> {
    let dimension = i32::try_from(config.backends.embedding_dimension)
        .context("임베딩 차원이 너무 큽니다")?;
    LanceChunkIndex::open_with_dimension(&config.lance_path(), dimension)
        .await
        .context("LanceChunkIndex 열기 실패")
}

fn parse_filter(filter: Option<&str>) -> Result<SearchFilter> {
    match filter {
        Some(raw) => Ok(SearchFilter::parse(raw)?),
        None => Ok(SearchFilter::default()),
    }
}

/// Ctrl-C를 받으면 취소되는 토큰
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let guard = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = guard.cancelled() => {}
            result = tokio::signal::ctrl_c() => {
                if result.is_ok() {
                    guard.cancel();
                }
            }
        }
    });
    cancel
}

/// 생성 실패면 누적 경고를 먼저 보여줌
fn report_failure(result: Result<RagResponse, RagError>) -> Result<RagResponse> {
    match result {
        Ok(response) => Ok(response),
        Err(RagError::GenerationFailed { reason, warnings }) => {
            for warning in &warnings {
                println!("[!] {}", warning);
            }
            bail!("답변 생성 실패: {}", reason)
        }
        Err(e) => Err(e.into()),
    }
}

fn print_response(response: &RagResponse) {
    println!();
    println!("{}", response.answer);
    println!();
    println!(
        "[{}] 신뢰도 | {} 출처 | {}ms",
        response.confidence,
        response.sources.len(),
        response.metadata.elapsed_ms
    );

    for (i, source) in response.sources.iter().enumerate() {
        println!(
            "{}. [{:.3}] {} p.{} {} ({})",
            i + 1,
            source.score,
            source.file,
            source.page,
            source.section.as_deref().unwrap_or("-"),
            source.content_type
        );
        println!("   {}", truncate_text(&source.preview, 120));
    }

    for warning in &response.warnings {
        println!("[!] {}", warning);
    }
}

/// 텍스트 자르기 (UTF-8 안전, 줄바꿈 제거)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("hello", 10), "hello");
        assert_eq!(truncate_text("hello world", 5), "hello...");
        assert_eq!(truncate_text("| A |\n| B |", 20), "| A | | B |");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
    }

    #[test]
    fn test_parse_filter() {
        assert!(parse_filter(None).unwrap().is_empty());
        let filter = parse_filter(Some("file=spec-a.pdf,section=4.2")).unwrap();
        assert_eq!(filter.source_file.as_deref(), Some("spec-a.pdf"));
        assert_eq!(filter.section.as_deref(), Some("4.2"));
        assert!(parse_filter(Some("section=4..2")).is_err());
    }

    #[test]
    fn test_cli_parses_commands() {
        let cli = Cli::try_parse_from([
            "tdrag",
            "query",
            "creepage for class A?",
            "--filter",
            "type=table",
            "--json",
        ])
        .unwrap();
        match cli.command {
            Commands::Query {
                question,
                filter,
                json,
            } => {
                assert_eq!(question, "creepage for class A?");
                assert_eq!(filter.as_deref(), Some("type=table"));
                assert!(json);
            }
            _ => panic!("expected query"),
        }

        let cli = Cli::try_parse_from(["tdrag", "build-graph", "--input", "chunks.json"]).unwrap();
        assert!(matches!(cli.command, Commands::BuildGraph { output: None, .. }));
    }

    #[test]
    fn test_build_graph_writes_loadable_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("artifact.json");
        let output = dir.path().join("graph.json");
        std::fs::write(
            &input,
            serde_json::to_vec(&crate::testing::fixture_artifact()).unwrap(),
        )
        .unwrap();

        cmd_build_graph(&RagConfig::default(), &input, Some(output.clone())).unwrap();

        let graph = load_snapshot(&output).unwrap();
        assert_eq!(graph.corpus_version(), "fixture-v1");
        assert_eq!(graph.chunks().count(), 6);
    }
}
