//! Chunk Store - rusqlite FTS5 기반 키워드 인덱스
//!
//! 그래프 청크의 본문과 필터 컬럼을 SQLite에 적재하고 BM25로 검색합니다.
//! 저장 위치: {data_dir}/chunks.db

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, OpenFlags};
use serde::Serialize;

use super::filter::SearchFilter;
use super::index::{IndexedChunk, LexicalIndex, ScoredChunk};

// ============================================================================
// Types
// ============================================================================

/// 저장소 통계
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub chunk_count: usize,
    pub total_text_bytes: usize,
    pub corpus_version: Option<String>,
    pub db_path: PathBuf,
}

// ============================================================================
// ChunkStore
// ============================================================================

/// SQLite 청크 저장소 + FTS5 키워드 검색
#[derive(Clone)]
pub struct ChunkStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl ChunkStore {
    /// 저장소 열기 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).context("Failed to create database directory")?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open SQLite database")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        store.initialize()?;
        Ok(store)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chunk_id TEXT NOT NULL UNIQUE,
                source_file TEXT NOT NULL,
                page INTEGER NOT NULL,
                content_type TEXT NOT NULL,
                section TEXT,
                text TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(source_file);
            CREATE INDEX IF NOT EXISTS idx_chunks_section ON chunks(section);
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )
        .context("Failed to create chunk tables")?;

        // source: https://www.sqlite.org/fts5.html#external_content_tables
        conn.execute(
            "CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
                text,
                content=chunks,
                content_rowid=id
            )",
            [],
        )
        .context("Failed to create FTS5 table")?;

        tracing::debug!("Chunk store initialized at {:?}", self.db_path);
        Ok(())
    }

    /// 전체 교체 적재 (그래프 재빌드 후 호출)
    pub fn replace_all(&self, chunks: &[IndexedChunk], corpus_version: &str) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM chunks", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO chunks (chunk_id, source_file, page, content_type, section, text)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for chunk in chunks {
                stmt.execute(params![
                    chunk.chunk_id,
                    chunk.source_file,
                    chunk.page,
                    chunk.content_type.as_str(),
                    chunk.section,
                    chunk.text,
                ])
                .with_context(|| format!("Failed to insert chunk {}", chunk.chunk_id))?;
            }
        }
        tx.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES ('corpus_version', ?1)",
            params![corpus_version],
        )?;
        tx.commit().context("Failed to commit chunk load")?;
        drop(conn);

        self.rebuild_fts_index()?;
        tracing::info!("Loaded {} chunks into lexical index", chunks.len());
        Ok(chunks.len())
    }

    /// FTS5 키워드 검색 (BM25)
    ///
    /// 필터는 LIMIT 전에 SQL에서 적용됩니다.
    /// source: https://www.sqlite.org/fts5.html#the_bm25_function
    pub fn search_fts(
        &self,
        query: &str,
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let escaped_query = escape_fts5_query(query);
        if escaped_query.is_empty() || limit == 0 {
            return Ok(vec![]);
        }

        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT c.chunk_id, bm25(chunks_fts) AS score
            FROM chunks_fts
            JOIN chunks c ON c.id = chunks_fts.rowid
            WHERE chunks_fts MATCH ?1
              AND (?2 IS NULL OR c.source_file = ?2)
              AND (?3 IS NULL OR c.content_type = ?3)
              AND (?4 IS NULL OR c.section = ?4 OR c.section LIKE ?4 || '.%')
            ORDER BY score, c.chunk_id
            LIMIT ?5
            "#,
        )?;

        let results = stmt
            .query_map(
                params![
                    escaped_query,
                    filter.source_file,
                    filter.content_type.map(|c| c.as_str()),
                    filter.section,
                    limit as i64
                ],
                |row| {
                    let bm25: f64 = row.get(1)?;
                    Ok(ScoredChunk {
                        chunk_id: row.get(0)?,
                        // bm25()는 낮을수록 좋으므로 부호 반전
                        score: -bm25 as f32,
                    })
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read FTS5 results")?;

        Ok(results)
    }

    /// 저장소 통계
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.lock()?;

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))
            .unwrap_or(0);

        let total_size: i64 = conn
            .query_row("SELECT COALESCE(SUM(LENGTH(text)), 0) FROM chunks", [], |row| {
                row.get(0)
            })
            .unwrap_or(0);

        let corpus_version: Option<String> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'corpus_version'",
                [],
                |row| row.get(0),
            )
            .ok();

        Ok(StoreStats {
            chunk_count: count as usize,
            total_text_bytes: total_size as usize,
            corpus_version,
            db_path: self.db_path.clone(),
        })
    }

    /// FTS5 인덱스 리빌드
    pub fn rebuild_fts_index(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("INSERT INTO chunks_fts(chunks_fts) VALUES('rebuild')", [])
            .context("Failed to rebuild FTS5 index")?;
        Ok(())
    }
}

#[async_trait]
impl LexicalIndex for ChunkStore {
    async fn search(
        &self,
        query: &str,
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let store = self.clone();
        let query = query.to_string();
        let filter = filter.clone();
        tokio::task::spawn_blocking(move || store.search_fts(&query, &filter, limit)).await?
    }

    fn name(&self) -> &str {
        "sqlite-fts5"
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// FTS5 쿼리 이스케이프
///
/// 단어만 남기고 각 단어를 따옴표로 감싸 OR로 묶습니다.
/// 자연어 질문이라 모든 단어가 들어간 청크만 찾으면 재현율이 너무 낮습니다.
/// source: https://www.sqlite.org/fts5.html#full_text_query_syntax
fn escape_fts5_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|w| {
            w.chars()
                .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
                .collect::<String>()
        })
        .filter(|w| !w.is_empty())
        .map(|w| format!("\"{}\"", w))
        .collect::<Vec<_>>()
        .join(" OR ")
}

// ============================================================================
// Tests
// ============================================================================
