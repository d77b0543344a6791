//! LanceDB Chunk Index - 청크 임베딩 벡터 검색
//!
//! 필터 컬럼(source_file, content_type, section)을 함께 저장해서
//! `only_if` 술어로 ANN 검색 전에 걸러냅니다.
//! ref: https://lancedb.github.io/lancedb/

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};

use super::filter::SearchFilter;
use super::index::{IndexedChunk, ScoredChunk, VectorIndex};

/// 벡터 테이블 이름
const TABLE_NAME: &str = "chunks";

/// 기본 임베딩 차원 (text-embedding-004)
pub const EMBEDDING_DIMENSION: i32 = 768;

// ============================================================================
// LanceChunkIndex
// ============================================================================

/// LanceDB 청크 벡터 인덱스
pub struct LanceChunkIndex {
    db: Connection,
    dimension: i32,
}

impl LanceChunkIndex {
    /// 기본 차원으로 열기
    pub async fn open(path: &Path) -> Result<Self> {
        Self::open_with_dimension(path, EMBEDDING_DIMENSION).await
    }

    /// LanceDB 디렉토리 열기 (없으면 생성)
    pub async fn open_with_dimension(path: &Path, dimension: i32) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("Failed to create LanceDB directory")?;
            }
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid path encoding"))?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;

        Ok(Self { db, dimension })
    }

    pub fn dimension(&self) -> i32 {
        self.dimension
    }

    fn create_schema(&self) -> Schema {
        Schema::new(vec![
            Field::new("chunk_id", DataType::Utf8, false),
            Field::new("source_file", DataType::Utf8, false),
            Field::new("content_type", DataType::Utf8, false),
            Field::new("section", DataType::Utf8, true),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.dimension,
                ),
                false,
            ),
        ])
    }

    /// 청크들을 Arrow RecordBatch로 변환 (임베딩이 있는 것만)
    fn chunks_to_batch(&self, chunks: &[&IndexedChunk]) -> Result<RecordBatch> {
        let chunk_ids: Vec<&str> = chunks.iter().map(|c| c.chunk_id.as_str()).collect();
        let sources: Vec<&str> = chunks.iter().map(|c| c.source_file.as_str()).collect();
        let content_types: Vec<&str> = chunks.iter().map(|c| c.content_type.as_str()).collect();
        let sections: Vec<Option<&str>> = chunks.iter().map(|c| c.section.as_deref()).collect();

        let embeddings_flat: Vec<f32> = chunks
            .iter()
            .flat_map(|c| c.embedding.iter().flatten().copied())
            .collect();

        let values = Float32Array::from(embeddings_flat);
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let embeddings_list = FixedSizeListArray::try_new(
            field,
            self.dimension,
            Arc::new(values) as Arc<dyn Array>,
            None,
        )
        .context("Failed to create embedding array")?;

        RecordBatch::try_new(
            Arc::new(self.create_schema()),
            vec![
                Arc::new(StringArray::from(chunk_ids)),
                Arc::new(StringArray::from(sources)),
                Arc::new(StringArray::from(content_types)),
                Arc::new(StringArray::from(sections)),
                Arc::new(embeddings_list),
            ],
        )
        .context("Failed to create RecordBatch")
    }

    async fn table_exists(&self) -> bool {
        self.db
            .table_names()
            .execute()
            .await
            .map(|names| names.iter().any(|n| n == TABLE_NAME))
            .unwrap_or(false)
    }

    async fn open_table(&self) -> Result<lancedb::table::Table> {
        self.db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .context("Failed to open chunk table")
    }

    /// 전체 교체 적재
    ///
    /// 임베딩이 없거나 차원이 맞지 않는 청크는 건너뜁니다.
    pub async fn replace_all(&self, chunks: &[IndexedChunk]) -> Result<usize> {
        let usable: Vec<&IndexedChunk> = chunks
            .iter()
            .filter(|c| match &c.embedding {
                Some(e) if e.len() == self.dimension as usize => true,
                Some(e) => {
                    tracing::warn!(
                        "Skipping {}: embedding dimension {} != {}",
                        c.chunk_id,
                        e.len(),
                        self.dimension
                    );
                    false
                }
                None => false,
            })
            .collect();

        if self.table_exists().await {
            self.db
                .drop_table(TABLE_NAME)
                .await
                .context("Failed to drop chunk table")?;
        }

        if usable.is_empty() {
            tracing::warn!("No chunk embeddings to index");
            return Ok(0);
        }

        let batch = self.chunks_to_batch(&usable)?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
        self.db
            .create_table(TABLE_NAME, batches)
            .execute()
            .await
            .context("Failed to create chunk table")?;

        tracing::info!("Loaded {} embeddings into vector index", usable.len());
        Ok(usable.len())
    }
}

#[async_trait]
impl VectorIndex for LanceChunkIndex {
    async fn search(
        &self,
        embedding: &[f32],
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>> {
        if limit == 0 || !self.table_exists().await {
            return Ok(vec![]);
        }
        if embedding.len() != self.dimension as usize {
            anyhow::bail!(
                "Query embedding dimension {} != index dimension {}",
                embedding.len(),
                self.dimension
            );
        }

        let table = self.open_table().await?;
        let mut query = table
            .vector_search(embedding.to_vec())
            .context("Failed to create vector search")?
            .limit(limit);
        if let Some(predicate) = filter.to_sql_predicate() {
            query = query.only_if(predicate);
        }

        let batches: Vec<RecordBatch> = query
            .execute()
            .await
            .context("Failed to execute vector search")?
            .try_collect()
            .await?;

        let mut results = Vec::new();
        for batch in batches {
            let chunk_ids = batch
                .column_by_name("chunk_id")
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .ok_or_else(|| anyhow::anyhow!("Missing chunk_id column"))?;

            // _distance 컬럼 (LanceDB가 자동 추가)
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| anyhow::anyhow!("Missing _distance column"))?;

            for i in 0..batch.num_rows() {
                results.push(ScoredChunk {
                    chunk_id: chunk_ids.value(i).to_string(),
                    score: 1.0 / (1.0 + distances.value(i)),
                });
            }
        }

        results.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        Ok(results)
    }

    async fn count(&self) -> Result<usize> {
        if !self.table_exists().await {
            return Ok(0);
        }
        let table = self.open_table().await?;
        table.count_rows(None).await.context("Failed to count rows")
    }
}

// ============================================================================
// Tests
// ============================================================================
