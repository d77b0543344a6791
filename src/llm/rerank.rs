//! HTTP 리랭커 - cross-encoder 서버의 `/rerank` 엔드포인트 호출
//!
//! 요청: `{"query": "...", "texts": ["...", ...]}`
//! 응답: `[{"index": 0, "score": 3.2}, ...]` (순서 무관)

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::Reranker;

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    texts: &'a [String],
}

#[derive(Debug, Deserialize)]
struct RerankScore {
    index: usize,
    score: f32,
}

/// `/rerank` HTTP 리랭커
#[derive(Debug, Clone)]
pub struct HttpReranker {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpReranker {
    /// # Arguments
    /// * `base_url` - 리랭커 서버 주소 (예: http://localhost:8080)
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            endpoint: format!("{}/rerank", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl Reranker for HttpReranker {
    async fn rerank(&self, query: &str, texts: &[String]) -> Result<Vec<f32>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let response = self
            .client
            .post(&self.endpoint)
            .json(&RerankRequest { query, texts })
            .send()
            .await
            .with_context(|| format!("Failed to reach reranker at {}", self.endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Reranker error ({}): {}", status, body);
        }

        let scores: Vec<RerankScore> = response
            .json()
            .await
            .context("Failed to parse reranker response")?;

        align_scores(scores, texts.len())
    }

    fn name(&self) -> &str {
        "http-cross-encoder"
    }
}

/// 서버 응답을 입력 순서로 재배열 (누락/중복/범위 밖 인덱스는 에러)
fn align_scores(scores: Vec<RerankScore>, expected: usize) -> Result<Vec<f32>> {
    let mut aligned: Vec<Option<f32>> = vec![None; expected];
    for RerankScore { index, score } in scores {
        let slot = aligned
            .get_mut(index)
            .ok_or_else(|| anyhow::anyhow!("Reranker returned out-of-range index {}", index))?;
        if slot.replace(score).is_some() {
            anyhow::bail!("Reranker returned duplicate index {}", index);
        }
    }

    aligned
        .into_iter()
        .enumerate()
        .map(|(i, s)| s.ok_or_else(|| anyhow::anyhow!("Reranker returned no score for text {}", i)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(pairs: &[(usize, f32)]) -> Vec<RerankScore> {
        pairs
            .iter()
            .map(|&(index, score)| RerankScore { index, score })
            .collect()
    }

    #[test]
    fn test_align_scores_restores_input_order() {
        let aligned = align_scores(scores(&[(2, 0.5), (0, 3.0), (1, -1.0)]), 3).unwrap();
        assert_eq!(aligned, vec![3.0, -1.0, 0.5]);
    }

    #[test]
    fn test_align_scores_rejects_bad_responses() {
        assert!(align_scores(scores(&[(0, 1.0)]), 2).is_err());
        assert!(align_scores(scores(&[(0, 1.0), (0, 2.0)]), 1).is_err());
        assert!(align_scores(scores(&[(5, 1.0)]), 1).is_err());
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let reranker = HttpReranker::new("http://localhost:8080/").unwrap();
        assert_eq!(reranker.endpoint, "http://localhost:8080/rerank");
    }

    #[tokio::test]
    async fn test_empty_batch_skips_request() {
        // 연결할 수 없는 주소라도 빈 배치는 호출하지 않음
        let reranker = HttpReranker::new("http://127.0.0.1:9").unwrap();
        assert!(reranker.rerank("q", &[]).await.unwrap().is_empty());
    }
}
