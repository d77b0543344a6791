//! 검색 필터 - 소스 파일 / 콘텐츠 종류 / 섹션
//!
//! 필터는 각 후보 생성기에서 K개로 자르기 전에 적용됩니다.
//! 형식이 잘못된 필터는 검색 시작 전에 `InvalidFilter`로 거부합니다.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{RagError, RagResult};
use crate::graph::{Chunk, ContentType, KnowledgeGraph};

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9]+(?:\.[A-Za-z0-9]+)*$").expect("section pattern")
});

/// 검색 필터 (모든 필드가 None이면 필터 없음)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilter {
    /// 문서 표시 이름과 정확히 일치
    pub source_file: Option<String>,
    pub content_type: Option<ContentType>,
    /// heading path 접두사 ("4" -> 4, 4.1, 4.2.3 ...)
    pub section: Option<String>,
}

impl SearchFilter {
    /// `file=a.pdf,type=table,section=4.2` 형식 파싱
    pub fn parse(raw: &str) -> RagResult<Self> {
        let mut filter = SearchFilter::default();

        for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| RagError::invalid_filter(format!("expected key=value, got {:?}", part)))?;
            let value = value.trim();

            match key.trim().to_ascii_lowercase().as_str() {
                "file" | "source" | "source_file" => filter.source_file = Some(value.to_string()),
                "type" | "content_type" => {
                    let content_type = ContentType::parse(value).ok_or_else(|| {
                        RagError::invalid_filter(format!("unknown content type {:?}", value))
                    })?;
                    filter.content_type = Some(content_type);
                }
                "section" => filter.section = Some(value.to_string()),
                other => {
                    return Err(RagError::invalid_filter(format!("unknown filter key {:?}", other)))
                }
            }
        }

        filter.validate()?;
        Ok(filter)
    }

    /// 필드 형식 검증
    ///
    /// 값은 SQL / LanceDB 술어에 그대로 들어가므로 따옴표와 제어 문자를 막습니다.
    pub fn validate(&self) -> RagResult<()> {
        if let Some(file) = &self.source_file {
            if file.trim().is_empty() {
                return Err(RagError::invalid_filter("source file must not be empty"));
            }
            if file.chars().any(|c| c == '\'' || c == '"' || c.is_control()) {
                return Err(RagError::invalid_filter(format!(
                    "source file {:?} contains forbidden characters",
                    file
                )));
            }
        }

        if let Some(section) = &self.section {
            if !SECTION_RE.is_match(section) {
                return Err(RagError::invalid_filter(format!(
                    "section {:?} is not a heading path like 4.2",
                    section
                )));
            }
        }

        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.source_file.is_none() && self.content_type.is_none() && self.section.is_none()
    }

    /// 필드 값 기준 매칭
    pub fn matches_fields(
        &self,
        source_file: &str,
        content_type: ContentType,
        heading_path: Option<&str>,
    ) -> bool {
        if let Some(file) = &self.source_file {
            if file != source_file {
                return false;
            }
        }
        if let Some(wanted) = self.content_type {
            if wanted != content_type {
                return false;
            }
        }
        if let Some(prefix) = &self.section {
            match heading_path {
                Some(path) if section_matches(prefix, path) => {}
                _ => return false,
            }
        }
        true
    }

    /// 그래프 메타데이터 기준 매칭
    pub fn matches(&self, graph: &KnowledgeGraph, chunk: &Chunk) -> bool {
        if self.is_empty() {
            return true;
        }
        let source = graph.source_name(&chunk.id).unwrap_or(chunk.document.as_str());
        self.matches_fields(source, chunk.content_type, graph.heading_path(&chunk.id))
    }

    /// LanceDB SQL 술어 (필터가 없으면 None)
    pub fn to_sql_predicate(&self) -> Option<String> {
        let mut clauses = Vec::new();
        if let Some(file) = &self.source_file {
            clauses.push(format!("source_file = '{}'", file));
        }
        if let Some(content_type) = self.content_type {
            clauses.push(format!("content_type = '{}'", content_type.as_str()));
        }
        if let Some(section) = &self.section {
            clauses.push(format!(
                "(section = '{0}' OR section LIKE '{0}.%')",
                section
            ));
        }
        (!clauses.is_empty()).then(|| clauses.join(" AND "))
    }
}

impl fmt::Display for SearchFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(file) = &self.source_file {
            parts.push(format!("file={}", file));
        }
        if let Some(content_type) = self.content_type {
            parts.push(format!("type={}", content_type));
        }
        if let Some(section) = &self.section {
            parts.push(format!("section={}", section));
        }
        f.write_str(&parts.join(","))
    }
}

/// "4"는 "4", "4.2"와 매칭되지만 "40"과는 매칭되지 않음
fn section_matches(prefix: &str, heading_path: &str) -> bool {
    heading_path == prefix
        || heading_path
            .strip_prefix(prefix)
            .map(|rest| rest.starts_with('.'))
            .unwrap_or(false)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixture_graph;

    #[test]
    fn test_parse_filter() {
        let filter = SearchFilter::parse("file=spec-a.pdf, type=table, section=4.2").unwrap();
        assert_eq!(filter.source_file.as_deref(), Some("spec-a.pdf"));
        assert_eq!(filter.content_type, Some(ContentType::Table));
        assert_eq!(filter.section.as_deref(), Some("4.2"));
        assert_eq!(filter.to_string(), "file=spec-a.pdf,type=table,section=4.2");

        assert!(SearchFilter::parse("").unwrap().is_empty());
    }

    #[test]
    fn test_invalid_filters() {
        for raw in [
            "colour=red",
            "type=image",
            "section=4..2",
            "file=a'; DROP TABLE chunks",
            "file=",
            "justtext",
        ] {
            let err = SearchFilter::parse(raw).unwrap_err();
            assert!(matches!(err, RagError::InvalidFilter(_)), "{raw} -> {err}");
        }
    }

    #[test]
    fn test_section_prefix_matching() {
        assert!(section_matches("4", "4"));
        assert!(section_matches("4", "4.2.1"));
        assert!(!section_matches("4", "40"));
        assert!(!section_matches("4.2", "4"));
    }

    #[test]
    fn test_matches_graph_chunk() {
        let graph = fixture_graph();
        let table = graph.chunk("a-2-table").unwrap();
        let text = graph.chunk("a-1").unwrap();

        let filter = SearchFilter::parse("type=table").unwrap();
        assert!(filter.matches(&graph, table));
        assert!(!filter.matches(&graph, text));

        let filter = SearchFilter::parse("file=spec-a.pdf,section=4").unwrap();
        assert!(filter.matches(&graph, table));
        assert!(filter.matches(&graph, text));
        assert!(!filter.matches(&graph, graph.chunk("b-1").unwrap()));
    }

    #[test]
    fn test_sql_predicate() {
        assert_eq!(SearchFilter::default().to_sql_predicate(), None);
        let filter = SearchFilter::parse("type=text,section=4").unwrap();
        assert_eq!(
            filter.to_sql_predicate().as_deref(),
            Some("content_type = 'text' AND (section = '4' OR section LIKE '4.%')")
        );
    }
}
