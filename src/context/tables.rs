//! 테이블 제목 연결 - "Table N - 제목" 참조를 실제 테이블 청크에 매칭
//!
//! 제목과 테이블 제목 메타데이터의 키워드 겹침으로 점수를 매기며,
//! 매칭 전에 양쪽 키워드를 정적 동의어 테이블로 확장합니다.
//! 점수 = 직접 일치 * 2 + 동의어로만 일치한 수

use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

use regex::Regex;

use crate::graph::Chunk;

static TABLE_TITLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\btable\s+(\d+(?:\.\d+)*)\.?\s*[-–—:]\s*([^\n|]+)").expect("table title pattern")
});

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("tag pattern"));

static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[a-z]{3,}\b").expect("word pattern"));

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "from", "are", "was", "were", "been", "table", "col", "this",
    "that", "per",
];

static SYNONYMS: LazyLock<HashMap<&'static str, &'static [&'static str]>> = LazyLock::new(|| {
    HashMap::from([
        ("legislation", &["regulations", "act", "law", "statute"][..]),
        ("regulations", &["legislation", "rules", "requirements"][..]),
        ("documents", &["papers", "files", "specs", "specifications"][..]),
        ("standards", &["specifications", "requirements", "documents"][..]),
        ("requirements", &["regulations", "specifications", "criteria"][..]),
        ("ratings", &["values", "limits"][..]),
        ("dimensions", &["sizes", "measurements"][..]),
    ])
});

// ============================================================================
// Types
// ============================================================================

/// 텍스트에서 발견된 테이블 참조
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TableTitleRef {
    /// "3", "4.1"
    pub number: String,
    pub title: String,
}

// ============================================================================
// Functions
// ============================================================================

/// "Table 3 - Requirements" 형태 참조 추출 (하이픈/대시/콜론 허용)
pub fn find_table_titles(text: &str) -> Vec<TableTitleRef> {
    TABLE_TITLE_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let number = caps.get(1)?.as_str().to_string();
            let title = caps.get(2)?.as_str().trim().to_string();
            (!title.is_empty()).then_some(TableTitleRef { number, title })
        })
        .collect()
}

/// 의미 있는 키워드 추출 (소문자, 3자 이상, 불용어 제외)
pub fn extract_keywords(text: &str) -> BTreeSet<String> {
    let cleaned = TAG_RE.replace_all(text, " ").to_lowercase();
    WORD_RE
        .find_iter(&cleaned)
        .map(|m| m.as_str())
        .filter(|w| !STOPWORDS.contains(w))
        .map(str::to_string)
        .collect()
}

/// 동의어 확장
pub fn expand_with_synonyms(keywords: &BTreeSet<String>) -> BTreeSet<String> {
    let mut expanded = keywords.clone();
    for keyword in keywords {
        if let Some(synonyms) = SYNONYMS.get(keyword.as_str()) {
            expanded.extend(synonyms.iter().map(|s| s.to_string()));
        }
    }
    expanded
}

/// 제목 키워드와 테이블 제목의 겹침 점수
pub fn score_table_match(title_keywords: &BTreeSet<String>, table_title: &str) -> usize {
    if title_keywords.is_empty() {
        return 0;
    }

    let table_keywords = extract_keywords(table_title);
    let direct = title_keywords.intersection(&table_keywords).count();

    let expanded_title = expand_with_synonyms(title_keywords);
    let expanded_table = expand_with_synonyms(&table_keywords);
    let synonym = expanded_title
        .intersection(&expanded_table)
        .count()
        .saturating_sub(direct);

    direct * 2 + synonym
}

/// 테이블 청크의 제목 (메타데이터가 없으면 첫 줄)
pub fn table_title_of(chunk: &Chunk) -> &str {
    match &chunk.table_title {
        Some(title) => title.as_str(),
        None => chunk.text.lines().next().unwrap_or(""),
    }
}

/// 후보 테이블 중 최고 점수 테이블 (점수 0이면 None)
///
/// 동점이면 표 번호가 같은 쪽, 그다음 chunk id 순.
pub fn best_table_match<'a, I>(reference: &TableTitleRef, tables: I) -> Option<(&'a Chunk, usize)>
where
    I: IntoIterator<Item = &'a Chunk>,
{
    let title_keywords = extract_keywords(&reference.title);

    let mut scored: Vec<(&'a Chunk, usize, bool)> = tables
        .into_iter()
        .filter(|c| c.is_table())
        .map(|c| {
            let title = table_title_of(c);
            let number_match = find_table_titles(title)
                .first()
                .map(|r| r.number == reference.number)
                .unwrap_or(false);
            (c, score_table_match(&title_keywords, title), number_match)
        })
        .collect();

    scored.sort_by(|a, b| {
        b.1.cmp(&a.1)
            .then_with(|| b.2.cmp(&a.2))
            .then_with(|| a.0.id.cmp(&b.0.id))
    });

    scored
        .into_iter()
        .next()
        .filter(|(_, score, _)| *score > 0)
        .map(|(chunk, score, _)| (chunk, score))
}

/// HTML 태그 제거 후 공백 정리
pub fn strip_tags(cell: &str) -> String {
    TAG_RE.replace_all(cell, "").trim().to_string()
}

/// 헤더가 추출기 자리표시자(`col_0` 등)인지
pub fn is_placeholder_header(header: &str) -> bool {
    header.is_empty() || header.starts_with("col_")
}

/// 행렬 테이블을 "헤더: 값" 나열 텍스트로 (첫 행은 헤더)
///
/// 빈 셀은 건너뛰고, 의미 있는 헤더가 없는 열은 값만 씁니다.
pub fn table_to_text(rows: &[Vec<String>]) -> String {
    let Some((header_row, body)) = rows.split_first() else {
        return String::new();
    };
    let headers: Vec<String> = header_row.iter().map(|h| strip_tags(h)).collect();

    body.iter()
        .filter_map(|row| {
            let parts: Vec<String> = row
                .iter()
                .enumerate()
                .filter_map(|(col, cell)| {
                    let value = strip_tags(cell);
                    if value.is_empty() {
                        return None;
                    }
                    match headers.get(col) {
                        Some(header) if !is_placeholder_header(header) => {
                            Some(format!("{}: {}", header, value))
                        }
                        _ => Some(value),
                    }
                })
                .collect();
            (!parts.is_empty()).then(|| parts.join(", "))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ============================================================================
// Tests
// ============================================================================
