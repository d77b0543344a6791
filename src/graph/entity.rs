//! 엔티티 추출 - 태그된 패턴 테이블
//!
//! 패턴은 고정된 우선순위로 평가됩니다:
//! 표준 코드 -> 사양서 참조 -> 부품 번호 -> 약어 목록.
//! 앞선 패턴이 차지한 구간과 겹치는 뒤 패턴 매치는 버립니다.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::model::{EntityKey, EntityKind};

/// 기술 문서에서 자주 쓰이는 약어
pub const KNOWN_ABBREVIATIONS: &[&str] = &[
    "HTM", "USCD", "SCD", "SPS", "ALS", "FRP", "STL", "RIV", "HTV", "RTV", "LSR", "CIGRE",
    "EATS", "ESI", "CDM", "EAWR", "ESQC", "HASAWA", "HSE", "PSSR",
];

static STANDARD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?P<body>BS\s*EN|BS|IEC|ISO|EN)[/\s-]*(?P<num>\d+(?:-\d+)*)\b")
        .expect("standard pattern")
});

static SPEC_REF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?P<org>[SPF][RPOA])[-_\s]?NET[-_\s]?(?P<area>[A-Z]{3})[-_\s]?(?P<num>\d{3})\b")
        .expect("spec ref pattern")
});

static PART_NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Z]{2,4}\d{2,}(?:[-_]?\d+)?\b").expect("part number pattern")
});

static ABBREVIATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z]{2,6}\b").expect("abbreviation pattern"));

static SEPARATORS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s_/\-]+").expect("separator pattern"));

// ============================================================================
// Types
// ============================================================================

/// 추출된 엔티티
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityMatch {
    pub key: EntityKey,
    pub display: String,
    pub kind: EntityKind,
}

/// 패턴 테이블의 한 행
struct PatternRule {
    kind: EntityKind,
    regex: &'static LazyLock<Regex>,
    canonical: fn(&Captures<'_>) -> Option<String>,
}

static RULES: [PatternRule; 4] = [
    PatternRule {
        kind: EntityKind::Standard,
        regex: &STANDARD_RE,
        canonical: canonical_standard,
    },
    PatternRule {
        kind: EntityKind::SpecRef,
        regex: &SPEC_REF_RE,
        canonical: canonical_spec_ref,
    },
    PatternRule {
        kind: EntityKind::PartNumber,
        regex: &PART_NUMBER_RE,
        canonical: canonical_whole,
    },
    PatternRule {
        kind: EntityKind::Abbreviation,
        regex: &ABBREVIATION_RE,
        canonical: canonical_abbreviation,
    },
];

// ============================================================================
// Public API
// ============================================================================

/// 엔티티 키 정규화
///
/// 대문자화 후 공백, `_`, `/`, `-` 연속을 하나의 `-`로 바꿉니다.
/// 이미 정규화된 키에 다시 적용해도 결과가 같습니다.
pub fn normalize_key(raw: &str) -> EntityKey {
    let upper = raw.trim().to_uppercase();
    let joined = SEPARATORS_RE.replace_all(&upper, "-");
    joined.trim_matches('-').to_string()
}

/// 텍스트에서 모든 엔티티 추출 (키 기준 중복 제거, 먼저 나온 표기 유지)
pub fn extract_entities(text: &str) -> Vec<EntityMatch> {
    let mut taken: Vec<(usize, usize)> = Vec::new();
    let mut found: BTreeMap<EntityKey, EntityMatch> = BTreeMap::new();

    for rule in RULES.iter() {
        for caps in rule.regex.captures_iter(text) {
            let Some(whole) = caps.get(0) else { continue };
            let span = (whole.start(), whole.end());

            if taken.iter().any(|&(s, e)| span.0 < e && s < span.1) {
                continue;
            }

            let Some(key) = (rule.canonical)(&caps) else {
                continue;
            };

            taken.push(span);
            found.entry(key.clone()).or_insert_with(|| EntityMatch {
                key,
                display: whole.as_str().trim().to_string(),
                kind: rule.kind,
            });
        }
    }

    found.into_values().collect()
}

// ============================================================================
// Canonical Forms
// ============================================================================

/// "BS EN 60060-1" -> "BS-EN-60060-1", "IEC/60815" -> "IEC-60815"
fn canonical_standard(caps: &Captures<'_>) -> Option<String> {
    let body: String = caps
        .name("body")?
        .as_str()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase();
    let body = if body == "BSEN" { "BS-EN".to_string() } else { body };
    let num = caps.name("num")?.as_str();
    Some(normalize_key(&format!("{}-{}", body, num)))
}

/// "sp net sst 501" -> "SP-NET-SST-501"
fn canonical_spec_ref(caps: &Captures<'_>) -> Option<String> {
    Some(format!(
        "{}-NET-{}-{}",
        caps.name("org")?.as_str().to_uppercase(),
        caps.name("area")?.as_str().to_uppercase(),
        caps.name("num")?.as_str()
    ))
}

fn canonical_whole(caps: &Captures<'_>) -> Option<String> {
    Some(normalize_key(caps.get(0)?.as_str()))
}

/// 목록에 있는 약어만 인정
fn canonical_abbreviation(caps: &Captures<'_>) -> Option<String> {
    let word = caps.get(0)?.as_str();
    KNOWN_ABBREVIATIONS
        .contains(&word)
        .then(|| word.to_string())
}

// ============================================================================
// Tests
// ============================================================================
