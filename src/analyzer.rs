//! Query Analyzer - Extracts text features from SQL before compilation
//!
//! The analyzer is a keyword scan, not a parser. It never fails: text it
//! cannot make sense of yields `QueryFeatures::default()`.

use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Selectivity before any filter is taken into account
pub const BASE_SELECTIVITY: f64 = 0.7;
pub const MIN_SELECTIVITY: f64 = 0.05;
pub const MAX_SELECTIVITY: f64 = 0.95;

const EQUALITY_PENALTY: f64 = 0.1;
const RANGE_PENALTY: f64 = 0.05;
const LIMIT_PENALTY: f64 = 0.2;

lazy_static! {
    static ref STATEMENT_RE: Regex =
        Regex::new(r"(?i)\b(SELECT|WITH|INSERT|UPDATE|DELETE|VALUES|PRAGMA|EXPLAIN)\b").unwrap();
    static ref JOIN_RE: Regex = Regex::new(r"(?i)\bJOIN\b").unwrap();
    static ref AGGREGATE_FN_RE: Regex =
        Regex::new(r"(?i)\b(SUM|AVG|COUNT|MIN|MAX)\s*\(").unwrap();
    static ref GROUP_BY_RE: Regex = Regex::new(r"(?i)\bGROUP\s+BY\b").unwrap();
    static ref ORDER_BY_RE: Regex = Regex::new(r"(?i)\bORDER\s+BY\b").unwrap();
    static ref SELECT_RE: Regex = Regex::new(r"(?i)\bSELECT\b").unwrap();
    static ref NESTED_SELECT_RE: Regex = Regex::new(r"(?i)\(\s*SELECT\b").unwrap();
    static ref LIMIT_RE: Regex = Regex::new(r"(?i)\bLIMIT\b").unwrap();
    static ref BETWEEN_RE: Regex = Regex::new(r"(?i)\bBETWEEN\b").unwrap();
    static ref TABLE_RE: Regex =
        Regex::new(r#"(?i)\b(?:FROM|JOIN)\s+([A-Za-z_"`\[][\w.$"`\[\]]*)"#).unwrap();
}

/// Text features of one SQL statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryFeatures {
    pub has_join: bool,
    pub has_aggregation: bool,
    pub has_sort: bool,
    pub has_subquery: bool,

    /// Referenced tables in first-seen order, without duplicates
    pub tables: Vec<String>,

    /// Estimated fraction of rows surviving the filters, in [0.05, 0.95]
    pub selectivity: f64,

    /// Weighted feature count, at least 1.0
    pub complexity_score: f64,
}

impl Default for QueryFeatures {
    fn default() -> Self {
        Self {
            has_join: false,
            has_aggregation: false,
            has_sort: false,
            has_subquery: false,
            tables: Vec::new(),
            selectivity: BASE_SELECTIVITY,
            complexity_score: 1.0,
        }
    }
}

impl QueryFeatures {
    /// Number of tables beyond the first
    pub fn extra_tables(&self) -> usize {
        self.tables.len().saturating_sub(1)
    }
}

/// Stateless SQL feature extractor
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryAnalyzer;

impl QueryAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Extract features from SQL text
    pub fn analyze(&self, sql: &str) -> QueryFeatures {
        let text = blank_string_literals(sql);

        if text.trim().is_empty() || !STATEMENT_RE.is_match(&text) {
            debug!("No recognizable statement in query text, using default features");
            return QueryFeatures::default();
        }

        let has_join = JOIN_RE.is_match(&text);
        let has_aggregation = AGGREGATE_FN_RE.is_match(&text) || GROUP_BY_RE.is_match(&text);
        let has_sort = ORDER_BY_RE.is_match(&text);
        let has_subquery = SELECT_RE
            .find(&text)
            .map(|first| NESTED_SELECT_RE.is_match(&text[first.end()..]))
            .unwrap_or(false);

        let tables = extract_tables(&text);
        let selectivity = estimate_selectivity(&text);

        let mut features = QueryFeatures {
            has_join,
            has_aggregation,
            has_sort,
            has_subquery,
            tables,
            selectivity,
            complexity_score: 1.0,
        };
        features.complexity_score = complexity_score(&features);

        debug!(
            "Analyzed query: join={} agg={} sort={} subquery={} tables={:?} selectivity={:.2} complexity={:.2}",
            features.has_join,
            features.has_aggregation,
            features.has_sort,
            features.has_subquery,
            features.tables,
            features.selectivity,
            features.complexity_score
        );

        features
    }
}

fn complexity_score(features: &QueryFeatures) -> f64 {
    let flag = |b: bool| if b { 1.0 } else { 0.0 };

    1.0 + 0.8 * flag(features.has_join)
        + 0.6 * flag(features.has_aggregation)
        + 0.3 * flag(features.has_sort)
        + 0.5 * flag(features.has_subquery)
        + 0.2 * features.extra_tables() as f64
}

fn estimate_selectivity(text: &str) -> f64 {
    let (equalities, ranges) = count_comparisons(text);
    let ranges = ranges + BETWEEN_RE.find_iter(text).count();

    let mut selectivity = BASE_SELECTIVITY;
    selectivity -= EQUALITY_PENALTY * equalities as f64;
    selectivity -= RANGE_PENALTY * ranges as f64;
    if LIMIT_RE.is_match(text) {
        selectivity -= LIMIT_PENALTY;
    }

    selectivity.clamp(MIN_SELECTIVITY, MAX_SELECTIVITY)
}

/// Count `(equality, range)` comparison operators.
/// `<>` and `!=` count as neither.
fn count_comparisons(text: &str) -> (usize, usize) {
    let bytes = text.as_bytes();
    let mut equalities = 0;
    let mut ranges = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'<' if bytes.get(i + 1) == Some(&b'>') => i += 2,
            b'<' | b'>' => {
                ranges += 1;
                i += if bytes.get(i + 1) == Some(&b'=') { 2 } else { 1 };
            }
            b'!' if bytes.get(i + 1) == Some(&b'=') => i += 2,
            b'=' => {
                equalities += 1;
                i += if bytes.get(i + 1) == Some(&b'=') { 2 } else { 1 };
            }
            _ => i += 1,
        }
    }

    (equalities, ranges)
}

fn extract_tables(text: &str) -> Vec<String> {
    TABLE_RE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| clean_identifier(m.as_str()))
        .filter(|name| !name.is_empty())
        .unique()
        .collect()
}

fn clean_identifier(raw: &str) -> String {
    raw.trim_end_matches(|c: char| matches!(c, ',' | ';' | ')' | '.'))
        .chars()
        .filter(|c| !matches!(c, '"' | '`' | '[' | ']'))
        .collect()
}

/// Replace the contents of single-quoted literals with spaces so keywords and
/// operators inside strings are not counted. Byte offsets are preserved.
fn blank_string_literals(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut in_literal = false;

    for c in sql.chars() {
        if c == '\'' {
            in_literal = !in_literal;
            out.push(c);
        } else if in_literal {
            for _ in 0..c.len_utf8() {
                out.push(' ');
            }
        } else {
            out.push(c);
        }
    }

    out
}
