//! Extraction of chart identifiers from free-form operator input.
//!
//! Input may mix plain ids (separated by commas, whitespace or newlines) and
//! full chart URLs such as
//! `https://app.amplitude.com/analytics/demo/chart/ez25o7zy`.

use crate::types::ChartId;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

static CHART_URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/chart/([A-Za-z0-9_-]+)").expect("invalid chart url regex"));

static SEPARATOR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[,\s]+").expect("invalid separator regex"));

/// Result of scanning operator input.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ScannedInput {
    /// Well-formed ids in order of first appearance, without duplicates.
    pub ids: Vec<ChartId>,
    /// Tokens that could not be turned into a chart id.
    pub rejected: Vec<String>,
}

/// Splits input into candidate identifiers in order, resolving chart URLs to
/// the id they point at. Nothing is validated or deduplicated here.
pub fn chart_tokens(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if line.contains("amplitude.com") && line.contains("/chart/") {
            match CHART_URL_PATTERN.captures(line) {
                Some(captures) => tokens.push(captures[1].to_string()),
                None => tokens.push(line.to_string()),
            }
            continue;
        }

        tokens.extend(
            SEPARATOR_PATTERN
                .split(line)
                .filter(|t| !t.is_empty())
                .map(String::from),
        );
    }
    tokens
}

pub fn scan_chart_input(text: &str) -> ScannedInput {
    let mut seen = HashSet::new();
    let mut scanned = ScannedInput::default();

    for token in chart_tokens(text) {
        match ChartId::parse(&token) {
            Ok(id) => {
                if seen.insert(id.clone()) {
                    scanned.ids.push(id);
                }
            }
            Err(_) => scanned.rejected.push(token),
        }
    }

    tracing::debug!(
        ids = scanned.ids.len(),
        rejected = scanned.rejected.len(),
        "scanned chart input"
    );
    scanned
}

/// Extracts unique chart ids, dropping anything malformed.
pub fn extract_chart_ids(text: &str) -> Vec<ChartId> {
    scan_chart_input(text).ids
}

/// Splits raw identifiers into well-formed ids and rejected strings.
pub fn partition_chart_ids<I, S>(raw: I) -> (Vec<ChartId>, Vec<String>)
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut valid = Vec::new();
    let mut invalid = Vec::new();
    for candidate in raw {
        match ChartId::parse(candidate.as_ref()) {
            Ok(id) => valid.push(id),
            Err(_) => invalid.push(candidate.as_ref().to_string()),
        }
    }
    (valid, invalid)
}

/// Collapses duplicate identifiers, keeping the first occurrence.
pub fn dedupe_identifiers<I, S>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    raw.into_iter()
        .map(|s| s.as_ref().trim().to_string())
        .filter(|s| seen.insert(s.clone()))
        .collect()
}
