use strsim::normalized_levenshtein;

use crate::types::{Candidate, MatchResult, MatchStatus};

/// Thresholds for accepting a best candidate and for declaring a tie.
#[derive(Debug, Clone, Copy)]
pub struct MatcherConfig {
    pub accept_threshold: f64,
    pub tie_margin: f64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            accept_threshold: 0.6,
            tie_margin: 0.05,
        }
    }
}

/// Score floor for a candidate whose snippet contains the row's email
/// address verbatim. A direct contact hit outranks name similarity but
/// still loses to an exact name match.
const EMAIL_MATCH_SCORE: f64 = 0.95;

/// Similarity between an input name and a candidate, in [0, 1].
///
/// Case, diacritics and punctuation are folded away on both sides before
/// comparison. The score is the best of edit-distance similarity against
/// the display name, edit-distance similarity against the de-separated
/// username, a containment rule, and a token-overlap heuristic.
/// Deterministic for identical inputs.
pub fn score(input_name: &str, candidate: &Candidate) -> f64 {
    let name = normalize(input_name);
    if name.is_empty() {
        return 0.0;
    }

    let display = normalize(&candidate.display_name);
    let username = normalize(&candidate.username);
    let squashed_name = squash(&name);
    let squashed_user = squash(&username);

    if name == display || squashed_name == squashed_user {
        return 1.0;
    }

    let mut best = normalized_levenshtein(&name, &display);
    best = best.max(normalized_levenshtein(&squashed_name, &squashed_user));

    if !squashed_name.is_empty() && squashed_user.contains(&squashed_name) {
        best = best.max(0.9);
    }

    let tokens: Vec<&str> = name.split(' ').filter(|t| t.len() > 2).collect();
    if !tokens.is_empty() {
        let hits = tokens
            .iter()
            .filter(|t| squashed_user.contains(**t) || display.contains(**t))
            .count();
        best = best.max(0.8 * hits as f64 / tokens.len() as f64);
    }

    best.clamp(0.0, 1.0)
}

/// Picks the best-scoring candidate for a row, or reports why none was
/// accepted. Equal scores keep the earlier candidate, so the outcome is
/// deterministic for a given result ordering. When the row carries an
/// email address, a candidate whose snippet contains it verbatim scores
/// at least [`EMAIL_MATCH_SCORE`].
pub fn select_best(
    row_index: u32,
    input_name: &str,
    email: Option<&str>,
    candidates: &[Candidate],
    config: MatcherConfig,
) -> MatchResult {
    if candidates.is_empty() {
        return MatchResult {
            row_index,
            matched_url: None,
            score: 0.0,
            status: MatchStatus::NotFound,
        };
    }

    let mut scored: Vec<(f64, &Candidate)> = candidates
        .iter()
        .map(|c| {
            let mut s = score(input_name, c);
            if email_in_snippet(email, c) {
                s = s.max(EMAIL_MATCH_SCORE);
            }
            (s, c)
        })
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    let (best_score, best) = scored[0];
    let runner_up = scored.get(1).map(|(s, _)| *s);
    let status = decide(best_score, runner_up, config);

    MatchResult {
        row_index,
        matched_url: (status == MatchStatus::Matched).then(|| best.url.clone()),
        score: best_score,
        status,
    }
}

fn decide(best: f64, runner_up: Option<f64>, config: MatcherConfig) -> MatchStatus {
    if best < config.accept_threshold {
        return MatchStatus::NotFound;
    }
    if let Some(second) = runner_up
        && second >= config.accept_threshold
        && best - second < config.tie_margin
    {
        return MatchStatus::Ambiguous;
    }
    MatchStatus::Matched
}

/// Lowercases, folds common diacritics, drops punctuation and collapses
/// whitespace. Username separators (`_`, `.`, `-`) become token breaks.
fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.to_lowercase().chars() {
        match c {
            'á' | 'à' | 'â' | 'ä' | 'ã' | 'å' => out.push('a'),
            'é' | 'è' | 'ê' | 'ë' => out.push('e'),
            'í' | 'ì' | 'î' | 'ï' => out.push('i'),
            'ó' | 'ò' | 'ô' | 'ö' | 'õ' | 'ø' => out.push('o'),
            'ú' | 'ù' | 'û' | 'ü' => out.push('u'),
            'ç' => out.push('c'),
            'ñ' => out.push('n'),
            'ý' | 'ÿ' => out.push('y'),
            'ß' => out.push_str("ss"),
            '_' | '.' | '-' => out.push(' '),
            c if c.is_alphanumeric() => out.push(c),
            c if c.is_whitespace() => out.push(' '),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn squash(normalized: &str) -> String {
    normalized.split(' ').collect()
}

fn email_in_snippet(email: Option<&str>, candidate: &Candidate) -> bool {
    let Some(email) = email else {
        return false;
    };
    let email = email.trim().to_lowercase();
    if email.is_empty() {
        return false;
    }
    candidate
        .snippet
        .as_deref()
        .is_some_and(|s| s.to_lowercase().contains(&email))
}
