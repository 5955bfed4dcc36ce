use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

/// One unprocessed input row from the people worksheet.
///
/// `row_index` is the 1-based sheet row, kept so results and status markers
/// land back on the row they came from. Immutable for the duration of a
/// poll cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonRow {
    pub row_index: u32,
    pub name: String,
    pub location: Option<String>,
    pub email: Option<String>,
}

/// A profile link pulled off a results page, pending scoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub username: String,
    pub display_name: String,
    pub url: String,
    pub snippet: Option<String>,
}

#[derive(Debug, thiserror::Error)]
#[error("Invalid match status '{0}'. Accepted values: 'matched', 'not_found', 'ambiguous'")]
pub struct MatchStatusParseError(String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Matched,
    NotFound,
    Ambiguous,
}

impl FromStr for MatchStatus {
    type Err = MatchStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "matched" => Ok(MatchStatus::Matched),
            "not_found" => Ok(MatchStatus::NotFound),
            "ambiguous" => Ok(MatchStatus::Ambiguous),
            _ => Err(MatchStatusParseError(s.to_string())),
        }
    }
}

impl Display for MatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchStatus::Matched => write!(f, "matched"),
            MatchStatus::NotFound => write!(f, "not_found"),
            MatchStatus::Ambiguous => write!(f, "ambiguous"),
        }
    }
}

/// The only persisted output of a cycle, written back to the row it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub row_index: u32,
    pub matched_url: Option<String>,
    pub score: f64,
    pub status: MatchStatus,
}

impl Display for MatchResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.matched_url {
            Some(url) => write!(f, "{} ({:.2}) {}", self.status, self.score, url),
            None => write!(f, "{} ({:.2})", self.status, self.score),
        }
    }
}

/// Processed marker persisted in the worksheet's status column.
///
/// Anything the parser does not recognize (including an empty cell) is
/// `Pending`, so rows that errored out or were interrupted mid-processing
/// are picked up again on the next poll. Only `Complete` rows are skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RowState {
    #[default]
    Pending,
    Processing,
    Complete,
    Error,
}

impl RowState {
    pub fn from_cell(cell: &str) -> RowState {
        match cell.trim().to_lowercase().as_str() {
            "processing" => RowState::Processing,
            "complete" => RowState::Complete,
            "error" => RowState::Error,
            _ => RowState::Pending,
        }
    }

    pub fn as_cell(&self) -> &'static str {
        match self {
            RowState::Pending => "",
            RowState::Processing => "processing",
            RowState::Complete => "complete",
            RowState::Error => "error",
        }
    }

    pub fn is_processed(&self) -> bool {
        matches!(self, RowState::Complete)
    }
}
