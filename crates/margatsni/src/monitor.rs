use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::config::Config;
use crate::matcher::{self, MatcherConfig};
use crate::search::{SearchClient, SearchError};
use crate::sheets::{SheetsClient, SheetsError};
use crate::types::{MatchStatus, PersonRow, RowState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Polling,
    Processing,
    Sleeping,
}

impl Display for MonitorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorState::Idle => write!(f, "idle"),
            MonitorState::Polling => write!(f, "polling"),
            MonitorState::Processing => write!(f, "processing"),
            MonitorState::Sleeping => write!(f, "sleeping"),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleStats {
    pub scanned: usize,
    pub matched: usize,
    pub not_found: usize,
    pub ambiguous: usize,
    pub errors: usize,
}

impl CycleStats {
    fn record(&mut self, status: MatchStatus) {
        match status {
            MatchStatus::Matched => self.matched += 1,
            MatchStatus::NotFound => self.not_found += 1,
            MatchStatus::Ambiguous => self.ambiguous += 1,
        }
    }
}

impl Display for CycleStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Cycle summary:")?;
        writeln!(f, "  Rows scanned:  {}", self.scanned)?;
        writeln!(f, "  Matched:       {}", self.matched)?;
        writeln!(f, "  Not found:     {}", self.not_found)?;
        writeln!(f, "  Ambiguous:     {}", self.ambiguous)?;
        writeln!(f, "  Errors:        {}", self.errors)
    }
}

#[derive(Debug, thiserror::Error)]
enum RowError {
    #[error("{0}")]
    Sheets(#[from] SheetsError),
    #[error("{0}")]
    Search(#[from] SearchError),
}

/// Runs the row handler over a batch, one row at a time. A failing row is
/// logged with its identity, counted, and never blocks the rows after it;
/// the handler decides what a failure means for the sheet.
async fn drive_batch<H>(rows: &[PersonRow], row_delay: Duration, mut handle: H) -> CycleStats
where
    H: AsyncFnMut(&PersonRow) -> Result<MatchStatus, RowError>,
{
    let mut stats = CycleStats {
        scanned: rows.len(),
        ..CycleStats::default()
    };

    let total = rows.len();
    for (i, row) in rows.iter().enumerate() {
        match handle(row).await {
            Ok(status) => stats.record(status),
            Err(e) => {
                stats.errors += 1;
                log::warn!(
                    "Row {} ('{}') failed: {}; leaving it for the next poll",
                    row.row_index,
                    row.name,
                    e
                );
            }
        }

        if i + 1 < total && !row_delay.is_zero() {
            tokio::time::sleep(row_delay).await;
        }
    }
    stats
}

/// Drives the poll/process/sleep cycle over the worksheet.
///
/// The loop is strictly sequential: one row at a time, one cycle at a
/// time. Per-row failures are logged with the row identity and leave the
/// row for the next poll; only startup configuration failures are fatal.
pub struct Monitor {
    sheets: SheetsClient,
    search: SearchClient,
    matcher: MatcherConfig,
    poll_interval: Duration,
    row_delay: Duration,
    state: MonitorState,
}

impl Monitor {
    pub fn new(sheets: SheetsClient, search: SearchClient, config: &Config) -> Self {
        Self {
            sheets,
            search,
            matcher: MatcherConfig {
                accept_threshold: config.accept_threshold,
                tie_margin: config.tie_margin,
            },
            poll_interval: config.poll_interval,
            row_delay: config.row_delay,
            state: MonitorState::Idle,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    /// One poll: read unprocessed rows and handle each in turn.
    pub async fn run_cycle(&mut self) -> Result<CycleStats, SheetsError> {
        self.state = MonitorState::Polling;
        let rows = self.sheets.read_rows().await?;

        if rows.is_empty() {
            self.state = MonitorState::Sleeping;
            return Ok(CycleStats::default());
        }

        self.state = MonitorState::Processing;
        let row_delay = self.row_delay;
        let stats = drive_batch(&rows, row_delay, async |row| self.handle_row(row).await).await;
        self.state = MonitorState::Sleeping;
        Ok(stats)
    }

    /// Runs cycles forever, sleeping `poll_interval` between them, until
    /// the `shutdown` future resolves. Sheet-level read failures after
    /// startup are logged and retried on the next interval.
    pub async fn run<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            match self.run_cycle().await {
                Ok(stats) if stats.scanned > 0 => log::info!("{}", stats),
                Ok(_) => log::debug!("No unprocessed rows"),
                Err(e) => log::error!(
                    "Poll cycle failed: {}; retrying in {:?}",
                    e,
                    self.poll_interval
                ),
            }

            self.state = MonitorState::Sleeping;
            tokio::select! {
                _ = &mut shutdown => {
                    log::info!("Stop signal received, shutting down");
                    self.state = MonitorState::Idle;
                    return;
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// Per-row step driven by `drive_batch`: on failure the row is marked
    /// errored (best effort) so the marker reflects what happened, and the
    /// error bubbles to the batch loop for counting.
    async fn handle_row(&mut self, row: &PersonRow) -> Result<MatchStatus, RowError> {
        match self.process_row(row).await {
            Ok(status) => Ok(status),
            Err(e) => {
                if let Err(mark_err) = self.sheets.mark_state(row.row_index, RowState::Error).await
                {
                    log::warn!(
                        "Could not mark row {} as errored: {}",
                        row.row_index,
                        mark_err
                    );
                }
                Err(e)
            }
        }
    }

    async fn process_row(&mut self, row: &PersonRow) -> Result<MatchStatus, RowError> {
        log::info!("Processing row {}: '{}'", row.row_index, row.name);
        self.sheets
            .mark_state(row.row_index, RowState::Processing)
            .await?;

        let candidates = match self
            .search
            .find_candidates(&row.name, row.location.as_deref())
            .await
        {
            Ok(candidates) => candidates,
            Err(SearchError::Parse(e)) => {
                log::warn!(
                    "Result page for '{}' did not parse ({}); treating as zero candidates",
                    row.name,
                    e
                );
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };

        let result = matcher::select_best(
            row.row_index,
            &row.name,
            row.email.as_deref(),
            &candidates,
            self.matcher,
        );
        log::info!("Row {}: {}", row.row_index, result);

        self.sheets.write_result(&result).await?;
        self.sheets
            .mark_state(row.row_index, RowState::Complete)
            .await?;
        Ok(result.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(row_index: u32, name: &str) -> PersonRow {
        PersonRow {
            row_index,
            name: name.to_string(),
            location: None,
            email: None,
        }
    }

    #[tokio::test]
    async fn throttled_row_does_not_block_the_rest_of_the_batch() {
        let rows = vec![
            person(2, "Jane Doe"),
            person(3, "John Smith"),
            person(4, "Ada Lovelace"),
        ];

        let mut handled = Vec::new();
        let stats = drive_batch(&rows, Duration::ZERO, async |row| {
            handled.push(row.row_index);
            if row.row_index == 2 {
                Err(RowError::Search(SearchError::RateLimited(
                    "status 429".to_string(),
                )))
            } else {
                Ok(MatchStatus::Matched)
            }
        })
        .await;

        assert_eq!(handled, vec![2, 3, 4]);
        assert_eq!(stats.scanned, 3);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.matched, 2);
    }

    #[tokio::test]
    async fn batch_counts_every_outcome() {
        let rows = vec![
            person(2, "Jane Doe"),
            person(3, "John Smith"),
            person(4, "Ada Lovelace"),
        ];

        let mut outcomes = [
            Ok(MatchStatus::Matched),
            Ok(MatchStatus::NotFound),
            Ok(MatchStatus::Ambiguous),
        ]
        .into_iter();
        let stats = drive_batch(&rows, Duration::ZERO, async |_row| {
            outcomes.next().expect("more rows than outcomes")
        })
        .await;

        assert_eq!(stats.scanned, 3);
        assert_eq!(stats.matched, 1);
        assert_eq!(stats.not_found, 1);
        assert_eq!(stats.ambiguous, 1);
        assert_eq!(stats.errors, 0);
    }

    #[test]
    fn stats_record_each_outcome() {
        let mut stats = CycleStats::default();
        stats.record(MatchStatus::Matched);
        stats.record(MatchStatus::Matched);
        stats.record(MatchStatus::NotFound);
        stats.record(MatchStatus::Ambiguous);

        assert_eq!(stats.matched, 2);
        assert_eq!(stats.not_found, 1);
        assert_eq!(stats.ambiguous, 1);
        assert_eq!(stats.errors, 0);
    }

    #[test]
    fn stats_display_lists_every_counter() {
        let stats = CycleStats {
            scanned: 5,
            matched: 2,
            not_found: 1,
            ambiguous: 1,
            errors: 1,
        };
        let text = stats.to_string();
        assert!(text.contains("Rows scanned:  5"));
        assert!(text.contains("Matched:       2"));
        assert!(text.contains("Errors:        1"));
    }

    #[test]
    fn monitor_state_display() {
        assert_eq!(MonitorState::Idle.to_string(), "idle");
        assert_eq!(MonitorState::Sleeping.to_string(), "sleeping");
    }
}
