use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::auth::{AuthError, ServiceAccountKey, TokenProvider};
use crate::config::Config;
use crate::types::{MatchResult, PersonRow, RowState};

const NAME_COLUMN: &str = "name";
const LOCATION_COLUMN: &str = "location";
const EMAIL_COLUMN: &str = "email";
const STATUS_COLUMN: &str = "status";
const URL_COLUMN: &str = "instagram_url";
const CONFIDENCE_COLUMN: &str = "confidence";
const RESULT_COLUMN: &str = "result";

#[derive(Debug, thiserror::Error)]
pub enum SheetsError {
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Sheets API returned {status}: {message}")]
    Api {
        status: StatusCode,
        message: String,
    },
    #[error("Row {0} does not exist in the worksheet")]
    RowNotFound(u32),
    #[error("Unexpected response shape: {0}")]
    MalformedResponse(String),
    #[error("Required column '{0}' not found in header row")]
    MissingColumn(&'static str),
}

impl SheetsError {
    /// Worth one more attempt: network hiccups and server-side throttling.
    fn is_transient(&self) -> bool {
        match self {
            SheetsError::Request(_) => true,
            SheetsError::Api { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

/// Column positions resolved from the header row, 0-based.
///
/// Output columns missing from the sheet are assigned positions past the
/// current width and listed in `new_headers` so the caller can create them.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ColumnMap {
    name: usize,
    location: Option<usize>,
    email: Option<usize>,
    status: usize,
    url: usize,
    confidence: usize,
    result: usize,
    new_headers: Vec<(usize, &'static str)>,
}

fn resolve_columns(header: &[String]) -> Result<ColumnMap, SheetsError> {
    let find = |title: &str| {
        header
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(title))
    };

    let name = find(NAME_COLUMN).ok_or(SheetsError::MissingColumn(NAME_COLUMN))?;
    let location = find(LOCATION_COLUMN);
    let email = find(EMAIL_COLUMN);

    let mut next_free = header.len();
    let mut new_headers = Vec::new();
    let mut resolve_or_append = |title: &'static str| match find(title) {
        Some(index) => index,
        None => {
            let index = next_free;
            next_free += 1;
            new_headers.push((index, title));
            index
        }
    };

    let status = resolve_or_append(STATUS_COLUMN);
    let url = resolve_or_append(URL_COLUMN);
    let confidence = resolve_or_append(CONFIDENCE_COLUMN);
    let result = resolve_or_append(RESULT_COLUMN);

    Ok(ColumnMap {
        name,
        location,
        email,
        status,
        url,
        confidence,
        result,
        new_headers,
    })
}

/// Materializes unprocessed person rows from the data grid (rows below the
/// header). Blank rows and rows already marked complete are skipped.
fn collect_rows(grid: &[Vec<String>], columns: &ColumnMap) -> Vec<PersonRow> {
    let cell = |row: &[String], index: usize| -> String {
        row.get(index).map(|c| c.trim().to_string()).unwrap_or_default()
    };

    let mut rows = Vec::new();
    for (offset, raw) in grid.iter().enumerate() {
        if raw.iter().all(|c| c.trim().is_empty()) {
            continue;
        }

        let row_index = offset as u32 + 2;
        let state = RowState::from_cell(&cell(raw, columns.status));
        if state.is_processed() {
            log::debug!("Skipping row {} (already processed)", row_index);
            continue;
        }

        let name = cell(raw, columns.name);
        if name.is_empty() {
            log::warn!("Skipping row {}: empty name cell", row_index);
            continue;
        }

        let optional = |index: Option<usize>| {
            index.map(|i| cell(raw, i)).filter(|v| !v.is_empty())
        };

        rows.push(PersonRow {
            row_index,
            name,
            location: optional(columns.location),
            email: optional(columns.email),
        });
    }
    rows
}

/// Spreadsheet column name in A1 notation for a 0-based index.
fn col_letter(index: usize) -> String {
    let mut index = index;
    let mut letters = Vec::new();
    loop {
        letters.push(b'A' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    letters.reverse();
    String::from_utf8(letters).expect("column letters are ASCII")
}

/// Reads people rows from and writes results back to a Google Sheets
/// worksheet via the v4 values API.
pub struct SheetsClient {
    client: Client,
    token: TokenProvider,
    spreadsheet_id: String,
    worksheet: String,
    write_retries: u32,
    columns: Option<ColumnMap>,
}

impl SheetsClient {
    pub fn new(config: &Config) -> Result<Self, SheetsError> {
        let key = ServiceAccountKey::from_file(&config.credentials_path)?;
        let token = TokenProvider::new(key)?;
        let client = Client::builder()
            .timeout(config.http_timeout)
            .user_agent(format!(
                "{}/{}",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION")
            ))
            .build()
            .map_err(SheetsError::Request)?;

        Ok(Self {
            client,
            token,
            spreadsheet_id: config.spreadsheet_id.clone(),
            worksheet: config.worksheet.clone(),
            write_retries: config.write_retries,
            columns: None,
        })
    }

    /// Returns the rows still waiting for a result, skipping everything the
    /// processed marker says is done.
    pub async fn read_rows(&mut self) -> Result<Vec<PersonRow>, SheetsError> {
        let columns = self.columns().await?;
        let range = a1_range(&self.worksheet, "A2:ZZ");
        let grid = self.get_values(&range).await?.values;
        let rows = collect_rows(&grid, &columns);
        log::info!(
            "Loaded {} unprocessed rows from worksheet '{}'",
            rows.len(),
            self.worksheet
        );
        Ok(rows)
    }

    /// Writes the matched URL, confidence and status cells for one row.
    /// Each cell write is independent; a failure leaves earlier cells in
    /// place.
    pub async fn write_result(&mut self, result: &MatchResult) -> Result<(), SheetsError> {
        let columns = self.columns().await?;
        let url = result.matched_url.as_deref().unwrap_or("");
        self.put_cell(result.row_index, columns.url, url).await?;
        self.put_cell(
            result.row_index,
            columns.confidence,
            &format!("{:.2}", result.score),
        )
        .await?;
        self.put_cell(result.row_index, columns.result, &result.status.to_string())
            .await?;
        Ok(())
    }

    /// Updates the processed marker for a row.
    pub async fn mark_state(&mut self, row_index: u32, state: RowState) -> Result<(), SheetsError> {
        let columns = self.columns().await?;
        self.put_cell(row_index, columns.status, state.as_cell())
            .await?;
        log::debug!("Marked row {} as '{}'", row_index, state.as_cell());
        Ok(())
    }

    /// Resolves the column map from the header row, creating any missing
    /// status/output column headers on first use.
    async fn columns(&mut self) -> Result<ColumnMap, SheetsError> {
        if let Some(columns) = &self.columns {
            return Ok(columns.clone());
        }

        let range = a1_range(&self.worksheet, "1:1");
        let grid = self.get_values(&range).await?.values;
        let header = grid.first().ok_or_else(|| {
            SheetsError::MalformedResponse("worksheet has no header row".to_string())
        })?;

        let columns = resolve_columns(header)?;
        for (index, title) in &columns.new_headers {
            log::info!("Adding '{}' column to worksheet '{}'", title, self.worksheet);
            self.put_cell(1, *index, title).await?;
        }

        self.columns = Some(columns.clone());
        Ok(columns)
    }

    async fn get_values(&mut self, range: &str) -> Result<ValueRange, SheetsError> {
        let token = self.token.token(&self.client).await?;
        let url = format!(
            "{}/{}/values/{}?majorDimension=ROWS",
            crate::SHEETS_API_BASE,
            self.spreadsheet_id,
            encode_range(range)
        );

        let response = self.client.get(&url).bearer_auth(token).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(api_error(status, response.text().await.unwrap_or_default()));
        }
        Ok(response.json().await?)
    }

    /// Writes one cell, retrying transient failures a bounded number of
    /// times with exponential backoff.
    async fn put_cell(&mut self, row: u32, col: usize, value: &str) -> Result<(), SheetsError> {
        let range = a1_range(&self.worksheet, &format!("{}{}", col_letter(col), row));
        let mut attempt = 0;
        loop {
            match self.put_values(&range, value).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < self.write_retries => {
                    attempt += 1;
                    let wait = Duration::from_secs(1u64 << attempt);
                    log::warn!("Write to {} failed ({}); retrying in {:?}", range, e, wait);
                    tokio::time::sleep(wait).await;
                }
                Err(SheetsError::Api { status, message })
                    if status == StatusCode::BAD_REQUEST
                        && message.contains("exceeds grid limits") =>
                {
                    return Err(SheetsError::RowNotFound(row));
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn put_values(&mut self, range: &str, value: &str) -> Result<(), SheetsError> {
        let token = self.token.token(&self.client).await?;
        let url = format!(
            "{}/{}/values/{}?valueInputOption=RAW",
            crate::SHEETS_API_BASE,
            self.spreadsheet_id,
            encode_range(range)
        );
        let body = ValueRange {
            values: vec![vec![value.to_string()]],
        };

        let response = self
            .client
            .put(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(api_error(status, response.text().await.unwrap_or_default()));
        }
        Ok(())
    }
}

/// A1 range with the worksheet title quoted, so titles containing spaces
/// or punctuation survive. Embedded single quotes double per A1 rules.
fn a1_range(worksheet: &str, cells: &str) -> String {
    format!("'{}'!{}", worksheet.replace('\'', "''"), cells)
}

/// Percent-encodes a range for use as a URL path segment. Unreserved
/// characters and the A1 separators pass through untouched.
fn encode_range(range: &str) -> String {
    let mut out = String::with_capacity(range.len());
    for byte in range.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'!' | b':' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn api_error(status: StatusCode, body: String) -> SheetsError {
    let message = body.chars().take(300).collect::<String>();
    SheetsError::Api { status, message }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(titles: &[&str]) -> Vec<String> {
        titles.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_a1_range_quotes_worksheet_titles() {
        assert_eq!(a1_range("People Data", "A2:ZZ"), "'People Data'!A2:ZZ");
        assert_eq!(a1_range("Sheet1", "1:1"), "'Sheet1'!1:1");
        assert_eq!(a1_range("Bob's List", "B3"), "'Bob''s List'!B3");
    }

    #[test]
    fn test_encode_range_escapes_path_hostile_characters() {
        assert_eq!(encode_range("'People Data'!A2:ZZ"), "%27People%20Data%27!A2:ZZ");
        assert_eq!(encode_range("'Q&A 50%'!A1"), "%27Q%26A%2050%25%27!A1");
        assert_eq!(encode_range("'Sheet1'!B2"), "%27Sheet1%27!B2");
    }

    #[test]
    fn test_col_letter() {
        assert_eq!(col_letter(0), "A");
        assert_eq!(col_letter(3), "D");
        assert_eq!(col_letter(25), "Z");
        assert_eq!(col_letter(26), "AA");
        assert_eq!(col_letter(27), "AB");
        assert_eq!(col_letter(51), "AZ");
        assert_eq!(col_letter(52), "BA");
    }

    #[test]
    fn test_resolve_columns_full_header() {
        let columns = resolve_columns(&header(&[
            "Name",
            "Email",
            "Location",
            "status",
            "instagram_url",
            "confidence",
            "result",
        ]))
        .unwrap();

        assert_eq!(columns.name, 0);
        assert_eq!(columns.email, Some(1));
        assert_eq!(columns.location, Some(2));
        assert_eq!(columns.status, 3);
        assert_eq!(columns.url, 4);
        assert_eq!(columns.confidence, 5);
        assert_eq!(columns.result, 6);
        assert!(columns.new_headers.is_empty());
    }

    #[test]
    fn test_resolve_columns_appends_missing_output_columns() {
        let columns = resolve_columns(&header(&["Name", "Location"])).unwrap();

        assert_eq!(columns.status, 2);
        assert_eq!(columns.url, 3);
        assert_eq!(columns.confidence, 4);
        assert_eq!(columns.result, 5);
        assert_eq!(
            columns.new_headers,
            vec![
                (2, STATUS_COLUMN),
                (3, URL_COLUMN),
                (4, CONFIDENCE_COLUMN),
                (5, RESULT_COLUMN)
            ]
        );
    }

    #[test]
    fn test_resolve_columns_requires_name() {
        let result = resolve_columns(&header(&["Email", "Location"]));
        assert!(matches!(result, Err(SheetsError::MissingColumn("name"))));
    }

    #[test]
    fn test_collect_rows_skips_processed_and_blank_rows() {
        let columns = resolve_columns(&header(&["Name", "Location", "Email", "status"])).unwrap();
        let grid = vec![
            vec![
                "Jane Doe".to_string(),
                "Austin".to_string(),
                "jane@example.com".to_string(),
                String::new(),
            ],
            vec![String::new(), String::new()],
            vec![
                "John Smith".to_string(),
                String::new(),
                String::new(),
                "complete".to_string(),
            ],
            vec![
                "Ada Lovelace".to_string(),
                "London".to_string(),
                String::new(),
                "error".to_string(),
            ],
        ];

        let rows = collect_rows(&grid, &columns);

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].row_index, 2);
        assert_eq!(rows[0].name, "Jane Doe");
        assert_eq!(rows[0].location.as_deref(), Some("Austin"));
        assert_eq!(rows[0].email.as_deref(), Some("jane@example.com"));
        // errored rows come back for another attempt
        assert_eq!(rows[1].row_index, 5);
        assert_eq!(rows[1].name, "Ada Lovelace");
        assert_eq!(rows[1].email, None);
    }

    #[test]
    fn test_collect_rows_skips_missing_name() {
        let columns = resolve_columns(&header(&["Name", "status"])).unwrap();
        let grid = vec![vec![String::new(), "pendingish".to_string()]];
        assert!(collect_rows(&grid, &columns).is_empty());
    }

    #[test]
    fn test_value_range_deserializes_without_values() {
        let range: ValueRange = serde_json::from_str(r#"{"range":"People Data!A2:ZZ"}"#).unwrap();
        assert!(range.values.is_empty());
    }

    #[test]
    fn test_transient_classification() {
        assert!(
            SheetsError::Api {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: String::new()
            }
            .is_transient()
        );
        assert!(
            SheetsError::Api {
                status: StatusCode::TOO_MANY_REQUESTS,
                message: String::new()
            }
            .is_transient()
        );
        assert!(
            !SheetsError::Api {
                status: StatusCode::FORBIDDEN,
                message: String::new()
            }
            .is_transient()
        );
        assert!(!SheetsError::RowNotFound(3).is_transient());
    }
}
