mod parser;
pub mod auth;
pub mod config;
pub mod matcher;
pub mod monitor;
pub mod search;
pub mod sheets;
pub mod types;

pub use search::SearchClient;
pub use sheets::SheetsClient;

pub(crate) const SEARCH_URL: &str = "https://www.google.com/search";
pub(crate) const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";
