use reqwest::{Client, StatusCode};

use crate::config::Config;
use crate::parser::{self, ParseError};
use crate::types::Candidate;

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Search provider throttled the request: {0}")]
    RateLimited(String),
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
}

/// Issues web searches scoped to Instagram and extracts profile candidates.
#[derive(Debug, Clone)]
pub struct SearchClient {
    client: Client,
    search_url: String,
    result_count: u32,
}

impl SearchClient {
    pub fn new(config: &Config) -> Result<Self, SearchError> {
        let client = Client::builder()
            .timeout(config.http_timeout)
            .user_agent(format!(
                "{}/{}",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION")
            ))
            .build()?;

        Ok(Self {
            client,
            search_url: crate::SEARCH_URL.to_string(),
            result_count: 20,
        })
    }

    /// Runs one search for `name` (optionally narrowed by `location`) and
    /// returns the finite list of candidate profiles found on the first
    /// results page.
    pub async fn find_candidates(
        &self,
        name: &str,
        location: Option<&str>,
    ) -> Result<Vec<Candidate>, SearchError> {
        let query = build_query(name, location);
        log::debug!("Searching for '{}'", query);

        let num = self.result_count.to_string();
        let response = self
            .client
            .get(&self.search_url)
            .query(&[("q", query.as_str()), ("num", num.as_str()), ("hl", "en")])
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE {
            return Err(SearchError::RateLimited(format!("status {status}")));
        }

        let html = response.error_for_status()?.text().await?;
        if is_captcha_page(&html) {
            return Err(SearchError::RateLimited(
                "captcha interstitial served".to_string(),
            ));
        }

        let candidates = parser::parse_serp(&html)?;
        log::info!("Found {} candidate profiles for '{}'", candidates.len(), name);
        Ok(candidates)
    }
}

/// Builds the provider query, punctuation stripped so quoted or accented
/// sheet entries do not distort the search.
fn build_query(name: &str, location: Option<&str>) -> String {
    let mut query = format!("site:instagram.com {}", clean_term(name));
    if let Some(location) = location {
        let location = clean_term(location);
        if !location.is_empty() {
            query.push(' ');
            query.push_str(&location);
        }
    }
    query.push_str(" instagram");
    query
}

fn clean_term(term: &str) -> String {
    term.chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_captcha_page(html: &str) -> bool {
    html.contains("unusual traffic") || html.contains("/sorry/index") || html.contains("g-recaptcha")
}
