//! Web search augmentation through the Google Custom Search JSON API.
//!
//! Result pages are fetched and reduced to their paragraph text. Pages with
//! too little prose are skipped, and whatever survives is prepended to the
//! user's message as context. Every failure here is non-fatal to the caller.

use std::error::Error as StdError;
use std::fmt;

use async_trait::async_trait;
use scraper::{Html, Selector};
use serde::Deserialize;
use tracing::debug;

use crate::core::config::SearchConfig;
use crate::utils::url::url_with_query;

pub const GOOGLE_SEARCH_ENDPOINT: &str = "https://www.googleapis.com/customsearch/v1";

/// Pages whose collapsed paragraph text is shorter than this are dropped.
pub const MIN_SUMMARY_CHARS: usize = 200;

#[derive(Debug)]
pub enum SearchError {
    Http(String),
    Status(u16),
    Decode(String),
}

impl fmt::Display for SearchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchError::Http(err) => write!(f, "search request failed: {err}"),
            SearchError::Status(status) => write!(f, "search returned HTTP {status}"),
            SearchError::Decode(err) => write!(f, "search response malformed: {err}"),
        }
    }
}

impl StdError for SearchError {}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchItem {
    #[serde(default)]
    pub title: String,
    pub link: String,
}

/// Source of context summaries for a user message.
#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn summaries(&self, query: &str) -> Result<Vec<String>, SearchError>;
}

pub struct GoogleSearch {
    client: reqwest::Client,
    settings: SearchConfig,
    endpoint: String,
}

impl GoogleSearch {
    pub fn new(client: reqwest::Client, settings: SearchConfig) -> Self {
        Self {
            client,
            settings,
            endpoint: GOOGLE_SEARCH_ENDPOINT.to_string(),
        }
    }

    fn search_url(&self, query: &str) -> Result<String, SearchError> {
        let mut params = vec![
            ("key", self.settings.api_key.clone()),
            ("cx", self.settings.engine_id.clone()),
            ("q", query.to_string()),
            ("num", self.settings.max_results.to_string()),
        ];
        if !self.settings.language.is_empty() {
            params.push(("lr", self.settings.language.clone()));
        }
        url_with_query(&self.endpoint, &params).map_err(|err| SearchError::Decode(err.to_string()))
    }

    async fn get_text(&self, url: &str) -> Result<String, SearchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| SearchError::Http(err.without_url().to_string()))?;
        if !response.status().is_success() {
            return Err(SearchError::Status(response.status().as_u16()));
        }
        response
            .text()
            .await
            .map_err(|err| SearchError::Decode(err.to_string()))
    }

    pub async fn results(&self, query: &str) -> Result<Vec<SearchItem>, SearchError> {
        let body = self.get_text(&self.search_url(query)?).await?;
        parse_results(&body)
    }
}

#[async_trait]
impl WebSearch for GoogleSearch {
    async fn summaries(&self, query: &str) -> Result<Vec<String>, SearchError> {
        let items = self.results(&search_query(query)).await?;
        let mut summaries = Vec::new();
        for item in items {
            match self.get_text(&item.link).await {
                Ok(html) => {
                    if let Some(summary) = extract_paragraph_text(&html) {
                        summaries.push(summary);
                    } else {
                        debug!(link = %item.link, "search result has too little text");
                    }
                }
                Err(err) => debug!(link = %item.link, error = %err, "skipping search result"),
            }
        }
        Ok(summaries)
    }
}

fn parse_results(body: &str) -> Result<Vec<SearchItem>, SearchError> {
    serde_json::from_str::<SearchResponse>(body)
        .map(|response| response.items)
        .map_err(|err| SearchError::Decode(err.to_string()))
}

/// Query text for a user message: a leading `@mention` is not part of it.
pub fn search_query(text: &str) -> String {
    let mut words = text.split_whitespace().peekable();
    let first_is_mention = words.peek().is_some_and(|word| word.starts_with('@'));
    let words: Vec<&str> = words.collect();
    if first_is_mention && words.len() > 1 {
        words[1..].join(" ")
    } else {
        words.join(" ")
    }
}

/// All `<p>` text of a page with whitespace collapsed, or `None` when there
/// is not enough of it to be useful.
pub fn extract_paragraph_text(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("p").ok()?;
    let raw: Vec<String> = document
        .select(&selector)
        .map(|paragraph| paragraph.text().collect::<String>())
        .collect();
    let text = raw.join(" ").split_whitespace().collect::<Vec<_>>().join(" ");
    (text.chars().count() >= MIN_SUMMARY_CHARS).then_some(text)
}

/// User turn with search summaries prepended as context.
pub fn augment_prompt(summaries: &[String], user_text: &str) -> String {
    if summaries.is_empty() {
        return user_text.to_string();
    }
    let mut prompt = String::from("Web search results for context:\n\n");
    for (index, summary) in summaries.iter().enumerate() {
        prompt.push_str(&format!("[{}] {}\n\n", index + 1, summary));
    }
    prompt.push_str("Question: ");
    prompt.push_str(user_text);
    prompt
}
