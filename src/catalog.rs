//! Google Books catalog client
//!
//! Fetches volume search results and details, normalizes the loosely-typed
//! upstream JSON into fixed shapes, and applies a relevance post-filter.
//! The upstream ranking is too loose for author-name queries, so results
//! that do not textually match the term are dropped here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::config::CatalogConfig;
use crate::description;
use crate::error::ServiceError;

/// Search terms are trimmed and bounded before they hit the wire.
const MAX_TERM_LEN: usize = 100;

/// One normalized search hit. Transient, never persisted as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub source_id: String,
    pub title: String,
    pub authors: Vec<String>,
    pub published_date: String,
    pub cover_url: Option<String>,
}

/// Full details for a single volume, with the description already cleaned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookDetails {
    pub source_id: String,
    pub title: String,
    pub subtitle: Option<String>,
    pub authors: Vec<String>,
    pub publisher: Option<String>,
    pub published_date: Option<String>,
    pub description: String,
}

/// Seam over the external catalog so the save and recommendation flows can
/// run against a deterministic stub in tests.
#[async_trait]
pub trait BookSource: Send + Sync {
    async fn search(&self, term: &str) -> Result<Vec<SearchResult>, ServiceError>;
    async fn details(&self, volume_id: &str) -> Result<BookDetails, ServiceError>;
}

pub struct GoogleBooksClient {
    http: reqwest::Client,
    base_url: String,
    language: String,
}

impl GoogleBooksClient {
    pub fn new(config: &CatalogConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            language: config.language.clone(),
        })
    }

    async fn fetch_json(&self, url: &str) -> Result<Value, ServiceError> {
        debug!("catalog request: {}", url);
        let response = self
            .http
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status.as_u16()));
        }

        response.json::<Value>().await.map_err(transport_error)
    }
}

#[async_trait]
impl BookSource for GoogleBooksClient {
    async fn search(&self, term: &str) -> Result<Vec<SearchResult>, ServiceError> {
        let term = validate_term(term)?;
        let url = format!(
            "{}?q={}&langRestrict={}",
            self.base_url,
            urlencoding::encode(term),
            self.language
        );
        let body = self.fetch_json(&url).await?;
        Ok(parse_search_items(&body, term))
    }

    async fn details(&self, volume_id: &str) -> Result<BookDetails, ServiceError> {
        let id = volume_id.trim();
        if id.is_empty() {
            return Err(ServiceError::Validation("volume id must not be empty".into()));
        }
        let url = format!("{}/{}", self.base_url, urlencoding::encode(id));
        let body = self.fetch_json(&url).await?;
        parse_details(&body, id)
    }
}

/// Trim and bound the search term.
pub fn validate_term(term: &str) -> Result<&str, ServiceError> {
    let trimmed = term.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::Validation("search term must not be empty".into()));
    }
    if trimmed.chars().count() > MAX_TERM_LEN {
        return Err(ServiceError::Validation(format!(
            "search term must be at most {MAX_TERM_LEN} characters"
        )));
    }
    Ok(trimmed)
}

/// Timeouts and connection failures are upstream trouble, not caller error.
fn transport_error(err: reqwest::Error) -> ServiceError {
    ServiceError::Remote {
        status: err.status().map(|s| s.as_u16()),
    }
}

/// 404 means the record does not exist, other 4xx means the request was
/// bad; everything else is the upstream misbehaving and worth a retry by
/// the caller.
fn status_error(status: u16) -> ServiceError {
    match status {
        404 => ServiceError::NotFound("the catalog has no such record".into()),
        400..=499 => ServiceError::Validation(format!(
            "the catalog rejected the request (status {status})"
        )),
        _ => ServiceError::Remote {
            status: Some(status),
        },
    }
}

/// Walk the upstream item list. Items without a usable id or title are
/// skipped individually; one bad item never aborts the search. Upstream
/// order is preserved, the relevance filter is the only transformation
/// that changes the count.
fn parse_search_items(body: &Value, term: &str) -> Vec<SearchResult> {
    let Some(items) = body.get("items").and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut results = Vec::new();
    for item in items {
        let Some(result) = parse_search_item(item) else {
            debug!("skipping search item without id or title");
            continue;
        };
        if matches_term(term, &result) {
            results.push(result);
        }
    }
    results
}

fn parse_search_item(item: &Value) -> Option<SearchResult> {
    let source_id = non_empty_str(item.get("id"))?;
    let info = item.get("volumeInfo")?;
    let title = non_empty_str(info.get("title"))?;

    let authors = string_list(info.get("authors"))
        .unwrap_or_else(|| vec!["Unknown Author".to_string()]);
    let published_date = non_empty_str(info.get("publishedDate"))
        .unwrap_or_else(|| "Unknown Date".to_string());
    let cover_url = info
        .get("imageLinks")
        .and_then(|links| links.get("thumbnail"))
        .and_then(Value::as_str)
        .map(str::to_string);

    Some(SearchResult {
        source_id,
        title,
        authors,
        published_date,
        cover_url,
    })
}

/// A hit survives only if every word of the term appears, case-insensitively,
/// in the title or in at least one author name.
fn matches_term(term: &str, result: &SearchResult) -> bool {
    let title = result.title.to_lowercase();
    let authors: Vec<String> = result.authors.iter().map(|a| a.to_lowercase()).collect();

    term.to_lowercase().split_whitespace().all(|word| {
        title.contains(word) || authors.iter().any(|author| author.contains(word))
    })
}

fn parse_details(body: &Value, volume_id: &str) -> Result<BookDetails, ServiceError> {
    let info = body
        .get("volumeInfo")
        .filter(|v| v.as_object().is_some_and(|m| !m.is_empty()))
        .ok_or_else(|| {
            ServiceError::NotFound(format!("no volume info for '{volume_id}'"))
        })?;

    let title = non_empty_str(info.get("title")).ok_or_else(|| {
        ServiceError::NotFound(format!("volume '{volume_id}' has no usable title"))
    })?;

    // Some volumes carry a full timestamp; only the date part is meaningful.
    let published_date = non_empty_str(info.get("publishedDate")).map(|date| {
        match date.split_once('T') {
            Some((day, _)) => day.to_string(),
            None => date,
        }
    });

    let description = info
        .get("description")
        .and_then(Value::as_str)
        .map(description::clean_default)
        .unwrap_or_default();

    Ok(BookDetails {
        source_id: volume_id.to_string(),
        title,
        subtitle: non_empty_str(info.get("subtitle")),
        authors: string_list(info.get("authors")).unwrap_or_default(),
        publisher: non_empty_str(info.get("publisher")),
        published_date,
        description,
    })
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn string_list(value: Option<&Value>) -> Option<Vec<String>> {
    let entries: Vec<String> = value?
        .as_array()?
        .iter()
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    if entries.is_empty() {
        None
    } else {
        Some(entries)
    }
}
