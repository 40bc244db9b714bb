//! Save/dedup and recommendation flows
//!
//! Ties the catalog client to storage: fetch details, attach-or-create the
//! catalog entry, create the per-user status row. All uniqueness decisions
//! are delegated to the storage constraints.

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::catalog::{BookDetails, BookSource, SearchResult};
use crate::error::ServiceError;
use crate::recommend::{title_part, Recommender, MAX_SUGGESTIONS};
use crate::storage::{NewBook, StatusPatch, Storage, UserBookRecord, UserRecord};

/// Everything one request handler needs.
pub struct ServiceState {
    pub storage: Storage,
    pub catalog: Box<dyn BookSource>,
    pub recommender: Box<dyn Recommender>,
}

/// Save an upstream volume for a user: fetch details, attach to (or
/// create) the catalog entry for that title, then create the status row
/// with status `to_read`. A second save of the same (user, book) pair is
/// a conflict, never an overwrite.
pub async fn save_book(
    state: &mut ServiceState,
    source_id: &str,
    user_id: i64,
) -> Result<UserBookRecord, ServiceError> {
    let details = state.catalog.details(source_id).await?;
    let book = state.storage.insert_book_if_absent(&new_book(&details))?;
    let row = state.storage.insert_user_book(user_id, book.id)?;
    info!("user {} saved '{}' (book {})", user_id, book.title, book.id);
    Ok(row)
}

/// Apply a partial status update after validating the rating range.
pub fn update_status(
    state: &mut ServiceState,
    user_id: i64,
    book_id: i64,
    patch: &StatusPatch,
) -> Result<UserBookRecord, ServiceError> {
    if let Some(rating) = patch.rating {
        if !(1..=5).contains(&rating) {
            return Err(ServiceError::Validation(
                "rating must be between 1 and 5".into(),
            ));
        }
    }
    state.storage.update_user_book(user_id, book_id, patch)
}

pub fn create_user(
    state: &mut ServiceState,
    username: &str,
    email: Option<&str>,
) -> Result<UserRecord, ServiceError> {
    let username = username.trim();
    if username.is_empty() {
        return Err(ServiceError::Validation("username must not be empty".into()));
    }
    state
        .storage
        .create_user(username, email.map(str::trim).filter(|e| !e.is_empty()))
}

/// Suggest similar books. The seed is resolved locally first so an
/// already-saved book does not cost a catalog round trip; each suggestion
/// is re-searched and the first hit kept. Suggestions the catalog cannot
/// resolve are dropped, not failed.
pub async fn recommend_similar(
    state: &mut ServiceState,
    title: &str,
) -> Result<Vec<SearchResult>, ServiceError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(ServiceError::Validation("title must not be empty".into()));
    }

    let (seed_title, authors, description) = match state.storage.find_book_by_title(title)? {
        Some(book) => {
            let authors = book
                .authors
                .split(", ")
                .filter(|a| !a.is_empty())
                .map(str::to_string)
                .collect();
            (book.title, authors, book.description.unwrap_or_default())
        }
        None => {
            let mut hits = state.catalog.search(title).await?;
            let Some(hit) = hits.drain(..).next() else {
                return Err(ServiceError::NotFound(format!(
                    "no book matching '{title}'"
                )));
            };
            let details = state.catalog.details(&hit.source_id).await?;
            (details.title, details.authors, details.description)
        }
    };

    let suggestions = state
        .recommender
        .similar_books(&seed_title, &authors, &description)
        .await?;

    let mut results: Vec<SearchResult> = Vec::new();
    for suggestion in suggestions.iter().take(MAX_SUGGESTIONS) {
        let name = title_part(suggestion);
        if name.is_empty() {
            continue;
        }
        match state.catalog.search(name).await {
            Ok(hits) => {
                if let Some(hit) = hits.into_iter().next() {
                    if !results.iter().any(|r| r.source_id == hit.source_id) {
                        results.push(hit);
                    }
                }
            }
            Err(err) => {
                warn!("suggestion lookup '{}' failed: {}", name, err);
            }
        }
    }
    Ok(results)
}

fn new_book(details: &BookDetails) -> NewBook {
    NewBook {
        source_id: details.source_id.clone(),
        title: details.title.clone(),
        subtitle: details.subtitle.clone(),
        authors: details.authors.join(", "),
        publisher: details.publisher.clone(),
        description: if details.description.is_empty() {
            None
        } else {
            Some(details.description.clone())
        },
        published_date: details
            .published_date
            .as_deref()
            .and_then(parse_published_date),
    }
}

/// Upstream dates come as full dates, year-month, bare years or junk.
/// Try each in turn; junk stores as absent instead of failing the save.
pub fn parse_published_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let raw = raw.split('T').next().unwrap_or(raw);

    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    if let Some((year, month)) = raw.split_once('-') {
        if let (Ok(year), Ok(month)) = (year.parse::<i32>(), month.parse::<u32>()) {
            if let Some(date) = NaiveDate::from_ymd_opt(year, month, 1) {
                return Some(date);
            }
        }
    }
    if let Ok(year) = raw.parse::<i32>() {
        return NaiveDate::from_ymd_opt(year, 1, 1);
    }
    None
}
