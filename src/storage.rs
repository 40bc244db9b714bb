//! SQLite storage for users, books and per-user reading status
//!
//! The dedup rules live in the schema: books are unique by title and by
//! upstream source id, status rows are unique per (user, book) pair.
//! Constraint violations surface as typed conflicts instead of being
//! checked ahead of the insert, so concurrent saves cannot both pass an
//! "absent" check.

use chrono::NaiveDate;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ServiceError;

/// Lifecycle of a saved book for one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingStatus {
    ToRead,
    Reading,
    Completed,
}

impl ReadingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadingStatus::ToRead => "to_read",
            ReadingStatus::Reading => "reading",
            ReadingStatus::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "to_read" => Some(ReadingStatus::ToRead),
            "reading" => Some(ReadingStatus::Reading),
            "completed" => Some(ReadingStatus::Completed),
            _ => None,
        }
    }
}

impl ToSql for ReadingStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ReadingStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_str()?;
        ReadingStatus::parse(raw).ok_or(FromSqlError::InvalidType)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub created_at: String,
}

/// One catalog entry. `source_id` is the upstream volume id; `title` is
/// the dedup key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookRecord {
    pub id: i64,
    pub source_id: String,
    pub title: String,
    pub subtitle: Option<String>,
    pub authors: String,
    pub publisher: Option<String>,
    pub description: Option<String>,
    pub published_date: Option<NaiveDate>,
    pub created_at: String,
}

/// Fields for a new catalog entry, before an id exists.
#[derive(Debug, Clone)]
pub struct NewBook {
    pub source_id: String,
    pub title: String,
    pub subtitle: Option<String>,
    pub authors: String,
    pub publisher: Option<String>,
    pub description: Option<String>,
    pub published_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserBookRecord {
    pub id: i64,
    pub user_id: i64,
    pub book_id: i64,
    pub status: ReadingStatus,
    pub rating: Option<i64>,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: Option<String>,
}

/// Partial update for a status row. Only supplied fields change.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusPatch {
    pub status: Option<ReadingStatus>,
    pub rating: Option<i64>,
    pub notes: Option<String>,
}

impl StatusPatch {
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.rating.is_none() && self.notes.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StorageStats {
    pub users: usize,
    pub books: usize,
    pub statuses: usize,
}

/// SQLite storage manager
pub struct Storage {
    conn: Connection,
}

impl Storage {
    /// Open or create the database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ServiceError> {
        let conn = Connection::open(path)?;
        let storage = Self { conn };
        storage.init_schema()?;
        Ok(storage)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, ServiceError> {
        let conn = Connection::open_in_memory()?;
        let storage = Self { conn };
        storage.init_schema()?;
        Ok(storage)
    }

    fn init_schema(&self) -> Result<(), ServiceError> {
        self.conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                email TEXT UNIQUE,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS books (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_id TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL UNIQUE,
                subtitle TEXT,
                authors TEXT NOT NULL DEFAULT '',
                publisher TEXT,
                description TEXT,
                published_date TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS user_books (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                book_id INTEGER NOT NULL REFERENCES books(id) ON DELETE CASCADE,
                status TEXT NOT NULL DEFAULT 'to_read',
                rating INTEGER,
                notes TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT,
                UNIQUE(user_id, book_id)
            );

            CREATE INDEX IF NOT EXISTS idx_user_books_user ON user_books(user_id);
            "#,
        )?;
        Ok(())
    }

    // ---- users ----

    pub fn create_user(
        &self,
        username: &str,
        email: Option<&str>,
    ) -> Result<UserRecord, ServiceError> {
        self.conn
            .execute(
                "INSERT INTO users (username, email) VALUES (?1, ?2)",
                params![username, email],
            )
            .map_err(|e| write_error(e, "username or email already taken", "no such user"))?;

        let id = self.conn.last_insert_rowid();
        self.get_user(id)?
            .ok_or_else(|| ServiceError::NotFound(format!("user {id} not found")))
    }

    pub fn get_user(&self, id: i64) -> Result<Option<UserRecord>, ServiceError> {
        let user = self
            .conn
            .query_row(
                "SELECT id, username, email, created_at FROM users WHERE id = ?1",
                params![id],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn list_users(&self) -> Result<Vec<UserRecord>, ServiceError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, username, email, created_at FROM users ORDER BY id")?;
        let rows = stmt.query_map([], user_from_row)?;
        collect(rows)
    }

    // ---- books ----

    /// Insert a catalog entry unless one already exists for the same title
    /// (or the same source id), and return the surviving row. First writer
    /// wins; a later save of a same-titled book attaches to the existing
    /// entry.
    pub fn insert_book_if_absent(&mut self, book: &NewBook) -> Result<BookRecord, ServiceError> {
        let tx = self.conn.transaction()?;

        tx.execute(
            "INSERT OR IGNORE INTO books
                 (source_id, title, subtitle, authors, publisher, description, published_date)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                book.source_id,
                book.title,
                book.subtitle,
                book.authors,
                book.publisher,
                book.description,
                book.published_date.map(|d| d.to_string()),
            ],
        )?;

        let found = tx
            .query_row(
                &format!("{BOOK_COLUMNS} WHERE title = ?1"),
                params![book.title],
                book_from_row,
            )
            .optional()?
            .map(Ok)
            .unwrap_or_else(|| {
                // same source id resurfacing under a changed title
                tx.query_row(
                    &format!("{BOOK_COLUMNS} WHERE source_id = ?1"),
                    params![book.source_id],
                    book_from_row,
                )
            })?;

        tx.commit()?;
        Ok(found)
    }

    pub fn find_book_by_title(&self, title: &str) -> Result<Option<BookRecord>, ServiceError> {
        let book = self
            .conn
            .query_row(
                &format!("{BOOK_COLUMNS} WHERE title = ?1"),
                params![title],
                book_from_row,
            )
            .optional()?;
        Ok(book)
    }

    pub fn get_book(&self, id: i64) -> Result<Option<BookRecord>, ServiceError> {
        let book = self
            .conn
            .query_row(
                &format!("{BOOK_COLUMNS} WHERE id = ?1"),
                params![id],
                book_from_row,
            )
            .optional()?;
        Ok(book)
    }

    pub fn list_books(&self) -> Result<Vec<BookRecord>, ServiceError> {
        let mut stmt = self.conn.prepare(&format!("{BOOK_COLUMNS} ORDER BY id"))?;
        let rows = stmt.query_map([], book_from_row)?;
        collect(rows)
    }

    // ---- user book status ----

    /// Create the status row for (user, book). The UNIQUE pair constraint
    /// is the duplicate check; a violation is the conflict signal.
    pub fn insert_user_book(
        &self,
        user_id: i64,
        book_id: i64,
    ) -> Result<UserBookRecord, ServiceError> {
        self.conn
            .execute(
                "INSERT INTO user_books (user_id, book_id, status) VALUES (?1, ?2, ?3)",
                params![user_id, book_id, ReadingStatus::ToRead],
            )
            .map_err(|e| {
                write_error(e, "book is already saved by this user", "no such user or book")
            })?;

        let id = self.conn.last_insert_rowid();
        let row = self.conn.query_row(
            &format!("{USER_BOOK_COLUMNS} WHERE id = ?1"),
            params![id],
            user_book_from_row,
        )?;
        Ok(row)
    }

    pub fn get_user_book(
        &self,
        user_id: i64,
        book_id: i64,
    ) -> Result<Option<UserBookRecord>, ServiceError> {
        let row = self
            .conn
            .query_row(
                &format!("{USER_BOOK_COLUMNS} WHERE user_id = ?1 AND book_id = ?2"),
                params![user_id, book_id],
                user_book_from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn list_user_books(
        &self,
        user_id: i64,
        status: Option<ReadingStatus>,
    ) -> Result<Vec<UserBookRecord>, ServiceError> {
        match status {
            Some(status) => {
                let mut stmt = self.conn.prepare(&format!(
                    "{USER_BOOK_COLUMNS} WHERE user_id = ?1 AND status = ?2 ORDER BY id"
                ))?;
                let rows = stmt.query_map(params![user_id, status], user_book_from_row)?;
                collect(rows)
            }
            None => {
                let mut stmt = self.conn.prepare(&format!(
                    "{USER_BOOK_COLUMNS} WHERE user_id = ?1 ORDER BY id"
                ))?;
                let rows = stmt.query_map(params![user_id], user_book_from_row)?;
                collect(rows)
            }
        }
    }

    /// Apply a partial update to the (user, book) status row. Only the
    /// fields present in the patch are touched; `updated_at` is stamped
    /// whenever anything changes.
    pub fn update_user_book(
        &self,
        user_id: i64,
        book_id: i64,
        patch: &StatusPatch,
    ) -> Result<UserBookRecord, ServiceError> {
        if patch.is_empty() {
            return self.get_user_book(user_id, book_id)?.ok_or_else(|| {
                ServiceError::NotFound(status_row_name(user_id, book_id))
            });
        }

        let mut set_clauses: Vec<&str> = Vec::new();
        let mut values: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(status) = patch.status {
            set_clauses.push("status = ?");
            values.push(Box::new(status));
        }
        if let Some(rating) = patch.rating {
            set_clauses.push("rating = ?");
            values.push(Box::new(rating));
        }
        if let Some(ref notes) = patch.notes {
            set_clauses.push("notes = ?");
            values.push(Box::new(notes.clone()));
        }

        let sql = format!(
            "UPDATE user_books SET {}, updated_at = datetime('now') WHERE user_id = ? AND book_id = ?",
            set_clauses.join(", ")
        );
        values.push(Box::new(user_id));
        values.push(Box::new(book_id));

        let value_refs: Vec<&dyn ToSql> = values.iter().map(|v| v.as_ref()).collect();
        let changed = self.conn.execute(&sql, value_refs.as_slice())?;
        if changed == 0 {
            return Err(ServiceError::NotFound(status_row_name(user_id, book_id)));
        }

        self.get_user_book(user_id, book_id)?
            .ok_or_else(|| ServiceError::NotFound(status_row_name(user_id, book_id)))
    }

    pub fn delete_user_book(&self, user_id: i64, book_id: i64) -> Result<(), ServiceError> {
        let deleted = self.conn.execute(
            "DELETE FROM user_books WHERE user_id = ?1 AND book_id = ?2",
            params![user_id, book_id],
        )?;
        if deleted == 0 {
            return Err(ServiceError::NotFound(status_row_name(user_id, book_id)));
        }
        Ok(())
    }

    pub fn stats(&self) -> Result<StorageStats, ServiceError> {
        let users: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        let books: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM books", [], |row| row.get(0))?;
        let statuses: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM user_books", [], |row| row.get(0))?;

        Ok(StorageStats {
            users: users as usize,
            books: books as usize,
            statuses: statuses as usize,
        })
    }
}

const BOOK_COLUMNS: &str = "SELECT id, source_id, title, subtitle, authors, publisher, \
                            description, published_date, created_at FROM books";
const USER_BOOK_COLUMNS: &str = "SELECT id, user_id, book_id, status, rating, notes, \
                                 created_at, updated_at FROM user_books";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn book_from_row(row: &Row<'_>) -> rusqlite::Result<BookRecord> {
    let published_date: Option<String> = row.get(7)?;
    Ok(BookRecord {
        id: row.get(0)?,
        source_id: row.get(1)?,
        title: row.get(2)?,
        subtitle: row.get(3)?,
        authors: row.get(4)?,
        publisher: row.get(5)?,
        description: row.get(6)?,
        published_date: published_date
            .and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
        created_at: row.get(8)?,
    })
}

fn user_book_from_row(row: &Row<'_>) -> rusqlite::Result<UserBookRecord> {
    Ok(UserBookRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        book_id: row.get(2)?,
        status: row.get(3)?,
        rating: row.get(4)?,
        notes: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn collect<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
) -> Result<Vec<T>, ServiceError> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn status_row_name(user_id: i64, book_id: i64) -> String {
    format!("no status for user {user_id} and book {book_id}")
}

/// Turn constraint violations into the taxonomy: UNIQUE means conflict,
/// a foreign key miss means the referenced row does not exist.
fn write_error(err: rusqlite::Error, conflict: &str, missing: &str) -> ServiceError {
    if let rusqlite::Error::SqliteFailure(inner, _) = &err {
        if inner.code == rusqlite::ErrorCode::ConstraintViolation {
            if inner.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY {
                return ServiceError::NotFound(missing.to_string());
            }
            return ServiceError::Conflict(conflict.to_string());
        }
    }
    ServiceError::Storage(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_book(source_id: &str, title: &str) -> NewBook {
        NewBook {
            source_id: source_id.to_string(),
            title: title.to_string(),
            subtitle: None,
            authors: "Frank Herbert".to_string(),
            publisher: Some("Ace".to_string()),
            description: Some("A desert planet epic.".to_string()),
            published_date: NaiveDate::from_ymd_opt(1965, 8, 1),
        }
    }

    #[test]
    fn insert_and_find_book() {
        let mut storage = Storage::open_in_memory().unwrap();
        let book = storage.insert_book_if_absent(&make_book("id-1", "Dune")).unwrap();

        let found = storage.find_book_by_title("Dune").unwrap().unwrap();
        assert_eq!(found.id, book.id);
        assert_eq!(found.source_id, "id-1");
        assert_eq!(found.published_date, NaiveDate::from_ymd_opt(1965, 8, 1));
    }

    #[test]
    fn same_title_from_another_source_reuses_the_entry() {
        let mut storage = Storage::open_in_memory().unwrap();
        let first = storage.insert_book_if_absent(&make_book("id-1", "Dune")).unwrap();
        let second = storage.insert_book_if_absent(&make_book("id-2", "Dune")).unwrap();

        assert_eq!(first.id, second.id);
        // first writer wins
        assert_eq!(second.source_id, "id-1");
        assert_eq!(storage.stats().unwrap().books, 1);
    }

    #[test]
    fn same_source_id_with_changed_title_reuses_the_entry() {
        let mut storage = Storage::open_in_memory().unwrap();
        let first = storage.insert_book_if_absent(&make_book("id-1", "Dune")).unwrap();
        let second = storage
            .insert_book_if_absent(&make_book("id-1", "Dune (Revised)"))
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(storage.stats().unwrap().books, 1);
    }

    #[test]
    fn duplicate_username_is_a_conflict() {
        let storage = Storage::open_in_memory().unwrap();
        storage.create_user("frank", None).unwrap();
        let err = storage.create_user("frank", None).unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[test]
    fn duplicate_save_is_a_conflict() {
        let mut storage = Storage::open_in_memory().unwrap();
        let user = storage.create_user("frank", None).unwrap();
        let book = storage.insert_book_if_absent(&make_book("id-1", "Dune")).unwrap();

        let row = storage.insert_user_book(user.id, book.id).unwrap();
        assert_eq!(row.status, ReadingStatus::ToRead);

        let err = storage.insert_user_book(user.id, book.id).unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
        assert_eq!(storage.stats().unwrap().statuses, 1);
    }

    #[test]
    fn unknown_user_is_not_found_not_conflict() {
        let mut storage = Storage::open_in_memory().unwrap();
        let book = storage.insert_book_if_absent(&make_book("id-1", "Dune")).unwrap();

        let err = storage.insert_user_book(99, book.id).unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[test]
    fn two_users_can_save_the_same_title() {
        let mut storage = Storage::open_in_memory().unwrap();
        let alice = storage.create_user("alice", None).unwrap();
        let bob = storage.create_user("bob", None).unwrap();

        let first = storage.insert_book_if_absent(&make_book("id-1", "Dune")).unwrap();
        storage.insert_user_book(alice.id, first.id).unwrap();

        let second = storage.insert_book_if_absent(&make_book("id-2", "Dune")).unwrap();
        storage.insert_user_book(bob.id, second.id).unwrap();

        let stats = storage.stats().unwrap();
        assert_eq!(stats.books, 1);
        assert_eq!(stats.statuses, 2);
    }

    #[test]
    fn list_filters_by_status() {
        let mut storage = Storage::open_in_memory().unwrap();
        let user = storage.create_user("frank", None).unwrap();
        let dune = storage.insert_book_if_absent(&make_book("id-1", "Dune")).unwrap();
        let hobbit = storage
            .insert_book_if_absent(&make_book("id-2", "The Hobbit"))
            .unwrap();

        storage.insert_user_book(user.id, dune.id).unwrap();
        storage.insert_user_book(user.id, hobbit.id).unwrap();
        storage
            .update_user_book(
                user.id,
                hobbit.id,
                &StatusPatch {
                    status: Some(ReadingStatus::Completed),
                    ..Default::default()
                },
            )
            .unwrap();

        let all = storage.list_user_books(user.id, None).unwrap();
        assert_eq!(all.len(), 2);

        let completed = storage
            .list_user_books(user.id, Some(ReadingStatus::Completed))
            .unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].book_id, hobbit.id);
    }

    #[test]
    fn patch_touches_only_supplied_fields() {
        let mut storage = Storage::open_in_memory().unwrap();
        let user = storage.create_user("frank", None).unwrap();
        let book = storage.insert_book_if_absent(&make_book("id-1", "Dune")).unwrap();
        storage.insert_user_book(user.id, book.id).unwrap();

        let updated = storage
            .update_user_book(
                user.id,
                book.id,
                &StatusPatch {
                    rating: Some(5),
                    notes: Some("a favourite".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(updated.status, ReadingStatus::ToRead);
        assert_eq!(updated.rating, Some(5));
        assert_eq!(updated.notes.as_deref(), Some("a favourite"));
        assert!(updated.updated_at.is_some());
    }

    #[test]
    fn patch_on_missing_row_is_not_found() {
        let storage = Storage::open_in_memory().unwrap();
        let err = storage
            .update_user_book(
                1,
                1,
                &StatusPatch {
                    status: Some(ReadingStatus::Reading),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[test]
    fn delete_then_delete_again() {
        let mut storage = Storage::open_in_memory().unwrap();
        let user = storage.create_user("frank", None).unwrap();
        let book = storage.insert_book_if_absent(&make_book("id-1", "Dune")).unwrap();
        storage.insert_user_book(user.id, book.id).unwrap();

        storage.delete_user_book(user.id, book.id).unwrap();
        let err = storage.delete_user_book(user.id, book.id).unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[test]
    fn absent_date_stays_absent() {
        let mut storage = Storage::open_in_memory().unwrap();
        let mut book = make_book("id-1", "Dune");
        book.published_date = None;
        let stored = storage.insert_book_if_absent(&book).unwrap();
        assert_eq!(stored.published_date, None);
    }
}
