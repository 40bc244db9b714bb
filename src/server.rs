//! Unix socket server for the book tracking operations
//!
//! Speaks one JSON request per line, one JSON response per line, in the
//! shapes defined in [`crate::payload`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::catalog::{BookSource, GoogleBooksClient};
use crate::config::Config;
use crate::payload::{Request, Response};
use crate::recommend::{NoopRecommender, Recommender};
use crate::service::{self, ServiceState};
use crate::storage::Storage;

/// Book tracking server that listens on a Unix socket
pub struct BookServer {
    socket_path: PathBuf,
    state: Arc<Mutex<ServiceState>>,
}

impl BookServer {
    /// Create a server with the given configuration and the live catalog
    /// client. No recommendation provider is wired in.
    pub fn new(config: Config) -> Result<Self, Box<dyn std::error::Error>> {
        let catalog = GoogleBooksClient::new(&config.catalog)?;
        Self::with_parts(config, Box::new(catalog), Box::new(NoopRecommender))
    }

    /// Create a server with default configuration
    pub fn with_defaults() -> Result<Self, Box<dyn std::error::Error>> {
        Self::new(Config::default())
    }

    /// Create a server with explicit catalog and recommender
    /// implementations.
    pub fn with_parts(
        config: Config,
        catalog: Box<dyn BookSource>,
        recommender: Box<dyn Recommender>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        if let Some(parent) = config.server.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let storage = Storage::open(&config.server.db_path)?;
        let state = Arc::new(Mutex::new(ServiceState {
            storage,
            catalog,
            recommender,
        }));

        Ok(Self {
            socket_path: config.server.socket_path,
            state,
        })
    }

    /// Start the server and listen for connections
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        // Remove existing socket file if present
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        info!("Book tracking server listening on {:?}", self.socket_path);

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, state).await {
                            error!("Connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }

    /// Get the socket path
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Process a single request (for direct integration without a socket)
    pub async fn process(&self, request: Request) -> Response {
        dispatch(&self.state, request).await
    }
}

/// Handle a single client connection
async fn handle_connection(
    stream: UnixStream,
    state: Arc<Mutex<ServiceState>>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => dispatch(&state, request).await,
            Err(e) => {
                warn!("Failed to parse request: {}", e);
                Response::parse_error(&format!("bad request: {e}"))
            }
        };

        let response_json = serde_json::to_string(&response)?;
        writer.write_all(response_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        line.clear();
    }

    Ok(())
}

/// Run one operation against the shared state and wrap the outcome.
async fn dispatch(state: &Mutex<ServiceState>, request: Request) -> Response {
    let mut state = state.lock().await;

    match request {
        Request::SearchBooks { term } => respond(state.catalog.search(&term).await),
        Request::BookDetails { id } => respond(state.catalog.details(&id).await),
        Request::SaveBook { id, user_id } => {
            respond(service::save_book(&mut state, &id, user_id).await)
        }
        Request::CreateUser { username, email } => {
            respond(service::create_user(&mut state, &username, email.as_deref()))
        }
        Request::ListUsers => respond(state.storage.list_users()),
        Request::ListBooks => respond(state.storage.list_books()),
        Request::ListUserBooks { user_id, status } => {
            respond(state.storage.list_user_books(user_id, status))
        }
        Request::UpdateUserBook {
            user_id,
            book_id,
            patch,
        } => respond(service::update_status(&mut state, user_id, book_id, &patch)),
        Request::DeleteUserBook { user_id, book_id } => respond(
            state
                .storage
                .delete_user_book(user_id, book_id)
                .map(|()| serde_json::json!({ "deleted": true })),
        ),
        Request::Recommend { title } => {
            respond(service::recommend_similar(&mut state, &title).await)
        }
        Request::Stats => respond(state.storage.stats()),
    }
}

fn respond<T: serde::Serialize>(result: Result<T, crate::error::ServiceError>) -> Response {
    match result {
        Ok(data) => Response::ok(data),
        Err(err) => Response::error(&err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{BookDetails, SearchResult};
    use crate::error::ServiceError;
    use crate::payload::ResponseStatus;
    use async_trait::async_trait;
    use serde_json::json;

    struct SingleVolume;

    #[async_trait]
    impl BookSource for SingleVolume {
        async fn search(&self, term: &str) -> Result<Vec<SearchResult>, ServiceError> {
            if "dune".contains(&term.to_lowercase()) {
                Ok(vec![SearchResult {
                    source_id: "id-42".to_string(),
                    title: "Dune".to_string(),
                    authors: vec!["Frank Herbert".to_string()],
                    published_date: "1965".to_string(),
                    cover_url: None,
                }])
            } else {
                Ok(Vec::new())
            }
        }

        async fn details(&self, volume_id: &str) -> Result<BookDetails, ServiceError> {
            if volume_id != "id-42" {
                return Err(ServiceError::NotFound(format!("no volume '{volume_id}'")));
            }
            Ok(BookDetails {
                source_id: "id-42".to_string(),
                title: "Dune".to_string(),
                subtitle: None,
                authors: vec!["Frank Herbert".to_string()],
                publisher: None,
                published_date: Some("1965".to_string()),
                description: String::new(),
            })
        }
    }

    fn make_server(dir: &tempfile::TempDir) -> BookServer {
        let mut config = Config::default();
        config.server.db_path = dir.path().join("books.db");
        config.server.socket_path = dir.path().join("test.sock");
        BookServer::with_parts(config, Box::new(SingleVolume), Box::new(NoopRecommender))
            .unwrap()
    }

    #[tokio::test]
    async fn save_flow_over_the_dispatcher() {
        let dir = tempfile::tempdir().unwrap();
        let server = make_server(&dir);

        let response = server
            .process(Request::CreateUser {
                username: "frank".to_string(),
                email: None,
            })
            .await;
        assert_eq!(response.status, ResponseStatus::Ok);
        let user_id = response.data.unwrap()["id"].as_i64().unwrap();

        let response = server
            .process(Request::SaveBook {
                id: "id-42".to_string(),
                user_id,
            })
            .await;
        assert_eq!(response.status, ResponseStatus::Ok);
        assert_eq!(response.data.unwrap()["status"], json!("to_read"));

        // second save of the same pair conflicts
        let response = server
            .process(Request::SaveBook {
                id: "id-42".to_string(),
                user_id,
            })
            .await;
        assert_eq!(response.status, ResponseStatus::Error);
        assert_eq!(response.error.unwrap().kind, "conflict");
    }

    #[tokio::test]
    async fn unknown_volume_reports_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let server = make_server(&dir);

        let response = server
            .process(Request::BookDetails {
                id: "missing".to_string(),
            })
            .await;
        assert_eq!(response.status, ResponseStatus::Error);
        assert_eq!(response.error.unwrap().kind, "not_found");
    }

    #[tokio::test]
    async fn search_returns_normalized_hits() {
        let dir = tempfile::tempdir().unwrap();
        let server = make_server(&dir);

        let response = server
            .process(Request::SearchBooks {
                term: "dune".to_string(),
            })
            .await;
        assert_eq!(response.status, ResponseStatus::Ok);
        let data = response.data.unwrap();
        assert_eq!(data[0]["title"], json!("Dune"));
    }
}
