//! Request and response payloads for the socket API

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ServiceError;
use crate::storage::{ReadingStatus, StatusPatch};

/// One operation per line, tagged by `op`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    SearchBooks {
        term: String,
    },
    BookDetails {
        id: String,
    },
    SaveBook {
        id: String,
        user_id: i64,
    },
    CreateUser {
        username: String,
        #[serde(default)]
        email: Option<String>,
    },
    ListUsers,
    ListBooks,
    ListUserBooks {
        user_id: i64,
        #[serde(default)]
        status: Option<ReadingStatus>,
    },
    UpdateUserBook {
        user_id: i64,
        book_id: i64,
        #[serde(default)]
        patch: StatusPatch,
    },
    DeleteUserBook {
        user_id: i64,
        book_id: i64,
    },
    Recommend {
        title: String,
    },
    Stats,
}

/// Response sent back to the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub status: ResponseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Ok,
    Error,
}

/// Machine-readable error kind plus a human message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

impl Response {
    pub fn ok<T: Serialize>(data: T) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => Self {
                status: ResponseStatus::Ok,
                data: Some(value),
                error: None,
            },
            Err(err) => Self::failure("storage", &format!("serialization error: {err}")),
        }
    }

    pub fn error(err: &ServiceError) -> Self {
        Self::failure(err.kind(), &err.to_string())
    }

    /// A request line that did not parse at all.
    pub fn parse_error(message: &str) -> Self {
        Self::failure("validation", message)
    }

    fn failure(kind: &str, message: &str) -> Self {
        Self {
            status: ResponseStatus::Error,
            data: None,
            error: Some(ErrorBody {
                kind: kind.to_string(),
                message: message.to_string(),
            }),
        }
    }
}
