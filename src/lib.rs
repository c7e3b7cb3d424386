//! # tutor-graphql
//!
//! GraphQL API core for the tutoring platform.
//!
//! ## Features
//!
//! - **Keyset Pagination** - Opaque cursors and stable connections over sorted scans
//! - **Score Aggregation** - Session scores from nested per-expectation grades
//! - **Storage Seam** - Sorted range-scan trait plus an in-memory collection
//! - **GraphQL Schema** - Session and lesson resolvers with grading mutations
//! - **Layered Config** - Defaults, `tutor.toml` and `TUTOR_*` environment variables
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tutor_graphql::{MemoryCollection, PageRequest, Pager, PaginationConfig};
//! use tutor_graphql::model::Session;
//!
//! # async fn example(sessions: MemoryCollection<Session>) -> tutor_graphql::Result<()> {
//! let pager = Pager::new(PaginationConfig::default());
//! let page = pager
//!     .paginate::<Session, _>(&sessions, PageRequest::default())
//!     .await?;
//! println!("has next page: {}", page.page_info.has_next_page);
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod cursor;
pub mod model;
pub mod pagination;
pub mod schema;
pub mod scoring;
pub mod sort;
pub mod store;
pub mod telemetry;
pub mod types;

pub use auth::{extract_viewer, graphql_handler, Viewer};
pub use config::{ConfigError, PaginationConfig, TutorConfig};
pub use cursor::{Cursor, CursorCodec, SortValue};
pub use pagination::{Connection, Edge, PageInfo, PageRequest, Pager};
pub use scoring::{compute_score, ExpectationScore, Grade, GradeField, Response, ResponseTree};
pub use sort::{Direction, Document, SortField};
pub use store::{
    DocumentStore, Filter, MemoryCollection, RangePredicate, Scan, ScanQuery, SessionStore, StorageError,
};
pub use types::DateTime;

use async_graphql::ErrorExtensions;
use thiserror::Error;

/// Errors surfaced by the pagination and grading core
#[derive(Error, Debug)]
pub enum TutorError {
    #[error("Malformed cursor: {0}")]
    MalformedCursor(String),

    #[error("Invalid sort field '{field}' for {entity}")]
    InvalidSortField { entity: &'static str, field: String },

    #[error("Limit {limit} out of range (must be between 1 and {max})")]
    LimitOutOfRange { limit: i64, max: u32 },

    #[error(transparent)]
    StorageUnavailable(#[from] StorageError),

    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("Invalid grade: {0}")]
    InvalidGrade(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("session '{session_id}' belongs to lesson '{stored}', not '{requested}'")]
    LessonMismatch {
        session_id: String,
        stored: String,
        requested: String,
    },
}

impl TutorError {
    /// Stable machine-readable code, exposed as the `code` error extension
    pub fn code(&self) -> &'static str {
        match self {
            TutorError::MalformedCursor(_) => "MALFORMED_CURSOR",
            TutorError::InvalidSortField { .. } => "INVALID_SORT_FIELD",
            TutorError::LimitOutOfRange { .. } => "LIMIT_OUT_OF_RANGE",
            TutorError::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
            TutorError::NotFound { .. } => "NOT_FOUND",
            TutorError::InvalidGrade(_) => "INVALID_GRADE",
            TutorError::InvalidFilter(_) => "INVALID_FILTER",
            TutorError::LessonMismatch { .. } => "LESSON_MISMATCH",
        }
    }
}

impl ErrorExtensions for TutorError {
    fn extend(&self) -> async_graphql::Error {
        async_graphql::Error::new(self.to_string()).extend_with(|_, e| e.set("code", self.code()))
    }
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, TutorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(TutorError::MalformedCursor("x".into()).code(), "MALFORMED_CURSOR");
        assert_eq!(
            TutorError::LimitOutOfRange { limit: 0, max: 1000 }.code(),
            "LIMIT_OUT_OF_RANGE"
        );
        let err = TutorError::from(StorageError::Unavailable("down".into()));
        assert_eq!(err.code(), "STORAGE_UNAVAILABLE");
        assert_eq!(err.to_string(), "Storage unavailable: down");
    }

    #[test]
    fn test_error_extension_code() {
        let err = TutorError::InvalidSortField {
            entity: "session",
            field: "password".into(),
        }
        .extend();
        assert_eq!(err.message, "Invalid sort field 'password' for session");
        let code = err
            .extensions
            .as_ref()
            .and_then(|ext| ext.get("code"))
            .cloned();
        assert_eq!(code, Some(async_graphql::Value::from("INVALID_SORT_FIELD")));
    }
}
