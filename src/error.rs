use serde_json::json;

use crate::feedback_gate::GateError;
use crate::photo::PhotoError;
use crate::view::ViewParamError;

/// Every failure a request can surface. The wire shape is always
/// `{code, message, details?}`; callers never depend on the Rust type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    BadParams(String),
    #[error("select a workspace first")]
    NoWorkspace,
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{message}")]
    Db {
        code: &'static str,
        message: String,
        table: Option<&'static str>,
    },
    #[error("{0}")]
    Io(String),
    #[error("{0}")]
    Export(String),
    #[error("{0}")]
    Bundle(String),
    #[error("unknown method: {0}")]
    NotImplemented(String),
}

impl AppError {
    pub fn bad_params(message: impl Into<String>) -> Self {
        AppError::BadParams(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        AppError::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        AppError::Conflict(message.into())
    }

    pub fn db(code: &'static str, e: impl std::fmt::Display) -> Self {
        AppError::Db {
            code,
            message: e.to_string(),
            table: None,
        }
    }

    pub fn db_table(code: &'static str, table: &'static str, e: impl std::fmt::Display) -> Self {
        AppError::Db {
            code,
            message: e.to_string(),
            table: Some(table),
        }
    }

    /// Stable snake_case code sent to the client.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::BadParams(_) => "bad_params",
            AppError::NoWorkspace => "no_workspace",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::Forbidden(_) => "forbidden",
            AppError::Db { code, .. } => code,
            AppError::Io(_) => "io_failed",
            AppError::Export(_) => "export_failed",
            AppError::Bundle(_) => "bundle_failed",
            AppError::NotImplemented(_) => "not_implemented",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            AppError::Db {
                table: Some(table), ..
            } => Some(json!({ "table": table })),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        AppError::db("db_query_failed", e)
    }
}

impl From<GateError> for AppError {
    fn from(e: GateError) -> Self {
        AppError::BadParams(e.to_string())
    }
}

impl From<PhotoError> for AppError {
    fn from(e: PhotoError) -> Self {
        AppError::BadParams(e.to_string())
    }
}

impl From<ViewParamError> for AppError {
    fn from(e: ViewParamError) -> Self {
        AppError::BadParams(e.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Io(e.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
