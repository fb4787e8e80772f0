use crate::config::ConfigError;
use crate::telemetry::TelemetryError;
use crate::workflows::assignments::LedgerError;
use crate::workflows::inventory::ImportError;
use crate::workflows::services::StartupError;
use crate::workflows::store::StoreError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum AppError {
    Config(ConfigError),
    Telemetry(TelemetryError),
    Io(std::io::Error),
    Server(axum::Error),
    Startup(StartupError),
    Import(ImportError),
    Ledger(LedgerError),
    Worker(tokio::task::JoinError),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Import(_) => StatusCode::BAD_REQUEST,
            AppError::Ledger(LedgerError::NoSuchObject(_)) => StatusCode::NOT_FOUND,
            AppError::Ledger(LedgerError::InvalidSession) => StatusCode::UNAUTHORIZED,
            AppError::Ledger(
                LedgerError::AlreadyAssigned { .. } | LedgerError::InvalidTransition { .. },
            ) => StatusCode::CONFLICT,
            AppError::Ledger(LedgerError::Store(_))
            | AppError::Config(_)
            | AppError::Telemetry(_)
            | AppError::Io(_)
            | AppError::Server(_)
            | AppError::Startup(_)
            | AppError::Worker(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(err) => write!(f, "configuration error: {}", err),
            AppError::Telemetry(err) => write!(f, "telemetry error: {}", err),
            AppError::Io(err) => write!(f, "io error: {}", err),
            AppError::Server(err) => write!(f, "server error: {}", err),
            AppError::Startup(err) => write!(f, "startup error: {}", err),
            AppError::Import(err) => write!(f, "{}", err),
            AppError::Ledger(err) => write!(f, "{}", err),
            AppError::Worker(err) => write!(f, "ledger worker failed: {}", err),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Config(err) => Some(err),
            AppError::Telemetry(err) => Some(err),
            AppError::Io(err) => Some(err),
            AppError::Server(err) => Some(err),
            AppError::Startup(err) => Some(err),
            AppError::Import(err) => Some(err),
            AppError::Ledger(err) => Some(err),
            AppError::Worker(err) => Some(err),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

impl From<ConfigError> for AppError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<TelemetryError> for AppError {
    fn from(value: TelemetryError) -> Self {
        Self::Telemetry(value)
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<axum::Error> for AppError {
    fn from(value: axum::Error) -> Self {
        Self::Server(value)
    }
}

impl From<StartupError> for AppError {
    fn from(value: StartupError) -> Self {
        Self::Startup(value)
    }
}

impl From<ImportError> for AppError {
    fn from(value: ImportError) -> Self {
        Self::Import(value)
    }
}

impl From<LedgerError> for AppError {
    fn from(value: LedgerError) -> Self {
        Self::Ledger(value)
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(value: tokio::task::JoinError) -> Self {
        Self::Worker(value)
    }
}

impl From<StoreError> for AppError {
    fn from(value: StoreError) -> Self {
        Self::Ledger(value.into())
    }
}
