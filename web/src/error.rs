//! HTTP error responses.
//!
//! [`AppError`] bridges [`StockError`] and HTTP responses. Every error body
//! has the same shape:
//!
//! ```json
//! { "code": "LOCKED", "message": "Item 7 is locked, retry later" }
//! ```

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::fmt;
use stockline_core::error::{ErrorKind, StockError};

/// A rejected request, rendered as a status plus a `{code, message}` body.
///
/// Engine errors convert with `?`:
///
/// ```ignore
/// async fn handler(State(state): State<AppState>) -> Result<Json<StockResponse>, AppError> {
///     let snapshot = state.engine.get_stock(item_id).await?;
///     Ok(Json(snapshot.into()))
/// }
/// ```
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
    /// Stable machine-readable code, e.g. `INSUFFICIENT_STOCK`.
    code: &'static str,
    /// Logged on 5xx, never sent to the client.
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Error with an explicit status and code.
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>, code: &'static str) -> Self {
        Self {
            status,
            message: message.into(),
            code,
            source: None,
        }
    }

    /// Attach the underlying error for logging.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// `400`: unparseable path or body.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message, "BAD_REQUEST")
    }

    /// `404`
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message, "NOT_FOUND")
    }

    /// `409`
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message, "CONFLICT")
    }

    /// `422` with a domain code.
    #[must_use]
    pub fn unprocessable(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, message, code)
    }

    /// `423`: the item is busy, retry later.
    #[must_use]
    pub fn locked(message: impl Into<String>) -> Self {
        Self::new(StatusCode::LOCKED, message, "LOCKED")
    }

    /// `503`: a backing store failed.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message, "SERVICE_UNAVAILABLE")
    }

    /// HTTP status of the response.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(
                status = %self.status,
                code = self.code,
                message = %self.message,
                error = self.source.as_ref().map(tracing::field::display),
                "Request failed on a backing store"
            );
        }

        let body = ErrorBody {
            code: self.code,
            message: self.message,
        };

        (self.status, Json(body)).into_response()
    }
}

impl From<StockError> for AppError {
    fn from(err: StockError) -> Self {
        let message = err.to_string();
        match err {
            StockError::InvalidQuantity { .. } | StockError::StockOverflow { .. } => {
                Self::unprocessable("INVALID_QUANTITY", message)
            },
            StockError::InsufficientStock { .. } => {
                Self::unprocessable("INSUFFICIENT_STOCK", message)
            },
            other => match other.kind() {
                ErrorKind::Contention => Self::locked(message),
                ErrorKind::NotFound => Self::not_found(message),
                ErrorKind::Conflict => Self::conflict(message),
                ErrorKind::InvariantViolation => Self::unprocessable("INVARIANT_VIOLATION", message),
                ErrorKind::Infrastructure => {
                    Self::unavailable("Stock service temporarily unavailable").with_source(other)
                },
            },
        }
    }
}
