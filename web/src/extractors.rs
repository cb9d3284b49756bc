//! Extractors that reject with [`AppError`] bodies instead of axum's plain text.
//!
//! - [`CorrelationId`]: the id assigned by the correlation middleware
//! - [`ApiJson`]: JSON body; malformed input is a `400 BAD_REQUEST`
//! - [`IdPath`]: a single path segment parsed with `FromStr`

use crate::error::AppError;
use axum::{
    Json, async_trait,
    extract::{FromRequest, FromRequestParts, Path, Request, rejection::JsonRejection},
    http::request::Parts,
};
use std::fmt::Display;
use std::str::FromStr;
use uuid::Uuid;

/// Correlation ID for request tracing.
///
/// Reads the id stored by [`crate::middleware::track_request`]; without
/// the middleware a fresh id is generated.
#[derive(Debug, Clone, Copy)]
pub struct CorrelationId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .extensions
            .get::<Uuid>()
            .copied()
            .unwrap_or_else(Uuid::new_v4);
        Ok(Self(id))
    }
}

/// JSON body whose rejection is an [`AppError`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(AppError::bad_request(rejection.body_text())),
        }
    }
}

/// One path parameter parsed with `FromStr`, e.g. an `ItemId`.
#[derive(Debug, Clone, Copy)]
pub struct IdPath<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for IdPath<T>
where
    T: FromStr + Send,
    T::Err: Display,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(raw) = Path::<String>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| AppError::bad_request(rejection.body_text()))?;
        raw.parse::<T>()
            .map(Self)
            .map_err(|e| AppError::bad_request(e.to_string()))
    }
}
