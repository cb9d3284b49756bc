//! Stock routes.
//!
//! ```text
//! GET  /api/v1/stocks/:item_id            advisory read
//! POST /api/v1/stocks/:item_id            { "quantity": n }  absolute set
//! PUT  /api/v1/groups/:group_id/stocks    [{ "itemId", "quantity" }]  per-item set
//! ```

use crate::WebResult;
use crate::extractors::{ApiJson, CorrelationId, IdPath};
use crate::state::AppState;
use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use stockline_core::item::{GroupId, ItemId};
use stockline_core::quantity::Quantity;
use stockline_core::stock::{StockItem, StockSnapshot, StockSource, Version};
use stockline_runtime::{BatchItemResult, ItemOutcome, RejectReason};

/// Advisory stock level.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StockResponse {
    /// Item read.
    pub item_id: ItemId,
    /// Units available.
    pub available: Quantity,
    /// Store that answered.
    pub source: StockSource,
}

impl From<StockSnapshot> for StockResponse {
    fn from(snapshot: StockSnapshot) -> Self {
        Self {
            item_id: snapshot.item_id,
            available: snapshot.available,
            source: snapshot.source,
        }
    }
}

/// Body of `POST /api/v1/stocks/:item_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetStockRequest {
    /// New absolute quantity. Negative values are rejected with `INVALID_QUANTITY`.
    pub quantity: i64,
}

/// Committed record after a set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StockItemResponse {
    /// Item written.
    pub item_id: ItemId,
    /// Owning group.
    pub group_id: GroupId,
    /// Committed available quantity.
    pub available: Quantity,
    /// Units held by outstanding decrements.
    pub reserved: Quantity,
    /// Version after the write.
    pub version: Version,
}

impl From<StockItem> for StockItemResponse {
    fn from(item: StockItem) -> Self {
        Self {
            item_id: item.item_id,
            group_id: item.group_id,
            available: item.available,
            reserved: item.reserved,
            version: item.version,
        }
    }
}

/// One line of a group update.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchLine {
    /// Item to set.
    pub item_id: ItemId,
    /// New absolute quantity.
    pub quantity: i64,
}

/// Whether a line was applied.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LineStatus {
    /// Applied.
    Committed,
    /// Not applied; see `reason`.
    Rejected,
}

/// Result of one line, in request order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BatchLineResult {
    /// Item the line refers to.
    pub item_id: ItemId,
    /// Applied or not.
    pub status: LineStatus,
    /// Committed quantity, for applied lines.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available: Option<Quantity>,
    /// Why the line was not applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectReason>,
}

impl From<BatchItemResult> for BatchLineResult {
    fn from(result: BatchItemResult) -> Self {
        match result.outcome {
            ItemOutcome::Committed(available) => Self {
                item_id: result.item_id,
                status: LineStatus::Committed,
                available: Some(available),
                reason: None,
            },
            ItemOutcome::Rejected(reason) => Self {
                item_id: result.item_id,
                status: LineStatus::Rejected,
                available: None,
                reason: Some(reason),
            },
        }
    }
}

/// Response of a group update. Always `200`, even when lines were rejected.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    /// Group addressed by the request.
    pub group_id: GroupId,
    /// Per-line results.
    pub results: Vec<BatchLineResult>,
}

/// `GET /api/v1/stocks/:item_id`
///
/// # Errors
///
/// `404` for an unknown item, `503` if the record store is down and the counter missed.
pub async fn get_stock(
    State(state): State<AppState>,
    IdPath(item_id): IdPath<ItemId>,
) -> WebResult<Json<StockResponse>> {
    let snapshot = state.engine.get_stock(item_id).await?;
    Ok(Json(snapshot.into()))
}

/// `POST /api/v1/stocks/:item_id`
///
/// # Errors
///
/// `404`, `409` after exhausted version retries, `422 INVALID_QUANTITY`,
/// `423 LOCKED` when the item stayed busy, `503` on backend failure.
pub async fn set_stock(
    State(state): State<AppState>,
    correlation_id: CorrelationId,
    IdPath(item_id): IdPath<ItemId>,
    ApiJson(request): ApiJson<SetStockRequest>,
) -> WebResult<Json<StockItemResponse>> {
    tracing::debug!(
        correlation_id = %correlation_id.0,
        %item_id,
        quantity = request.quantity,
        "Set stock requested"
    );
    let item = state.engine.set_stock(item_id, request.quantity).await?;
    Ok(Json(item.into()))
}

/// `PUT /api/v1/groups/:group_id/stocks`
///
/// # Errors
///
/// Only for malformed requests; line failures are reported per line.
pub async fn batch_set_stock(
    State(state): State<AppState>,
    correlation_id: CorrelationId,
    IdPath(group_id): IdPath<GroupId>,
    ApiJson(lines): ApiJson<Vec<BatchLine>>,
) -> WebResult<Json<BatchResponse>> {
    tracing::debug!(
        correlation_id = %correlation_id.0,
        %group_id,
        lines = lines.len(),
        "Group stock update requested"
    );
    let lines: Vec<(ItemId, i64)> = lines.iter().map(|l| (l.item_id, l.quantity)).collect();
    let results = state.engine.batch_set_stock(group_id, &lines).await;

    Ok(Json(BatchResponse {
        group_id,
        results: results.into_iter().map(BatchLineResult::from).collect(),
    }))
}
