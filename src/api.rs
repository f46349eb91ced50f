//! HTTP interface

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use crate::domain::aggregates::{CatalogVariant, Order, OrderStatus};
use crate::domain::events::DomainEvent;
use crate::domain::services::{ReturnLine, ReturnRequest, ReturnSummary, StatusCommand, TransitionOutcome};
use crate::domain::value_objects::{AddressId, OfferId, OrderId, SessionId, VariantId};
use crate::publisher::EventPublisher;
use crate::service::CartView;
use crate::{db, CommerceCore, CoreError};

#[derive(Clone)]
pub struct AppState {
    pub core: Arc<CommerceCore>,
    pub db: Option<PgPool>,
    pub events: EventPublisher,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "opensase-fulfillment"})) }))
        .route("/api/v1/cart", get(get_cart).post(add_to_cart).put(set_cart_offer).delete(clear_cart))
        .route("/api/v1/cart/:variant_id", put(set_cart_quantity).delete(remove_from_cart))
        .route("/api/v1/checkout", post(checkout))
        .route("/api/v1/orders", get(list_orders))
        .route("/api/v1/orders/:id", get(get_order))
        .route("/api/v1/variants/:id", get(get_variant))
        .route("/api/v1/admin/orders/:id/status", put(update_order_status))
        .route("/api/v1/admin/orders/:id/return-stock", post(return_stock))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive()))
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug)]
pub enum ApiError {
    Core(CoreError),
    Invalid(ValidationErrors),
}

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self { Self::Core(e) }
}

impl From<ValidationErrors> for ApiError {
    fn from(e: ValidationErrors) -> Self { Self::Invalid(e) }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

pub fn status_for(error: &CoreError) -> StatusCode {
    match error {
        CoreError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        CoreError::NotFound { .. } => StatusCode::NOT_FOUND,
        CoreError::InsufficientStock { .. } | CoreError::InvalidTransition { .. } | CoreError::ConflictingUpdate(_) => StatusCode::CONFLICT,
        CoreError::IdempotencyViolation { .. } | CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::Core(e) => {
                let status = status_for(&e);
                if status.is_server_error() {
                    tracing::error!(error = %e, "Request failed");
                } else {
                    tracing::warn!(error = %e, "Request rejected");
                }
                (status, ErrorBody { error: e.kind().to_string(), message: e.to_string() })
            }
            Self::Invalid(e) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorBody { error: "validation_error".to_string(), message: e.to_string() },
            ),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// =============================================================================
// Request context
// =============================================================================

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim).filter(|v| !v.is_empty())
}

fn session_from_headers(headers: &HeaderMap) -> ApiResult<SessionId> {
    header(headers, "x-session-id")
        .map(SessionId::new)
        .ok_or_else(|| CoreError::validation("missing x-session-id header").into())
}

/// Acting identity, set by the auth layer in front of this service.
fn user_from_headers(headers: &HeaderMap) -> ApiResult<String> {
    header(headers, "x-user-id")
        .map(str::to_string)
        .ok_or_else(|| CoreError::validation("missing x-user-id header").into())
}

fn order_id(id: Uuid) -> OrderId { OrderId::from_uuid(id) }

impl AppState {
    /// Writes the order and the stock changes carried by `events` back to Postgres.
    async fn persist(&self, order: &Order, events: &[DomainEvent]) {
        let Some(db) = &self.db else { return };
        if let Err(e) = db::persist_stock(db, &db::stock_deltas(events)).await {
            tracing::error!(order_id = %order.id(), error = %e, "Failed to persist stock changes");
        }
        if let Err(e) = db::persist_order(db, order).await {
            tracing::error!(order_id = %order.id(), error = %e, "Failed to persist order");
        }
    }

    async fn publish(&self, events: &[DomainEvent]) { self.events.publish(events).await; }
}

// =============================================================================
// Cart
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct AddToCartRequest {
    #[validate(length(min = 1))]
    pub variant_id: String,
    #[validate(range(min = 1))]
    pub quantity: u32,
}

#[derive(Debug, Deserialize)]
pub struct SetQuantityRequest {
    pub quantity: u32,
}

#[derive(Debug, Deserialize)]
pub struct CartOfferRequest {
    #[serde(default)]
    pub offer_id: Option<String>,
}

async fn get_cart(State(s): State<AppState>, headers: HeaderMap) -> ApiResult<Json<CartView>> {
    let session = session_from_headers(&headers)?;
    Ok(Json(s.core.cart(&session)?))
}

async fn add_to_cart(State(s): State<AppState>, headers: HeaderMap, Json(r): Json<AddToCartRequest>) -> ApiResult<Json<CartView>> {
    r.validate()?;
    let session = session_from_headers(&headers)?;
    Ok(Json(s.core.add_to_cart(&session, VariantId::new(r.variant_id), r.quantity)?))
}

async fn set_cart_quantity(
    State(s): State<AppState>, headers: HeaderMap, Path(variant_id): Path<String>, Json(r): Json<SetQuantityRequest>,
) -> ApiResult<Json<CartView>> {
    let session = session_from_headers(&headers)?;
    Ok(Json(s.core.set_cart_quantity(&session, &VariantId::new(variant_id), r.quantity)?))
}

async fn remove_from_cart(State(s): State<AppState>, headers: HeaderMap, Path(variant_id): Path<String>) -> ApiResult<Json<CartView>> {
    let session = session_from_headers(&headers)?;
    Ok(Json(s.core.remove_from_cart(&session, &VariantId::new(variant_id))?))
}

async fn set_cart_offer(State(s): State<AppState>, headers: HeaderMap, Json(r): Json<CartOfferRequest>) -> ApiResult<Json<CartView>> {
    let session = session_from_headers(&headers)?;
    let offer_id = r.offer_id.filter(|id| !id.trim().is_empty()).map(OfferId::new);
    Ok(Json(s.core.set_cart_offer(&session, offer_id)?))
}

async fn clear_cart(State(s): State<AppState>, headers: HeaderMap) -> ApiResult<Json<CartView>> {
    let session = session_from_headers(&headers)?;
    Ok(Json(s.core.clear_cart(&session)?))
}

// =============================================================================
// Checkout & orders
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct CheckoutRequest {
    #[validate(length(min = 1))]
    pub address_id: String,
}

async fn checkout(State(s): State<AppState>, headers: HeaderMap, Json(r): Json<CheckoutRequest>) -> ApiResult<(StatusCode, Json<Order>)> {
    r.validate()?;
    let session = session_from_headers(&headers)?;
    let customer = user_from_headers(&headers)?;
    let outcome = s.core.checkout(&session, &customer, AddressId::new(r.address_id))?;
    s.persist(&outcome.order, &outcome.events).await;
    s.publish(&outcome.events).await;
    Ok((StatusCode::CREATED, Json(outcome.order)))
}

#[derive(Debug, Deserialize)]
pub struct ListParams { pub customer_id: Option<String>, pub page: Option<u32>, pub per_page: Option<u32> }

#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> { pub data: Vec<T>, pub total: usize, pub page: u32 }

async fn list_orders(State(s): State<AppState>, Query(p): Query<ListParams>) -> ApiResult<Json<PaginatedResponse<Order>>> {
    let page = p.page.unwrap_or(1).max(1);
    let per_page = p.per_page.unwrap_or(20).clamp(1, 100);
    let orders: Vec<Order> = s.core.orders()?.into_iter()
        .filter(|o| p.customer_id.as_deref().map_or(true, |c| o.customer_id() == c))
        .collect();
    let total = orders.len();
    let data = orders.into_iter().skip(((page - 1) * per_page) as usize).take(per_page as usize).collect();
    Ok(Json(PaginatedResponse { data, total, page }))
}

async fn get_order(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Order>> {
    Ok(Json(s.core.order(order_id(id))?))
}

async fn get_variant(State(s): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<CatalogVariant>> {
    Ok(Json(s.core.variant(&VariantId::new(id))?))
}

// =============================================================================
// Admin
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct StatusRequest {
    pub status: OrderStatus,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    #[validate(length(min = 1))]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub expected_version: Option<u64>,
}

impl From<StatusRequest> for StatusCommand {
    fn from(r: StatusRequest) -> Self {
        let mut command = StatusCommand::to(r.status);
        command.reason = r.reason;
        if let Some(key) = r.idempotency_key { command = command.with_token(key); }
        if let Some(version) = r.expected_version { command = command.expecting_version(version); }
        command
    }
}

async fn update_order_status(
    State(s): State<AppState>, headers: HeaderMap, Path(id): Path<Uuid>, Json(r): Json<StatusRequest>,
) -> ApiResult<Json<TransitionOutcome>> {
    r.validate()?;
    let actor = user_from_headers(&headers)?;
    let outcome = s.core.update_order_status(order_id(id), r.into(), &actor)?;
    if !outcome.replayed {
        s.persist(&outcome.order, &outcome.events).await;
        s.publish(&outcome.events).await;
    }
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize, Validate)]
pub struct ReturnStockRequest {
    #[validate(length(min = 1))]
    pub lines: Vec<ReturnLine>,
    #[serde(default)]
    #[validate(length(min = 1))]
    pub idempotency_key: Option<String>,
}

async fn return_stock(
    State(s): State<AppState>, headers: HeaderMap, Path(id): Path<Uuid>, Json(r): Json<ReturnStockRequest>,
) -> ApiResult<Json<ReturnSummary>> {
    r.validate()?;
    let actor = user_from_headers(&headers)?;
    let request = ReturnRequest { lines: r.lines, idempotency_key: r.idempotency_key };
    let summary = s.core.return_stock(order_id(id), request, &actor)?;
    if !summary.replayed {
        s.persist(&summary.order, &summary.events).await;
        s.publish(&summary.events).await;
    }
    Ok(Json(summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::OperationToken;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&CoreError::validation("x")), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(status_for(&CoreError::not_found("order", "1")), StatusCode::NOT_FOUND);
        assert_eq!(status_for(&CoreError::ConflictingUpdate("x".into())), StatusCode::CONFLICT);
        assert_eq!(
            status_for(&CoreError::InsufficientStock { variant_id: VariantId::new("V1"), requested: 2, available: 1 }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&CoreError::IdempotencyViolation { token: OperationToken::new("t") }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_headers_are_required() {
        let mut headers = HeaderMap::new();
        assert!(session_from_headers(&headers).is_err());
        headers.insert("x-session-id", "  ".parse().unwrap());
        assert!(session_from_headers(&headers).is_err());
        headers.insert("x-session-id", "sess-1".parse().unwrap());
        assert_eq!(session_from_headers(&headers).unwrap(), SessionId::new("sess-1"));
    }

    #[test]
    fn test_status_request_into_command() {
        let r: StatusRequest = serde_json::from_value(serde_json::json!({
            "status": "cancelled", "reason": "customer asked", "idempotency_key": "k1", "expected_version": 3
        })).unwrap();
        let command = StatusCommand::from(r);
        assert_eq!(command.status, OrderStatus::Cancelled);
        assert_eq!(command.token, Some(OperationToken::new("k1")));
        assert_eq!(command.expected_version, Some(3));
    }
}
