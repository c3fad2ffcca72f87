use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};

use isoflow_core::{Actor, ServiceError};

use crate::engine::OrderEngine;
use crate::model::{
    AssignBatchRequest, AssignShipmentRequest, CreateOrderRequest, CreateShipmentRequest, Order,
    OrderListQuery, Shipment, TransitionOutcome, TransitionRequest,
};

type EngineState = Arc<OrderEngine>;

pub fn router(engine: Arc<OrderEngine>) -> Router {
    Router::new()
        .route("/orders", post(create_order).get(list_orders))
        .route("/orders/{id}", get(get_order))
        .route("/orders/{id}/@transition", post(transition))
        .route("/orders/{id}/@assign-batch", post(assign_batch))
        .route("/orders/{id}/@assign-shipment", post(assign_shipment))
        .route("/orders/{id}/@timeline", get(timeline))
        .route("/shipments", post(create_shipment))
        .with_state(engine)
}

// ---------------------------------------------------------------------------
// POST /orders
// ---------------------------------------------------------------------------

async fn create_order(
    State(engine): State<EngineState>,
    headers: HeaderMap,
    Json(req): Json<CreateOrderRequest>,
) -> Result<Json<Order>, ServiceError> {
    let actor = Actor::from_headers(&headers)?;
    let order = engine.create_order(
        &req.customer,
        &req.product,
        req.requested_activity_mbq,
        req.quantity,
        req.delivery_window,
        &actor,
    )?;
    Ok(Json(order))
}

// ---------------------------------------------------------------------------
// GET /orders
// ---------------------------------------------------------------------------

async fn list_orders(
    State(engine): State<EngineState>,
    Query(query): Query<OrderListQuery>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let result = engine.store().list(&query)?;
    Ok(Json(serde_json::json!({
        "items": result.items,
        "total": result.total,
    })))
}

// ---------------------------------------------------------------------------
// GET /orders/:id
// ---------------------------------------------------------------------------

async fn get_order(
    State(engine): State<EngineState>,
    Path(id): Path<String>,
) -> Result<Json<Order>, ServiceError> {
    let order = engine.store().get(&id)?;
    Ok(Json(order))
}

// ---------------------------------------------------------------------------
// POST /orders/:id/@transition
// ---------------------------------------------------------------------------

async fn transition(
    State(engine): State<EngineState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<TransitionRequest>,
) -> Result<Json<TransitionOutcome>, ServiceError> {
    let actor = Actor::from_headers(&headers)?;
    let outcome = engine.transition(&id, req.target, &actor, req.comment)?;
    Ok(Json(outcome))
}

// ---------------------------------------------------------------------------
// POST /orders/:id/@assign-batch
// ---------------------------------------------------------------------------

async fn assign_batch(
    State(engine): State<EngineState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<AssignBatchRequest>,
) -> Result<Json<Order>, ServiceError> {
    let actor = Actor::from_headers(&headers)?;
    let order = engine.assign_batch(&id, &req.batch_id, &actor)?;
    Ok(Json(order))
}

// ---------------------------------------------------------------------------
// POST /orders/:id/@assign-shipment
// ---------------------------------------------------------------------------

async fn assign_shipment(
    State(engine): State<EngineState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<AssignShipmentRequest>,
) -> Result<Json<Order>, ServiceError> {
    let actor = Actor::from_headers(&headers)?;
    let order = engine.assign_shipment(&id, &req.shipment_id, &actor)?;
    Ok(Json(order))
}

// ---------------------------------------------------------------------------
// GET /orders/:id/@timeline
// ---------------------------------------------------------------------------

async fn timeline(
    State(engine): State<EngineState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let order = engine.store().get(&id)?;
    Ok(Json(serde_json::json!({
        "orderId": order.id,
        "status": order.status,
        "timeline": order.timeline,
    })))
}

// ---------------------------------------------------------------------------
// POST /shipments
// ---------------------------------------------------------------------------

async fn create_shipment(
    State(engine): State<EngineState>,
    headers: HeaderMap,
    Json(req): Json<CreateShipmentRequest>,
) -> Result<Json<Shipment>, ServiceError> {
    let actor = Actor::from_headers(&headers)?;
    let shipment = engine.create_shipment(&req.carrier, &actor)?;
    Ok(Json(shipment))
}
