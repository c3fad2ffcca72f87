use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};

use isoflow_core::{Actor, ServiceError};

use crate::engine::BatchEngine;
use crate::model::{
    Batch, BatchListQuery, CreateBatchRequest, QcTestResult, ReasonRequest, RecordResultRequest,
    ReleaseRequest,
};

type EngineState = Arc<BatchEngine>;

pub fn router(engine: Arc<BatchEngine>) -> Router {
    Router::new()
        .route("/batches", post(create_batch).get(list_batches))
        .route("/batches/{id}", get(get_batch))
        .route("/batches/{id}/@start", post(start_production))
        .route("/batches/{id}/@enter-qc", post(enter_qc))
        .route("/batches/{id}/@qc-results", post(record_result))
        .route("/batches/{id}/@qc", get(qc_status))
        .route("/batches/{id}/@complete-qc", post(complete_qc))
        .route("/batches/{id}/@hold", post(hold_batch))
        .route("/batches/{id}/@resume", post(resume_batch))
        .route("/batches/{id}/@release", post(release_batch))
        .route("/batches/{id}/@reject", post(reject_batch))
        .with_state(engine)
}

// ---------------------------------------------------------------------------
// POST /batches
// ---------------------------------------------------------------------------

async fn create_batch(
    State(engine): State<EngineState>,
    headers: HeaderMap,
    Json(req): Json<CreateBatchRequest>,
) -> Result<Json<Batch>, ServiceError> {
    let actor = Actor::from_headers(&headers)?;
    let batch = engine.create_batch(&req.product, req.template, req.order_ids, &actor)?;
    Ok(Json(batch))
}

// ---------------------------------------------------------------------------
// GET /batches
// ---------------------------------------------------------------------------

async fn list_batches(
    State(engine): State<EngineState>,
    Query(query): Query<BatchListQuery>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let result = engine.store().list(&query)?;
    Ok(Json(serde_json::json!({
        "items": result.items,
        "total": result.total,
    })))
}

// ---------------------------------------------------------------------------
// GET /batches/:id
// ---------------------------------------------------------------------------

async fn get_batch(
    State(engine): State<EngineState>,
    Path(id): Path<String>,
) -> Result<Json<Batch>, ServiceError> {
    let batch = engine.store().get(&id)?;
    Ok(Json(batch))
}

// ---------------------------------------------------------------------------
// POST /batches/:id/@start
// ---------------------------------------------------------------------------

async fn start_production(
    State(engine): State<EngineState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Batch>, ServiceError> {
    let actor = Actor::from_headers(&headers)?;
    let batch = engine.start_production(&id, &actor)?;
    Ok(Json(batch))
}

// ---------------------------------------------------------------------------
// POST /batches/:id/@enter-qc
// ---------------------------------------------------------------------------

async fn enter_qc(
    State(engine): State<EngineState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Batch>, ServiceError> {
    let actor = Actor::from_headers(&headers)?;
    let batch = engine.enter_qc(&id, &actor)?;
    Ok(Json(batch))
}

// ---------------------------------------------------------------------------
// POST /batches/:id/@qc-results
// ---------------------------------------------------------------------------

async fn record_result(
    State(engine): State<EngineState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<RecordResultRequest>,
) -> Result<Json<QcTestResult>, ServiceError> {
    let actor = Actor::from_headers(&headers)?;
    let result = engine.record_result(&id, &req.test_id, req.value, &actor)?;
    Ok(Json(result))
}

// ---------------------------------------------------------------------------
// GET /batches/:id/@qc
// ---------------------------------------------------------------------------

async fn qc_status(
    State(engine): State<EngineState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let summary = engine.qc_status(&id)?;
    let results = engine.store().qc_results(&id)?;
    Ok(Json(serde_json::json!({
        "summary": summary,
        "results": results,
    })))
}

// ---------------------------------------------------------------------------
// POST /batches/:id/@complete-qc
// ---------------------------------------------------------------------------

async fn complete_qc(
    State(engine): State<EngineState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Batch>, ServiceError> {
    let actor = Actor::from_headers(&headers)?;
    let batch = engine.complete_qc(&id, &actor)?;
    Ok(Json(batch))
}

// ---------------------------------------------------------------------------
// POST /batches/:id/@hold
// ---------------------------------------------------------------------------

async fn hold_batch(
    State(engine): State<EngineState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<ReasonRequest>,
) -> Result<Json<Batch>, ServiceError> {
    let actor = Actor::from_headers(&headers)?;
    let batch = engine.hold(&id, &actor, &req.reason)?;
    Ok(Json(batch))
}

// ---------------------------------------------------------------------------
// POST /batches/:id/@resume
// ---------------------------------------------------------------------------

async fn resume_batch(
    State(engine): State<EngineState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Batch>, ServiceError> {
    let actor = Actor::from_headers(&headers)?;
    let batch = engine.resume(&id, &actor)?;
    Ok(Json(batch))
}

// ---------------------------------------------------------------------------
// POST /batches/:id/@release
// ---------------------------------------------------------------------------

async fn release_batch(
    State(engine): State<EngineState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<ReleaseRequest>,
) -> Result<Json<Batch>, ServiceError> {
    let actor = Actor::from_headers(&headers)?;
    let batch = engine.release(&id, &actor, &req.signature, req.notes)?;
    Ok(Json(batch))
}

// ---------------------------------------------------------------------------
// POST /batches/:id/@reject
// ---------------------------------------------------------------------------

async fn reject_batch(
    State(engine): State<EngineState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<ReasonRequest>,
) -> Result<Json<Batch>, ServiceError> {
    let actor = Actor::from_headers(&headers)?;
    let batch = engine.reject(&id, &actor, &req.reason)?;
    Ok(Json(batch))
}
