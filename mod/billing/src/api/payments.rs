use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};

use isoflow_core::{Actor, ServiceError};

use crate::engine::BillingEngine;
use crate::model::{
    ConfirmRequest, CreateInvoiceRequest, CreatePaymentRequestRequest, Invoice, InvoiceListQuery,
    PaymentRequest, PaymentRequestListQuery, RejectRequest,
};

type EngineState = Arc<BillingEngine>;

pub fn router(engine: Arc<BillingEngine>) -> Router {
    Router::new()
        .route("/invoices", post(create_invoice).get(list_invoices))
        .route("/invoices/{id}", get(get_invoice))
        .route("/invoices/{id}/@vouchers", get(invoice_vouchers))
        .route("/invoices/{id}/@payments", get(invoice_payments))
        .route("/payment-requests", post(create_request).get(list_requests))
        .route("/payment-requests/{id}", get(get_request))
        .route("/payment-requests/{id}/@confirm", post(confirm_request))
        .route("/payment-requests/{id}/@reject", post(reject_request))
        .with_state(engine)
}

// ---------------------------------------------------------------------------
// POST /invoices
// ---------------------------------------------------------------------------

async fn create_invoice(
    State(engine): State<EngineState>,
    headers: HeaderMap,
    Json(req): Json<CreateInvoiceRequest>,
) -> Result<Json<Invoice>, ServiceError> {
    let actor = Actor::from_headers(&headers)?;
    let invoice = engine.create_invoice(&req.customer, req.total_amount, &actor)?;
    Ok(Json(invoice))
}

// ---------------------------------------------------------------------------
// GET /invoices
// ---------------------------------------------------------------------------

async fn list_invoices(
    State(engine): State<EngineState>,
    Query(query): Query<InvoiceListQuery>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let result = engine.store().list_invoices(&query)?;
    Ok(Json(serde_json::json!({
        "items": result.items,
        "total": result.total,
    })))
}

// ---------------------------------------------------------------------------
// GET /invoices/:id
// ---------------------------------------------------------------------------

async fn get_invoice(
    State(engine): State<EngineState>,
    Path(id): Path<String>,
) -> Result<Json<Invoice>, ServiceError> {
    let invoice = engine.store().get_invoice(&id)?;
    Ok(Json(invoice))
}

// ---------------------------------------------------------------------------
// GET /invoices/:id/@vouchers
// ---------------------------------------------------------------------------

async fn invoice_vouchers(
    State(engine): State<EngineState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    engine.store().get_invoice(&id)?;
    let vouchers = engine.store().vouchers_for_invoice(&id)?;
    Ok(Json(serde_json::json!({ "items": vouchers })))
}

// ---------------------------------------------------------------------------
// GET /invoices/:id/@payments
// ---------------------------------------------------------------------------

async fn invoice_payments(
    State(engine): State<EngineState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    engine.store().get_invoice(&id)?;
    let payments = engine.store().payments_for_invoice(&id)?;
    Ok(Json(serde_json::json!({ "items": payments })))
}

// ---------------------------------------------------------------------------
// POST /payment-requests
// ---------------------------------------------------------------------------

async fn create_request(
    State(engine): State<EngineState>,
    headers: HeaderMap,
    Json(req): Json<CreatePaymentRequestRequest>,
) -> Result<Json<PaymentRequest>, ServiceError> {
    let actor = Actor::from_headers(&headers)?;
    let request =
        engine.create_payment_request(&req.invoice_id, req.amount, &req.method, &actor)?;
    Ok(Json(request))
}

// ---------------------------------------------------------------------------
// GET /payment-requests
// ---------------------------------------------------------------------------

async fn list_requests(
    State(engine): State<EngineState>,
    Query(query): Query<PaymentRequestListQuery>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let result = engine.store().list_requests(&query)?;
    Ok(Json(serde_json::json!({
        "items": result.items,
        "total": result.total,
    })))
}

// ---------------------------------------------------------------------------
// GET /payment-requests/:id
// ---------------------------------------------------------------------------

async fn get_request(
    State(engine): State<EngineState>,
    Path(id): Path<String>,
) -> Result<Json<PaymentRequest>, ServiceError> {
    let request = engine.store().get_request(&id)?;
    Ok(Json(request))
}

// ---------------------------------------------------------------------------
// POST /payment-requests/:id/@confirm
// ---------------------------------------------------------------------------

async fn confirm_request(
    State(engine): State<EngineState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<ConfirmRequest>,
) -> Result<Json<PaymentRequest>, ServiceError> {
    let actor = Actor::from_headers(&headers)?;
    let request = engine.confirm(&id, &actor, req.notes)?;
    Ok(Json(request))
}

// ---------------------------------------------------------------------------
// POST /payment-requests/:id/@reject
// ---------------------------------------------------------------------------

async fn reject_request(
    State(engine): State<EngineState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<RejectRequest>,
) -> Result<Json<PaymentRequest>, ServiceError> {
    let actor = Actor::from_headers(&headers)?;
    let request = engine.reject(&id, &actor, &req.reason)?;
    Ok(Json(request))
}
