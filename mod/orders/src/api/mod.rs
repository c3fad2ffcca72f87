mod orders;

use std::sync::Arc;

use axum::Router;

use crate::engine::OrderEngine;

/// Build the complete orders module router.
///
/// Routes:
/// - `POST /orders`                       — create order
/// - `GET  /orders`                       — list orders
/// - `GET  /orders/:id`                   — get order
/// - `POST /orders/:id/@transition`       — move to a target status
/// - `POST /orders/:id/@assign-batch`     — attach a production batch
/// - `POST /orders/:id/@assign-shipment`  — attach a shipment slot
/// - `GET  /orders/:id/@timeline`         — transition history
/// - `POST /shipments`                    — register a shipment slot
pub fn router(engine: Arc<OrderEngine>) -> Router {
    orders::router(engine)
}
