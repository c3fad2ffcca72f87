mod batches;

use std::sync::Arc;

use axum::Router;

use crate::engine::BatchEngine;

/// Build the complete production module router.
///
/// Routes:
/// - `POST /batches`                    — create batch
/// - `GET  /batches`                    — list batches
/// - `GET  /batches/:id`                — get batch
/// - `POST /batches/:id/@start`         — CREATED → IN_PRODUCTION
/// - `POST /batches/:id/@enter-qc`      — IN_PRODUCTION → QC_PENDING
/// - `POST /batches/:id/@qc-results`    — record one test result
/// - `GET  /batches/:id/@qc`            — QC summary and result rows
/// - `POST /batches/:id/@complete-qc`   — close out QC
/// - `POST /batches/:id/@hold`          — place a hold
/// - `POST /batches/:id/@resume`        — lift a hold
/// - `POST /batches/:id/@release`       — release with signature
/// - `POST /batches/:id/@reject`        — reject a passed batch
///
/// Callers arrive pre-authenticated; identity comes from the
/// `x-actor-*` headers set by the upstream auth layer.
pub fn router(engine: Arc<BatchEngine>) -> Router {
    batches::router(engine)
}
