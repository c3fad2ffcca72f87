mod payments;

use std::sync::Arc;

use axum::Router;

use crate::engine::BillingEngine;

/// Build the complete billing module router.
///
/// Routes:
/// - `POST /invoices`                       — create invoice
/// - `GET  /invoices`                       — list invoices
/// - `GET  /invoices/:id`                   — get invoice
/// - `GET  /invoices/:id/@vouchers`         — receipt vouchers
/// - `GET  /invoices/:id/@payments`         — payment ledger
/// - `POST /payment-requests`               — submit a payment claim
/// - `GET  /payment-requests`               — list payment requests
/// - `GET  /payment-requests/:id`           — get payment request
/// - `POST /payment-requests/:id/@confirm`  — settle the claim
/// - `POST /payment-requests/:id/@reject`   — refuse the claim
pub fn router(engine: Arc<BillingEngine>) -> Router {
    payments::router(engine)
}
