pub mod api;
pub mod engine;
pub mod model;
pub mod store;

use std::sync::Arc;

use axum::Router;
use isoflow_core::{AuditRecorder, Authorizer, Module, ServiceError};
use isoflow_sql::SQLStore;

use engine::BillingEngine;
use store::BillingStore;

/// The Billing module — invoices, payment requests, and reconciliation.
pub struct BillingModule {
    engine: Arc<BillingEngine>,
}

impl BillingModule {
    pub fn new(
        db: Arc<dyn SQLStore>,
        authorizer: Arc<dyn Authorizer>,
        audit: Arc<dyn AuditRecorder>,
    ) -> Result<Self, ServiceError> {
        let store = Arc::new(BillingStore::new(db)?);
        let engine = Arc::new(BillingEngine::new(store, authorizer, audit));
        Ok(Self { engine })
    }

    /// Get a reference to the BillingEngine.
    pub fn engine(&self) -> &Arc<BillingEngine> {
        &self.engine
    }
}

impl Module for BillingModule {
    fn name(&self) -> &str {
        "billing"
    }

    fn routes(&self) -> Router {
        api::router(Arc::clone(&self.engine))
    }
}
