pub mod api;
pub mod engine;
pub mod model;
pub mod store;

use std::sync::Arc;

use axum::Router;
use isoflow_core::{AuditRecorder, Authorizer, Module, ServiceError};
use isoflow_sql::SQLStore;

use engine::BatchEngine;
use store::BatchStore;

/// The Production module — batch manufacturing, QC evaluation, and the
/// regulatory release gate.
pub struct ProductionModule {
    engine: Arc<BatchEngine>,
}

impl ProductionModule {
    pub fn new(
        db: Arc<dyn SQLStore>,
        authorizer: Arc<dyn Authorizer>,
        audit: Arc<dyn AuditRecorder>,
    ) -> Result<Self, ServiceError> {
        let store = Arc::new(BatchStore::new(db)?);
        let engine = Arc::new(BatchEngine::new(store, authorizer, audit));
        Ok(Self { engine })
    }

    /// Get a reference to the BatchEngine for cross-module wiring.
    pub fn engine(&self) -> &Arc<BatchEngine> {
        &self.engine
    }
}

impl Module for ProductionModule {
    fn name(&self) -> &str {
        "production"
    }

    fn routes(&self) -> Router {
        api::router(Arc::clone(&self.engine))
    }
}
