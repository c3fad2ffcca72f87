pub mod api;
pub mod engine;
pub mod model;
pub mod store;
pub mod store_impls;

use std::sync::Arc;

use axum::Router;
use isoflow_core::{AuditRecorder, Authorizer, Module, ServiceError};
use isoflow_sql::SQLStore;
use production::engine::BatchEngine;

use engine::OrderEngine;
use store::OrderStore;
use store_impls::{ProductionBatches, StoredShipments};

/// The Orders module — the order state machine with its cross-entity
/// gates into production and shipping.
pub struct OrdersModule {
    engine: Arc<OrderEngine>,
}

impl OrdersModule {
    pub fn new(
        db: Arc<dyn SQLStore>,
        authorizer: Arc<dyn Authorizer>,
        audit: Arc<dyn AuditRecorder>,
        batch_engine: Arc<BatchEngine>,
    ) -> Result<Self, ServiceError> {
        let store = Arc::new(OrderStore::new(db)?);
        let engine = Arc::new(OrderEngine::new(
            Arc::clone(&store),
            authorizer,
            audit,
            Arc::new(ProductionBatches::new(batch_engine)),
            Arc::new(StoredShipments::new(store)),
        ));
        Ok(Self { engine })
    }

    /// Get a reference to the OrderEngine for cross-module wiring.
    pub fn engine(&self) -> &Arc<OrderEngine> {
        &self.engine
    }
}

impl Module for OrdersModule {
    fn name(&self) -> &str {
        "orders"
    }

    fn routes(&self) -> Router {
        api::router(Arc::clone(&self.engine))
    }
}
