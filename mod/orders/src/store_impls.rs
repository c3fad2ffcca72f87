//! Gate trait implementations over the real collaborators.
//!
//! The engine only knows [`BatchGate`] and [`ShipmentGate`]; this file
//! binds them to the production batch engine and the shipments table.

use std::sync::Arc;

use isoflow_core::ServiceError;
use production::engine::BatchEngine;

use crate::engine::{BatchGate, ShipmentGate};
use crate::model::ShipmentStatus;
use crate::store::OrderStore;

/// The production module as seen through the order machine's gate.
pub struct ProductionBatches {
    engine: Arc<BatchEngine>,
}

impl ProductionBatches {
    pub fn new(engine: Arc<BatchEngine>) -> Self {
        Self { engine }
    }
}

impl BatchGate for ProductionBatches {
    fn batch_status(&self, batch_id: &str) -> Result<Option<String>, ServiceError> {
        match self.engine.store().get(batch_id) {
            Ok(batch) => Ok(Some(batch.status.as_str().to_string())),
            Err(ServiceError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn attach_order(&self, batch_id: &str, order_id: &str) -> Result<(), ServiceError> {
        self.engine.attach_order(batch_id, order_id)?;
        Ok(())
    }

    fn initialize_qc(&self, batch_id: &str) -> Result<usize, ServiceError> {
        self.engine.initialize_qc(batch_id)
    }
}

/// Shipment slots live in the orders store itself.
pub struct StoredShipments {
    store: Arc<OrderStore>,
}

impl StoredShipments {
    pub fn new(store: Arc<OrderStore>) -> Self {
        Self { store }
    }
}

impl ShipmentGate for StoredShipments {
    fn shipment_active(&self, shipment_id: &str) -> Result<bool, ServiceError> {
        match self.store.get_shipment(shipment_id) {
            Ok(shipment) => Ok(shipment.status == ShipmentStatus::Active),
            Err(ServiceError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isoflow_core::{Actor, ActorPermissions, NullRecorder, new_id, now_rfc3339};
    use isoflow_sql::SqliteStore;
    use production::model::{AcceptanceRule, QcTemplate, QcTestSpec};
    use production::store::BatchStore;

    use crate::model::Shipment;

    fn batch_engine() -> Arc<BatchEngine> {
        let db = Arc::new(SqliteStore::open_in_memory().unwrap());
        let store = Arc::new(BatchStore::new(db).unwrap());
        Arc::new(BatchEngine::new(
            store,
            Arc::new(ActorPermissions),
            Arc::new(NullRecorder),
        ))
    }

    #[test]
    fn production_gate_reads_real_batches() {
        let engine = batch_engine();
        let actor = Actor::with_permissions("sup-1", ["production:batch:*"]);
        let template = QcTemplate {
            product: "FDG-18".into(),
            tests: vec![QcTestSpec {
                test_id: "sterility".into(),
                name: "Sterility".into(),
                rule: AcceptanceRule::PassFail,
            }],
        };
        let batch = engine
            .create_batch("FDG-18", template, vec![], &actor)
            .unwrap();

        let gate = ProductionBatches::new(Arc::clone(&engine));
        assert_eq!(gate.batch_status(&batch.id).unwrap().as_deref(), Some("CREATED"));
        assert_eq!(gate.batch_status("ghost").unwrap(), None);

        gate.attach_order(&batch.id, "o1").unwrap();
        assert_eq!(
            engine.store().get(&batch.id).unwrap().order_ids,
            vec!["o1".to_string()]
        );
    }

    #[test]
    fn shipment_gate_checks_active_flag() {
        let db = Arc::new(SqliteStore::open_in_memory().unwrap());
        let store = Arc::new(OrderStore::new(db).unwrap());

        let active = Shipment {
            id: new_id(),
            carrier: "medtransport".into(),
            status: ShipmentStatus::Active,
            created_at: now_rfc3339(),
        };
        let done = Shipment {
            id: new_id(),
            carrier: "medtransport".into(),
            status: ShipmentStatus::Completed,
            created_at: now_rfc3339(),
        };
        store.create_shipment(&active).unwrap();
        store.create_shipment(&done).unwrap();

        let gate = StoredShipments::new(store);
        assert!(gate.shipment_active(&active.id).unwrap());
        assert!(!gate.shipment_active(&done.id).unwrap());
        assert!(!gate.shipment_active("ghost").unwrap());
    }
}
