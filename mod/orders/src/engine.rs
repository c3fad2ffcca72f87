use std::sync::Arc;

use isoflow_core::{
    Actor, AuditEvent, AuditRecorder, Authorizer, ServiceError, new_id, now_rfc3339, require,
};

use crate::model::{
    DeliveryWindow, Order, OrderStatus, Shipment, ShipmentStatus, SideEffect, TimelineEvent,
    TransitionOutcome,
};
use crate::store::{OrderStore, touch};

/// Permission resource for order lifecycle actions.
const ORDER_RESOURCE: &str = "orders:order";
/// Permission resource for shipment slots.
const SHIPMENT_RESOURCE: &str = "orders:shipment";

// ---------------------------------------------------------------------------
// Gate collaborators
// ---------------------------------------------------------------------------

/// The order machine's view of the production module. Implemented over
/// the batch engine in `store_impls.rs`; stubbed in tests.
pub trait BatchGate: Send + Sync {
    /// The batch's current status string, or None if the batch is unknown.
    fn batch_status(&self, batch_id: &str) -> Result<Option<String>, ServiceError>;

    /// Attach an order to a batch (idempotent).
    fn attach_order(&self, batch_id: &str, order_id: &str) -> Result<(), ServiceError>;

    /// Seed the batch's QC rows (idempotent). Returns the seeded count.
    fn initialize_qc(&self, batch_id: &str) -> Result<usize, ServiceError>;
}

/// The order machine's view of shipment slots.
pub trait ShipmentGate: Send + Sync {
    /// Whether the shipment exists and is active.
    fn shipment_active(&self, shipment_id: &str) -> Result<bool, ServiceError>;
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The order state machine.
///
/// `transition` is the single mutation path for status changes. It
/// applies three checks in a fixed order — authorization, adjacency,
/// cross-entity gate — then commits the status change and its timeline
/// event as one CAS write. Post-commit side effects (QC seeding) run
/// after the write and never undo it.
pub struct OrderEngine {
    store: Arc<OrderStore>,
    authorizer: Arc<dyn Authorizer>,
    audit: Arc<dyn AuditRecorder>,
    batch_gate: Arc<dyn BatchGate>,
    shipment_gate: Arc<dyn ShipmentGate>,
}

impl OrderEngine {
    pub fn new(
        store: Arc<OrderStore>,
        authorizer: Arc<dyn Authorizer>,
        audit: Arc<dyn AuditRecorder>,
        batch_gate: Arc<dyn BatchGate>,
        shipment_gate: Arc<dyn ShipmentGate>,
    ) -> Self {
        Self {
            store,
            authorizer,
            audit,
            batch_gate,
            shipment_gate,
        }
    }

    /// Access the underlying store.
    pub fn store(&self) -> &Arc<OrderStore> {
        &self.store
    }

    // =======================================================================
    // Creation and assignment
    // =======================================================================

    /// Create a new order in DRAFT.
    pub fn create_order(
        &self,
        customer: &str,
        product: &str,
        requested_activity_mbq: f64,
        quantity: u32,
        delivery_window: DeliveryWindow,
        actor: &Actor,
    ) -> Result<Order, ServiceError> {
        require(self.authorizer.as_ref(), actor, ORDER_RESOURCE, "create")?;

        if customer.trim().is_empty() || product.trim().is_empty() {
            return Err(ServiceError::Validation(
                "customer and product are required".into(),
            ));
        }
        if quantity == 0 {
            return Err(ServiceError::Validation("quantity must be positive".into()));
        }
        if !(requested_activity_mbq > 0.0) {
            return Err(ServiceError::Validation(
                "requested activity must be positive".into(),
            ));
        }

        let order = Order {
            id: new_id(),
            status: OrderStatus::Draft,
            customer: customer.trim().to_string(),
            product: product.trim().to_string(),
            requested_activity_mbq,
            quantity,
            delivery_window,
            batch_id: None,
            shipment_id: None,
            timeline: vec![],
            created_at: now_rfc3339(),
            updated_at: None,
        };
        self.store.create(&order)?;

        self.audit(&order.id, "create", actor, None);
        Ok(order)
    }

    /// Attach a production batch to an order. Allowed before production
    /// starts, and again from REWORK when the replacement batch is
    /// scheduled. Registers the order on the batch side too.
    pub fn assign_batch(
        &self,
        order_id: &str,
        batch_id: &str,
        actor: &Actor,
    ) -> Result<Order, ServiceError> {
        require(self.authorizer.as_ref(), actor, ORDER_RESOURCE, "assign-batch")?;

        let mut order = self.store.get(order_id)?;
        let assignable = matches!(
            order.status,
            OrderStatus::Draft
                | OrderStatus::Submitted
                | OrderStatus::Validated
                | OrderStatus::Rework
        );
        if !assignable {
            return Err(ServiceError::InvalidState(format!(
                "order {order_id} is {}, batches are assigned before scheduling or during rework",
                order.status
            )));
        }

        if self.batch_gate.batch_status(batch_id)?.is_none() {
            return Err(ServiceError::NotFound(format!("batch {batch_id}")));
        }
        self.batch_gate.attach_order(batch_id, order_id)?;

        let expected = order.status;
        order.batch_id = Some(batch_id.to_string());
        touch(&mut order);
        if !self.store.update_cas(&order, expected)? {
            return self.cas_miss(order_id, expected);
        }

        self.audit(order_id, "assign-batch", actor, Some(batch_id.to_string()));
        Ok(order)
    }

    /// Assign a shipment slot to a RELEASED order. The slot must exist
    /// and be active.
    pub fn assign_shipment(
        &self,
        order_id: &str,
        shipment_id: &str,
        actor: &Actor,
    ) -> Result<Order, ServiceError> {
        require(self.authorizer.as_ref(), actor, ORDER_RESOURCE, "assign-shipment")?;

        let mut order = self.store.get(order_id)?;
        if order.status != OrderStatus::Released {
            return Err(ServiceError::InvalidState(format!(
                "order {order_id} is {}, shipments are assigned after release",
                order.status
            )));
        }
        if !self.shipment_gate.shipment_active(shipment_id)? {
            return Err(ServiceError::InvalidState(format!(
                "shipment {shipment_id} is not active"
            )));
        }

        order.shipment_id = Some(shipment_id.to_string());
        touch(&mut order);
        if !self.store.update_cas(&order, OrderStatus::Released)? {
            return self.cas_miss(order_id, OrderStatus::Released);
        }

        self.audit(order_id, "assign-shipment", actor, Some(shipment_id.to_string()));
        Ok(order)
    }

    /// Register a shipment slot.
    pub fn create_shipment(&self, carrier: &str, actor: &Actor) -> Result<Shipment, ServiceError> {
        require(self.authorizer.as_ref(), actor, SHIPMENT_RESOURCE, "create")?;
        if carrier.trim().is_empty() {
            return Err(ServiceError::Validation("carrier is required".into()));
        }

        let shipment = Shipment {
            id: new_id(),
            carrier: carrier.trim().to_string(),
            status: ShipmentStatus::Active,
            created_at: now_rfc3339(),
        };
        self.store.create_shipment(&shipment)?;
        Ok(shipment)
    }

    // =======================================================================
    // Transition
    // =======================================================================

    /// Move an order to `target`.
    ///
    /// Checks run in a fixed order, each with its own error:
    /// 1. authorization for the per-transition action (PermissionDenied)
    /// 2. adjacency against the fixed table (InvalidState, names both states)
    /// 3. cross-entity gate for SCHEDULED / RELEASED / DISPATCHED
    ///    (InvalidState, names the blocking entity)
    ///
    /// The status change and its timeline event commit as one CAS write.
    /// Entering QC_PENDING then seeds the batch's QC rows post-commit;
    /// a seeding failure is logged, never unwound.
    pub fn transition(
        &self,
        order_id: &str,
        target: OrderStatus,
        actor: &Actor,
        comment: Option<String>,
    ) -> Result<TransitionOutcome, ServiceError> {
        require(self.authorizer.as_ref(), actor, ORDER_RESOURCE, target.entry_action())?;

        let mut order = self.store.get(order_id)?;
        let from = order.status;

        if !from.can_transition_to(target) {
            return Err(ServiceError::InvalidState(format!(
                "order {order_id}: no transition {from} -> {target}"
            )));
        }

        self.check_gate(&order, target)?;

        order.status = target;
        order.timeline.push(TimelineEvent {
            from,
            to: target,
            actor: actor.id.clone(),
            role: actor.roles.first().cloned(),
            comment,
            at: now_rfc3339(),
        });
        touch(&mut order);

        if !self.store.update_cas(&order, from)? {
            return self.cas_miss(order_id, from);
        }

        self.audit(order_id, "transition", actor, Some(format!("{from} -> {target}")));

        let side_effects = self.post_commit(&order, target);
        Ok(TransitionOutcome { order, side_effects })
    }

    /// The batch-release trigger target: every order attached to the
    /// batch and sitting in QC_PENDING moves to RELEASED under the
    /// system actor. Per-order failures are logged and skipped so one
    /// bad order never blocks its siblings.
    pub fn on_batch_released(&self, batch_id: &str) {
        let system = Actor::with_permissions("system", ["orders:order:release"]);

        let orders = match self.store.list_by_batch(batch_id, OrderStatus::QcPending) {
            Ok(orders) => orders,
            Err(e) => {
                tracing::warn!(batch = %batch_id, error = %e, "release fan-out query failed");
                return;
            }
        };

        for order in orders {
            match self.transition(&order.id, OrderStatus::Released, &system, None) {
                Ok(_) => {
                    tracing::info!(order = %order.id, batch = %batch_id, "order released");
                }
                Err(e) => {
                    tracing::warn!(order = %order.id, batch = %batch_id, error = %e,
                        "release fan-out skipped order");
                }
            }
        }
    }

    // =======================================================================
    // Internals
    // =======================================================================

    /// Cross-entity preconditions for gated target states.
    fn check_gate(&self, order: &Order, target: OrderStatus) -> Result<(), ServiceError> {
        match target {
            OrderStatus::Scheduled => {
                if order.batch_id.is_none() {
                    return Err(ServiceError::InvalidState(format!(
                        "order {} has no batch assigned, cannot schedule",
                        order.id
                    )));
                }
            }
            OrderStatus::Released => {
                let batch_id = order.batch_id.as_deref().ok_or_else(|| {
                    ServiceError::InvalidState(format!(
                        "order {} has no batch assigned, cannot release",
                        order.id
                    ))
                })?;
                let status = self.batch_gate.batch_status(batch_id)?.ok_or_else(|| {
                    ServiceError::InvalidState(format!(
                        "order {}: batch {batch_id} not found",
                        order.id
                    ))
                })?;
                if status != "RELEASED" {
                    return Err(ServiceError::InvalidState(format!(
                        "order {}: batch {batch_id} is {status}, not RELEASED",
                        order.id
                    )));
                }
            }
            OrderStatus::Dispatched => {
                let shipment_id = order.shipment_id.as_deref().ok_or_else(|| {
                    ServiceError::InvalidState(format!(
                        "order {} has no shipment assigned, cannot dispatch",
                        order.id
                    ))
                })?;
                if !self.shipment_gate.shipment_active(shipment_id)? {
                    return Err(ServiceError::InvalidState(format!(
                        "order {}: shipment {shipment_id} is not active",
                        order.id
                    )));
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Side effects that fire after a committed transition.
    fn post_commit(&self, order: &Order, target: OrderStatus) -> Vec<SideEffect> {
        let mut effects = Vec::new();

        if target == OrderStatus::QcPending {
            if let Some(batch_id) = order.batch_id.as_deref() {
                match self.batch_gate.initialize_qc(batch_id) {
                    Ok(tests) => effects.push(SideEffect::QcSeeded {
                        batch_id: batch_id.to_string(),
                        tests,
                    }),
                    Err(e) => {
                        tracing::warn!(order = %order.id, batch = %batch_id, error = %e,
                            "qc seeding failed after transition");
                    }
                }
            }
        }

        effects
    }

    /// A conditional update found the pre-state gone at commit time.
    /// Re-read to tell a state race apart from a stale expectation.
    fn cas_miss<T>(&self, order_id: &str, expected: OrderStatus) -> Result<T, ServiceError> {
        let current = self.store.get(order_id)?;
        if current.status == expected {
            Err(ServiceError::Conflict(format!(
                "order {order_id} was modified concurrently"
            )))
        } else {
            Err(ServiceError::InvalidState(format!(
                "order {order_id} is {}, expected {expected}",
                current.status
            )))
        }
    }

    fn audit(&self, order_id: &str, action: &str, actor: &Actor, detail: Option<String>) {
        let mut event = AuditEvent::new("order", order_id, action, &actor.id);
        event.detail = detail;
        self.audit.append(&event);
    }
}
