use std::sync::{Arc, RwLock};

use isoflow_core::{
    Actor, AuditEvent, AuditRecorder, Authorizer, ServiceError, new_id, now_rfc3339, require,
};

use crate::model::{
    Batch, BatchRelease, BatchStatus, QcSummary, QcTemplate, QcTestResult, QcValue,
};
use crate::store::{BatchStore, touch};

/// Permission resource for batch lifecycle actions.
const BATCH_RESOURCE: &str = "production:batch";
/// Permission resource for QC recording.
const QC_RESOURCE: &str = "production:qc";

/// Callback fired after a batch is successfully released, so the order
/// state machine can re-evaluate its RELEASED gate for every attached
/// order. Implementations must not panic; they log their own failures.
pub type ReleaseTrigger = Arc<dyn Fn(&Batch) + Send + Sync>;

/// The batch production and release gate.
///
/// This is a state machine over persistent batches:
/// - Seeds QC result rows from the product's active template (once).
/// - Scores recorded values against acceptance rules.
/// - Enforces "QC must fully pass before release".
/// - Captures the electronic signature in an immutable release record.
/// - Applies separation of duties: whoever recorded a QC result for a
///   batch cannot release that batch.
///
/// Status moves are compare-and-swap updates; a lost race surfaces as
/// `Conflict`, never as a silent overwrite.
pub struct BatchEngine {
    store: Arc<BatchStore>,
    authorizer: Arc<dyn Authorizer>,
    audit: Arc<dyn AuditRecorder>,
    on_release: RwLock<Option<ReleaseTrigger>>,
}

impl BatchEngine {
    pub fn new(
        store: Arc<BatchStore>,
        authorizer: Arc<dyn Authorizer>,
        audit: Arc<dyn AuditRecorder>,
    ) -> Self {
        Self {
            store,
            authorizer,
            audit,
            on_release: RwLock::new(None),
        }
    }

    /// Access the underlying store.
    pub fn store(&self) -> &Arc<BatchStore> {
        &self.store
    }

    /// Wire the release trigger. Called once at startup by the binary.
    pub fn set_release_trigger(&self, trigger: ReleaseTrigger) {
        if let Ok(mut slot) = self.on_release.write() {
            *slot = Some(trigger);
        }
    }

    // =======================================================================
    // Batch lifecycle
    // =======================================================================

    /// Create a new batch in CREATED, remembering the QC template to
    /// seed from when it enters QC.
    pub fn create_batch(
        &self,
        product: &str,
        template: QcTemplate,
        order_ids: Vec<String>,
        actor: &Actor,
    ) -> Result<Batch, ServiceError> {
        require(self.authorizer.as_ref(), actor, BATCH_RESOURCE, "create")?;

        if template.tests.is_empty() {
            return Err(ServiceError::Validation(format!(
                "product {product} has an empty qc template"
            )));
        }

        let batch = Batch {
            id: new_id(),
            product: product.to_string(),
            status: BatchStatus::Created,
            order_ids,
            template: Some(template),
            held_from: None,
            hold_reason: None,
            created_at: now_rfc3339(),
            updated_at: None,
        };
        self.store.create(&batch)?;

        self.audit(&batch.id, "create", actor, None);
        Ok(batch)
    }

    /// CREATED → IN_PRODUCTION.
    pub fn start_production(&self, batch_id: &str, actor: &Actor) -> Result<Batch, ServiceError> {
        require(self.authorizer.as_ref(), actor, BATCH_RESOURCE, "start")?;
        self.cas_transition(batch_id, BatchStatus::Created, BatchStatus::InProduction, actor)
    }

    /// IN_PRODUCTION → QC_PENDING, then seeds the QC rows (idempotent).
    pub fn enter_qc(&self, batch_id: &str, actor: &Actor) -> Result<Batch, ServiceError> {
        require(self.authorizer.as_ref(), actor, BATCH_RESOURCE, "enter-qc")?;
        let batch =
            self.cas_transition(batch_id, BatchStatus::InProduction, BatchStatus::QcPending, actor)?;
        self.initialize_qc(batch_id)?;
        Ok(batch)
    }

    /// Attach an order to a batch. Idempotent; called when an order is
    /// scheduled onto this batch.
    pub fn attach_order(&self, batch_id: &str, order_id: &str) -> Result<Batch, ServiceError> {
        let mut batch = self.store.get(batch_id)?;
        if batch.status.is_terminal() {
            return Err(ServiceError::InvalidState(format!(
                "batch {batch_id} is {}, orders can no longer be attached",
                batch.status
            )));
        }
        if !batch.order_ids.iter().any(|o| o == order_id) {
            batch.order_ids.push(order_id.to_string());
            touch(&mut batch);
            self.store.update(&batch)?;
        }
        Ok(batch)
    }

    // =======================================================================
    // QC evaluator
    // =======================================================================

    /// Seed QcTestResult rows from the product's active QC template.
    ///
    /// Idempotent: does nothing if any rows already exist for this batch.
    /// Returns the number of rows seeded.
    pub fn initialize_qc(&self, batch_id: &str) -> Result<usize, ServiceError> {
        let batch = self.store.get(batch_id)?;

        if self.store.count_qc_results(batch_id)? > 0 {
            return Ok(0);
        }

        let template = batch.template.as_ref().ok_or_else(|| {
            ServiceError::Internal(format!("batch {batch_id} has no qc template"))
        })?;
        let results: Vec<QcTestResult> = template
            .tests
            .iter()
            .map(|spec| QcTestResult {
                id: new_id(),
                batch_id: batch.id.clone(),
                test_id: spec.test_id.clone(),
                name: spec.name.clone(),
                rule: spec.rule.clone(),
                value: None,
                passed: None,
                completed: false,
                recorded_by: None,
                recorded_at: None,
            })
            .collect();

        self.store.seed_qc_results(&results)?;
        tracing::debug!(batch = %batch_id, tests = results.len(), "qc seeded");
        Ok(results.len())
    }

    /// Record the raw value for one test of one batch and derive its
    /// verdict from the acceptance rule.
    pub fn record_result(
        &self,
        batch_id: &str,
        test_id: &str,
        value: QcValue,
        actor: &Actor,
    ) -> Result<QcTestResult, ServiceError> {
        require(self.authorizer.as_ref(), actor, QC_RESOURCE, "record")?;

        let batch = self.store.get(batch_id)?;
        if batch.status != BatchStatus::QcPending {
            return Err(ServiceError::InvalidState(format!(
                "batch {batch_id} is {}, qc results can only be recorded in QC_PENDING",
                batch.status
            )));
        }

        let mut result = self.store.get_qc_result(batch_id, test_id)?;

        let passed = result.rule.evaluate(&value).ok_or_else(|| {
            ServiceError::Validation(format!(
                "test {test_id} expects a {} value",
                if result.rule.is_numeric() { "numeric" } else { "pass/fail" }
            ))
        })?;

        result.value = Some(value);
        result.passed = Some(passed);
        result.completed = true;
        result.recorded_by = Some(actor.id.clone());
        result.recorded_at = Some(now_rfc3339());
        if !self
            .store
            .record_qc_result_cas(&result, BatchStatus::QcPending)?
        {
            return self.cas_miss(batch_id, BatchStatus::QcPending);
        }

        self.audit(
            batch_id,
            "qc-record",
            actor,
            Some(format!("{test_id}: {}", if passed { "pass" } else { "fail" })),
        );
        Ok(result)
    }

    /// Per-batch QC aggregate. Read-only; eventually consistent across
    /// concurrently-updated test rows.
    pub fn qc_status(&self, batch_id: &str) -> Result<QcSummary, ServiceError> {
        // NotFound for unknown batches, even ones with zero seeded rows.
        self.store.get(batch_id)?;
        let (total, completed, passed, failed) = self.store.qc_counters(batch_id)?;
        Ok(QcSummary {
            total,
            completed,
            passed,
            failed,
        })
    }

    /// Close out QC: QC_PENDING → QC_PASSED when every test passed,
    /// QC_PENDING → FAILED_QC (terminal) when any failed.
    pub fn complete_qc(&self, batch_id: &str, actor: &Actor) -> Result<Batch, ServiceError> {
        require(self.authorizer.as_ref(), actor, BATCH_RESOURCE, "complete-qc")?;

        let summary = self.qc_status(batch_id)?;
        if !summary.is_complete() {
            return Err(ServiceError::InvalidState(format!(
                "qc incomplete on batch {batch_id}: {}/{} recorded",
                summary.completed, summary.total
            )));
        }

        let target = if summary.failed == 0 {
            BatchStatus::QcPassed
        } else {
            BatchStatus::FailedQc
        };
        self.cas_transition(batch_id, BatchStatus::QcPending, target, actor)
    }

    // =======================================================================
    // Hold / resume
    // =======================================================================

    /// Place a hold. Allowed from QC_PENDING and QC_PASSED.
    pub fn hold(&self, batch_id: &str, actor: &Actor, reason: &str) -> Result<Batch, ServiceError> {
        require(self.authorizer.as_ref(), actor, BATCH_RESOURCE, "hold")?;
        if reason.trim().is_empty() {
            return Err(ServiceError::Validation("hold reason must not be empty".into()));
        }

        let mut batch = self.store.get(batch_id)?;
        let from = batch.status;
        if !from.can_hold() {
            return Err(ServiceError::InvalidState(format!(
                "batch {batch_id} is {from}, holds apply in QC_PENDING or QC_PASSED"
            )));
        }

        batch.status = BatchStatus::OnHold;
        batch.held_from = Some(from);
        batch.hold_reason = Some(reason.trim().to_string());
        touch(&mut batch);

        if !self.store.update_cas(&batch, from)? {
            return self.cas_miss(batch_id, from);
        }
        self.audit(batch_id, "hold", actor, Some(format!("{from} -> ON_HOLD")));
        Ok(batch)
    }

    /// Lift a hold, returning to the status the hold was entered from.
    pub fn resume(&self, batch_id: &str, actor: &Actor) -> Result<Batch, ServiceError> {
        require(self.authorizer.as_ref(), actor, BATCH_RESOURCE, "resume")?;

        let mut batch = self.store.get(batch_id)?;
        if batch.status != BatchStatus::OnHold {
            return Err(ServiceError::InvalidState(format!(
                "batch {batch_id} is {}, not ON_HOLD",
                batch.status
            )));
        }
        let back_to = batch
            .held_from
            .ok_or_else(|| ServiceError::Internal(format!("batch {batch_id} lost held_from")))?;

        batch.status = back_to;
        batch.held_from = None;
        batch.hold_reason = None;
        touch(&mut batch);

        if !self.store.update_cas(&batch, BatchStatus::OnHold)? {
            return self.cas_miss(batch_id, BatchStatus::OnHold);
        }
        self.audit(batch_id, "resume", actor, Some(format!("ON_HOLD -> {back_to}")));
        Ok(batch)
    }

    // =======================================================================
    // Release gate
    // =======================================================================

    /// Release a batch for distribution.
    ///
    /// Preconditions, each with its own error:
    /// - non-empty signature (`Validation`)
    /// - actor holds `production:batch:release` (`PermissionDenied`)
    /// - actor recorded no QC result for this batch (`SeparationOfDuties`)
    /// - status is QC_PASSED (`InvalidState`)
    ///
    /// On success: CAS to RELEASED plus the single immutable BatchRelease
    /// row in one transaction, then the release trigger fires for the
    /// order state machine.
    pub fn release(
        &self,
        batch_id: &str,
        actor: &Actor,
        signature: &str,
        notes: Option<String>,
    ) -> Result<Batch, ServiceError> {
        if signature.trim().is_empty() {
            return Err(ServiceError::Validation("release signature must not be empty".into()));
        }
        require(self.authorizer.as_ref(), actor, BATCH_RESOURCE, "release")?;

        let mut batch = self.store.get(batch_id)?;
        if self.store.actor_recorded_qc(batch_id, &actor.id)? {
            return Err(ServiceError::SeparationOfDuties(format!(
                "actor {} recorded qc results for batch {batch_id} and cannot release it",
                actor.id
            )));
        }
        if batch.status != BatchStatus::QcPassed {
            return Err(ServiceError::InvalidState(format!(
                "batch {batch_id} is {}, expected QC_PASSED",
                batch.status
            )));
        }

        // QC_PASSED already implies a fully green summary; re-check so a
        // released batch can never carry a failed test.
        let summary = self.qc_status(batch_id)?;
        if !summary.all_passed() {
            return Err(ServiceError::InvalidState(format!(
                "batch {batch_id} has {} failed / {} unrecorded tests",
                summary.failed,
                summary.total - summary.completed
            )));
        }

        let release = BatchRelease {
            id: new_id(),
            batch_id: batch.id.clone(),
            released_by: actor.id.clone(),
            signature: signature.trim().to_string(),
            notes,
            released_at: now_rfc3339(),
        };

        batch.status = BatchStatus::Released;
        touch(&mut batch);

        if !self.store.release_cas(&batch, &release)? {
            return self.cas_miss(batch_id, BatchStatus::QcPassed);
        }

        self.audit(batch_id, "release", actor, Some("QC_PASSED -> RELEASED".into()));
        self.fire_release_trigger(&batch);
        Ok(batch)
    }

    /// Reject a QC_PASSED batch. Terminal; no release record is created.
    pub fn reject(&self, batch_id: &str, actor: &Actor, reason: &str) -> Result<Batch, ServiceError> {
        if reason.trim().is_empty() {
            return Err(ServiceError::Validation("rejection reason must not be empty".into()));
        }
        require(self.authorizer.as_ref(), actor, BATCH_RESOURCE, "reject")?;

        let mut batch = self.store.get(batch_id)?;
        if batch.status != BatchStatus::QcPassed {
            return Err(ServiceError::InvalidState(format!(
                "batch {batch_id} is {}, expected QC_PASSED",
                batch.status
            )));
        }

        batch.status = BatchStatus::Rejected;
        batch.hold_reason = Some(reason.trim().to_string());
        touch(&mut batch);

        if !self.store.update_cas(&batch, BatchStatus::QcPassed)? {
            return self.cas_miss(batch_id, BatchStatus::QcPassed);
        }
        self.audit(batch_id, "reject", actor, Some(format!("QC_PASSED -> REJECTED: {reason}")));
        Ok(batch)
    }

    // =======================================================================
    // Internals
    // =======================================================================

    fn cas_transition(
        &self,
        batch_id: &str,
        expected: BatchStatus,
        target: BatchStatus,
        actor: &Actor,
    ) -> Result<Batch, ServiceError> {
        let mut batch = self.store.get(batch_id)?;
        if batch.status != expected {
            return Err(ServiceError::InvalidState(format!(
                "batch {batch_id} is {}, expected {expected}",
                batch.status
            )));
        }

        batch.status = target;
        touch(&mut batch);

        if !self.store.update_cas(&batch, expected)? {
            return self.cas_miss(batch_id, expected);
        }
        self.audit(batch_id, "transition", actor, Some(format!("{expected} -> {target}")));
        Ok(batch)
    }

    /// A conditional update found the pre-state gone at commit time.
    /// Re-read to tell a state race apart from a stale expectation.
    fn cas_miss<T>(&self, batch_id: &str, expected: BatchStatus) -> Result<T, ServiceError> {
        let current = self.store.get(batch_id)?;
        if current.status == expected {
            Err(ServiceError::Conflict(format!(
                "batch {batch_id} was modified concurrently"
            )))
        } else {
            Err(ServiceError::InvalidState(format!(
                "batch {batch_id} is {}, expected {expected}",
                current.status
            )))
        }
    }

    fn fire_release_trigger(&self, batch: &Batch) {
        let trigger = match self.on_release.read() {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        };
        if let Some(trigger) = trigger {
            trigger(batch);
        }
    }

    fn audit(&self, batch_id: &str, action: &str, actor: &Actor, detail: Option<String>) {
        let mut event = AuditEvent::new("batch", batch_id, action, &actor.id);
        event.detail = detail;
        self.audit.append(&event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AcceptanceRule, QcTestSpec};
    use isoflow_core::{ActorPermissions, NullRecorder};
    use isoflow_sql::SqliteStore;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn make_engine() -> Arc<BatchEngine> {
        let db = Arc::new(SqliteStore::open_in_memory().unwrap());
        let store = Arc::new(BatchStore::new(db).unwrap());
        Arc::new(BatchEngine::new(
            store,
            Arc::new(ActorPermissions),
            Arc::new(NullRecorder),
        ))
    }

    fn template() -> QcTemplate {
        QcTemplate {
            product: "FDG-18".into(),
            tests: vec![
                QcTestSpec {
                    test_id: "purity".into(),
                    name: "Radiochemical purity".into(),
                    rule: AcceptanceRule::Min { min: 95.0 },
                },
                QcTestSpec {
                    test_id: "ph".into(),
                    name: "pH".into(),
                    rule: AcceptanceRule::Range { min: 4.5, max: 7.5 },
                },
                QcTestSpec {
                    test_id: "sterility".into(),
                    name: "Sterility".into(),
                    rule: AcceptanceRule::PassFail,
                },
            ],
        }
    }

    fn supervisor() -> Actor {
        Actor::with_permissions("sup-1", ["production:batch:*", "production:qc:*"])
    }

    fn qc_tech(id: &str) -> Actor {
        Actor::with_permissions(id, ["production:qc:record"])
    }

    fn qp(id: &str) -> Actor {
        Actor::with_permissions(
            id,
            ["production:batch:release", "production:batch:reject"],
        )
    }

    /// Drive a fresh batch to QC_PENDING with seeded rows.
    fn batch_in_qc(engine: &BatchEngine) -> Batch {
        let sup = supervisor();
        let batch = engine
            .create_batch("FDG-18", template(), vec![], &sup)
            .unwrap();
        engine.start_production(&batch.id, &sup).unwrap();
        engine.enter_qc(&batch.id, &sup).unwrap()
    }

    /// Drive a batch to QC_PASSED with all tests recorded by `tech`.
    fn passed_batch(engine: &BatchEngine, tech: &Actor) -> Batch {
        let batch = batch_in_qc(engine);
        engine
            .record_result(&batch.id, "purity", QcValue::Numeric(99.2), tech)
            .unwrap();
        engine
            .record_result(&batch.id, "ph", QcValue::Numeric(6.0), tech)
            .unwrap();
        engine
            .record_result(&batch.id, "sterility", QcValue::Bool(true), tech)
            .unwrap();
        engine.complete_qc(&batch.id, &supervisor()).unwrap()
    }

    #[test]
    fn lifecycle_to_qc_pending_seeds_results() {
        let engine = make_engine();
        let batch = batch_in_qc(&engine);
        assert_eq!(batch.status, BatchStatus::QcPending);

        let summary = engine.qc_status(&batch.id).unwrap();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.completed, 0);
    }

    #[test]
    fn initialize_qc_is_idempotent() {
        let engine = make_engine();
        let batch = batch_in_qc(&engine);
        // enter_qc already seeded.
        assert_eq!(engine.initialize_qc(&batch.id).unwrap(), 0);
        assert_eq!(engine.qc_status(&batch.id).unwrap().total, 3);
    }

    #[test]
    fn record_result_applies_acceptance_rules() {
        let engine = make_engine();
        let batch = batch_in_qc(&engine);
        let tech = qc_tech("qc-1");

        let r = engine
            .record_result(&batch.id, "purity", QcValue::Numeric(95.0), &tech)
            .unwrap();
        assert_eq!(r.passed, Some(true)); // inclusive bound

        let r = engine
            .record_result(&batch.id, "ph", QcValue::Numeric(8.0), &tech)
            .unwrap();
        assert_eq!(r.passed, Some(false));

        let summary = engine.qc_status(&batch.id).unwrap();
        assert_eq!(summary.completed, 2);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.failed, 1);
    }

    #[test]
    fn record_result_unknown_test_is_not_found() {
        let engine = make_engine();
        let batch = batch_in_qc(&engine);
        let err = engine
            .record_result(&batch.id, "nope", QcValue::Bool(true), &qc_tech("qc-1"))
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));

        let err = engine
            .record_result("nope", "purity", QcValue::Bool(true), &qc_tech("qc-1"))
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[test]
    fn record_result_wrong_value_kind_is_validation() {
        let engine = make_engine();
        let batch = batch_in_qc(&engine);
        let err = engine
            .record_result(&batch.id, "sterility", QcValue::Numeric(1.0), &qc_tech("qc-1"))
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[test]
    fn complete_qc_requires_all_results() {
        let engine = make_engine();
        let batch = batch_in_qc(&engine);
        let tech = qc_tech("qc-1");
        engine
            .record_result(&batch.id, "purity", QcValue::Numeric(99.0), &tech)
            .unwrap();

        let err = engine.complete_qc(&batch.id, &supervisor()).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
        assert!(err.to_string().contains("1/3"));
    }

    #[test]
    fn one_failed_test_fails_the_batch_and_blocks_release() {
        let engine = make_engine();
        let batch = batch_in_qc(&engine);
        let tech = qc_tech("qc-1");
        engine
            .record_result(&batch.id, "purity", QcValue::Numeric(99.0), &tech)
            .unwrap();
        engine
            .record_result(&batch.id, "ph", QcValue::Numeric(6.5), &tech)
            .unwrap();
        engine
            .record_result(&batch.id, "sterility", QcValue::Bool(false), &tech)
            .unwrap();

        let batch = engine.complete_qc(&batch.id, &supervisor()).unwrap();
        assert_eq!(batch.status, BatchStatus::FailedQc);

        // Terminal: no release path for a failed batch.
        let err = engine
            .release(&batch.id, &qp("qp-1"), "Q. Person", None)
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
        assert!(engine.store().get_release(&batch.id).unwrap().is_none());
    }

    #[test]
    fn release_requires_signature() {
        let engine = make_engine();
        let batch = passed_batch(&engine, &qc_tech("qc-1"));
        let err = engine
            .release(&batch.id, &qp("qp-1"), "   ", None)
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[test]
    fn release_requires_permission() {
        let engine = make_engine();
        let batch = passed_batch(&engine, &qc_tech("qc-1"));
        let err = engine
            .release(&batch.id, &qc_tech("qc-2"), "Q. Person", None)
            .unwrap_err();
        assert!(matches!(err, ServiceError::PermissionDenied(_)));
    }

    #[test]
    fn qc_recorder_cannot_release_same_batch() {
        let engine = make_engine();
        // The recording actor also holds release permission.
        let dual = Actor::with_permissions(
            "dual-1",
            ["production:qc:record", "production:batch:release"],
        );
        let batch = passed_batch(&engine, &dual);

        let err = engine
            .release(&batch.id, &dual, "Dual Role", None)
            .unwrap_err();
        assert!(matches!(err, ServiceError::SeparationOfDuties(_)));

        // A different qualified person can release.
        let released = engine
            .release(&batch.id, &qp("qp-1"), "Q. Person", None)
            .unwrap();
        assert_eq!(released.status, BatchStatus::Released);
    }

    #[test]
    fn release_creates_exactly_one_record() {
        let engine = make_engine();
        let batch = passed_batch(&engine, &qc_tech("qc-1"));

        let released = engine
            .release(&batch.id, &qp("qp-1"), "Q. Person", Some("ok".into()))
            .unwrap();
        assert_eq!(released.status, BatchStatus::Released);

        let record = engine.store().get_release(&batch.id).unwrap().unwrap();
        assert_eq!(record.released_by, "qp-1");
        assert_eq!(record.signature, "Q. Person");
        assert!(record.released_at <= isoflow_core::now_rfc3339());

        // Second release attempt fails and leaves the single record.
        let err = engine
            .release(&batch.id, &qp("qp-2"), "Other QP", None)
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
        let again = engine.store().get_release(&batch.id).unwrap().unwrap();
        assert_eq!(again.id, record.id);
    }

    #[test]
    fn released_batch_implies_all_tests_passed() {
        let engine = make_engine();
        let batch = passed_batch(&engine, &qc_tech("qc-1"));
        engine
            .release(&batch.id, &qp("qp-1"), "Q. Person", None)
            .unwrap();

        let results = engine.store().qc_results(&batch.id).unwrap();
        assert!(!results.is_empty());
        assert!(results.iter().all(|r| r.passed == Some(true)));

        // And results are frozen: recording after release is refused.
        let err = engine
            .record_result(&batch.id, "ph", QcValue::Numeric(6.0), &qc_tech("qc-1"))
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
    }

    #[test]
    fn stale_qc_write_after_release_is_discarded() {
        let engine = make_engine();
        let batch = passed_batch(&engine, &qc_tech("qc-1"));

        // A stalled writer read the row while QC was still open.
        let mut stale = engine.store().get_qc_result(&batch.id, "ph").unwrap();
        stale.value = Some(QcValue::Numeric(9.9));
        stale.passed = Some(false);
        stale.completed = true;
        stale.recorded_by = Some("qc-9".into());

        engine
            .release(&batch.id, &qp("qp-1"), "Q. Person", None)
            .unwrap();

        // The late write misses the status guard and nothing lands.
        assert!(!engine
            .store()
            .record_qc_result_cas(&stale, BatchStatus::QcPending)
            .unwrap());

        let summary = engine.qc_status(&batch.id).unwrap();
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.passed, summary.total);
        let stored = engine.store().get_qc_result(&batch.id, "ph").unwrap();
        assert_eq!(stored.passed, Some(true));
    }

    #[test]
    fn reject_requires_reason_and_skips_release_record() {
        let engine = make_engine();
        let batch = passed_batch(&engine, &qc_tech("qc-1"));

        let err = engine.reject(&batch.id, &qp("qp-1"), "").unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));

        let rejected = engine
            .reject(&batch.id, &qp("qp-1"), "stability deviation")
            .unwrap();
        assert_eq!(rejected.status, BatchStatus::Rejected);
        assert!(engine.store().get_release(&batch.id).unwrap().is_none());
    }

    #[test]
    fn concurrent_release_and_reject_exactly_one_wins() {
        let engine = make_engine();
        let batch = passed_batch(&engine, &qc_tech("qc-1"));

        let wins = Arc::new(AtomicU32::new(0));
        let losses = Arc::new(AtomicU32::new(0));

        let e1 = Arc::clone(&engine);
        let id1 = batch.id.clone();
        let w1 = Arc::clone(&wins);
        let l1 = Arc::clone(&losses);
        let releaser = std::thread::spawn(move || {
            match e1.release(&id1, &qp("qp-1"), "Q. Person", None) {
                Ok(_) => w1.fetch_add(1, Ordering::SeqCst),
                Err(ServiceError::InvalidState(_)) | Err(ServiceError::Conflict(_)) => {
                    l1.fetch_add(1, Ordering::SeqCst)
                }
                Err(e) => panic!("unexpected error: {e}"),
            };
        });

        let e2 = Arc::clone(&engine);
        let id2 = batch.id.clone();
        let w2 = Arc::clone(&wins);
        let l2 = Arc::clone(&losses);
        let rejecter = std::thread::spawn(move || {
            match e2.reject(&id2, &qp("qp-2"), "deviation") {
                Ok(_) => w2.fetch_add(1, Ordering::SeqCst),
                Err(ServiceError::InvalidState(_)) | Err(ServiceError::Conflict(_)) => {
                    l2.fetch_add(1, Ordering::SeqCst)
                }
                Err(e) => panic!("unexpected error: {e}"),
            };
        });

        releaser.join().unwrap();
        rejecter.join().unwrap();

        assert_eq!(wins.load(Ordering::SeqCst), 1);
        assert_eq!(losses.load(Ordering::SeqCst), 1);

        let final_batch = engine.store().get(&batch.id).unwrap();
        assert!(matches!(
            final_batch.status,
            BatchStatus::Released | BatchStatus::Rejected
        ));
        // A release record exists iff the release won.
        let has_record = engine.store().get_release(&batch.id).unwrap().is_some();
        assert_eq!(has_record, final_batch.status == BatchStatus::Released);
    }

    #[test]
    fn hold_and_resume_roundtrip() {
        let engine = make_engine();
        let batch = passed_batch(&engine, &qc_tech("qc-1"));
        let sup = supervisor();

        let held = engine.hold(&batch.id, &sup, "power outage").unwrap();
        assert_eq!(held.status, BatchStatus::OnHold);
        assert_eq!(held.held_from, Some(BatchStatus::QcPassed));

        // No release from hold.
        let err = engine
            .release(&batch.id, &qp("qp-1"), "Q. Person", None)
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));

        let resumed = engine.resume(&batch.id, &sup).unwrap();
        assert_eq!(resumed.status, BatchStatus::QcPassed);
        assert!(resumed.held_from.is_none());
    }

    #[test]
    fn release_trigger_fires_with_released_batch() {
        let engine = make_engine();
        let seen = Arc::new(std::sync::Mutex::new(Vec::<String>::new()));
        let seen_clone = Arc::clone(&seen);
        engine.set_release_trigger(Arc::new(move |batch: &Batch| {
            assert_eq!(batch.status, BatchStatus::Released);
            seen_clone.lock().unwrap().push(batch.id.clone());
        }));

        let batch = passed_batch(&engine, &qc_tech("qc-1"));
        engine
            .release(&batch.id, &qp("qp-1"), "Q. Person", None)
            .unwrap();

        assert_eq!(seen.lock().unwrap().as_slice(), &[batch.id.clone()]);
    }

    #[test]
    fn attach_order_is_idempotent() {
        let engine = make_engine();
        let batch = batch_in_qc(&engine);
        engine.attach_order(&batch.id, "o1").unwrap();
        let b = engine.attach_order(&batch.id, "o1").unwrap();
        assert_eq!(b.order_ids, vec!["o1".to_string()]);
    }
}
