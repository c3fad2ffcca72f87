use std::sync::Arc;

use isoflow_core::{
    Actor, AuditEvent, AuditRecorder, Authorizer, ServiceError, new_id, now_rfc3339, require,
};

use crate::model::{
    Invoice, InvoiceStatus, Payment, PaymentRequest, PaymentRequestStatus, ReceiptVoucher,
};
use crate::store::{BillingStore, touch};

/// Permission resource for invoices.
const INVOICE_RESOURCE: &str = "billing:invoice";
/// Permission resource for payment requests.
const PAYMENT_RESOURCE: &str = "billing:payment";

/// Payment reconciliation.
///
/// A payment request claims money against an invoice; confirmation
/// settles the claim as one atomic unit — request marked CONFIRMED,
/// receipt voucher issued, ledger row appended, invoice paid amount
/// bumped with its status rederived. The invoice's `paid_amount` only
/// ever grows, and its status is never stored out of line with it.
pub struct BillingEngine {
    store: Arc<BillingStore>,
    authorizer: Arc<dyn Authorizer>,
    audit: Arc<dyn AuditRecorder>,
}

impl BillingEngine {
    pub fn new(
        store: Arc<BillingStore>,
        authorizer: Arc<dyn Authorizer>,
        audit: Arc<dyn AuditRecorder>,
    ) -> Self {
        Self {
            store,
            authorizer,
            audit,
        }
    }

    /// Access the underlying store.
    pub fn store(&self) -> &Arc<BillingStore> {
        &self.store
    }

    // =======================================================================
    // Invoices
    // =======================================================================

    /// Create an invoice. Amounts are minor units (cents).
    pub fn create_invoice(
        &self,
        customer: &str,
        total_amount: i64,
        actor: &Actor,
    ) -> Result<Invoice, ServiceError> {
        require(self.authorizer.as_ref(), actor, INVOICE_RESOURCE, "create")?;

        if customer.trim().is_empty() {
            return Err(ServiceError::Validation("customer is required".into()));
        }
        if total_amount <= 0 {
            return Err(ServiceError::Validation(
                "invoice total must be positive".into(),
            ));
        }

        let invoice = Invoice {
            id: new_id(),
            customer: customer.trim().to_string(),
            total_amount,
            paid_amount: 0,
            status: InvoiceStatus::Unpaid,
            created_at: now_rfc3339(),
            updated_at: None,
        };
        self.store.create_invoice(&invoice)?;

        self.audit(&invoice.id, "create-invoice", actor, None);
        Ok(invoice)
    }

    // =======================================================================
    // Payment requests
    // =======================================================================

    /// Submit a claim of payment against an invoice.
    pub fn create_payment_request(
        &self,
        invoice_id: &str,
        amount: i64,
        method: &str,
        actor: &Actor,
    ) -> Result<PaymentRequest, ServiceError> {
        require(self.authorizer.as_ref(), actor, PAYMENT_RESOURCE, "submit")?;

        if amount <= 0 {
            return Err(ServiceError::Validation(
                "payment amount must be positive".into(),
            ));
        }
        if method.trim().is_empty() {
            return Err(ServiceError::Validation("payment method is required".into()));
        }
        // The invoice must exist; a dangling request is never accepted.
        self.store.get_invoice(invoice_id)?;

        let request = PaymentRequest {
            id: new_id(),
            invoice_id: invoice_id.to_string(),
            amount,
            method: method.trim().to_string(),
            status: PaymentRequestStatus::Pending,
            submitted_by: actor.id.clone(),
            submitted_at: now_rfc3339(),
            reviewed_by: None,
            reviewed_at: None,
            review_notes: None,
        };
        self.store.create_request(&request)?;

        self.audit(&request.id, "submit", actor, Some(format!("invoice {invoice_id}")));
        Ok(request)
    }

    /// Confirm a pending payment request.
    ///
    /// One atomic unit: the request flips to CONFIRMED with reviewer and
    /// timestamp, a receipt voucher is issued, a payment ledger row is
    /// appended, and the invoice's paid amount and derived status move in
    /// the same step. Guards cover the request still being PENDING and
    /// the invoice's paid amount being unchanged since it was read; if
    /// either misses, nothing applies.
    pub fn confirm(
        &self,
        request_id: &str,
        actor: &Actor,
        notes: Option<String>,
    ) -> Result<PaymentRequest, ServiceError> {
        require(self.authorizer.as_ref(), actor, PAYMENT_RESOURCE, "confirm")?;

        let mut request = self.store.get_request(request_id)?;
        if request.status != PaymentRequestStatus::Pending {
            return Err(ServiceError::InvalidState(format!(
                "payment request {request_id} is already {}",
                request.status
            )));
        }

        let mut invoice = self.store.get_invoice(&request.invoice_id)?;
        let expected_paid = invoice.paid_amount;

        request.status = PaymentRequestStatus::Confirmed;
        request.reviewed_by = Some(actor.id.clone());
        request.reviewed_at = Some(now_rfc3339());
        request.review_notes = notes;

        let voucher = ReceiptVoucher {
            id: new_id(),
            voucher_no: next_voucher_no(),
            request_id: request.id.clone(),
            invoice_id: invoice.id.clone(),
            amount: request.amount,
            issued_at: now_rfc3339(),
        };
        let payment = Payment {
            id: new_id(),
            invoice_id: invoice.id.clone(),
            amount: request.amount,
            method: request.method.clone(),
            reference: request.id.clone(),
            paid_at: now_rfc3339(),
        };

        invoice.paid_amount += request.amount;
        invoice.status = InvoiceStatus::derive(invoice.paid_amount, invoice.total_amount);
        touch(&mut invoice);

        if !self
            .store
            .confirm_txn(&request, &voucher, &payment, &invoice, expected_paid)?
        {
            return self.confirm_miss(request_id);
        }

        self.audit(
            request_id,
            "confirm",
            actor,
            Some(format!("invoice {} +{} -> {}", invoice.id, request.amount, invoice.status)),
        );
        Ok(request)
    }

    /// Reject a pending payment request. No financial side effects.
    pub fn reject(
        &self,
        request_id: &str,
        actor: &Actor,
        reason: &str,
    ) -> Result<PaymentRequest, ServiceError> {
        require(self.authorizer.as_ref(), actor, PAYMENT_RESOURCE, "reject")?;
        if reason.trim().is_empty() {
            return Err(ServiceError::Validation(
                "rejection reason must not be empty".into(),
            ));
        }

        let mut request = self.store.get_request(request_id)?;
        if request.status != PaymentRequestStatus::Pending {
            return Err(ServiceError::InvalidState(format!(
                "payment request {request_id} is already {}",
                request.status
            )));
        }

        request.status = PaymentRequestStatus::Rejected;
        request.reviewed_by = Some(actor.id.clone());
        request.reviewed_at = Some(now_rfc3339());
        request.review_notes = Some(reason.trim().to_string());

        if !self
            .store
            .update_request_cas(&request, PaymentRequestStatus::Pending)?
        {
            return self.reject_miss(request_id);
        }

        self.audit(request_id, "reject", actor, Some(reason.trim().to_string()));
        Ok(request)
    }

    // =======================================================================
    // Internals
    // =======================================================================

    /// A confirm guard missed at commit time. Re-read to tell a resolved
    /// request apart from an invoice amount race.
    fn confirm_miss<T>(&self, request_id: &str) -> Result<T, ServiceError> {
        let current = self.store.get_request(request_id)?;
        if current.status == PaymentRequestStatus::Pending {
            Err(ServiceError::Conflict(format!(
                "payment request {request_id} hit a concurrent invoice update"
            )))
        } else {
            Err(ServiceError::InvalidState(format!(
                "payment request {request_id} is already {}",
                current.status
            )))
        }
    }

    /// A reject guard missed. Reject touches only the request row, so a
    /// miss means the request itself moved under us.
    fn reject_miss<T>(&self, request_id: &str) -> Result<T, ServiceError> {
        let current = self.store.get_request(request_id)?;
        if current.status == PaymentRequestStatus::Pending {
            Err(ServiceError::Conflict(format!(
                "payment request {request_id} was modified concurrently"
            )))
        } else {
            Err(ServiceError::InvalidState(format!(
                "payment request {request_id} is already {}",
                current.status
            )))
        }
    }

    fn audit(&self, entity_id: &str, action: &str, actor: &Actor, detail: Option<String>) {
        let mut event = AuditEvent::new("payment", entity_id, action, &actor.id);
        event.detail = detail;
        self.audit.append(&event);
    }
}

/// A fresh, unique voucher number.
fn next_voucher_no() -> String {
    format!("RV-{}", &new_id()[..12].to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use isoflow_core::{ActorPermissions, NullRecorder};
    use isoflow_sql::SqliteStore;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn make_engine() -> Arc<BillingEngine> {
        let db = Arc::new(SqliteStore::open_in_memory().unwrap());
        let store = Arc::new(BillingStore::new(db).unwrap());
        Arc::new(BillingEngine::new(
            store,
            Arc::new(ActorPermissions),
            Arc::new(NullRecorder),
        ))
    }

    fn clerk() -> Actor {
        Actor::with_permissions("clerk-1", ["billing:invoice:*", "billing:payment:submit"])
    }

    fn reviewer() -> Actor {
        Actor::with_permissions("reviewer-1", ["billing:payment:confirm", "billing:payment:reject"])
    }

    #[test]
    fn create_invoice_validates_amount() {
        let engine = make_engine();
        let err = engine.create_invoice("clinic-7", 0, &clerk()).unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
        let err = engine.create_invoice("clinic-7", -500, &clerk()).unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[test]
    fn request_requires_existing_invoice() {
        let engine = make_engine();
        let err = engine
            .create_payment_request("ghost", 1_000, "cash", &clerk())
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[test]
    fn request_amount_must_be_positive() {
        let engine = make_engine();
        let invoice = engine.create_invoice("clinic-7", 10_000, &clerk()).unwrap();
        let err = engine
            .create_payment_request(&invoice.id, 0, "cash", &clerk())
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[test]
    fn confirm_settles_the_request() {
        let engine = make_engine();
        let invoice = engine.create_invoice("clinic-7", 50_000, &clerk()).unwrap();
        let request = engine
            .create_payment_request(&invoice.id, 20_000, "bank-transfer", &clerk())
            .unwrap();

        let confirmed = engine
            .confirm(&request.id, &reviewer(), Some("wire ref 4411".into()))
            .unwrap();
        assert_eq!(confirmed.status, PaymentRequestStatus::Confirmed);
        assert_eq!(confirmed.reviewed_by.as_deref(), Some("reviewer-1"));

        let invoice = engine.store().get_invoice(&invoice.id).unwrap();
        assert_eq!(invoice.paid_amount, 20_000);
        assert_eq!(invoice.status, InvoiceStatus::PartiallyPaid);

        let voucher = engine
            .store()
            .voucher_for_request(&request.id)
            .unwrap()
            .unwrap();
        assert_eq!(voucher.amount, 20_000);
        assert!(voucher.voucher_no.starts_with("RV-"));

        let payments = engine.store().payments_for_invoice(&invoice.id).unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].reference, request.id);
    }

    #[test]
    fn double_confirm_is_invalid_state() {
        let engine = make_engine();
        let invoice = engine.create_invoice("clinic-7", 50_000, &clerk()).unwrap();
        let request = engine
            .create_payment_request(&invoice.id, 20_000, "cash", &clerk())
            .unwrap();

        engine.confirm(&request.id, &reviewer(), None).unwrap();
        let err = engine.confirm(&request.id, &reviewer(), None).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));

        // Still exactly one voucher and one ledger row.
        assert_eq!(engine.store().vouchers_for_invoice(&invoice.id).unwrap().len(), 1);
        assert_eq!(engine.store().payments_for_invoice(&invoice.id).unwrap().len(), 1);
        assert_eq!(engine.store().get_invoice(&invoice.id).unwrap().paid_amount, 20_000);
    }

    #[test]
    fn paid_amount_accumulates_to_paid() {
        let engine = make_engine();
        let invoice = engine.create_invoice("clinic-7", 50_000, &clerk()).unwrap();

        let r1 = engine
            .create_payment_request(&invoice.id, 30_000, "cash", &clerk())
            .unwrap();
        engine.confirm(&r1.id, &reviewer(), None).unwrap();
        assert_eq!(
            engine.store().get_invoice(&invoice.id).unwrap().status,
            InvoiceStatus::PartiallyPaid
        );

        let r2 = engine
            .create_payment_request(&invoice.id, 20_000, "cash", &clerk())
            .unwrap();
        engine.confirm(&r2.id, &reviewer(), None).unwrap();

        let invoice = engine.store().get_invoice(&invoice.id).unwrap();
        assert_eq!(invoice.paid_amount, 50_000);
        assert_eq!(invoice.status, InvoiceStatus::Paid);

        // Distinct voucher numbers across confirmations.
        let vouchers = engine.store().vouchers_for_invoice(&invoice.id).unwrap();
        let numbers: HashSet<_> = vouchers.iter().map(|v| v.voucher_no.clone()).collect();
        assert_eq!(numbers.len(), 2);
    }

    #[test]
    fn reject_requires_reason_and_moves_no_money() {
        let engine = make_engine();
        let invoice = engine.create_invoice("clinic-7", 50_000, &clerk()).unwrap();
        let request = engine
            .create_payment_request(&invoice.id, 20_000, "cash", &clerk())
            .unwrap();

        let err = engine.reject(&request.id, &reviewer(), "  ").unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));

        let rejected = engine
            .reject(&request.id, &reviewer(), "no matching bank entry")
            .unwrap();
        assert_eq!(rejected.status, PaymentRequestStatus::Rejected);

        let invoice = engine.store().get_invoice(&invoice.id).unwrap();
        assert_eq!(invoice.paid_amount, 0);
        assert_eq!(invoice.status, InvoiceStatus::Unpaid);
        assert!(engine.store().vouchers_for_invoice(&invoice.id).unwrap().is_empty());

        // Terminal: no second resolution.
        let err = engine.confirm(&request.id, &reviewer(), None).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
    }

    #[test]
    fn reject_after_confirm_names_the_resolved_status() {
        let engine = make_engine();
        let invoice = engine.create_invoice("clinic-7", 50_000, &clerk()).unwrap();
        let request = engine
            .create_payment_request(&invoice.id, 20_000, "cash", &clerk())
            .unwrap();

        engine.confirm(&request.id, &reviewer(), None).unwrap();

        // A losing reject reports the request's fate, never an invoice race.
        let err = engine
            .reject(&request.id, &reviewer(), "duplicate")
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
        assert!(err.to_string().contains("already CONFIRMED"));
        assert!(!err.to_string().contains("invoice"));
    }

    #[test]
    fn confirm_requires_permission() {
        let engine = make_engine();
        let invoice = engine.create_invoice("clinic-7", 50_000, &clerk()).unwrap();
        let request = engine
            .create_payment_request(&invoice.id, 20_000, "cash", &clerk())
            .unwrap();

        let err = engine.confirm(&request.id, &clerk(), None).unwrap_err();
        assert!(matches!(err, ServiceError::PermissionDenied(_)));
    }

    #[test]
    fn concurrent_confirm_and_reject_exactly_one_wins() {
        let engine = make_engine();
        let invoice = engine.create_invoice("clinic-7", 50_000, &clerk()).unwrap();
        let request = engine
            .create_payment_request(&invoice.id, 20_000, "cash", &clerk())
            .unwrap();

        let wins = Arc::new(AtomicU32::new(0));

        let e1 = Arc::clone(&engine);
        let id1 = request.id.clone();
        let w1 = Arc::clone(&wins);
        let confirmer = std::thread::spawn(move || {
            match e1.confirm(&id1, &reviewer(), None) {
                Ok(_) => {
                    w1.fetch_add(1, Ordering::SeqCst);
                }
                Err(ServiceError::InvalidState(_)) | Err(ServiceError::Conflict(_)) => {}
                Err(e) => panic!("unexpected error: {e}"),
            };
        });

        let e2 = Arc::clone(&engine);
        let id2 = request.id.clone();
        let w2 = Arc::clone(&wins);
        let rejecter = std::thread::spawn(move || {
            match e2.reject(&id2, &reviewer(), "duplicate") {
                Ok(_) => {
                    w2.fetch_add(1, Ordering::SeqCst);
                }
                Err(ServiceError::InvalidState(_)) | Err(ServiceError::Conflict(_)) => {}
                Err(e) => panic!("unexpected error: {e}"),
            };
        });

        confirmer.join().unwrap();
        rejecter.join().unwrap();

        assert_eq!(wins.load(Ordering::SeqCst), 1);

        let resolved = engine.store().get_request(&request.id).unwrap();
        assert!(resolved.status.is_terminal());
        let paid = engine.store().get_invoice(&invoice.id).unwrap().paid_amount;
        let vouchers = engine.store().vouchers_for_invoice(&invoice.id).unwrap().len();
        match resolved.status {
            PaymentRequestStatus::Confirmed => {
                assert_eq!(paid, 20_000);
                assert_eq!(vouchers, 1);
            }
            PaymentRequestStatus::Rejected => {
                assert_eq!(paid, 0);
                assert_eq!(vouchers, 0);
            }
            PaymentRequestStatus::Pending => unreachable!(),
        }
    }
}
