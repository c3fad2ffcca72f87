use std::sync::Arc;

use isoflow_core::{ListResult, ServiceError, now_rfc3339};
use isoflow_sql::{Row, SQLStore, Statement, Value};

use crate::model::{
    Invoice, InvoiceListQuery, Payment, PaymentRequest, PaymentRequestListQuery,
    PaymentRequestStatus, ReceiptVoucher,
};

/// SQL schema for the billing tables.
///
/// The UNIQUE constraints on `vouchers.request_id` and
/// `vouchers.voucher_no` back the one-voucher-per-confirmation
/// guarantee; `payments` is append-only.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS invoices (
    id           TEXT PRIMARY KEY,
    data         TEXT NOT NULL,
    customer     TEXT NOT NULL,
    status       TEXT NOT NULL,
    paid_amount  INTEGER NOT NULL DEFAULT 0,
    create_at    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_invoice_customer ON invoices(customer);
CREATE INDEX IF NOT EXISTS idx_invoice_status ON invoices(status);

CREATE TABLE IF NOT EXISTS payment_requests (
    id          TEXT PRIMARY KEY,
    data        TEXT NOT NULL,
    invoice_id  TEXT NOT NULL,
    status      TEXT NOT NULL,
    create_at   TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_request_invoice ON payment_requests(invoice_id);
CREATE INDEX IF NOT EXISTS idx_request_status ON payment_requests(status);

CREATE TABLE IF NOT EXISTS vouchers (
    id          TEXT PRIMARY KEY,
    data        TEXT NOT NULL,
    request_id  TEXT NOT NULL UNIQUE,
    voucher_no  TEXT NOT NULL UNIQUE,
    invoice_id  TEXT NOT NULL,
    issue_at    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_voucher_invoice ON vouchers(invoice_id);

CREATE TABLE IF NOT EXISTS payments (
    id          TEXT PRIMARY KEY,
    data        TEXT NOT NULL,
    invoice_id  TEXT NOT NULL,
    create_at   TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_payment_invoice ON payments(invoice_id);
";

/// Persistent storage for invoices, payment requests, vouchers, and the
/// payment ledger.
pub struct BillingStore {
    db: Arc<dyn SQLStore>,
}

impl BillingStore {
    /// Create a new BillingStore and initialise the schema.
    pub fn new(db: Arc<dyn SQLStore>) -> Result<Self, ServiceError> {
        db.exec_batch(SCHEMA)
            .map_err(|e| ServiceError::Storage(format!("billing schema init: {e}")))?;
        Ok(Self { db })
    }

    // -----------------------------------------------------------------------
    // Invoices
    // -----------------------------------------------------------------------

    /// Insert a new invoice.
    pub fn create_invoice(&self, invoice: &Invoice) -> Result<(), ServiceError> {
        let data =
            serde_json::to_string(invoice).map_err(|e| ServiceError::Internal(e.to_string()))?;

        self.db
            .exec(
                "INSERT INTO invoices (id, data, customer, status, paid_amount, create_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                &[
                    Value::Text(invoice.id.clone()),
                    Value::Text(data),
                    Value::Text(invoice.customer.clone()),
                    Value::Text(invoice.status.as_str().to_string()),
                    Value::Integer(invoice.paid_amount),
                    Value::Text(invoice.created_at.clone()),
                ],
            )
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        Ok(())
    }

    /// Get an invoice by ID.
    pub fn get_invoice(&self, id: &str) -> Result<Invoice, ServiceError> {
        let rows = self
            .db
            .query(
                "SELECT data FROM invoices WHERE id = ?1",
                &[Value::Text(id.to_string())],
            )
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        let row = rows
            .first()
            .ok_or_else(|| ServiceError::NotFound(format!("invoice {id}")))?;

        row_to_json(row, "invoice")
    }

    /// List invoices with optional filters.
    pub fn list_invoices(&self, query: &InvoiceListQuery) -> Result<ListResult<Invoice>, ServiceError> {
        let limit = query.limit.unwrap_or(50);
        let offset = query.offset.unwrap_or(0);

        let mut where_clauses: Vec<String> = Vec::new();
        let mut params: Vec<Value> = Vec::new();
        let mut idx = 1;

        if let Some(ref c) = query.customer {
            where_clauses.push(format!("customer = ?{idx}"));
            params.push(Value::Text(c.clone()));
            idx += 1;
        }
        if let Some(ref s) = query.status {
            where_clauses.push(format!("status = ?{idx}"));
            params.push(Value::Text(s.clone()));
            idx += 1;
        }

        let where_sql = if where_clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", where_clauses.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) as cnt FROM invoices {where_sql}");
        let count_rows = self
            .db
            .query(&count_sql, &params)
            .map_err(|e| ServiceError::Storage(e.to_string()))?;
        let total = count_rows
            .first()
            .and_then(|r| r.get_i64("cnt"))
            .unwrap_or(0) as usize;

        let select_sql = format!(
            "SELECT data FROM invoices {where_sql} ORDER BY create_at DESC LIMIT ?{idx} OFFSET ?{}",
            idx + 1
        );
        let mut select_params = params;
        select_params.push(Value::Integer(limit as i64));
        select_params.push(Value::Integer(offset as i64));

        let rows = self
            .db
            .query(&select_sql, &select_params)
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        let items = rows
            .iter()
            .map(|r| row_to_json(r, "invoice"))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ListResult { items, total })
    }

    // -----------------------------------------------------------------------
    // Payment requests
    // -----------------------------------------------------------------------

    /// Insert a new payment request.
    pub fn create_request(&self, request: &PaymentRequest) -> Result<(), ServiceError> {
        let data =
            serde_json::to_string(request).map_err(|e| ServiceError::Internal(e.to_string()))?;

        self.db
            .exec(
                "INSERT INTO payment_requests (id, data, invoice_id, status, create_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                &[
                    Value::Text(request.id.clone()),
                    Value::Text(data),
                    Value::Text(request.invoice_id.clone()),
                    Value::Text(request.status.as_str().to_string()),
                    Value::Text(request.submitted_at.clone()),
                ],
            )
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        Ok(())
    }

    /// Get a payment request by ID.
    pub fn get_request(&self, id: &str) -> Result<PaymentRequest, ServiceError> {
        let rows = self
            .db
            .query(
                "SELECT data FROM payment_requests WHERE id = ?1",
                &[Value::Text(id.to_string())],
            )
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        let row = rows
            .first()
            .ok_or_else(|| ServiceError::NotFound(format!("payment request {id}")))?;

        row_to_json(row, "payment request")
    }

    /// List payment requests with optional filters.
    pub fn list_requests(
        &self,
        query: &PaymentRequestListQuery,
    ) -> Result<ListResult<PaymentRequest>, ServiceError> {
        let limit = query.limit.unwrap_or(50);
        let offset = query.offset.unwrap_or(0);

        let mut where_clauses: Vec<String> = Vec::new();
        let mut params: Vec<Value> = Vec::new();
        let mut idx = 1;

        if let Some(ref i) = query.invoice_id {
            where_clauses.push(format!("invoice_id = ?{idx}"));
            params.push(Value::Text(i.clone()));
            idx += 1;
        }
        if let Some(ref s) = query.status {
            where_clauses.push(format!("status = ?{idx}"));
            params.push(Value::Text(s.clone()));
            idx += 1;
        }

        let where_sql = if where_clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", where_clauses.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) as cnt FROM payment_requests {where_sql}");
        let count_rows = self
            .db
            .query(&count_sql, &params)
            .map_err(|e| ServiceError::Storage(e.to_string()))?;
        let total = count_rows
            .first()
            .and_then(|r| r.get_i64("cnt"))
            .unwrap_or(0) as usize;

        let select_sql = format!(
            "SELECT data FROM payment_requests {where_sql} \
             ORDER BY create_at DESC LIMIT ?{idx} OFFSET ?{}",
            idx + 1
        );
        let mut select_params = params;
        select_params.push(Value::Integer(limit as i64));
        select_params.push(Value::Integer(offset as i64));

        let rows = self
            .db
            .query(&select_sql, &select_params)
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        let items = rows
            .iter()
            .map(|r| row_to_json(r, "payment request"))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ListResult { items, total })
    }

    /// Conditionally update a payment request: applies only if the
    /// stored status still equals `expected`.
    pub fn update_request_cas(
        &self,
        request: &PaymentRequest,
        expected: PaymentRequestStatus,
    ) -> Result<bool, ServiceError> {
        let data =
            serde_json::to_string(request).map_err(|e| ServiceError::Internal(e.to_string()))?;

        let affected = self
            .db
            .exec(
                "UPDATE payment_requests SET data = ?1, status = ?2 \
                 WHERE id = ?3 AND status = ?4",
                &[
                    Value::Text(data),
                    Value::Text(request.status.as_str().to_string()),
                    Value::Text(request.id.clone()),
                    Value::Text(expected.as_str().to_string()),
                ],
            )
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        Ok(affected > 0)
    }

    // -----------------------------------------------------------------------
    // Confirmation
    // -----------------------------------------------------------------------

    /// Apply a confirmation as one atomic unit:
    /// 1. mark the request CONFIRMED (guard: still PENDING)
    /// 2. insert the receipt voucher
    /// 3. append the payment ledger row
    /// 4. bump the invoice's paid amount and derived status (guard:
    ///    paid_amount unchanged since `expected_paid`)
    ///
    /// Returns false — with nothing applied — if either guard missed.
    pub fn confirm_txn(
        &self,
        request: &PaymentRequest,
        voucher: &ReceiptVoucher,
        payment: &Payment,
        invoice: &Invoice,
        expected_paid: i64,
    ) -> Result<bool, ServiceError> {
        let request_data =
            serde_json::to_string(request).map_err(|e| ServiceError::Internal(e.to_string()))?;
        let voucher_data =
            serde_json::to_string(voucher).map_err(|e| ServiceError::Internal(e.to_string()))?;
        let payment_data =
            serde_json::to_string(payment).map_err(|e| ServiceError::Internal(e.to_string()))?;
        let invoice_data =
            serde_json::to_string(invoice).map_err(|e| ServiceError::Internal(e.to_string()))?;

        self.db
            .exec_txn(&[
                Statement::guard(
                    "UPDATE payment_requests SET data = ?1, status = ?2 \
                     WHERE id = ?3 AND status = ?4",
                    vec![
                        Value::Text(request_data),
                        Value::Text(PaymentRequestStatus::Confirmed.as_str().to_string()),
                        Value::Text(request.id.clone()),
                        Value::Text(PaymentRequestStatus::Pending.as_str().to_string()),
                    ],
                ),
                Statement::new(
                    "INSERT INTO vouchers (id, data, request_id, voucher_no, invoice_id, issue_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    vec![
                        Value::Text(voucher.id.clone()),
                        Value::Text(voucher_data),
                        Value::Text(voucher.request_id.clone()),
                        Value::Text(voucher.voucher_no.clone()),
                        Value::Text(voucher.invoice_id.clone()),
                        Value::Text(voucher.issued_at.clone()),
                    ],
                ),
                Statement::new(
                    "INSERT INTO payments (id, data, invoice_id, create_at) \
                     VALUES (?1, ?2, ?3, ?4)",
                    vec![
                        Value::Text(payment.id.clone()),
                        Value::Text(payment_data),
                        Value::Text(payment.invoice_id.clone()),
                        Value::Text(payment.paid_at.clone()),
                    ],
                ),
                Statement::guard(
                    "UPDATE invoices SET data = ?1, status = ?2, paid_amount = ?3 \
                     WHERE id = ?4 AND paid_amount = ?5",
                    vec![
                        Value::Text(invoice_data),
                        Value::Text(invoice.status.as_str().to_string()),
                        Value::Integer(invoice.paid_amount),
                        Value::Text(invoice.id.clone()),
                        Value::Integer(expected_paid),
                    ],
                ),
            ])
            .map_err(|e| ServiceError::Storage(e.to_string()))
    }

    // -----------------------------------------------------------------------
    // Vouchers and ledger
    // -----------------------------------------------------------------------

    /// Vouchers issued against an invoice.
    pub fn vouchers_for_invoice(&self, invoice_id: &str) -> Result<Vec<ReceiptVoucher>, ServiceError> {
        let rows = self
            .db
            .query(
                "SELECT data FROM vouchers WHERE invoice_id = ?1 ORDER BY issue_at",
                &[Value::Text(invoice_id.to_string())],
            )
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        rows.iter().map(|r| row_to_json(r, "voucher")).collect()
    }

    /// The voucher issued for a confirmed request, if any.
    pub fn voucher_for_request(&self, request_id: &str) -> Result<Option<ReceiptVoucher>, ServiceError> {
        let rows = self
            .db
            .query(
                "SELECT data FROM vouchers WHERE request_id = ?1",
                &[Value::Text(request_id.to_string())],
            )
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        match rows.first() {
            Some(row) => Ok(Some(row_to_json(row, "voucher")?)),
            None => Ok(None),
        }
    }

    /// Ledger rows for an invoice.
    pub fn payments_for_invoice(&self, invoice_id: &str) -> Result<Vec<Payment>, ServiceError> {
        let rows = self
            .db
            .query(
                "SELECT data FROM payments WHERE invoice_id = ?1 ORDER BY create_at",
                &[Value::Text(invoice_id.to_string())],
            )
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        rows.iter().map(|r| row_to_json(r, "payment")).collect()
    }
}

/// Mark an invoice struct as updated now.
pub fn touch(invoice: &mut Invoice) {
    invoice.updated_at = Some(now_rfc3339());
}

/// Deserialize an entity from a row's `data` JSON column.
fn row_to_json<T: serde::de::DeserializeOwned>(row: &Row, what: &str) -> Result<T, ServiceError> {
    let json = row
        .get_str("data")
        .ok_or_else(|| ServiceError::Storage("missing data column".into()))?;
    serde_json::from_str(json).map_err(|e| ServiceError::Storage(format!("bad {what} json: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::InvoiceStatus;
    use isoflow_core::new_id;
    use isoflow_sql::SqliteStore;

    fn test_store() -> BillingStore {
        let db = Arc::new(SqliteStore::open_in_memory().unwrap());
        BillingStore::new(db).unwrap()
    }

    fn make_invoice(id: &str, total: i64) -> Invoice {
        Invoice {
            id: id.into(),
            customer: "clinic-7".into(),
            total_amount: total,
            paid_amount: 0,
            status: InvoiceStatus::Unpaid,
            created_at: now_rfc3339(),
            updated_at: None,
        }
    }

    fn make_request(id: &str, invoice_id: &str, amount: i64) -> PaymentRequest {
        PaymentRequest {
            id: id.into(),
            invoice_id: invoice_id.into(),
            amount,
            method: "bank-transfer".into(),
            status: PaymentRequestStatus::Pending,
            submitted_by: "clerk-1".into(),
            submitted_at: now_rfc3339(),
            reviewed_by: None,
            reviewed_at: None,
            review_notes: None,
        }
    }

    fn confirm_parts(
        request: &PaymentRequest,
        invoice: &Invoice,
    ) -> (PaymentRequest, ReceiptVoucher, Payment, Invoice) {
        let mut confirmed = request.clone();
        confirmed.status = PaymentRequestStatus::Confirmed;
        confirmed.reviewed_by = Some("reviewer-1".into());
        confirmed.reviewed_at = Some(now_rfc3339());

        let voucher = ReceiptVoucher {
            id: new_id(),
            voucher_no: format!("RV-{}", new_id()),
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
        let mut updated = invoice.clone();
        updated.paid_amount += request.amount;
        updated.status = InvoiceStatus::derive(updated.paid_amount, updated.total_amount);

        (confirmed, voucher, payment, updated)
    }

    #[test]
    fn invoice_roundtrip() {
        let store = test_store();
        store.create_invoice(&make_invoice("inv1", 50_000)).unwrap();
        let got = store.get_invoice("inv1").unwrap();
        assert_eq!(got.total_amount, 50_000);
        assert_eq!(got.status, InvoiceStatus::Unpaid);
    }

    #[test]
    fn confirm_txn_applies_all_effects() {
        let store = test_store();
        let invoice = make_invoice("inv1", 50_000);
        store.create_invoice(&invoice).unwrap();
        let request = make_request("pr1", "inv1", 20_000);
        store.create_request(&request).unwrap();

        let (confirmed, voucher, payment, updated) = confirm_parts(&request, &invoice);
        assert!(store
            .confirm_txn(&confirmed, &voucher, &payment, &updated, 0)
            .unwrap());

        assert_eq!(
            store.get_request("pr1").unwrap().status,
            PaymentRequestStatus::Confirmed
        );
        assert_eq!(store.get_invoice("inv1").unwrap().paid_amount, 20_000);
        assert_eq!(store.vouchers_for_invoice("inv1").unwrap().len(), 1);
        assert_eq!(store.payments_for_invoice("inv1").unwrap().len(), 1);
    }

    #[test]
    fn confirm_txn_rolls_back_on_request_guard_miss() {
        let store = test_store();
        let invoice = make_invoice("inv1", 50_000);
        store.create_invoice(&invoice).unwrap();
        let request = make_request("pr1", "inv1", 20_000);
        store.create_request(&request).unwrap();

        let (confirmed, voucher, payment, updated) = confirm_parts(&request, &invoice);
        assert!(store
            .confirm_txn(&confirmed, &voucher, &payment, &updated, 0)
            .unwrap());

        // Replay with fresh voucher/payment ids: the request guard
        // misses and nothing new lands.
        let (confirmed2, voucher2, payment2, updated2) = confirm_parts(&request, &invoice);
        assert!(!store
            .confirm_txn(&confirmed2, &voucher2, &payment2, &updated2, 0)
            .unwrap());

        assert_eq!(store.get_invoice("inv1").unwrap().paid_amount, 20_000);
        assert_eq!(store.vouchers_for_invoice("inv1").unwrap().len(), 1);
        assert_eq!(store.payments_for_invoice("inv1").unwrap().len(), 1);
    }

    #[test]
    fn confirm_txn_rolls_back_on_invoice_guard_miss() {
        let store = test_store();
        let invoice = make_invoice("inv1", 50_000);
        store.create_invoice(&invoice).unwrap();
        let request = make_request("pr1", "inv1", 20_000);
        store.create_request(&request).unwrap();

        // Stale expectation: caller read paid_amount as 5_000.
        let (confirmed, voucher, payment, updated) = confirm_parts(&request, &invoice);
        assert!(!store
            .confirm_txn(&confirmed, &voucher, &payment, &updated, 5_000)
            .unwrap());

        // The request was rolled back to PENDING along with everything else.
        assert_eq!(
            store.get_request("pr1").unwrap().status,
            PaymentRequestStatus::Pending
        );
        assert!(store.vouchers_for_invoice("inv1").unwrap().is_empty());
        assert!(store.payments_for_invoice("inv1").unwrap().is_empty());
    }

    #[test]
    fn list_requests_by_invoice() {
        let store = test_store();
        store.create_invoice(&make_invoice("inv1", 10_000)).unwrap();
        store.create_request(&make_request("a", "inv1", 1_000)).unwrap();
        store.create_request(&make_request("b", "inv2", 2_000)).unwrap();

        let result = store
            .list_requests(&PaymentRequestListQuery {
                invoice_id: Some("inv1".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(result.total, 1);
        assert_eq!(result.items[0].id, "a");
    }
}
