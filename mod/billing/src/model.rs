use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Invoices
// ---------------------------------------------------------------------------

/// Payment state of an invoice. Always derived from the amounts, never
/// set directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Unpaid,
    PartiallyPaid,
    Paid,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unpaid => "UNPAID",
            Self::PartiallyPaid => "PARTIALLY_PAID",
            Self::Paid => "PAID",
        }
    }

    /// Derive the status from the amounts.
    pub fn derive(paid_amount: i64, total_amount: i64) -> Self {
        if paid_amount >= total_amount {
            Self::Paid
        } else if paid_amount > 0 {
            Self::PartiallyPaid
        } else {
            Self::Unpaid
        }
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An invoice. Amounts are integer minor units (cents); `paid_amount`
/// only ever grows, and `status` is recomputed whenever it does.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub id: String,

    /// Customer reference (master data, owned elsewhere).
    pub customer: String,

    pub total_amount: i64,
    pub paid_amount: i64,
    pub status: InvoiceStatus,

    pub created_at: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

// ---------------------------------------------------------------------------
// Payment requests
// ---------------------------------------------------------------------------

/// PENDING → CONFIRMED | REJECTED, both terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentRequestStatus {
    Pending,
    Confirmed,
    Rejected,
}

impl PaymentRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Confirmed => "CONFIRMED",
            Self::Rejected => "REJECTED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for PaymentRequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A customer's claim of payment against an invoice, waiting for a
/// reviewer's confirmation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub id: String,
    pub invoice_id: String,
    pub amount: i64,

    /// Free-form payment method, e.g. `"bank-transfer"`.
    pub method: String,

    pub status: PaymentRequestStatus,

    pub submitted_by: String,
    pub submitted_at: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_notes: Option<String>,
}

// ---------------------------------------------------------------------------
// Vouchers and the payment ledger
// ---------------------------------------------------------------------------

/// Receipt voucher, created exactly once per confirmed payment request;
/// immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptVoucher {
    pub id: String,

    /// Unique human-facing voucher number.
    pub voucher_no: String,

    pub request_id: String,
    pub invoice_id: String,
    pub amount: i64,
    pub issued_at: String,
}

/// Append-only ledger row. One per confirmed payment request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: String,
    pub invoice_id: String,
    pub amount: i64,
    pub method: String,

    /// The confirmed payment request this row settles.
    pub reference: String,

    pub paid_at: String,
}

// ---------------------------------------------------------------------------
// API request types
// ---------------------------------------------------------------------------

/// Body for `POST /invoices`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInvoiceRequest {
    pub customer: String,
    pub total_amount: i64,
}

/// Body for `POST /payment-requests`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentRequestRequest {
    pub invoice_id: String,
    pub amount: i64,
    pub method: String,
}

/// Body for `POST /payment-requests/{id}/@confirm`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmRequest {
    #[serde(default)]
    pub notes: Option<String>,
}

/// Body for `POST /payment-requests/{id}/@reject`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectRequest {
    pub reason: String,
}

/// Query parameters for `GET /invoices`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceListQuery {
    #[serde(default)]
    pub limit: Option<usize>,

    #[serde(default)]
    pub offset: Option<usize>,

    #[serde(default)]
    pub customer: Option<String>,

    #[serde(default)]
    pub status: Option<String>,
}

/// Query parameters for `GET /payment-requests`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequestListQuery {
    #[serde(default)]
    pub limit: Option<usize>,

    #[serde(default)]
    pub offset: Option<usize>,

    #[serde(default)]
    pub invoice_id: Option<String>,

    #[serde(default)]
    pub status: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invoice_status_is_derived_from_amounts() {
        assert_eq!(InvoiceStatus::derive(0, 10_000), InvoiceStatus::Unpaid);
        assert_eq!(InvoiceStatus::derive(1, 10_000), InvoiceStatus::PartiallyPaid);
        assert_eq!(InvoiceStatus::derive(9_999, 10_000), InvoiceStatus::PartiallyPaid);
        assert_eq!(InvoiceStatus::derive(10_000, 10_000), InvoiceStatus::Paid);
        assert_eq!(InvoiceStatus::derive(12_000, 10_000), InvoiceStatus::Paid);
    }

    #[test]
    fn request_status_terminality() {
        assert!(!PaymentRequestStatus::Pending.is_terminal());
        assert!(PaymentRequestStatus::Confirmed.is_terminal());
        assert!(PaymentRequestStatus::Rejected.is_terminal());
    }

    #[test]
    fn status_json_names() {
        assert_eq!(
            serde_json::to_string(&InvoiceStatus::PartiallyPaid).unwrap(),
            "\"PARTIALLY_PAID\""
        );
        assert_eq!(
            serde_json::to_string(&PaymentRequestStatus::Pending).unwrap(),
            "\"PENDING\""
        );
    }

    #[test]
    fn request_json_roundtrip() {
        let req = PaymentRequest {
            id: "pr1".into(),
            invoice_id: "inv1".into(),
            amount: 25_000,
            method: "bank-transfer".into(),
            status: PaymentRequestStatus::Pending,
            submitted_by: "clerk-1".into(),
            submitted_at: "2026-02-01T09:00:00Z".into(),
            reviewed_by: None,
            reviewed_at: None,
            review_notes: None,
        };
        let json = serde_json::to_string(&req).unwrap();
        let back: PaymentRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.amount, 25_000);
        assert!(!json.contains("reviewedBy"));
    }
}
