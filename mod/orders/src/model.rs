use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// OrderStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a customer order.
///
/// The happy path runs DRAFT → SUBMITTED → VALIDATED → SCHEDULED →
/// IN_PRODUCTION → QC_PENDING → RELEASED → DISPATCHED → DELIVERED.
/// FAILED_QC branches into REWORK, which re-enters the flow at
/// SCHEDULED. DELIVERED, CANCELLED, and REJECTED are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Draft,
    Submitted,
    Validated,
    Scheduled,
    InProduction,
    QcPending,
    Released,
    Dispatched,
    Delivered,
    Cancelled,
    Rejected,
    FailedQc,
    Rework,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Submitted => "SUBMITTED",
            Self::Validated => "VALIDATED",
            Self::Scheduled => "SCHEDULED",
            Self::InProduction => "IN_PRODUCTION",
            Self::QcPending => "QC_PENDING",
            Self::Released => "RELEASED",
            Self::Dispatched => "DISPATCHED",
            Self::Delivered => "DELIVERED",
            Self::Cancelled => "CANCELLED",
            Self::Rejected => "REJECTED",
            Self::FailedQc => "FAILED_QC",
            Self::Rework => "REWORK",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "DRAFT" => Some(Self::Draft),
            "SUBMITTED" => Some(Self::Submitted),
            "VALIDATED" => Some(Self::Validated),
            "SCHEDULED" => Some(Self::Scheduled),
            "IN_PRODUCTION" => Some(Self::InProduction),
            "QC_PENDING" => Some(Self::QcPending),
            "RELEASED" => Some(Self::Released),
            "DISPATCHED" => Some(Self::Dispatched),
            "DELIVERED" => Some(Self::Delivered),
            "CANCELLED" => Some(Self::Cancelled),
            "REJECTED" => Some(Self::Rejected),
            "FAILED_QC" => Some(Self::FailedQc),
            "REWORK" => Some(Self::Rework),
            _ => None,
        }
    }

    /// The fixed adjacency table. Transitions not listed here are
    /// illegal regardless of who asks.
    pub fn next_states(&self) -> &'static [OrderStatus] {
        use OrderStatus::*;
        match self {
            Draft => &[Submitted, Cancelled],
            Submitted => &[Validated, Rejected, Cancelled],
            Validated => &[Scheduled, Cancelled],
            Scheduled => &[InProduction, Cancelled],
            InProduction => &[QcPending, Cancelled],
            QcPending => &[Released, FailedQc],
            Released => &[Dispatched],
            Dispatched => &[Delivered],
            FailedQc => &[Rework, Cancelled],
            Rework => &[Scheduled, Cancelled],
            Delivered | Cancelled | Rejected => &[],
        }
    }

    pub fn can_transition_to(&self, target: OrderStatus) -> bool {
        self.next_states().contains(&target)
    }

    pub fn is_terminal(&self) -> bool {
        self.next_states().is_empty()
    }

    /// The per-transition permission action for entering this status.
    /// Combined with the `orders:order` resource, e.g.
    /// `orders:order:dispatch`.
    pub fn entry_action(&self) -> &'static str {
        match self {
            Self::Draft => "create",
            Self::Submitted => "submit",
            Self::Validated => "validate",
            Self::Scheduled => "schedule",
            Self::InProduction => "start-production",
            Self::QcPending => "enter-qc",
            Self::Released => "release",
            Self::Dispatched => "dispatch",
            Self::Delivered => "deliver",
            Self::Cancelled => "cancel",
            Self::Rejected => "reject",
            Self::FailedQc => "fail-qc",
            Self::Rework => "rework",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Order
// ---------------------------------------------------------------------------

/// Requested delivery window, RFC 3339 bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryWindow {
    pub start: String,
    pub end: String,
}

/// One step of the order's transition history, embedded in the order
/// and appended in the same atomic write as the status change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEvent {
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub actor: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    pub at: String,
}

/// A customer order for a manufactured dose.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub status: OrderStatus,

    /// Customer reference (master data, owned elsewhere).
    pub customer: String,

    /// Product reference (master data, owned elsewhere).
    pub product: String,

    /// Requested radioactivity at calibration time, in MBq.
    pub requested_activity_mbq: f64,

    pub quantity: u32,

    pub delivery_window: DeliveryWindow,

    /// The production batch serving this order, once scheduled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,

    /// The shipment carrying this order, once assigned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipment_id: Option<String>,

    #[serde(default)]
    pub timeline: Vec<TimelineEvent>,

    pub created_at: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

// ---------------------------------------------------------------------------
// Shipments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShipmentStatus {
    Active,
    Completed,
    Cancelled,
}

impl ShipmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

/// A shipment slot orders get assigned to before dispatch. Delivery
/// execution itself is an external collaborator; only the assignment
/// and the active flag matter here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shipment {
    pub id: String,
    pub carrier: String,
    pub status: ShipmentStatus,
    pub created_at: String,
}

// ---------------------------------------------------------------------------
// Transition outcome
// ---------------------------------------------------------------------------

/// A side effect the transition triggered after its commit.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SideEffect {
    /// QC result rows were seeded for the order's batch on entry into
    /// QC_PENDING.
    QcSeeded { batch_id: String, tests: usize },
}

/// The updated order snapshot plus whatever side effects fired.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionOutcome {
    pub order: Order,
    pub side_effects: Vec<SideEffect>,
}

// ---------------------------------------------------------------------------
// API request types
// ---------------------------------------------------------------------------

/// Body for `POST /orders`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub customer: String,
    pub product: String,
    pub requested_activity_mbq: f64,
    pub quantity: u32,
    pub delivery_window: DeliveryWindow,
}

/// Body for `POST /orders/{id}/@transition`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRequest {
    pub target: OrderStatus,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Body for `POST /orders/{id}/@assign-batch`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignBatchRequest {
    pub batch_id: String,
}

/// Body for `POST /orders/{id}/@assign-shipment`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignShipmentRequest {
    pub shipment_id: String,
}

/// Body for `POST /shipments`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateShipmentRequest {
    pub carrier: String,
}

/// Query parameters for `GET /orders`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderListQuery {
    #[serde(default)]
    pub limit: Option<usize>,

    #[serde(default)]
    pub offset: Option<usize>,

    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub customer: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
