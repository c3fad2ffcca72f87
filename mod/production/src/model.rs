use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// BatchStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a production batch.
///
/// ```text
/// CREATED → IN_PRODUCTION → QC_PENDING → QC_PASSED → RELEASED
///                                      ↘ FAILED_QC   ↘ REJECTED
///                QC_PENDING / QC_PASSED ⇄ ON_HOLD
/// ```
///
/// RELEASED, REJECTED, and FAILED_QC are terminal. A failed batch has no
/// release path. ON_HOLD remembers the status it was entered from and
/// resume returns there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Created,
    InProduction,
    QcPending,
    QcPassed,
    Released,
    Rejected,
    FailedQc,
    OnHold,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::InProduction => "IN_PRODUCTION",
            Self::QcPending => "QC_PENDING",
            Self::QcPassed => "QC_PASSED",
            Self::Released => "RELEASED",
            Self::Rejected => "REJECTED",
            Self::FailedQc => "FAILED_QC",
            Self::OnHold => "ON_HOLD",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "CREATED" => Some(Self::Created),
            "IN_PRODUCTION" => Some(Self::InProduction),
            "QC_PENDING" => Some(Self::QcPending),
            "QC_PASSED" => Some(Self::QcPassed),
            "RELEASED" => Some(Self::Released),
            "REJECTED" => Some(Self::Rejected),
            "FAILED_QC" => Some(Self::FailedQc),
            "ON_HOLD" => Some(Self::OnHold),
            _ => None,
        }
    }

    /// Whether the batch has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Released | Self::Rejected | Self::FailedQc)
    }

    /// Whether a hold can be placed from this status.
    pub fn can_hold(&self) -> bool {
        matches!(self, Self::QcPending | Self::QcPassed)
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// QC acceptance rules
// ---------------------------------------------------------------------------

/// Acceptance criterion attached to a QC test definition.
///
/// All numeric bounds are inclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AcceptanceRule {
    /// Value must satisfy `min <= value <= max`.
    Range { min: f64, max: f64 },
    /// Value must satisfy `value >= min`.
    Min { min: f64 },
    /// Value must satisfy `value <= max`.
    Max { max: f64 },
    /// Value is the pass/fail verdict itself.
    PassFail,
}

/// A recorded QC measurement: numeric reading or pass/fail verdict.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QcValue {
    Numeric(f64),
    Bool(bool),
}

impl AcceptanceRule {
    /// Whether this rule expects a numeric reading.
    pub fn is_numeric(&self) -> bool {
        !matches!(self, Self::PassFail)
    }

    /// Score a value against the rule. `None` if the value kind does not
    /// match the rule (numeric rule given a bool, or vice versa).
    pub fn evaluate(&self, value: &QcValue) -> Option<bool> {
        match (self, value) {
            (Self::Range { min, max }, QcValue::Numeric(v)) => Some(*v >= *min && *v <= *max),
            (Self::Min { min }, QcValue::Numeric(v)) => Some(*v >= *min),
            (Self::Max { max }, QcValue::Numeric(v)) => Some(*v <= *max),
            (Self::PassFail, QcValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// QC template and results
// ---------------------------------------------------------------------------

/// One test in a product's QC template.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QcTestSpec {
    /// Stable test key within the template, e.g. `"radiochemical-purity"`.
    pub test_id: String,

    /// Display name, e.g. `"Radiochemical purity"`.
    pub name: String,

    pub rule: AcceptanceRule,
}

/// The product's active QC template — the seed source for a batch's
/// result rows. Template management is master data, owned elsewhere;
/// the engine only consumes it at seeding time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QcTemplate {
    pub product: String,
    pub tests: Vec<QcTestSpec>,
}

/// A QC test result row, owned exclusively by its batch.
///
/// Seeded exactly once from the product's active template. Each row is
/// independently updated; concurrent recording of different tests of the
/// same batch does not contend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QcTestResult {
    pub id: String,
    pub batch_id: String,
    pub test_id: String,
    pub name: String,
    pub rule: AcceptanceRule,

    /// Raw recorded value. None until recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<QcValue>,

    /// Derived verdict, computed from rule + value at recording time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passed: Option<bool>,

    #[serde(default)]
    pub completed: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorded_by: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorded_at: Option<String>,
}

/// Per-batch QC aggregate.
///
/// Eventually consistent: computed from independently-updated rows with
/// no cross-test lock.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QcSummary {
    pub total: u32,
    pub completed: u32,
    pub passed: u32,
    pub failed: u32,
}

impl QcSummary {
    /// Every seeded test has a recorded result.
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.completed == self.total
    }

    /// Complete with zero failures.
    pub fn all_passed(&self) -> bool {
        self.is_complete() && self.failed == 0
    }
}

// ---------------------------------------------------------------------------
// Batch
// ---------------------------------------------------------------------------

/// A manufacturing run of one product, serving one or more orders.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub id: String,

    /// Product reference (master data, owned elsewhere).
    pub product: String,

    pub status: BatchStatus,

    /// Orders attached to this batch.
    #[serde(default)]
    pub order_ids: Vec<String>,

    /// The QC template captured at scheduling time. Seeding uses this
    /// snapshot, not whatever master data holds later.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<QcTemplate>,

    /// Status a hold was entered from; resume returns there.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub held_from: Option<BatchStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hold_reason: Option<String>,

    pub created_at: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// The release record. Created at most once per batch by a successful
/// release action; immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRelease {
    pub id: String,
    pub batch_id: String,

    /// The qualified person who executed the release.
    pub released_by: String,

    /// Electronic signature text.
    pub signature: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    pub released_at: String,
}

// ---------------------------------------------------------------------------
// API request types
// ---------------------------------------------------------------------------

/// Body for `POST /batches`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBatchRequest {
    pub product: String,

    /// The product's active QC template, resolved by the caller.
    pub template: QcTemplate,

    #[serde(default)]
    pub order_ids: Vec<String>,
}

/// Body for `POST /batches/{id}/@qc-results`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordResultRequest {
    pub test_id: String,
    pub value: QcValue,
}

/// Body for `POST /batches/{id}/@release`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseRequest {
    pub signature: String,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Body for `POST /batches/{id}/@reject` and `@hold`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasonRequest {
    pub reason: String,
}

/// Query parameters for `GET /batches`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchListQuery {
    #[serde(default)]
    pub limit: Option<usize>,

    #[serde(default)]
    pub offset: Option<usize>,

    #[serde(default)]
    pub product: Option<String>,

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
    fn status_roundtrip() {
        for s in &[
            BatchStatus::Created,
            BatchStatus::InProduction,
            BatchStatus::QcPending,
            BatchStatus::QcPassed,
            BatchStatus::Released,
            BatchStatus::Rejected,
            BatchStatus::FailedQc,
            BatchStatus::OnHold,
        ] {
            let json = serde_json::to_string(s).unwrap();
            let back: BatchStatus = serde_json::from_str(&json).unwrap();
            assert_eq!(*s, back);
            assert_eq!(BatchStatus::from_str(s.as_str()), Some(*s));
        }
    }

    #[test]
    fn status_terminal() {
        assert!(!BatchStatus::Created.is_terminal());
        assert!(!BatchStatus::QcPending.is_terminal());
        assert!(!BatchStatus::QcPassed.is_terminal());
        assert!(!BatchStatus::OnHold.is_terminal());
        assert!(BatchStatus::Released.is_terminal());
        assert!(BatchStatus::Rejected.is_terminal());
        assert!(BatchStatus::FailedQc.is_terminal());
    }

    #[test]
    fn range_bounds_are_inclusive() {
        let rule = AcceptanceRule::Range { min: 95.0, max: 105.0 };
        assert_eq!(rule.evaluate(&QcValue::Numeric(95.0)), Some(true));
        assert_eq!(rule.evaluate(&QcValue::Numeric(105.0)), Some(true));
        assert_eq!(rule.evaluate(&QcValue::Numeric(100.0)), Some(true));
        assert_eq!(rule.evaluate(&QcValue::Numeric(94.999)), Some(false));
        assert_eq!(rule.evaluate(&QcValue::Numeric(105.001)), Some(false));
    }

    #[test]
    fn min_max_bounds_are_inclusive() {
        let min = AcceptanceRule::Min { min: 99.0 };
        assert_eq!(min.evaluate(&QcValue::Numeric(99.0)), Some(true));
        assert_eq!(min.evaluate(&QcValue::Numeric(98.9)), Some(false));

        let max = AcceptanceRule::Max { max: 0.5 };
        assert_eq!(max.evaluate(&QcValue::Numeric(0.5)), Some(true));
        assert_eq!(max.evaluate(&QcValue::Numeric(0.51)), Some(false));
    }

    #[test]
    fn pass_fail_uses_the_boolean() {
        let rule = AcceptanceRule::PassFail;
        assert_eq!(rule.evaluate(&QcValue::Bool(true)), Some(true));
        assert_eq!(rule.evaluate(&QcValue::Bool(false)), Some(false));
    }

    #[test]
    fn mismatched_value_kind_is_rejected() {
        assert_eq!(AcceptanceRule::PassFail.evaluate(&QcValue::Numeric(1.0)), None);
        assert_eq!(
            AcceptanceRule::Min { min: 0.0 }.evaluate(&QcValue::Bool(true)),
            None
        );
    }

    #[test]
    fn qc_summary_completion() {
        let empty = QcSummary::default();
        assert!(!empty.is_complete());

        let partial = QcSummary { total: 3, completed: 2, passed: 2, failed: 0 };
        assert!(!partial.is_complete());
        assert!(!partial.all_passed());

        let failed = QcSummary { total: 3, completed: 3, passed: 2, failed: 1 };
        assert!(failed.is_complete());
        assert!(!failed.all_passed());

        let passed = QcSummary { total: 3, completed: 3, passed: 3, failed: 0 };
        assert!(passed.all_passed());
    }

    #[test]
    fn rule_json_roundtrip() {
        let rules = vec![
            AcceptanceRule::Range { min: 4.5, max: 7.5 },
            AcceptanceRule::Min { min: 95.0 },
            AcceptanceRule::Max { max: 0.1 },
            AcceptanceRule::PassFail,
        ];
        for rule in rules {
            let json = serde_json::to_string(&rule).unwrap();
            let back: AcceptanceRule = serde_json::from_str(&json).unwrap();
            assert_eq!(rule, back);
        }
    }

    #[test]
    fn batch_json_roundtrip() {
        let b = Batch {
            id: "b1".into(),
            product: "FDG-18".into(),
            status: BatchStatus::QcPending,
            order_ids: vec!["o1".into(), "o2".into()],
            template: None,
            held_from: None,
            hold_reason: None,
            created_at: "2026-01-01T00:00:00Z".into(),
            updated_at: None,
        };
        let json = serde_json::to_string(&b).unwrap();
        let back: Batch = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, "b1");
        assert_eq!(back.status, BatchStatus::QcPending);
        assert_eq!(back.order_ids.len(), 2);
        // Optional None fields should not appear in JSON.
        assert!(!json.contains("heldFrom"));
        assert!(!json.contains("updatedAt"));
    }

    #[test]
    fn qc_value_untagged_json() {
        let n: QcValue = serde_json::from_str("99.5").unwrap();
        assert_eq!(n, QcValue::Numeric(99.5));
        let b: QcValue = serde_json::from_str("true").unwrap();
        assert_eq!(b, QcValue::Bool(true));
    }
}
