//! Core data types for the reconciliation engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Identifier of one reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Source-assigned identifier of a tracked listing.
///
/// Opaque to the core; the source adapter decides its shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalId(pub String);

impl ExternalId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ExternalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for ExternalId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ============================================================================
// Core entities
// ============================================================================

/// One complete reconciliation pass. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
}

/// A tracked seller whose listings are enumerated each pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerRef {
    pub id: String,
    pub name: String,
}

/// A tracked external listing with an active/inactive lifecycle.
///
/// `active`, `last_seen` and `sell_time_days` are written only by the
/// liveness tracker; the domain fields only by the crawl path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub external_id: ExternalId,
    pub owner_id: String,

    // Domain fields
    pub title: String,
    pub url: String,
    pub price: Option<i64>,
    pub mileage: Option<i64>,

    // Liveness fields
    pub active: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub sell_time_days: Option<i64>,
}

/// Per-session record of whether a listing was reconfirmed during that
/// session. Unique per `(session_id, external_id)`; never reused across
/// sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeenMarker {
    pub session_id: SessionId,
    pub external_id: ExternalId,
    pub seen: bool,
}

/// The source adapter's "present" payload: the domain fields of one
/// successfully fetched listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingDetail {
    pub external_id: ExternalId,
    pub owner_id: String,
    pub title: String,
    pub url: String,
    pub price: Option<i64>,
    pub mileage: Option<i64>,
}

// ============================================================================
// Outcomes
// ============================================================================

/// Per-item result of one dispatch pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Listing reconfirmed at the source.
    Success,
    /// Listing deactivated, either immediately or by the sweep.
    Deactivated,
    /// Persistence failure isolated to this item.
    Error,
    /// Nothing to do for this item (already inactive, or unknown and gone).
    Skipped,
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutcomeStatus::Success => write!(f, "success"),
            OutcomeStatus::Deactivated => write!(f, "deactivated"),
            OutcomeStatus::Error => write!(f, "error"),
            OutcomeStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// One entry of the per-item outcome log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub external_id: ExternalId,
    pub status: OutcomeStatus,
    /// Human-readable context (last error, sweep origin, ...).
    pub detail: Option<String>,
}

impl ItemOutcome {
    pub fn new(external_id: ExternalId, status: OutcomeStatus) -> Self {
        Self {
            external_id,
            status,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Summary counts for one pass. No outcome is silently dropped: every
/// dispatched item lands in exactly one bucket, and sweep deactivations
/// are added to `deactivated`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeSummary {
    pub success: usize,
    pub deactivated: usize,
    pub errors: usize,
    pub skipped: usize,
    /// Owners whose enumeration definitively failed (no per-item
    /// outcomes exist for them; the pass continued).
    pub owner_failures: usize,
}

impl OutcomeSummary {
    pub fn tally(outcomes: &[ItemOutcome], owner_failures: usize) -> Self {
        let mut summary = Self {
            owner_failures,
            ..Self::default()
        };
        for outcome in outcomes {
            match outcome.status {
                OutcomeStatus::Success => summary.success += 1,
                OutcomeStatus::Deactivated => summary.deactivated += 1,
                OutcomeStatus::Error => summary.errors += 1,
                OutcomeStatus::Skipped => summary.skipped += 1,
            }
        }
        summary
    }
}

/// Result of a completed reconciliation pass.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session: Session,
    /// How many markers were seeded before dispatch began.
    pub seeded: usize,
    pub outcomes: Vec<ItemOutcome>,
    pub summary: OutcomeSummary,
}
