//! Session-based liveness reconciliation for externally-sourced
//! listings.
//!
//! Each pass re-derives which tracked listings still exist at their
//! source: seed one unseen marker per tracked listing, crawl the source
//! through a bounded-concurrency executor with retry-wrapped fetches,
//! mark everything reconfirmed, then sweep whatever stayed unseen.
//! Confirmed absence (all retry attempts exhausted) deactivates a
//! listing immediately; everything merely missing from enumeration is
//! deactivated by the sweep.
//!
//! The engine talks to the world through two seams: a
//! [`SourceAdapter`] for the crawled site and a [`ListingStore`] for
//! persistence. [`storage::PostgresStore`] and [`source::HttpSource`]
//! are the production implementations; [`storage::MemoryStore`] and
//! [`testing::ScriptedSource`] serve tests and development.

pub mod config;
pub mod error;
pub mod executor;
pub mod retry;
pub mod session;
pub mod source;
pub mod storage;
pub mod testing;
pub mod tracker;
pub mod traits;
pub mod types;

// Re-exports for clean API
pub use config::ReconcilerConfig;
pub use error::{AttemptError, SessionError};
pub use executor::{BatchExecutor, BATCH_CAP};
pub use retry::{DefinitiveFailure, RetryPolicy};
pub use session::{SessionController, SessionPhase};
pub use tracker::LivenessTracker;
pub use traits::{ListingStore, SourceAdapter};
pub use types::{
    ExternalId, ItemOutcome, Listing, ListingDetail, OutcomeStatus, OutcomeSummary, OwnerRef,
    SeenMarker, Session, SessionId, SessionReport,
};
