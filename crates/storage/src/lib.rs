//! Store abstractions behind the Estate Gate authorization pipeline.
//!
//! The pipeline talks to three kinds of storage, each behind a trait so the
//! hosted backend can be swapped for in-memory implementations in tests:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Authorization pipeline                      │
//! │   rate limiter │ ownership verifier │ audit recorder        │
//! ├────────────────┼────────────────────┼───────────────────────┤
//! │  WindowStore   │   ResourceStore    │     AuditStore        │
//! │ (count, reset) │ (existence query)  │   (append only)       │
//! ├────────────────┼────────────────────┼───────────────────────┤
//! │ MemoryWindow-  │ MemoryResource-    │ MemoryAuditStore      │
//! │ Store (moka)   │ Store              │ TracingAuditStore     │
//! └────────────────┴────────────────────┴───────────────────────┘
//! ```
//!
//! # Error Handling
//!
//! All operations return [`StorageResult<T>`]. Implementations map their
//! internal failures to [`StorageError`] variants; callers in the pipeline
//! treat any error from the resource or window store as a denial.
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with shared test helpers.
//! - **`failpoints`**: Activates `fail` injection points inside the in-memory stores.

#![deny(unsafe_code)]

pub mod audit;
pub mod error;
pub mod rate_limiter;
pub mod resource;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
pub mod types;

// Re-export primary types at crate root for convenience
pub use audit::{AuditLogEntry, AuditOutcome, AuditStore, MemoryAuditStore, TracingAuditStore};
pub use error::{BoxError, StorageError, StorageResult};
pub use rate_limiter::{MemoryWindowStore, RateLimitWindow, WindowSnapshot, WindowStore};
pub use resource::{MemoryResourceStore, OwnershipQuery, ResourceStore};
pub use types::{IdentityId, LogId, ResourceId};
