//! # hiersync provisioning
//!
//! Reconciles directory group membership into local state:
//!
//! 1. [`SnapshotBuilder`] flattens root group -> member groups -> users
//!    into a [`MembershipSnapshot`] with local uid/gid per user.
//! 2. [`SnapshotCache`] compares it with the cached snapshot and, only on
//!    change, archives the old file and atomically replaces it.
//! 3. [`HierarchyMaterializer`] creates or repairs one directory per group
//!    and per member with exact owner and mode.
//! 4. [`AccountingReconciler`] makes sure every user has a default Slurm
//!    account.
//!
//! [`SyncPipeline`] runs these stages in order and returns a [`RunReport`].
//!
//! ## Example
//!
//! ```ignore
//! use hiersync_provisioning::{SyncPipeline, SyncSettings, SystemIdentityResolver};
//!
//! let settings = SyncSettings::new(
//!     query,
//!     "hpc.users",
//!     "/var/lib/hiersync/groups.json",
//!     "/data/groups",
//! )
//! .with_user_subdir(true);
//! let resolver = SystemIdentityResolver::default();
//! let report = SyncPipeline::new(settings, &resolver)
//!     .run(&directory, None, true)
//!     .await?;
//! ```

pub mod accounting;
pub mod builder;
pub mod cache;
pub mod error;
pub mod identity;
pub mod materialize;
pub mod pipeline;
pub mod report;
pub mod snapshot;

// Re-exports
pub use accounting::{
    AccountingBackend, AccountingError, AccountingReconciler, AccountingReport,
    AccountingResult, MemoryAccountingBackend, SacctmgrBackend,
};
pub use builder::{BuildOutcome, SkippedUser, SnapshotBuilder, UnresolvedIdentityPolicy};
pub use cache::{CacheReconcile, PriorState, SnapshotCache};
pub use error::{SyncError, SyncResult};
pub use identity::{
    IdentityResolver, MemoryIdentityResolver, SystemIdentityResolver, MIRROR_GROUP_PREFIX,
};
pub use materialize::{HierarchyMaterializer, HierarchyPlan, MaterializeReport};
pub use pipeline::{SyncPipeline, SyncSettings};
pub use report::{RunReport, RunStatus};
pub use snapshot::{GroupEntry, MembershipSnapshot, PosixIds, UserEntry};
