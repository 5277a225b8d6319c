//! Mutation-triggered snapshots to object storage.
//!
//! Every successful mutation is counted. When the count reaches the
//! threshold, the current backend's stores are exported (one store lock at a
//! time), encoded as a versioned JSON payload and committed atomically to the
//! configured bucket key. Snapshots track "approximately every N mutations":
//! writes landing while a snapshot is in flight may or may not be included and
//! are counted toward the next cycle.

mod counter;
mod format;
mod snapshotter;


pub use counter::{MutationCounter, SnapshotPhase, SnapshotTicket};
pub use format::SnapshotState;
pub use snapshotter::{RestoreSummary, SnapshotInfo, Snapshotter};
