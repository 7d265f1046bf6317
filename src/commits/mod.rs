//! Commit lifecycle: committer events, the pending ledger and subscriptions.

pub mod events;
pub mod ledger;
pub mod subscriptions;

pub use events::{CommitEvent, CommitEventKind, CommitLog, CommitReconciler, ReconcileContext};
pub use ledger::{CancelAction, CommitNotification, PendingCommitEntry, PendingCommitLedger};
pub use subscriptions::{EventSubscriptionManager, SubscriptionState};
