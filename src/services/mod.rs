pub mod completion;
pub use completion::CompletionDetector;

pub mod merger;
pub use merger::{MergeStats, NotificationMerger};

pub mod reconcile;
pub use reconcile::{ReconcileError, ReconcileStats, Reconciler};
