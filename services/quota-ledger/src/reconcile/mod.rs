pub mod job;
pub mod source;

pub use job::{ReconciliationReport, Reconciler};
pub use source::{ActiveObjectSource, StoredObjectIndex};
