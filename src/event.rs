use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::document::DocId;

/// Progress notifications emitted by scans and corrective batch operations.
///
/// Batch repairs have no cross-batch transaction: after a failure the
/// emitted `BatchCommitted` events describe exactly which writes are
/// durable, so an operator can re-run the operation idempotently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RepairEvent {
    /// A scan of `collection` started.
    ScanStarted { collection: String },
    /// A scan finished after examining `total_checked` documents.
    ScanCompleted {
        collection: String,
        total_checked: usize,
    },
    /// One write batch committed. `committed` is cumulative for the
    /// operation named by `operation`, out of `total` planned writes.
    BatchCommitted {
        operation: String,
        committed: usize,
        total: usize,
    },
    /// All referencing documents now point at the merge principal.
    MergeRepointed { principal: DocId, repointed: usize },
    /// A non-principal duplicate was removed, with an archive copy when
    /// `archived` is set.
    DuplicateRetired { id: DocId, archived: bool },
}

impl Display for RepairEvent {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            RepairEvent::ScanStarted { collection } => write!(f, "ScanStarted({collection})"),
            RepairEvent::ScanCompleted {
                collection,
                total_checked,
            } => write!(f, "ScanCompleted({collection}, {total_checked} checked)"),
            RepairEvent::BatchCommitted {
                operation,
                committed,
                total,
            } => write!(f, "BatchCommitted({operation}, {committed}/{total})"),
            RepairEvent::MergeRepointed {
                principal,
                repointed,
            } => write!(f, "MergeRepointed({principal}, {repointed} rewritten)"),
            RepairEvent::DuplicateRetired { id, archived } => {
                write!(f, "DuplicateRetired({id}, archived: {archived})")
            }
        }
    }
}

/// Best-effort progress reporting handle.
///
/// Wraps an optional unbounded channel sender. Emission never fails the
/// surrounding operation: a closed receiver downgrades to a trace line.
#[derive(Debug, Clone, Default)]
pub struct Progress {
    tx: Option<UnboundedSender<RepairEvent>>,
}

impl Progress {
    /// A progress handle plus the receiving end for the caller to drain.
    pub fn channel() -> (Self, UnboundedReceiver<RepairEvent>) {
        let (tx, rx) = unbounded_channel();
        (Progress { tx: Some(tx) }, rx)
    }

    /// A handle that only traces, for callers without a progress consumer.
    pub fn sink() -> Self {
        Progress { tx: None }
    }

    pub fn emit(&self, event: RepairEvent) {
        tracing::debug!("progress: {event}");
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                tracing::debug!("progress receiver dropped, event discarded");
            }
        }
    }
}
