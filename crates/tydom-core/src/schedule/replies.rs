use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::message::CdataReplyChunk;

struct PendingReply {
    entries: Vec<Value>,
    done: oneshot::Sender<Vec<Value>>,
}

/// Collects multi-frame command replies by transaction id.
///
/// A waiter registers before sending; chunks append to its buffer and the
/// terminal chunk hands the whole buffer over.
#[derive(Default)]
pub struct ReplyAccumulator {
    pending: DashMap<String, PendingReply>,
}

impl ReplyAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start collecting for `transaction_id`.
    pub fn register(&self, transaction_id: &str) -> oneshot::Receiver<Vec<Value>> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            transaction_id.to_owned(),
            PendingReply {
                entries: Vec::new(),
                done: tx,
            },
        );
        rx
    }

    /// Forget a waiter (timed out or abandoned).
    pub fn cancel(&self, transaction_id: &str) {
        self.pending.remove(transaction_id);
    }

    pub fn push(&self, chunk: CdataReplyChunk) {
        let CdataReplyChunk {
            transaction_id,
            entries,
            done,
        } = chunk;

        if done {
            let Some((_, mut pending)) = self.pending.remove(&transaction_id) else {
                trace!(transaction_id = %transaction_id, "reply for unknown transaction");
                return;
            };
            pending.entries.extend(entries);
            debug!(
                transaction_id = %transaction_id,
                entries = pending.entries.len(),
                "command reply complete"
            );
            // The waiter may have given up already.
            let _ = pending.done.send(pending.entries);
        } else if let Some(mut pending) = self.pending.get_mut(&transaction_id) {
            pending.entries.extend(entries);
        } else {
            trace!(transaction_id = %transaction_id, "reply chunk for unknown transaction");
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
