//! The pending-request table: correlates response ids to the caller waiting
//! on them.
//!
//! Insertion happens on the sending side, under the same writer lock that
//! serialises the outgoing frame, so a response can never race ahead of its
//! own entry. Removal happens exactly once, either by the reader thread
//! completing it with the matching response, by a timeout, or by a shutdown
//! sweep.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Mutex;

use serde_json::Value;

use crate::jsonrpc::JsonRpcErrorObject;

/// The outcome delivered to a waiting caller.
pub type PendingOutcome = Result<Value, PendingFailure>;

/// Why a pending request completed without a normal server response.
#[derive(Debug, Clone)]
pub enum PendingFailure {
    /// The server replied with a JSON-RPC error object.
    Server(JsonRpcErrorObject),
    /// The client is shutting down or has failed; the request was swept.
    Cancelled,
}

/// A single outstanding request's completion channel.
pub struct PendingSlot {
    id: i64,
    receiver: Receiver<PendingOutcome>,
}

impl PendingSlot {
    /// The request id this slot was registered under.
    #[must_use]
    pub const fn id(&self) -> i64 {
        self.id
    }

    /// Blocks until the response arrives or `timeout` elapses.
    ///
    /// Returns `None` on timeout; the slot is still registered in the table
    /// in that case and the caller is responsible for calling
    /// [`PendingTable::remove`] with [`Self::id`] to avoid a late response
    /// being silently dropped into a closed channel (which is harmless, but
    /// leaves the table entry live until swept).
    #[must_use]
    pub fn recv_timeout(&self, timeout: std::time::Duration) -> Option<PendingOutcome> {
        self.receiver.recv_timeout(timeout).ok()
    }
}

/// Map from request id to the sender half of its completion channel.
#[derive(Default)]
pub struct PendingTable {
    slots: Mutex<HashMap<i64, SyncSender<PendingOutcome>>>,
}

impl PendingTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a new pending request, returning the slot the caller should
    /// block on.
    ///
    /// # Panics
    ///
    /// Panics if `id` is already registered; callers only ever insert ids
    /// allocated by the client's own monotonic counter, so a collision would
    /// indicate a logic error rather than anything the server can trigger.
    pub fn insert(&self, id: i64) -> PendingSlot {
        let (sender, receiver) = mpsc::sync_channel(1);
        let mut slots = self.slots.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let previous = slots.insert(id, sender);
        assert!(previous.is_none(), "request id {id} reused while still pending");
        PendingSlot { id, receiver }
    }

    /// Completes the slot for `id` with `outcome`, if one is still
    /// registered. Returns `false` if no slot was found (a spurious or
    /// late-arriving response).
    pub fn complete(&self, id: i64, outcome: PendingOutcome) -> bool {
        let sender = {
            let mut slots = self.slots.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            slots.remove(&id)
        };
        match sender {
            Some(sender) => {
                let _ignored = sender.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Removes the slot for `id` without completing it (used after a local
    /// timeout, so a subsequent late response finds nothing to complete).
    pub fn remove(&self, id: i64) {
        let mut slots = self.slots.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        slots.remove(&id);
    }

    /// Removes and fails every outstanding slot with
    /// [`PendingFailure::Cancelled`]; used on shutdown and fatal errors.
    pub fn cancel_all(&self) {
        let drained: Vec<SyncSender<PendingOutcome>> = {
            let mut slots = self.slots.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            slots.drain().map(|(_, sender)| sender).collect()
        };
        for sender in drained {
            let _ignored = sender.send(Err(PendingFailure::Cancelled));
        }
    }

    /// Returns the number of currently outstanding requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(std::sync::PoisonError::into_inner).len()
    }

    /// Returns whether the table has no outstanding requests.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[rstest]
    fn complete_delivers_result_to_slot() {
        let table = PendingTable::new();
        let slot = table.insert(1);
        assert!(table.complete(1, Ok(json!({"ok": true}))));
        let outcome = slot.recv_timeout(Duration::from_millis(50)).expect("should complete");
        assert_eq!(outcome.expect("ok"), json!({"ok": true}));
    }

    #[rstest]
    fn complete_for_unknown_id_is_a_no_op() {
        let table = PendingTable::new();
        assert!(!table.complete(999, Ok(json!(null))));
    }

    #[rstest]
    fn out_of_order_completion_routes_to_the_right_slot() {
        let table = PendingTable::new();
        let slot1 = table.insert(1);
        let slot2 = table.insert(2);
        let slot3 = table.insert(3);

        assert!(table.complete(3, Ok(json!(3))));
        assert!(table.complete(1, Ok(json!(1))));
        assert!(table.complete(2, Ok(json!(2))));

        assert_eq!(slot1.recv_timeout(Duration::from_millis(50)).expect("ok").expect("ok"), json!(1));
        assert_eq!(slot2.recv_timeout(Duration::from_millis(50)).expect("ok").expect("ok"), json!(2));
        assert_eq!(slot3.recv_timeout(Duration::from_millis(50)).expect("ok").expect("ok"), json!(3));
        assert!(table.is_empty());
    }

    #[rstest]
    fn cancel_all_fails_every_outstanding_slot() {
        let table = PendingTable::new();
        let slot1 = table.insert(1);
        let slot2 = table.insert(2);

        table.cancel_all();

        assert!(matches!(
            slot1.recv_timeout(Duration::from_millis(50)),
            Some(Err(PendingFailure::Cancelled))
        ));
        assert!(matches!(
            slot2.recv_timeout(Duration::from_millis(50)),
            Some(Err(PendingFailure::Cancelled))
        ));
        assert!(table.is_empty());
    }

    #[rstest]
    fn remove_after_timeout_drops_late_response_silently() {
        let table = PendingTable::new();
        let slot = table.insert(1);
        assert_eq!(slot.id(), 1);
        table.remove(slot.id());
        assert!(!table.complete(1, Ok(json!(null))));
    }

    #[rstest]
    #[should_panic(expected = "reused while still pending")]
    fn inserting_a_live_id_twice_panics() {
        let table = PendingTable::new();
        let _slot = table.insert(5);
        let _slot_again = table.insert(5);
    }
}
