use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;

use crate::error::CallError;

/// Terminal outcome delivered to a pending call's completion
pub enum CallOutcome {
    /// The peer answered; the payload still has to be deserialized into the
    /// shape the caller expects
    Payload(Value),
    /// The call failed without a usable payload
    Failed(CallError),
}

/// Bookkeeping record for one in-flight outbound call.
///
/// The completion is single-shot by construction: resolving consumes the
/// record, and the correlation table hands a record out at most once.
pub struct PendingCall {
    complete: Box<dyn FnOnce(CallOutcome) + Send>,
}

impl PendingCall {
    pub fn new(complete: impl FnOnce(CallOutcome) + Send + 'static) -> PendingCall {
        PendingCall {
            complete: Box::new(complete),
        }
    }

    pub fn resolve(self, outcome: CallOutcome) {
        (self.complete)(outcome)
    }
}

/// Thread-safe map from correlation id to pending call.
///
/// The mutex guards map mutation only; callers invoke completions after the
/// lock is released so a slow callback never blocks unrelated calls.
#[derive(Default)]
pub struct CorrelationTable {
    entries: Mutex<HashMap<u64, PendingCall>>,
}

impl CorrelationTable {
    pub fn new() -> CorrelationTable {
        CorrelationTable::default()
    }

    /// Registers a call under a fresh id.
    ///
    /// Ids come from a monotonic counter, so a duplicate means the caller
    /// broke the id contract. Panics rather than clobbering the live call.
    pub fn insert(&self, id: u64, call: PendingCall) {
        let mut entries = self.entries.lock().expect("correlation table mutex poisoned");

        match entries.entry(id) {
            Entry::Occupied(_) => panic!("correlation id {} already has a pending call", id),
            Entry::Vacant(vacant) => {
                vacant.insert(call);
            }
        }
    }

    /// Atomically removes and returns the call registered under `id`.
    ///
    /// Returns `None` for stale, duplicate, or unknown ids; a call can
    /// therefore never be resolved twice through the table.
    pub fn take(&self, id: u64) -> Option<PendingCall> {
        self.entries
            .lock()
            .expect("correlation table mutex poisoned")
            .remove(&id)
    }

    /// Removes and returns every remaining call, used at teardown
    pub fn drain(&self) -> Vec<(u64, PendingCall)> {
        self.entries
            .lock()
            .expect("correlation table mutex poisoned")
            .drain()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .expect("correlation table mutex poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
