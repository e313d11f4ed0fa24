//! C5 process-wide shared state (§5, §9): a case-insensitive name→value
//! map, readable by all requests and writable only through [`SharedState::set`].
//! A snapshot is copied into each leased interpreter context so concurrent
//! writes from other requests are invisible to an already-started script.

use std::sync::{Arc, RwLock};

use crate::value::{Value, ValueMap};

/// Process-wide shared state, cloned via `Arc` into the server and every
/// route's delegate.
#[derive(Debug, Clone, Default)]
pub struct SharedState {
    inner: Arc<RwLock<ValueMap>>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a value into shared state. Visible to any snapshot taken
    /// after this call returns.
    pub fn set(&self, name: impl Into<String>, value: Value) {
        self.inner.write().expect("shared state lock poisoned").insert(name, value);
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.inner.read().expect("shared state lock poisoned").get(name).cloned()
    }

    /// A cloned, point-in-time copy — not a live reference — for seeding a
    /// leased interpreter's globals at lease time (§4.4, §9).
    pub fn snapshot(&self) -> ValueMap {
        self.inner.read().expect("shared state lock poisoned").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_is_not_affected_by_later_writes() {
        let state = SharedState::new();
        state.set("counter", Value::Int(1));
        let snapshot = state.snapshot();
        state.set("counter", Value::Int(2));

        assert_eq!(snapshot.get("counter"), Some(&Value::Int(1)));
        assert_eq!(state.get("counter"), Some(Value::Int(2)));
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let state = SharedState::new();
        state.set("Name", Value::Str("A".into()));
        assert_eq!(state.get("name"), Some(Value::Str("A".into())));
    }
}
