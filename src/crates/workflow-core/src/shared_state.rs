//! Shared State Store.
//!
//! The only cross-executor state channel. All access goes through a single
//! exclusive async lock; a [`hold`](SharedState::hold) scope lets a caller
//! perform several reads/writes without releasing and reacquiring it, so
//! composite operations (read-modify-write) stay atomic with respect to
//! other executors.

use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::{Mutex, MutexGuard};

/// Key prefix reserved for framework-owned state. User code must not write
/// under this prefix directly; it is enforced by convention at the handler
/// context boundary, not by this store (the store itself is prefix-agnostic
/// so the framework can use it for its own bookkeeping).
pub const RESERVED_PREFIX: &str = "_";

/// Reserved key under which per-executor snapshotable state lives, keyed by
/// executor id.
pub const EXECUTOR_STATE_KEY: &str = "_executor_state";

/// Reserved key under which the request-info executor mirrors its pending
/// request table.
pub const REQUEST_INFO_STATE_KEY: &str = "_request_info_pending";

#[derive(Default)]
pub struct SharedState {
    inner: Mutex<HashMap<String, Value>>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.inner.lock().await.get(key).cloned()
    }

    pub async fn set(&self, key: impl Into<String>, value: Value) {
        self.inner.lock().await.insert(key.into(), value);
    }

    pub async fn delete(&self, key: &str) -> Option<Value> {
        self.inner.lock().await.remove(key)
    }

    /// Full dump of every key, used when building a checkpoint.
    pub async fn snapshot(&self) -> HashMap<String, Value> {
        self.inner.lock().await.clone()
    }

    /// Replaces the entire store, used when restoring from a checkpoint.
    pub async fn restore(&self, state: HashMap<String, Value>) {
        *self.inner.lock().await = state;
    }

    /// Acquires the lock for the duration of the returned guard, so a
    /// caller can perform several operations without another executor
    /// observing an intermediate state.
    pub async fn hold(&self) -> SharedStateHold<'_> {
        SharedStateHold {
            guard: self.inner.lock().await,
        }
    }

    /// Convenience accessor for the per-executor state slot.
    pub async fn get_executor_state(&self, executor_id: &str) -> Option<Value> {
        let hold = self.hold().await;
        hold.get_within_hold(EXECUTOR_STATE_KEY)
            .and_then(|v| v.as_object().and_then(|m| m.get(executor_id)).cloned())
    }

    /// Convenience mutator for the per-executor state slot.
    pub async fn set_executor_state(&self, executor_id: &str, value: Value) {
        let mut hold = self.hold().await;
        let mut slot = hold
            .get_within_hold(EXECUTOR_STATE_KEY)
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default();
        slot.insert(executor_id.to_string(), value);
        hold.set_within_hold(EXECUTOR_STATE_KEY, Value::Object(slot));
    }
}

/// A held lock over the shared state map. Operations performed through this
/// guard do not release the lock between calls.
pub struct SharedStateHold<'a> {
    guard: MutexGuard<'a, HashMap<String, Value>>,
}

impl SharedStateHold<'_> {
    pub fn get_within_hold(&self, key: &str) -> Option<Value> {
        self.guard.get(key).cloned()
    }

    pub fn set_within_hold(&mut self, key: impl Into<String>, value: Value) {
        self.guard.insert(key.into(), value);
    }

    pub fn delete_within_hold(&mut self, key: &str) -> Option<Value> {
        self.guard.remove(key)
    }
}
