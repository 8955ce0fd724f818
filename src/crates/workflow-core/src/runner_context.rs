//! Runner Context.
//!
//! Holds the per-source outbound message buffer, the event queue handlers
//! write to, an optional checkpoint store, and the streaming-mode flag.
//! Reset at the start of a fresh run; preserved across resume.

use crate::events::Event;
use crate::message::Message;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use workflow_checkpoint::CheckpointStore;

pub struct RunnerContext {
    pub workflow_id: String,
    outbound: Mutex<HashMap<String, Vec<Message>>>,
    event_tx: mpsc::UnboundedSender<Event>,
    event_rx: Mutex<mpsc::UnboundedReceiver<Event>>,
    checkpoint_store: Option<Arc<dyn CheckpointStore>>,
    streaming: AtomicBool,
}

impl RunnerContext {
    pub fn new(workflow_id: impl Into<String>, checkpoint_store: Option<Arc<dyn CheckpointStore>>) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            workflow_id: workflow_id.into(),
            outbound: Mutex::new(HashMap::new()),
            event_tx,
            event_rx: Mutex::new(event_rx),
            checkpoint_store,
            streaming: AtomicBool::new(false),
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Acquire)
    }

    pub fn set_streaming(&self, value: bool) {
        self.streaming.store(value, Ordering::Release);
    }

    pub fn checkpoint_store(&self) -> Option<&Arc<dyn CheckpointStore>> {
        self.checkpoint_store.as_ref()
    }

    /// Appends `message` to its source's outbound buffer, preserving
    /// per-source emission order across the superstep.
    pub async fn send_message(&self, message: Message) {
        self.outbound
            .lock()
            .await
            .entry(message.source_id.clone())
            .or_default()
            .push(message);
    }

    /// Atomically swaps out the entire outbound buffer, handing ownership
    /// to the caller. The scheduler calls this once per superstep.
    pub async fn drain_outbound(&self) -> HashMap<String, Vec<Message>> {
        std::mem::take(&mut *self.outbound.lock().await)
    }

    /// Clones the outbound buffer without removing anything from it, for
    /// checkpointing in-flight messages.
    pub async fn snapshot_outbound(&self) -> HashMap<String, Vec<Message>> {
        self.outbound.lock().await.clone()
    }

    pub async fn has_pending_outbound(&self) -> bool {
        self.outbound.lock().await.values().any(|v| !v.is_empty())
    }

    /// Enqueues an event for the run's consumer. Never blocks: the channel
    /// is unbounded, a single-producer-per-emitter, single-consumer-per-run
    /// queue, without imposing backpressure on handlers.
    pub fn push_event(&self, event: Event) {
        // The receiver is only ever dropped together with this context, so
        // a send failure here would mean the run is already gone.
        let _ = self.event_tx.send(event);
    }

    /// Drains every event currently queued, without waiting.
    pub async fn drain_events(&self) -> Vec<Event> {
        let mut rx = self.event_rx.lock().await;
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    /// Polls for events up to `timeout`, returning as soon as at least one
    /// arrives or the deadline passes. Used by the scheduler to interleave
    /// event delivery with in-flight superstep work instead of waiting for
    /// the superstep boundary.
    pub async fn poll_events(&self, timeout: Duration) -> Vec<Event> {
        let mut rx = self.event_rx.lock().await;
        let mut out = Vec::new();
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(event)) => out.push(event),
            Ok(None) | Err(_) => return out,
        }
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }
}
