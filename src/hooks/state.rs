//! Reactive state adapter contract
//!
//! The orchestrator never stores state itself. It asks the bound adapter to
//! create state cells, export them to the host, batch updates and schedule
//! effects. `WatchAdapter` is the reference adapter: every state is a
//! `tokio::sync::watch` channel and the exported handle is its receiver.

use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;

use super::events::EventHandler;
use super::HookKind;

/// One reactive value
pub trait StateCell: Send + Sync + 'static {
    fn get(&self) -> Value;
    fn set(&self, value: Value);
    /// Concrete cell, for adapters exporting their own cell type
    fn as_any(&self) -> &dyn Any;
}

pub type StateHandle = Arc<dyn StateCell>;

/// State cells of one binding by name
pub type BindingStates = HashMap<String, StateHandle>;

/// Host-facing form of a state, produced by `StateAdapter::export`
#[derive(Clone)]
pub struct ExportedState(pub Arc<dyn Any + Send + Sync>);

impl ExportedState {
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

/// Identity of the binding an adapter call is made for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingContext {
    pub binding_id: u64,
    pub kind: HookKind,
}

/// Primitive operations the orchestrator needs from a reactive framework
pub trait StateAdapter: Send + Sync {
    /// Adapter identity; one engine only accepts one kind
    fn kind(&self) -> &'static str;

    fn create(&self, initial: Value, ctx: &BindingContext) -> StateHandle;

    fn export(&self, state: &StateHandle, ctx: &BindingContext) -> ExportedState;

    /// Apply several state changes of one binding
    fn update(&self, changes: Vec<(String, Value)>, states: &BindingStates, _ctx: &BindingContext) {
        for (name, value) in changes {
            if let Some(state) = states.get(&name) {
                state.set(value);
            }
        }
    }

    /// Run `trigger` when the host is ready for side effects
    fn effect(&self, trigger: Box<dyn FnOnce() + Send>, _ctx: &BindingContext) {
        trigger();
    }

    /// Stabilize a handler across re-binds
    fn memoize(&self, handler: EventHandler) -> EventHandler {
        handler
    }
}

struct WatchCell {
    sender: watch::Sender<Value>,
}

impl StateCell for WatchCell {
    fn get(&self) -> Value {
        self.sender.borrow().clone()
    }

    fn set(&self, value: Value) {
        self.sender.send_replace(value);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Reference adapter backed by `tokio::sync::watch`
#[derive(Debug, Default, Clone, Copy)]
pub struct WatchAdapter;

impl WatchAdapter {
    /// Receiver of an exported state
    pub fn receiver(exported: &ExportedState) -> Option<watch::Receiver<Value>> {
        exported.downcast::<watch::Receiver<Value>>().cloned()
    }
}

impl StateAdapter for WatchAdapter {
    fn kind(&self) -> &'static str {
        "watch"
    }

    fn create(&self, initial: Value, _ctx: &BindingContext) -> StateHandle {
        let (sender, _receiver) = watch::channel(initial);
        Arc::new(WatchCell { sender })
    }

    fn export(&self, state: &StateHandle, _ctx: &BindingContext) -> ExportedState {
        // Cells created by another adapter export a detached snapshot
        let receiver = match state.as_any().downcast_ref::<WatchCell>() {
            Some(cell) => cell.sender.subscribe(),
            None => watch::channel(state.get()).1,
        };
        ExportedState(Arc::new(receiver))
    }
}
