//! Callback registry for incoming envelopes and state changes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tavern_protocol::{Envelope, MessageKind};

use crate::ConnectionState;

/// Handle returned by `subscribe`/`on_state`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type MessageCallback = Arc<dyn Fn(&Envelope) + Send + Sync>;
type StateCallback = Arc<dyn Fn(&ConnectionState) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    by_kind: HashMap<MessageKind, Vec<(SubscriptionId, MessageCallback)>>,
    state: Vec<(SubscriptionId, StateCallback)>,
}

impl Registry {
    fn next_id(&mut self) -> SubscriptionId {
        self.next_id += 1;
        SubscriptionId(self.next_id)
    }
}

/// Shared between the manager handle (which registers callbacks) and the
/// manager task (which invokes them).
///
/// Callbacks are cloned out before being called, so a callback may itself
/// subscribe or unsubscribe.
#[derive(Default)]
pub(crate) struct Subscribers {
    inner: Mutex<Registry>,
}

impl Subscribers {
    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn subscribe(&self, kind: MessageKind, callback: MessageCallback) -> SubscriptionId {
        let mut registry = self.lock();
        let id = registry.next_id();
        registry.by_kind.entry(kind).or_default().push((id, callback));
        id
    }

    pub(crate) fn on_state(&self, callback: StateCallback) -> SubscriptionId {
        let mut registry = self.lock();
        let id = registry.next_id();
        registry.state.push((id, callback));
        id
    }

    /// Removes a subscription of either kind. Returns `false` if it was
    /// already gone.
    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = self.lock();
        let mut removed = false;
        registry.by_kind.retain(|_, subs| {
            let before = subs.len();
            subs.retain(|(sub, _)| *sub != id);
            removed |= subs.len() != before;
            !subs.is_empty()
        });
        let before = registry.state.len();
        registry.state.retain(|(sub, _)| *sub != id);
        removed || registry.state.len() != before
    }

    pub(crate) fn clear(&self) {
        let mut registry = self.lock();
        registry.by_kind.clear();
        registry.state.clear();
    }

    /// Calls every callback registered for the envelope's type. Returns how
    /// many ran.
    pub(crate) fn route(&self, envelope: &Envelope) -> usize {
        let callbacks: Vec<MessageCallback> = self
            .lock()
            .by_kind
            .get(&envelope.kind)
            .map(|subs| subs.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default();
        for callback in &callbacks {
            callback(envelope);
        }
        callbacks.len()
    }

    pub(crate) fn notify_state(&self, state: &ConnectionState) {
        let callbacks: Vec<StateCallback> = self
            .lock()
            .state
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in &callbacks {
            callback(state);
        }
    }
}
