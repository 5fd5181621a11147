//! Latest-snapshot cell. Observers run synchronously, outside the lock, and
//! receive the current snapshot when they subscribe.

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};

use tracing::trace;

type Observer<T> = Arc<dyn Fn(&T) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Anything that accepts whole replacement snapshots.
pub trait SnapshotSink<T>: Send + Sync {
    fn replace(&self, snapshot: T);
}

struct CellState<T> {
    snapshot: Arc<T>,
    version: u64,
    observers: Vec<(SubscriptionId, Observer<T>)>,
    next_subscription: u64,
}

pub struct BroadcastCell<T> {
    name: &'static str,
    state: Mutex<CellState<T>>,
}

impl<T: Send + Sync + 'static> BroadcastCell<T> {
    pub fn new(name: &'static str, initial: T) -> Self {
        Self {
            name,
            state: Mutex::new(CellState {
                snapshot: Arc::new(initial),
                version: 0,
                observers: Vec::new(),
                next_subscription: 0,
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn current(&self) -> Arc<T> {
        Arc::clone(&self.lock().snapshot)
    }

    /// Number of `replace`/`update` calls applied so far.
    pub fn version(&self) -> u64 {
        self.lock().version
    }

    pub fn replace(&self, snapshot: T) {
        let snapshot = Arc::new(snapshot);
        let observers = {
            let mut state = self.lock();
            state.snapshot = Arc::clone(&snapshot);
            state.version += 1;
            trace!(cell = self.name, version = state.version, "broadcast: snapshot replaced");
            state
                .observers
                .iter()
                .map(|(_, observer)| Arc::clone(observer))
                .collect::<Vec<_>>()
        };
        for observer in observers {
            observer(&snapshot);
        }
    }

    /// Read-modify-write against the latest snapshot, then notify.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> Arc<T> {
        let (snapshot, observers) = {
            let mut state = self.lock();
            let next = Arc::new(f(&state.snapshot));
            state.snapshot = Arc::clone(&next);
            state.version += 1;
            let observers = state
                .observers
                .iter()
                .map(|(_, observer)| Arc::clone(observer))
                .collect::<Vec<_>>();
            (next, observers)
        };
        for observer in observers {
            observer(&snapshot);
        }
        snapshot
    }

    pub fn subscribe(&self, observer: impl Fn(&T) + Send + Sync + 'static) -> SubscriptionId {
        let observer: Observer<T> = Arc::new(observer);
        let (id, snapshot) = {
            let mut state = self.lock();
            let id = SubscriptionId(state.next_subscription);
            state.next_subscription += 1;
            state.observers.push((id, Arc::clone(&observer)));
            (id, Arc::clone(&state.snapshot))
        };
        observer(&snapshot);
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = self.lock();
        let before = state.observers.len();
        state.observers.retain(|(existing, _)| *existing != id);
        state.observers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().observers.len()
    }

    fn lock(&self) -> MutexGuard<'_, CellState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Send + Sync + 'static> SnapshotSink<T> for BroadcastCell<T> {
    fn replace(&self, snapshot: T) {
        BroadcastCell::replace(self, snapshot);
    }
}

impl<T: Default + Send + Sync + 'static> Default for BroadcastCell<T> {
    fn default() -> Self {
        Self::new("unnamed", T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for BroadcastCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("BroadcastCell")
            .field("name", &self.name)
            .field("version", &state.version)
            .field("snapshot", &state.snapshot)
            .field("observers", &state.observers.len())
            .finish()
    }
}

/// Keeps `target` equal to `project(source)` for as long as `target` is alive.
///
/// Only a weak handle to `target` is held, so dropping the derived cell ends
/// the projection.
pub fn bind_derived<S, D>(
    source: &BroadcastCell<S>,
    target: &Arc<BroadcastCell<D>>,
    project: impl Fn(&S) -> D + Send + Sync + 'static,
) -> SubscriptionId
where
    S: Send + Sync + 'static,
    D: Send + Sync + 'static,
{
    let target: Weak<BroadcastCell<D>> = Arc::downgrade(target);
    source.subscribe(move |snapshot| {
        if let Some(target) = target.upgrade() {
            target.replace(project(snapshot));
        }
    })
}

#[cfg(test)]
#[path = "tests/broadcast_tests.rs"]
mod tests;
