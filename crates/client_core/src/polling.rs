//! Periodic re-fetch feeding a snapshot sink.

use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_stream::{wrappers::IntervalStream, StreamExt};
use tracing::{debug, info, warn};

use crate::{broadcast::SnapshotSink, error::ClientResult};

struct ActiveLoop {
    alive: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

pub struct PollingController {
    resource: &'static str,
    active: Mutex<Option<ActiveLoop>>,
    ticks_started: Arc<AtomicU64>,
}

impl PollingController {
    pub fn new(resource: &'static str) -> Self {
        Self {
            resource,
            active: Mutex::new(None),
            ticks_started: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn resource(&self) -> &'static str {
        self.resource
    }

    /// Starts polling, replacing any loop this controller already runs. The
    /// first tick fires immediately.
    pub fn start<T, F, Fut, S>(&self, interval: Duration, fetch: F, sink: Arc<S>)
    where
        T: Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ClientResult<T>> + Send + 'static,
        S: SnapshotSink<T> + ?Sized + 'static,
    {
        let mut active = self.lock();
        if let Some(previous) = active.take() {
            previous.alive.store(false, Ordering::SeqCst);
            previous.handle.abort();
            debug!(resource = self.resource, "polling: replaced running loop");
        }

        let alive = Arc::new(AtomicBool::new(true));
        let resource = self.resource;
        let ticks_started = Arc::clone(&self.ticks_started);
        let loop_alive = Arc::clone(&alive);
        let handle = tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut ticks = IntervalStream::new(timer);
            while ticks.next().await.is_some() {
                let tick = ticks_started.fetch_add(1, Ordering::SeqCst) + 1;
                let alive = Arc::clone(&loop_alive);
                let sink = Arc::clone(&sink);
                let pending = fetch();
                tokio::spawn(async move {
                    match pending.await {
                        Ok(snapshot) => {
                            if alive.load(Ordering::SeqCst) {
                                sink.replace(snapshot);
                                debug!(resource, tick, "polling: tick applied");
                            } else {
                                debug!(resource, tick, "polling: discarded result of stopped loop");
                            }
                        }
                        Err(err) => {
                            warn!(resource, tick, error = %err, "polling: tick failed");
                        }
                    }
                });
            }
        });

        info!(
            resource = self.resource,
            interval_ms = interval.as_millis() as u64,
            "polling: started"
        );
        *active = Some(ActiveLoop { alive, handle });
    }

    /// Stops the loop if one is running. Returns whether anything was stopped.
    pub fn stop(&self) -> bool {
        let Some(active) = self.lock().take() else {
            return false;
        };
        active.alive.store(false, Ordering::SeqCst);
        active.handle.abort();
        info!(resource = self.resource, "polling: stopped");
        true
    }

    pub fn is_active(&self) -> bool {
        self.lock().is_some()
    }

    pub fn ticks_started(&self) -> u64 {
        self.ticks_started.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, Option<ActiveLoop>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for PollingController {
    fn drop(&mut self) {
        let active = self
            .active
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(active) = active {
            active.alive.store(false, Ordering::SeqCst);
            active.handle.abort();
        }
    }
}

#[cfg(test)]
#[path = "tests/polling_tests.rs"]
mod tests;
