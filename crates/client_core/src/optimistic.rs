//! Optimistic mutations over a broadcast cell.

use std::{
    collections::HashMap,
    fmt,
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use futures::future::BoxFuture;
use serde::Serialize;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    broadcast::BroadcastCell,
    error::{ClientError, ClientResult},
    status::StatusNotifier,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationPhase {
    Idle,
    Applied,
    Confirming,
    Committed,
    RolledBack,
}

type ApplyFn<T> = Box<dyn FnOnce(&T) -> T + Send>;
type RevertFn<T> = Box<dyn FnOnce(&T) -> T + Send>;
type ConfirmFn<T, R> = Box<dyn Fn(Arc<T>) -> BoxFuture<'static, ClientResult<R>> + Send + Sync>;
type MergeFn<T, R> = Box<dyn FnOnce(&T, R) -> T + Send>;
type RefetchFn<T> = Box<dyn Fn() -> BoxFuture<'static, ClientResult<T>> + Send + Sync>;
type AfterCommitFn<T> = Box<dyn FnOnce(Arc<T>) -> BoxFuture<'static, ClientResult<()>> + Send>;

/// What to do with the cell once the remote side accepted the change.
pub enum CommitPolicy<T, R> {
    /// The optimistic snapshot is final.
    KeepOptimistic,
    /// Fold the confirmation result into the latest snapshot.
    Merge(MergeFn<T, R>),
    /// Re-fetch the authoritative snapshot after the settle delay.
    Refetch(RefetchFn<T>),
}

pub struct Mutation<T, R> {
    label: String,
    entity_key: String,
    apply: ApplyFn<T>,
    revert: Option<RevertFn<T>>,
    confirm: ConfirmFn<T, R>,
    commit: CommitPolicy<T, R>,
    retry_on_timeout: bool,
    success_message: Option<String>,
    failure_message: Option<String>,
    after_commit: Option<AfterCommitFn<T>>,
}

impl<T, R> Mutation<T, R>
where
    T: Send + Sync + 'static,
    R: Send + 'static,
{
    /// `confirm` receives the applied snapshot. It may be called twice when
    /// timeout retry is enabled.
    pub fn new<A, C, Fut>(label: impl Into<String>, apply: A, confirm: C) -> Self
    where
        A: FnOnce(&T) -> T + Send + 'static,
        C: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ClientResult<R>> + Send + 'static,
    {
        let label = label.into();
        Self {
            entity_key: label.clone(),
            label,
            apply: Box::new(apply),
            revert: None,
            confirm: Box::new(move |snapshot| Box::pin(confirm(snapshot))),
            commit: CommitPolicy::KeepOptimistic,
            retry_on_timeout: false,
            success_message: None,
            failure_message: None,
            after_commit: None,
        }
    }

    pub fn entity(mut self, key: impl Into<String>) -> Self {
        self.entity_key = key.into();
        self
    }

    /// Undoes this mutation's own change on the latest snapshot when
    /// confirmation fails. Without it the cell goes back to the snapshot taken
    /// before `apply`, discarding anything written to it since.
    pub fn revert(mut self, revert: impl FnOnce(&T) -> T + Send + 'static) -> Self {
        self.revert = Some(Box::new(revert));
        self
    }

    pub fn merge(mut self, merge: impl FnOnce(&T, R) -> T + Send + 'static) -> Self {
        self.commit = CommitPolicy::Merge(Box::new(merge));
        self
    }

    pub fn refetch<F, Fut>(mut self, fetch: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ClientResult<T>> + Send + 'static,
    {
        self.commit = CommitPolicy::Refetch(Box::new(move || Box::pin(fetch())));
        self
    }

    pub fn retry_on_timeout(mut self) -> Self {
        self.retry_on_timeout = true;
        self
    }

    pub fn on_success(mut self, message: impl Into<String>) -> Self {
        self.success_message = Some(message.into());
        self
    }

    pub fn on_failure(mut self, message: impl Into<String>) -> Self {
        self.failure_message = Some(message.into());
        self
    }

    /// Runs once the commit policy has been applied. A failing hook turns the
    /// outcome into an error and replaces the success message with a failure.
    pub fn after_commit<F, Fut>(mut self, hook: F) -> Self
    where
        F: FnOnce(Arc<T>) -> Fut + Send + 'static,
        Fut: Future<Output = ClientResult<()>> + Send + 'static,
    {
        self.after_commit = Some(Box::new(move |snapshot| Box::pin(hook(snapshot))));
        self
    }
}

#[derive(Debug)]
pub struct MutationOutcome {
    pub phase: MutationPhase,
    pub error: Option<ClientError>,
    pub retried: bool,
}

impl MutationOutcome {
    /// True when the remote side accepted the change, even if a post-commit
    /// hook failed afterwards.
    pub fn is_committed(&self) -> bool {
        self.phase == MutationPhase::Committed
    }

    pub fn into_result(self) -> ClientResult<()> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

pub struct MutationHandle {
    phase: watch::Receiver<MutationPhase>,
    task: JoinHandle<MutationOutcome>,
}

impl MutationHandle {
    pub fn phase(&self) -> MutationPhase {
        *self.phase.borrow()
    }

    pub async fn settled(self) -> MutationOutcome {
        let last_phase = *self.phase.borrow();
        match self.task.await {
            Ok(outcome) => outcome,
            Err(err) => MutationOutcome {
                phase: last_phase,
                error: Some(ClientError::network(format!(
                    "mutation task ended early: {err}"
                ))),
                retried: false,
            },
        }
    }
}

struct Reconciliations {
    next_id: AtomicU64,
    pending: Mutex<HashMap<String, (u64, JoinHandle<()>)>>,
}

impl Reconciliations {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, (u64, JoinHandle<()>)>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cancel(&self, name: &'static str, key: &str) {
        if let Some((_, handle)) = self.lock().remove(key) {
            handle.abort();
            debug!(coordinator = name, entity = key, "optimistic: pending refetch superseded");
        }
    }
}

pub struct MutationCoordinator<T> {
    name: &'static str,
    cell: Arc<BroadcastCell<T>>,
    status: Arc<StatusNotifier>,
    settle_delay: Duration,
    reconciliations: Arc<Reconciliations>,
}

impl<T> MutationCoordinator<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(
        name: &'static str,
        cell: Arc<BroadcastCell<T>>,
        status: Arc<StatusNotifier>,
        settle_delay: Duration,
    ) -> Self {
        Self {
            name,
            cell,
            status,
            settle_delay,
            reconciliations: Arc::new(Reconciliations {
                next_id: AtomicU64::new(0),
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn cell(&self) -> &Arc<BroadcastCell<T>> {
        &self.cell
    }

    pub fn pending_reconciliations(&self) -> usize {
        self.reconciliations.lock().len()
    }

    /// Applies the change to the cell immediately and starts confirmation.
    /// Must be called from within a tokio runtime.
    pub fn submit<R: Send + 'static>(&self, mutation: Mutation<T, R>) -> MutationHandle {
        let Mutation {
            label,
            entity_key,
            apply,
            revert,
            confirm,
            commit,
            retry_on_timeout,
            success_message,
            failure_message,
            after_commit,
        } = mutation;

        let (phase_tx, phase_rx) = watch::channel(MutationPhase::Idle);
        self.reconciliations.cancel(self.name, &entity_key);

        let before = self.cell.current();
        let applied = self.cell.update(apply);
        phase_tx.send_replace(MutationPhase::Applied);
        debug!(
            coordinator = self.name,
            mutation = %label,
            entity = %entity_key,
            "optimistic: change applied"
        );

        let name = self.name;
        let cell = Arc::clone(&self.cell);
        let status = Arc::clone(&self.status);
        let reconciliations = Arc::clone(&self.reconciliations);
        let settle_delay = self.settle_delay;

        let task = tokio::spawn(async move {
            phase_tx.send_replace(MutationPhase::Confirming);
            let mut retried = false;
            let mut result = confirm(Arc::clone(&applied)).await;
            if retry_on_timeout && matches!(&result, Err(err) if err.is_timeout()) {
                warn!(
                    coordinator = name,
                    mutation = %label,
                    "optimistic: confirmation timed out; retrying once"
                );
                retried = true;
                result = confirm(Arc::clone(&applied)).await;
            }

            match result {
                Ok(remote) => {
                    let committed = match commit {
                        CommitPolicy::KeepOptimistic => applied,
                        CommitPolicy::Merge(merge) => cell.update(|current| merge(current, remote)),
                        CommitPolicy::Refetch(fetch) => {
                            schedule_refetch(
                                name,
                                &reconciliations,
                                entity_key.clone(),
                                settle_delay,
                                fetch,
                                Arc::clone(&cell),
                            );
                            applied
                        }
                    };
                    let hook_error = match after_commit {
                        Some(hook) => hook(committed).await.err(),
                        None => None,
                    };
                    match &hook_error {
                        Some(err) => {
                            warn!(
                                coordinator = name,
                                mutation = %label,
                                error = %err,
                                "optimistic: post-commit hook failed"
                            );
                            status.failure(err.user_message());
                        }
                        None => {
                            if let Some(message) = success_message {
                                status.success(message);
                            }
                        }
                    }
                    phase_tx.send_replace(MutationPhase::Committed);
                    info!(coordinator = name, mutation = %label, retried, "optimistic: committed");
                    MutationOutcome {
                        phase: MutationPhase::Committed,
                        error: hook_error,
                        retried,
                    }
                }
                Err(err) => {
                    match revert {
                        Some(revert) => {
                            cell.update(revert);
                        }
                        None => cell.replace(T::clone(&before)),
                    }
                    let message = match failure_message {
                        Some(prefix) => format!("{prefix}: {}", err.user_message()),
                        None => err.user_message(),
                    };
                    status.failure(message);
                    phase_tx.send_replace(MutationPhase::RolledBack);
                    warn!(
                        coordinator = name,
                        mutation = %label,
                        retried,
                        error = %err,
                        "optimistic: rolled back"
                    );
                    MutationOutcome {
                        phase: MutationPhase::RolledBack,
                        error: Some(err),
                        retried,
                    }
                }
            }
        });

        MutationHandle {
            phase: phase_rx,
            task,
        }
    }
}

impl<T> fmt::Debug for MutationCoordinator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationCoordinator")
            .field("name", &self.name)
            .field("settle_delay", &self.settle_delay)
            .finish()
    }
}

fn schedule_refetch<T: Send + Sync + 'static>(
    name: &'static str,
    reconciliations: &Arc<Reconciliations>,
    entity_key: String,
    delay: Duration,
    fetch: RefetchFn<T>,
    cell: Arc<BroadcastCell<T>>,
) {
    let mut pending = reconciliations.lock();
    if let Some((_, previous)) = pending.remove(&entity_key) {
        previous.abort();
        debug!(coordinator = name, entity = %entity_key, "optimistic: pending refetch superseded");
    }

    let id = reconciliations.next_id.fetch_add(1, Ordering::SeqCst);
    let registry = Arc::clone(reconciliations);
    let key = entity_key.clone();
    let handle = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        match fetch().await {
            Ok(snapshot) => {
                cell.replace(snapshot);
                debug!(coordinator = name, entity = %key, "optimistic: refetch applied");
            }
            Err(err) => {
                warn!(
                    coordinator = name,
                    entity = %key,
                    error = %err,
                    "optimistic: refetch failed; keeping optimistic snapshot"
                );
            }
        }
        let mut pending = registry.lock();
        if pending.get(&key).is_some_and(|(current, _)| *current == id) {
            pending.remove(&key);
        }
    });
    pending.insert(entity_key, (id, handle));
}

#[cfg(test)]
#[path = "tests/optimistic_tests.rs"]
mod tests;
