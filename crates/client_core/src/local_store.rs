//! Durable JSON collections with a next-id counter.

use std::{
    marker::PhantomData,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
};

use serde::{de::DeserializeOwned, Serialize};
use shared::domain::{Address, Favorite, LocalOrder};
use storage::KeyValueStore;
use tracing::{debug, warn};

use crate::error::{ClientError, ClientResult};

pub trait LocalRecord: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const COLLECTION_KEY: &'static str;
    const COUNTER_KEY: &'static str;

    fn local_id(&self) -> Option<i64>;
}

impl LocalRecord for Address {
    const COLLECTION_KEY: &'static str = "user_addresses";
    const COUNTER_KEY: &'static str = "address_maxId";

    fn local_id(&self) -> Option<i64> {
        Some(self.id.0)
    }
}

impl LocalRecord for Favorite {
    const COLLECTION_KEY: &'static str = "favorites";
    const COUNTER_KEY: &'static str = "favorites_maxId";

    fn local_id(&self) -> Option<i64> {
        self.id.map(|id| id.0)
    }
}

impl LocalRecord for LocalOrder {
    const COLLECTION_KEY: &'static str = "user_orders";
    const COUNTER_KEY: &'static str = "user_orders_maxId";

    fn local_id(&self) -> Option<i64> {
        Some(self.id.0)
    }
}

pub struct LocalStore<T> {
    kv: Arc<dyn KeyValueStore>,
    next_id: AtomicI64,
    _record: PhantomData<fn() -> T>,
}

impl<T: LocalRecord> LocalStore<T> {
    /// Opens the collection and restores the id counter so that it is past
    /// every id already persisted.
    pub async fn open(kv: Arc<dyn KeyValueStore>) -> Self {
        let store = Self {
            kv,
            next_id: AtomicI64::new(1),
            _record: PhantomData,
        };

        let stored_counter = match store.kv.get(T::COUNTER_KEY).await {
            Ok(raw) => raw.and_then(|raw| raw.trim().parse::<i64>().ok()),
            Err(err) => {
                warn!(key = T::COUNTER_KEY, error = %err, "local_store: counter unreadable");
                None
            }
        };
        let past_existing = store
            .load()
            .await
            .iter()
            .filter_map(T::local_id)
            .max()
            .map(|max| max + 1);
        let next = [stored_counter, past_existing, Some(1)]
            .into_iter()
            .flatten()
            .max()
            .unwrap_or(1);
        store.next_id.store(next, Ordering::SeqCst);
        debug!(
            collection = T::COLLECTION_KEY,
            next_id = next,
            "local_store: collection opened"
        );
        store
    }

    pub async fn load(&self) -> Vec<T> {
        let raw = match self.kv.get(T::COLLECTION_KEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(err) => {
                warn!(
                    key = T::COLLECTION_KEY,
                    error = %err,
                    "local_store: read failed; treating collection as empty"
                );
                return Vec::new();
            }
        };
        match decode_collection::<T>(&raw) {
            Ok(items) => items,
            Err(err) => {
                warn!(error = %err, "local_store: recovered from corrupt collection");
                Vec::new()
            }
        }
    }

    /// Overwrites the whole collection and persists the id counter with it.
    pub async fn save_all(&self, items: &[T]) -> ClientResult<()> {
        let encoded = serde_json::to_string(items)?;
        let counter = self.next_id.load(Ordering::SeqCst).to_string();
        self.kv
            .set_many(&[(T::COLLECTION_KEY, encoded), (T::COUNTER_KEY, counter)])
            .await?;
        debug!(
            collection = T::COLLECTION_KEY,
            count = items.len(),
            "local_store: collection saved"
        );
        Ok(())
    }

    pub async fn clear(&self) -> ClientResult<()> {
        self.kv.remove(T::COLLECTION_KEY).await?;
        Ok(())
    }

    /// Returns the next id and advances the counter. Ids are never handed out
    /// twice by one store, deletions notwithstanding.
    pub fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn peek_next_id(&self) -> i64 {
        self.next_id.load(Ordering::SeqCst)
    }
}

fn decode_collection<T: LocalRecord>(raw: &str) -> ClientResult<Vec<T>> {
    serde_json::from_str::<Vec<T>>(raw).map_err(|err| ClientError::LocalStorageCorrupt {
        key: T::COLLECTION_KEY.to_string(),
        message: err.to_string(),
    })
}

#[cfg(test)]
#[path = "tests/local_store_tests.rs"]
mod tests;
