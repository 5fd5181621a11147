use std::{sync::Arc, time::Duration};

use chrono::Utc;
use shared::{
    domain::{Favorite, FavoriteId, Product, ProductId, UserId},
    protocol::FavoriteAddRequest,
};
use tracing::{debug, warn};

use crate::{
    backend::CommerceBackend,
    broadcast::BroadcastCell,
    error::{ClientError, ClientResult},
    local_store::LocalStore,
    normalizer::{normalize_favorite, normalize_favorites},
    optimistic::{Mutation, MutationCoordinator, MutationHandle},
    session::Session,
    status::StatusNotifier,
};

pub struct FavoritesService {
    backend: Arc<dyn CommerceBackend>,
    session: Arc<Session>,
    store: Arc<LocalStore<Favorite>>,
    coordinator: MutationCoordinator<Vec<Favorite>>,
}

impl FavoritesService {
    pub fn new(
        backend: Arc<dyn CommerceBackend>,
        session: Arc<Session>,
        store: Arc<LocalStore<Favorite>>,
        status: Arc<StatusNotifier>,
        settle_delay: Duration,
    ) -> Self {
        let cell = Arc::new(BroadcastCell::new("favorites", Vec::new()));
        Self {
            backend,
            session,
            store,
            coordinator: MutationCoordinator::new("favorites", cell, status, settle_delay),
        }
    }

    pub fn cell(&self) -> &Arc<BroadcastCell<Vec<Favorite>>> {
        self.coordinator.cell()
    }

    pub fn favorites(&self) -> Arc<Vec<Favorite>> {
        self.cell().current()
    }

    pub fn is_favorite(&self, product_id: ProductId) -> bool {
        self.favorites()
            .iter()
            .any(|favorite| favorite.product_id == product_id)
    }

    /// Loads favorites from the backend, or from the local cache when the
    /// backend cannot be read. Only fails when nobody is logged in.
    pub async fn refresh(&self) -> ClientResult<Arc<Vec<Favorite>>> {
        let user_id = self.session.require_user()?;
        let favorites = match self.backend.user_favorites(user_id).await {
            Ok(raw) => {
                let favorites = normalize_favorites(&raw, user_id);
                if let Err(err) = write_through(&self.store, user_id, &favorites).await {
                    warn!(%user_id, error = %err, "favorites: cache write failed");
                }
                debug!(%user_id, count = favorites.len(), "favorites: refreshed from backend");
                favorites
            }
            Err(err) => {
                warn!(%user_id, error = %err, "favorites: remote read failed; using local cache");
                self.cached(user_id).await
            }
        };
        self.cell().replace(favorites);
        Ok(self.favorites())
    }

    pub fn add(&self, product: &Product) -> ClientResult<MutationHandle> {
        let user_id = self.session.require_user()?;
        let product_id = product
            .id
            .ok_or_else(|| ClientError::validation("Product has no id"))?;
        if self.is_favorite(product_id) {
            return Err(ClientError::validation("Product is already in your favorites"));
        }

        let local = Favorite {
            id: Some(FavoriteId(self.store.allocate_id())),
            user_id,
            product_id,
            product: Some(product.clone()),
            created_date: Some(Utc::now()),
        };
        let backend = Arc::clone(&self.backend);
        let store = Arc::clone(&self.store);
        let mutation = Mutation::new(
            format!("add product {product_id} to favorites"),
            move |favorites: &Vec<Favorite>| {
                let mut next = favorites.clone();
                next.push(local);
                next
            },
            move |_| {
                let backend = Arc::clone(&backend);
                async move {
                    backend
                        .add_favorite(&FavoriteAddRequest {
                            user_id,
                            product_id,
                        })
                        .await
                }
            },
        )
        .entity(favorite_key(user_id, product_id))
        .revert(move |favorites: &Vec<Favorite>| without_product(favorites, product_id))
        .merge(move |favorites: &Vec<Favorite>, remote| {
            let Some(confirmed) = normalize_favorite(&remote, user_id) else {
                return favorites.clone();
            };
            favorites
                .iter()
                .map(|favorite| {
                    if favorite.product_id == confirmed.product_id {
                        Favorite {
                            id: confirmed.id.or(favorite.id),
                            product: confirmed.product.clone().or_else(|| favorite.product.clone()),
                            created_date: confirmed.created_date.or(favorite.created_date),
                            ..favorite.clone()
                        }
                    } else {
                        favorite.clone()
                    }
                })
                .collect()
        })
        .after_commit(move |favorites| async move {
            match favorites.iter().find(|f| f.product_id == product_id) {
                Some(confirmed) => cache_upsert(&store, confirmed.clone()).await,
                None => Ok(()),
            }
        })
        .on_success("Added to favorites")
        .on_failure("Failed to add to favorites");

        Ok(self.coordinator.submit(mutation))
    }

    pub fn remove(&self, product_id: ProductId) -> ClientResult<MutationHandle> {
        let user_id = self.session.require_user()?;
        let removed = self
            .favorites()
            .iter()
            .find(|favorite| favorite.product_id == product_id)
            .cloned();
        let backend = Arc::clone(&self.backend);
        let store = Arc::clone(&self.store);
        let mutation = Mutation::new(
            format!("remove product {product_id} from favorites"),
            move |favorites: &Vec<Favorite>| without_product(favorites, product_id),
            move |_| {
                let backend = Arc::clone(&backend);
                async move { backend.remove_favorite(user_id, product_id).await }
            },
        )
        .entity(favorite_key(user_id, product_id))
        .revert(move |favorites: &Vec<Favorite>| {
            let mut next = favorites.clone();
            if let Some(removed) = removed {
                if !next.iter().any(|f| f.product_id == product_id) {
                    next.push(removed);
                }
            }
            next
        })
        .after_commit(move |_| async move { cache_remove(&store, user_id, product_id).await })
        .on_success("Removed from favorites")
        .on_failure("Failed to remove from favorites");

        Ok(self.coordinator.submit(mutation))
    }

    /// Empties the view and the cache for every user.
    pub async fn clear(&self) -> ClientResult<()> {
        self.cell().replace(Vec::new());
        self.store.clear().await
    }

    async fn cached(&self, user_id: UserId) -> Vec<Favorite> {
        self.store
            .load()
            .await
            .into_iter()
            .filter(|favorite| favorite.user_id == user_id)
            .collect()
    }
}

fn favorite_key(user_id: UserId, product_id: ProductId) -> String {
    format!("favorite:{user_id}:{product_id}")
}

fn without_product(favorites: &[Favorite], product_id: ProductId) -> Vec<Favorite> {
    favorites
        .iter()
        .filter(|favorite| favorite.product_id != product_id)
        .cloned()
        .collect()
}

/// Records one confirmed favorite without touching anything still in flight.
async fn cache_upsert(store: &LocalStore<Favorite>, favorite: Favorite) -> ClientResult<()> {
    let mut all = store.load().await;
    all.retain(|f| !(f.user_id == favorite.user_id && f.product_id == favorite.product_id));
    all.push(favorite);
    store.save_all(&all).await
}

async fn cache_remove(
    store: &LocalStore<Favorite>,
    user_id: UserId,
    product_id: ProductId,
) -> ClientResult<()> {
    let mut all = store.load().await;
    all.retain(|f| !(f.user_id == user_id && f.product_id == product_id));
    store.save_all(&all).await
}

/// Replaces `user_id`'s entries in the cache, leaving other users' alone.
async fn write_through(
    store: &LocalStore<Favorite>,
    user_id: UserId,
    favorites: &[Favorite],
) -> ClientResult<()> {
    let mut all = store.load().await;
    all.retain(|favorite| favorite.user_id != user_id);
    all.extend(favorites.iter().cloned());
    store.save_all(&all).await
}

#[cfg(test)]
#[path = "tests/favorites_tests.rs"]
mod tests;
