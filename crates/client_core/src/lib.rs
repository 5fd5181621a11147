//! Client-side sync layer for the shop backend.

use std::sync::Arc;

use shared::domain::{AddressId, LocalOrder, Product};
use storage::{KeyValueStore, Storage};
use tracing::{info, warn};

pub mod addresses;
pub mod backend;
pub mod broadcast;
pub mod cart;
pub mod catalog;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod fallback;
pub mod favorites;
pub mod local_store;
pub mod normalizer;
pub mod optimistic;
pub mod orders;
pub mod polling;
pub mod session;
pub mod status;

#[cfg(test)]
mod test_support;

pub use addresses::AddressBook;
pub use backend::{AuthToken, CommerceBackend, DeleteRoute, HttpBackend};
pub use broadcast::{BroadcastCell, SnapshotSink, SubscriptionId};
pub use cart::CartService;
pub use catalog::CatalogService;
pub use config::{load_settings, ClientSettings};
pub use dashboard::SellerDashboard;
pub use error::{ClientError, ClientResult};
pub use fallback::{FallbackChain, FallbackSuccess};
pub use favorites::FavoritesService;
pub use local_store::{LocalRecord, LocalStore};
pub use optimistic::{
    CommitPolicy, Mutation, MutationCoordinator, MutationHandle, MutationOutcome, MutationPhase,
};
pub use orders::OrderService;
pub use polling::PollingController;
pub use session::{Session, SessionSnapshot};
pub use status::{StatusKind, StatusMessage, StatusNotifier};

pub struct ShopClient {
    settings: ClientSettings,
    status: Arc<StatusNotifier>,
    session: Arc<Session>,
    catalog: Arc<CatalogService>,
    cart: Arc<CartService>,
    favorites: Arc<FavoritesService>,
    addresses: Arc<AddressBook>,
    orders: Arc<OrderService>,
    dashboard: Arc<SellerDashboard>,
}

impl ShopClient {
    /// Opens the local database and an HTTP backend described by `settings`.
    pub async fn connect(settings: ClientSettings) -> ClientResult<Self> {
        settings.validate()?;
        let database_url = config::normalize_database_url(&settings.database_url);
        let storage = Storage::new(&database_url).await?;
        let token = AuthToken::default();
        let backend = HttpBackend::new(
            &settings.api_base_url,
            settings.request_timeout(),
            token.clone(),
        )?;
        info!(
            api_base_url = %settings.api_base_url,
            database_url = %database_url,
            "client: connected"
        );
        Self::new(Arc::new(backend), Arc::new(storage), token, settings).await
    }

    /// Assembles the services over an existing backend and store. `token` must
    /// be the one the backend authenticates with.
    pub async fn new(
        backend: Arc<dyn CommerceBackend>,
        kv: Arc<dyn KeyValueStore>,
        token: AuthToken,
        settings: ClientSettings,
    ) -> ClientResult<Self> {
        let status = Arc::new(StatusNotifier::new(
            settings.success_status_ttl(),
            settings.failure_status_ttl(),
        ));
        let session =
            Arc::new(Session::restore(Arc::clone(&backend), Arc::clone(&kv), token).await?);

        let address_store = Arc::new(LocalStore::open(Arc::clone(&kv)).await);
        let favorite_store = Arc::new(LocalStore::open(Arc::clone(&kv)).await);
        let order_store = Arc::new(LocalStore::open(Arc::clone(&kv)).await);

        let catalog = Arc::new(CatalogService::new(Arc::clone(&backend), Arc::clone(&status)));
        let cart = Arc::new(CartService::new(
            Arc::clone(&backend),
            Arc::clone(&session),
            Arc::clone(&status),
            settings.settle_delay(),
        ));
        let favorites = Arc::new(FavoritesService::new(
            Arc::clone(&backend),
            Arc::clone(&session),
            favorite_store,
            Arc::clone(&status),
            settings.settle_delay(),
        ));
        let addresses = Arc::new(AddressBook::open(address_store, Arc::clone(&status)).await);
        let orders = Arc::new(
            OrderService::open(
                Arc::clone(&backend),
                Arc::clone(&session),
                order_store,
                Arc::clone(&status),
            )
            .await,
        );
        let dashboard = Arc::new(SellerDashboard::new(
            backend,
            Arc::clone(&session),
            Arc::clone(&status),
        ));

        Ok(Self {
            settings,
            status,
            session,
            catalog,
            cart,
            favorites,
            addresses,
            orders,
            dashboard,
        })
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn status(&self) -> &Arc<StatusNotifier> {
        &self.status
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn catalog(&self) -> &Arc<CatalogService> {
        &self.catalog
    }

    pub fn cart(&self) -> &Arc<CartService> {
        &self.cart
    }

    pub fn favorites(&self) -> &Arc<FavoritesService> {
        &self.favorites
    }

    pub fn addresses(&self) -> &Arc<AddressBook> {
        &self.addresses
    }

    pub fn orders(&self) -> &Arc<OrderService> {
        &self.orders
    }

    pub fn dashboard(&self) -> &Arc<SellerDashboard> {
        &self.dashboard
    }

    /// Adds one unit of `product` to the cart, then drops it from favorites.
    /// The favorite is kept if the cart add fails.
    pub async fn move_favorite_to_cart(&self, product: &Product) -> ClientResult<()> {
        let product_id = product
            .id
            .ok_or_else(|| ClientError::validation("Product has no id"))?;
        self.cart.add(product, 1)?.settled().await.into_result()?;
        self.favorites
            .remove(product_id)?
            .settled()
            .await
            .into_result()
    }

    /// Places an order for the whole cart. Without an explicit address the
    /// user's default one is used.
    pub async fn checkout(&self, address_id: Option<AddressId>) -> ClientResult<LocalOrder> {
        let user_id = self.session.require_user()?;
        let address = match address_id {
            Some(id) => self.addresses.get(id).filter(|a| a.user_id == user_id),
            None => self.addresses.default_for(user_id),
        };
        let items = self.cart.items();
        let order = self.orders.place_order(&items, address.as_ref()).await?;

        // The backend empties the cart when it accepts an order.
        if let Err(err) = self.cart.refresh().await {
            warn!(%user_id, error = %err, "client: cart refresh after checkout failed");
            self.cart.clear_local();
        }
        Ok(order)
    }

    /// Ends the session and drops per-user views. Local address and order
    /// history stay on the device.
    pub async fn logout(&self) -> ClientResult<()> {
        self.dashboard.stop_polling();
        self.session.logout().await?;
        self.cart.clear_local();
        self.favorites.cell().replace(Vec::new());
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
