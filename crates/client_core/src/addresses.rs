use std::{sync::Arc, time::Duration};

use shared::domain::{Address, AddressId, AddressPatch, NewAddress, UserId};
use tokio::sync::Mutex;
use tracing::debug;

use crate::{
    broadcast::BroadcastCell,
    error::{ClientError, ClientResult},
    local_store::LocalStore,
    optimistic::{Mutation, MutationCoordinator},
    status::StatusNotifier,
};

pub struct AddressBook {
    store: Arc<LocalStore<Address>>,
    coordinator: MutationCoordinator<Vec<Address>>,
    writes: Mutex<()>,
}

impl AddressBook {
    /// Builds the book and loads whatever the store holds.
    pub async fn open(store: Arc<LocalStore<Address>>, status: Arc<StatusNotifier>) -> Self {
        let addresses = store.load().await;
        debug!(count = addresses.len(), "addresses: loaded");
        let cell = Arc::new(BroadcastCell::new("addresses", addresses));
        Self {
            store,
            coordinator: MutationCoordinator::new("addresses", cell, status, Duration::ZERO),
            writes: Mutex::new(()),
        }
    }

    pub fn cell(&self) -> &Arc<BroadcastCell<Vec<Address>>> {
        self.coordinator.cell()
    }

    pub fn list(&self, user_id: UserId) -> Vec<Address> {
        self.coordinator
            .cell()
            .current()
            .iter()
            .filter(|address| address.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn get(&self, id: AddressId) -> Option<Address> {
        self.coordinator
            .cell()
            .current()
            .iter()
            .find(|address| address.id == id)
            .cloned()
    }

    pub fn default_for(&self, user_id: UserId) -> Option<Address> {
        self.coordinator
            .cell()
            .current()
            .iter()
            .find(|address| address.user_id == user_id && address.is_default)
            .cloned()
    }

    pub async fn create(&self, new_address: NewAddress) -> ClientResult<Address> {
        validate(&new_address)?;
        let address = new_address.into_address(AddressId(self.store.allocate_id()));
        let created = address.clone();
        self.persist(format!("create address {}", address.id), move |addresses| {
            let mut next = addresses.to_vec();
            if created.is_default {
                clear_defaults(&mut next, created.user_id);
            }
            next.push(created);
            next
        })
        .await?;
        Ok(address)
    }

    pub async fn update(&self, id: AddressId, patch: AddressPatch) -> ClientResult<Address> {
        let mut updated = self
            .get(id)
            .ok_or_else(|| ClientError::validation(format!("Address {id} not found")))?;
        patch.apply_to(&mut updated);
        let replacement = updated.clone();
        self.persist(format!("update address {id}"), move |addresses| {
            let mut next = addresses.to_vec();
            if replacement.is_default {
                clear_defaults(&mut next, replacement.user_id);
            }
            if let Some(slot) = next.iter_mut().find(|address| address.id == replacement.id) {
                *slot = replacement;
            }
            next
        })
        .await?;
        Ok(updated)
    }

    pub async fn delete(&self, id: AddressId) -> ClientResult<()> {
        if self.get(id).is_none() {
            return Err(ClientError::validation(format!("Address {id} not found")));
        }
        self.persist(format!("delete address {id}"), move |addresses| {
            addresses
                .iter()
                .filter(|address| address.id != id)
                .cloned()
                .collect()
        })
        .await
    }

    /// Makes `id` the only default address of `user_id`.
    pub async fn set_default(&self, user_id: UserId, id: AddressId) -> ClientResult<Address> {
        let target = self
            .get(id)
            .filter(|address| address.user_id == user_id)
            .ok_or_else(|| ClientError::validation(format!("Address {id} not found")))?;
        self.persist(format!("set default address {id}"), move |addresses| {
            let mut next = addresses.to_vec();
            clear_defaults(&mut next, user_id);
            if let Some(address) = next.iter_mut().find(|address| address.id == id) {
                address.is_default = true;
            }
            next
        })
        .await?;
        Ok(Address {
            is_default: true,
            ..target
        })
    }

    /// One write at a time, so a rollback to the prior snapshot never
    /// discards another caller's change.
    async fn persist(
        &self,
        label: String,
        apply: impl FnOnce(&[Address]) -> Vec<Address> + Send + 'static,
    ) -> ClientResult<()> {
        let _guard = self.writes.lock().await;
        let store = Arc::clone(&self.store);
        let mutation = Mutation::new(
            label,
            move |addresses: &Vec<Address>| apply(addresses),
            move |snapshot: Arc<Vec<Address>>| {
                let store = Arc::clone(&store);
                async move { store.save_all(&snapshot).await }
            },
        )
        .on_failure("Could not save address");
        self.coordinator.submit(mutation).settled().await.into_result()
    }
}

fn clear_defaults(addresses: &mut [Address], user_id: UserId) {
    for address in addresses.iter_mut().filter(|a| a.user_id == user_id) {
        address.is_default = false;
    }
}

fn validate(address: &NewAddress) -> ClientResult<()> {
    let required = [
        ("full name", &address.full_name),
        ("street address", &address.street_address),
        ("city", &address.city),
        ("state", &address.state),
        ("postal code", &address.postal_code),
        ("country", &address.country),
        ("phone number", &address.phone_number),
    ];
    match required.iter().find(|(_, value)| value.trim().is_empty()) {
        Some((field, _)) => Err(ClientError::validation(format!("Address {field} is required"))),
        None => Ok(()),
    }
}

#[cfg(test)]
#[path = "tests/addresses_tests.rs"]
mod tests;
