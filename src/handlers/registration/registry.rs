//! User ↔ address bindings.
//!
//! The mapping is kept bijective: one address per user and one user per
//! address. Both directions are persisted so the state file stays readable.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::storage::{Persistence, StoreError, load_or_default};
use crate::utils::address::EvmAddress;

/// Chat platform user id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Older state files wrote ids as JSON strings, newer ones as numbers.
impl<'de> Deserialize<'de> for UserId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct UserIdVisitor;

        impl Visitor<'_> for UserIdVisitor {
            type Value = UserId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an integer user id or its decimal string")
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<UserId, E> {
                Ok(UserId(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<UserId, E> {
                i64::try_from(v)
                    .map(UserId)
                    .map_err(|_| E::custom(format!("user id {} out of range", v)))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<UserId, E> {
                v.trim()
                    .parse()
                    .map(UserId)
                    .map_err(|_| E::custom(format!("invalid user id '{}'", v)))
            }
        }

        deserializer.deserialize_any(UserIdVisitor)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AddressBook {
    #[serde(default)]
    pub user_addresses: BTreeMap<UserId, EvmAddress>,
    #[serde(default)]
    pub address_to_user: BTreeMap<EvmAddress, UserId>,
}

impl AddressBook {
    /// Rebuild the reverse map from the forward one.
    ///
    /// When two users claim the same address the lower user id keeps it.
    pub fn repaired(self) -> Self {
        let mut book = AddressBook::default();
        for (user, address) in self.user_addresses {
            if let Some(owner) = book.address_to_user.get(&address) {
                log::warn!(
                    "[registry] Dropping binding {} -> {}: address already bound to {}",
                    user,
                    address,
                    owner
                );
                continue;
            }
            book.address_to_user.insert(address.clone(), user);
            book.user_addresses.insert(user, address);
        }
        book
    }

    pub fn is_consistent(&self) -> bool {
        self.user_addresses.len() == self.address_to_user.len()
            && self
                .user_addresses
                .iter()
                .all(|(user, address)| self.address_to_user.get(address) == Some(user))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOutcome {
    Created,
    Rebound { previous: EvmAddress },
    Unchanged,
}

#[derive(Debug)]
pub enum RegistryError {
    AddressTaken { owner: UserId },
    Store(StoreError),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::AddressTaken { owner } => {
                write!(f, "Address is already bound to user {}", owner)
            }
            RegistryError::Store(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for RegistryError {}

impl From<StoreError> for RegistryError {
    fn from(e: StoreError) -> Self {
        RegistryError::Store(e)
    }
}

pub struct AddressRegistry {
    store: Arc<dyn Persistence<AddressBook>>,
    book: Mutex<AddressBook>,
}

impl AddressRegistry {
    pub async fn load(store: Arc<dyn Persistence<AddressBook>>) -> Self {
        let loaded: AddressBook = load_or_default(store.as_ref()).await;
        let book = if loaded.is_consistent() {
            loaded
        } else {
            log::warn!(
                "[registry] Bindings in {} are inconsistent, rebuilding reverse index",
                store.describe()
            );
            loaded.repaired()
        };
        log::info!("[registry] Loaded {} address bindings", book.user_addresses.len());

        Self {
            store,
            book: Mutex::new(book),
        }
    }

    /// Fails with `AddressTaken` when someone else owns the address.
    pub async fn check_available(
        &self,
        user: UserId,
        address: &EvmAddress,
    ) -> Result<(), RegistryError> {
        let book = self.book.lock().await;
        match book.address_to_user.get(address) {
            Some(owner) if *owner != user => Err(RegistryError::AddressTaken { owner: *owner }),
            _ => Ok(()),
        }
    }

    /// Bind `address` to `user`, replacing the user's previous address if any.
    pub async fn bind(
        &self,
        user: UserId,
        address: EvmAddress,
    ) -> Result<BindOutcome, RegistryError> {
        let mut book = self.book.lock().await;

        if let Some(owner) = book.address_to_user.get(&address) {
            if *owner != user {
                return Err(RegistryError::AddressTaken { owner: *owner });
            }
        }

        let previous = book.user_addresses.get(&user).cloned();
        if previous.as_ref() == Some(&address) {
            return Ok(BindOutcome::Unchanged);
        }

        let mut next = book.clone();
        if let Some(old) = &previous {
            next.address_to_user.remove(old);
        }
        next.user_addresses.insert(user, address.clone());
        next.address_to_user.insert(address.clone(), user);

        self.store.save(&next).await?;
        *book = next;

        match previous {
            Some(previous) => {
                log::info!("[registry] User {} rebound {} -> {}", user, previous, address);
                Ok(BindOutcome::Rebound { previous })
            }
            None => {
                log::info!("[registry] User {} bound {}", user, address);
                Ok(BindOutcome::Created)
            }
        }
    }

    pub async fn address_of(&self, user: UserId) -> Option<EvmAddress> {
        self.book.lock().await.user_addresses.get(&user).cloned()
    }

    pub async fn user_of(&self, address: &EvmAddress) -> Option<UserId> {
        self.book.lock().await.address_to_user.get(address).copied()
    }

    /// Snapshot of all bindings, ordered by user id.
    pub async fn bindings(&self) -> Vec<(UserId, EvmAddress)> {
        self.book
            .lock()
            .await
            .user_addresses
            .iter()
            .map(|(user, address)| (*user, address.clone()))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.book.lock().await.user_addresses.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    #[cfg(test)]
    pub(crate) async fn book(&self) -> AddressBook {
        self.book.lock().await.clone()
    }
}
