//! Persistence abstraction for the address registry and eligibility records.
//!
//! Owners keep their table in memory and hand whole snapshots to a
//! [`Persistence`] implementation. Swapping the JSON files for a database
//! only means adding another implementation.

pub mod json_file;
pub mod memory;

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Corrupt(String),
    Serialize(serde_json::Error),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "Storage I/O error: {}", e),
            StoreError::Corrupt(msg) => write!(f, "Stored state is corrupt: {}", msg),
            StoreError::Serialize(e) => write!(f, "Failed to serialize state: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e)
    }
}

/// Whole-snapshot storage for one table.
#[async_trait]
pub trait Persistence<T>: Send + Sync {
    /// Human-readable location, for log lines.
    fn describe(&self) -> String;

    /// Returns `Ok(None)` when nothing has been stored yet.
    async fn load(&self) -> Result<Option<T>, StoreError>;

    /// Replaces the stored snapshot. Must never leave a partial write behind.
    async fn save(&self, value: &T) -> Result<(), StoreError>;
}

/// Load a snapshot, falling back to the default on a missing or unreadable store.
///
/// The state is rebuilt over later cycles, so a corrupt file must not stop the process.
pub async fn load_or_default<T, P>(store: &P) -> T
where
    T: Default,
    P: Persistence<T> + ?Sized,
{
    match store.load().await {
        Ok(Some(value)) => value,
        Ok(None) => {
            log::info!("No stored state at {}, starting empty", store.describe());
            T::default()
        }
        Err(e) => {
            log::error!(
                "Failed to load state from {}: {}. Starting empty",
                store.describe(),
                e
            );
            T::default()
        }
    }
}
