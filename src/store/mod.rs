//! Persistent storage behind the engine's view.
//!
//! The engine only talks to storage through [`ReservationStore`]; it never
//! issues queries of its own. Two implementations ship with the crate: a
//! [`MemoryStore`] for tests and embedding, and a [`WalStore`] that keeps an
//! append-only log on disk.

mod durable;
mod memory;

pub use durable::WalStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use thiserror::Error;
use ulid::Ulid;

use crate::model::*;

#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("WAL error: {0}")]
    Wal(String),
    #[error("device does not exist: {0}")]
    MissingDevice(Ulid),
    #[error("reservation does not exist: {0}")]
    MissingReservation(Ulid),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn load_devices(&self) -> Result<Vec<Device>, StorageError>;

    /// Persist a new device and return it with its assigned id.
    async fn append_device(&self, name: String) -> Result<Device, StorageError>;

    async fn rename_device(&self, id: Ulid, name: String) -> Result<Device, StorageError>;

    /// All reservations held on one device.
    async fn load_reservations(&self, device_id: Ulid) -> Result<Vec<Reservation>, StorageError>;

    /// All reservations, on any device, that cover at least one day of the month.
    async fn load_reservations_for_month(
        &self,
        year: i32,
        month: u32,
    ) -> Result<Vec<Reservation>, StorageError>;

    /// Persist an admitted reservation and return it with its assigned id.
    /// Nothing may be assumed written unless this returns `Ok`.
    async fn append_reservation(&self, new: NewReservation) -> Result<Reservation, StorageError>;

    async fn find_reservation(&self, id: Ulid) -> Result<Option<Reservation>, StorageError>;

    /// Remove a reservation, returning what was removed.
    async fn cancel_reservation(&self, id: Ulid) -> Result<Reservation, StorageError>;
}
