mod calendar;
mod conflict;
mod error;
mod mutations;
mod queries;

pub use calendar::{days_in_month, month_span, project_calendar, ConsistencyWarning, DayCell, MonthCalendar};
pub use conflict::{check_availability, find_overlaps};
pub use error::{EngineError, Rejection};

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::model::*;
use crate::store::ReservationStore;

pub type SharedDeviceState = Arc<RwLock<DeviceState>>;

/// Booking repository: a per-device view over a [`ReservationStore`].
///
/// The view is a cache, never the system of record. Every admission refreshes
/// the device's reservations from the store while holding that device's write
/// lock, and keeps holding it until the new reservation is stored and folded
/// back in. Only one admission per device is in flight at a time; different
/// devices proceed in parallel.
pub struct Engine {
    store: Arc<dyn ReservationStore>,
    pub(super) devices: DashMap<Ulid, SharedDeviceState>,
}

impl Engine {
    /// Build the device view from the store. Reservations are loaded on first use.
    pub async fn open(store: Arc<dyn ReservationStore>) -> Result<Self, EngineError> {
        let engine = Self {
            store,
            devices: DashMap::new(),
        };
        engine.refresh_devices().await?;
        Ok(engine)
    }

    pub fn store(&self) -> &Arc<dyn ReservationStore> {
        &self.store
    }

    pub fn get_device(&self, id: &Ulid) -> Option<SharedDeviceState> {
        self.devices.get(id).map(|e| e.value().clone())
    }

    /// Pick up devices created or renamed through the store by someone else.
    pub(super) async fn refresh_devices(&self) -> Result<(), EngineError> {
        let devices = self.store.load_devices().await?;
        for device in devices {
            match self.get_device(&device.id) {
                Some(state) => {
                    let mut guard = state.write().await;
                    guard.name = device.name;
                }
                None => {
                    self.devices
                        .insert(device.id, Arc::new(RwLock::new(DeviceState::new(device))));
                }
            }
        }
        Ok(())
    }

    /// Look a device up in the view, refreshing the device list once on a miss.
    pub(super) async fn resolve_device(&self, id: Ulid) -> Result<SharedDeviceState, EngineError> {
        if let Some(state) = self.get_device(&id) {
            return Ok(state);
        }
        self.refresh_devices().await?;
        self.get_device(&id).ok_or(EngineError::NotFound(id))
    }

    /// Resolve a device, take its write lock, and reload its reservations.
    /// The returned guard is the critical section for read-check-write.
    pub(super) async fn lock_and_refresh(
        &self,
        device_id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<DeviceState>, EngineError> {
        let state = self.resolve_device(device_id).await?;
        let mut guard = state.write_owned().await;
        self.refresh_reservations(&mut guard).await?;
        Ok(guard)
    }

    pub(super) async fn refresh_reservations(&self, state: &mut DeviceState) -> Result<(), EngineError> {
        let loaded = self.store.load_reservations(state.id).await?;
        let overlaps = find_overlaps(&loaded);
        if !overlaps.is_empty() {
            warn!(
                "device {} has {} overlapping reservation pair(s) in storage: {overlaps:?}",
                state.id,
                overlaps.len()
            );
            metrics::counter!(crate::observability::CONSISTENCY_WARNINGS_TOTAL)
                .increment(overlaps.len() as u64);
        }
        debug!("refreshed device {}: {} reservation(s)", state.id, loaded.len());
        state.replace_reservations(loaded);
        Ok(())
    }
}
