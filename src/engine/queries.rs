use ulid::Ulid;

use crate::model::*;

use super::calendar::{month_span, project_calendar, MonthCalendar};
use super::{Engine, EngineError};

impl Engine {
    /// All known devices, ordered by id. Refreshes the device list first.
    pub async fn list_devices(&self) -> Result<Vec<Device>, EngineError> {
        self.refresh_devices().await?;
        let states: Vec<_> = self.devices.iter().map(|e| e.value().clone()).collect();
        let mut devices = Vec::with_capacity(states.len());
        for state in states {
            devices.push(state.read().await.device());
        }
        devices.sort_by_key(|d| d.id);
        Ok(devices)
    }

    /// Freshly loaded reservations for one device, ordered by start date.
    pub async fn reservations_for_device(&self, device_id: Ulid) -> Result<Vec<Reservation>, EngineError> {
        let state = self.resolve_device(device_id).await?;
        let mut guard = state.write().await;
        self.refresh_reservations(&mut guard).await?;
        Ok(guard.reservations.clone())
    }

    /// Day-by-day occupancy for one month, recomputed from storage on every call.
    pub async fn calendar(&self, year: i32, month: u32) -> Result<MonthCalendar, EngineError> {
        if month_span(year, month).is_none() {
            return Err(EngineError::InvalidMonth { year, month });
        }
        let reservations = self.store().load_reservations_for_month(year, month).await?;
        project_calendar(year, month, &reservations)
    }
}
