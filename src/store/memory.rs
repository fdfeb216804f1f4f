use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use ulid::Ulid;

use crate::engine::month_span;
use crate::model::*;

use super::{ReservationStore, StorageError};

/// Device and reservation tables, mutated only by applying events.
/// Shared by the in-memory store and the WAL store's replayed state.
#[derive(Default)]
pub(super) struct Tables {
    devices: DashMap<Ulid, Device>,
    /// Reservations per device, sorted by `span.start`.
    reservations: DashMap<Ulid, Vec<Reservation>>,
    /// Reverse lookup: reservation id → device id.
    reservation_device: DashMap<Ulid, Ulid>,
}

impl Tables {
    pub(super) fn apply(&self, event: &Event) {
        match event {
            Event::DeviceCreated { id, name } | Event::DeviceRenamed { id, name } => {
                self.devices.insert(
                    *id,
                    Device {
                        id: *id,
                        name: name.clone(),
                    },
                );
            }
            Event::ReservationConfirmed {
                id,
                device_id,
                requester_id,
                span,
            } => {
                let reservation = Reservation {
                    id: *id,
                    device_id: *device_id,
                    requester_id: *requester_id,
                    span: *span,
                };
                let mut list = self.reservations.entry(*device_id).or_default();
                let pos = list.partition_point(|r| r.span.start <= span.start);
                list.insert(pos, reservation);
                self.reservation_device.insert(*id, *device_id);
            }
            Event::ReservationCancelled { id, device_id } => {
                if let Some(mut list) = self.reservations.get_mut(device_id) {
                    list.retain(|r| r.id != *id);
                }
                self.reservation_device.remove(id);
            }
        }
    }

    pub(super) fn device(&self, id: &Ulid) -> Option<Device> {
        self.devices.get(id).map(|e| e.value().clone())
    }

    pub(super) fn devices(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self.devices.iter().map(|e| e.value().clone()).collect();
        devices.sort_by_key(|d| d.id);
        devices
    }

    pub(super) fn reservations_for(&self, device_id: &Ulid) -> Vec<Reservation> {
        self.reservations
            .get(device_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    pub(super) fn reservations_for_month(&self, year: i32, month: u32) -> Vec<Reservation> {
        let Some(window) = month_span(year, month) else {
            return Vec::new();
        };
        let mut hits: Vec<Reservation> = self
            .reservations
            .iter()
            .flat_map(|e| {
                e.value()
                    .iter()
                    .filter(|r| r.span.overlaps(&window))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        hits.sort_by_key(|r| (r.span.start, r.id));
        hits
    }

    pub(super) fn reservation(&self, id: &Ulid) -> Option<Reservation> {
        let device_id = *self.reservation_device.get(id)?.value();
        self.reservations
            .get(&device_id)?
            .iter()
            .find(|r| r.id == *id)
            .cloned()
    }

    /// The minimal event list that recreates the current tables.
    pub(super) fn snapshot(&self) -> Vec<Event> {
        let mut events = Vec::new();
        for device in self.devices() {
            let reservations = self.reservations_for(&device.id);
            events.push(Event::DeviceCreated {
                id: device.id,
                name: device.name,
            });
            for r in reservations {
                events.push(Event::ReservationConfirmed {
                    id: r.id,
                    device_id: r.device_id,
                    requester_id: r.requester_id,
                    span: r.span,
                });
            }
        }
        events
    }

    // ── Event builders (validate against current tables) ─────

    pub(super) fn device_created(&self, name: String) -> (Event, Device) {
        let device = Device {
            id: Ulid::new(),
            name,
        };
        let event = Event::DeviceCreated {
            id: device.id,
            name: device.name.clone(),
        };
        (event, device)
    }

    pub(super) fn device_renamed(&self, id: Ulid, name: String) -> Result<Event, StorageError> {
        if !self.devices.contains_key(&id) {
            return Err(StorageError::MissingDevice(id));
        }
        Ok(Event::DeviceRenamed { id, name })
    }

    pub(super) fn reservation_confirmed(&self, new: &NewReservation) -> Result<(Event, Reservation), StorageError> {
        if !self.devices.contains_key(&new.device_id) {
            return Err(StorageError::MissingDevice(new.device_id));
        }
        let reservation = Reservation {
            id: Ulid::new(),
            device_id: new.device_id,
            requester_id: new.requester_id,
            span: new.span,
        };
        let event = Event::ReservationConfirmed {
            id: reservation.id,
            device_id: reservation.device_id,
            requester_id: reservation.requester_id,
            span: reservation.span,
        };
        Ok((event, reservation))
    }

    pub(super) fn reservation_cancelled(&self, id: Ulid) -> Result<(Event, Reservation), StorageError> {
        let reservation = self
            .reservation(&id)
            .ok_or(StorageError::MissingReservation(id))?;
        let event = Event::ReservationCancelled {
            id,
            device_id: reservation.device_id,
        };
        Ok((event, reservation))
    }
}

/// Volatile store. Writes land immediately; nothing survives the process.
///
/// `fail_appends(n)` makes the next `n` reservation appends fail with
/// `StorageError::Unavailable`, for exercising error paths.
#[derive(Default)]
pub struct MemoryStore {
    tables: Tables,
    failing_appends: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_appends(&self, n: usize) {
        self.failing_appends.store(n, Ordering::SeqCst);
    }

    /// Write a reservation as-is, without admission. For loading legacy data.
    pub fn import_reservation(&self, reservation: Reservation) -> Result<(), StorageError> {
        if self.tables.device(&reservation.device_id).is_none() {
            return Err(StorageError::MissingDevice(reservation.device_id));
        }
        self.tables.apply(&Event::ReservationConfirmed {
            id: reservation.id,
            device_id: reservation.device_id,
            requester_id: reservation.requester_id,
            span: reservation.span,
        });
        Ok(())
    }

    fn take_failure(&self) -> bool {
        self.failing_appends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ReservationStore for MemoryStore {
    async fn load_devices(&self) -> Result<Vec<Device>, StorageError> {
        Ok(self.tables.devices())
    }

    async fn append_device(&self, name: String) -> Result<Device, StorageError> {
        let (event, device) = self.tables.device_created(name);
        self.tables.apply(&event);
        Ok(device)
    }

    async fn rename_device(&self, id: Ulid, name: String) -> Result<Device, StorageError> {
        let event = self.tables.device_renamed(id, name)?;
        self.tables.apply(&event);
        self.tables.device(&id).ok_or(StorageError::MissingDevice(id))
    }

    async fn load_reservations(&self, device_id: Ulid) -> Result<Vec<Reservation>, StorageError> {
        Ok(self.tables.reservations_for(&device_id))
    }

    async fn load_reservations_for_month(
        &self,
        year: i32,
        month: u32,
    ) -> Result<Vec<Reservation>, StorageError> {
        Ok(self.tables.reservations_for_month(year, month))
    }

    async fn append_reservation(&self, new: NewReservation) -> Result<Reservation, StorageError> {
        if self.take_failure() {
            return Err(StorageError::Unavailable("injected append failure".into()));
        }
        let (event, reservation) = self.tables.reservation_confirmed(&new)?;
        self.tables.apply(&event);
        Ok(reservation)
    }

    async fn find_reservation(&self, id: Ulid) -> Result<Option<Reservation>, StorageError> {
        Ok(self.tables.reservation(&id))
    }

    async fn cancel_reservation(&self, id: Ulid) -> Result<Reservation, StorageError> {
        let (event, reservation) = self.tables.reservation_cancelled(id)?;
        self.tables.apply(&event);
        Ok(reservation)
    }
}
