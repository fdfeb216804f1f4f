use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_availability, validate_span};
use super::{Engine, EngineError, Rejection};

fn validate_name(name: &str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::LimitExceeded("device name empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("device name too long"));
    }
    Ok(())
}

impl Engine {
    pub async fn create_device(&self, name: String) -> Result<Device, EngineError> {
        validate_name(&name)?;
        if self.devices.len() >= MAX_DEVICES {
            return Err(EngineError::LimitExceeded("too many devices"));
        }
        let device = self.store().append_device(name).await?;
        self.devices.insert(
            device.id,
            Arc::new(RwLock::new(DeviceState::new(device.clone()))),
        );
        info!("created device {} ({})", device.id, device.name);
        Ok(device)
    }

    /// Create several devices from already-parsed names. Every name is
    /// validated before anything is written; a storage failure part-way
    /// leaves the devices created so far in place.
    pub async fn import_devices(&self, names: Vec<String>) -> Result<Vec<Device>, EngineError> {
        if names.len() > MAX_IMPORT_BATCH {
            return Err(EngineError::LimitExceeded("import batch too large"));
        }
        for name in &names {
            validate_name(name)?;
        }
        if self.devices.len() + names.len() > MAX_DEVICES {
            return Err(EngineError::LimitExceeded("too many devices"));
        }
        let mut created = Vec::with_capacity(names.len());
        for name in names {
            created.push(self.create_device(name).await?);
        }
        Ok(created)
    }

    pub async fn rename_device(&self, id: Ulid, name: String) -> Result<Device, EngineError> {
        validate_name(&name)?;
        let state = self.resolve_device(id).await?;
        let mut guard = state.write().await;
        let device = self.store().rename_device(id, name).await?;
        guard.name = device.name.clone();
        Ok(device)
    }

    /// Admit and persist a reservation.
    ///
    /// Runs refresh → check → append → fold under the device's write lock.
    /// The view only changes once the store has confirmed the write.
    pub async fn book(&self, request: BookingRequest) -> Result<Reservation, EngineError> {
        let started = Instant::now();
        let result = self.book_locked(request).await;
        metrics::histogram!(crate::observability::ADMISSION_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());

        match &result {
            Ok(r) => {
                metrics::counter!(crate::observability::BOOKINGS_ADMITTED_TOTAL).increment(1);
                info!(
                    "booked device {} [{}, {}) as {}",
                    r.device_id, r.span.start, r.span.end, r.id
                );
            }
            Err(EngineError::Rejected(rejection)) => {
                metrics::counter!(
                    crate::observability::BOOKINGS_REJECTED_TOTAL,
                    "reason" => rejection.label()
                )
                .increment(1);
                debug!("rejected booking on device {}: {rejection}", request.device_id);
            }
            Err(EngineError::Storage(e)) => {
                metrics::counter!(crate::observability::STORAGE_ERRORS_TOTAL).increment(1);
                tracing::error!("booking on device {} failed in storage: {e}", request.device_id);
            }
            Err(_) => {}
        }
        result
    }

    async fn book_locked(&self, request: BookingRequest) -> Result<Reservation, EngineError> {
        let candidate = request.candidate();
        if !candidate.span.is_valid() {
            return Err(Rejection::InvalidRange.into());
        }
        validate_span(&candidate.span)?;

        let mut guard = self.lock_and_refresh(request.device_id).await?;
        check_availability(&candidate, &guard.reservations)?;
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_DEVICE {
            return Err(EngineError::LimitExceeded("too many reservations on device"));
        }

        let reservation = self
            .store()
            .append_reservation(NewReservation {
                device_id: request.device_id,
                requester_id: request.requester_id,
                span: request.span,
            })
            .await?;
        guard.insert_reservation(reservation.clone());
        Ok(reservation)
    }

    /// Cancel a reservation. Changes to a booking are a cancel followed by a new `book`.
    pub async fn cancel(&self, reservation_id: Ulid) -> Result<Reservation, EngineError> {
        let found = self
            .store()
            .find_reservation(reservation_id)
            .await?
            .ok_or(EngineError::NotFound(reservation_id))?;

        let mut guard = self.lock_and_refresh(found.device_id).await?;
        if !guard.reservations.iter().any(|r| r.id == reservation_id) {
            // Cancelled by someone else between lookup and lock.
            return Err(EngineError::NotFound(reservation_id));
        }
        let cancelled = self.store().cancel_reservation(reservation_id).await?;
        guard.remove_reservation(reservation_id);
        info!("cancelled reservation {reservation_id} on device {}", cancelled.device_id);
        Ok(cancelled)
    }
}
