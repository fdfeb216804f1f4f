use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Calendar date without time of day. The only time type in the crate.
pub type Day = NaiveDate;

/// Half-open date interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateSpan {
    pub start: Day,
    pub end: Day,
}

impl DateSpan {
    /// Build a span without checking the bounds. Admission rejects `start >= end`,
    /// so only spans that came through the engine are guaranteed to be non-empty.
    pub fn new(start: Day, end: Day) -> Self {
        Self { start, end }
    }

    pub fn is_valid(&self) -> bool {
        self.start < self.end
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    pub fn overlaps(&self, other: &DateSpan) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_day(&self, day: Day) -> bool {
        self.start <= day && day < self.end
    }

    /// Intersection of two spans, `None` if they only touch or are disjoint.
    pub fn clamp_to(&self, window: &DateSpan) -> Option<DateSpan> {
        let start = self.start.max(window.start);
        let end = self.end.min(window.end);
        (start < end).then_some(DateSpan { start, end })
    }
}

/// A shared physical device that can be reserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: Ulid,
    pub name: String,
}

/// A persisted claim on a device. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub device_id: Ulid,
    pub requester_id: Ulid,
    pub span: DateSpan,
}

/// A reservation that has passed admission but has no id yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub device_id: Ulid,
    pub requester_id: Ulid,
    pub span: DateSpan,
}

/// What the presentation layer asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookingRequest {
    pub device_id: Ulid,
    pub requester_id: Ulid,
    pub span: DateSpan,
}

impl BookingRequest {
    pub fn candidate(&self) -> Candidate {
        Candidate {
            device_id: self.device_id,
            span: self.span,
        }
    }
}

/// The part of a request that admission looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub device_id: Ulid,
    pub span: DateSpan,
}

/// The engine's cached view of one device.
#[derive(Debug, Clone)]
pub struct DeviceState {
    pub id: Ulid,
    pub name: String,
    /// Reservations sorted by `span.start`.
    pub reservations: Vec<Reservation>,
}

impl DeviceState {
    pub fn new(device: Device) -> Self {
        Self {
            id: device.id,
            name: device.name,
            reservations: Vec::new(),
        }
    }

    pub fn device(&self) -> Device {
        Device {
            id: self.id,
            name: self.name.clone(),
        }
    }

    /// Replace the cached reservations with a fresh load, keeping sort order.
    pub fn replace_reservations(&mut self, mut loaded: Vec<Reservation>) {
        loaded.sort_by_key(|r| (r.span.start, r.id));
        self.reservations = loaded;
    }

    /// Insert reservation maintaining sort order by span.start.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.span.start <= reservation.span.start);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    /// Reservations whose span overlaps the query window.
    /// Everything from the first reservation starting at or after `query.end` is skipped.
    pub fn overlapping(&self, query: &DateSpan) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.span.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.span.end > query.start)
    }
}

/// The WAL record format. Flat, one variant per state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    DeviceCreated {
        id: Ulid,
        name: String,
    },
    DeviceRenamed {
        id: Ulid,
        name: String,
    },
    ReservationConfirmed {
        id: Ulid,
        device_id: Ulid,
        requester_id: Ulid,
        span: DateSpan,
    },
    ReservationCancelled {
        id: Ulid,
        device_id: Ulid,
    },
}

#[cfg(test)]
pub(crate) fn day(y: i32, m: u32, d: u32) -> Day {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}
