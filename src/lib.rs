//! Device booking: admission of date-range reservations on shared devices,
//! and projection of those reservations onto a monthly calendar.
//!
//! [`engine::Engine`] is the entry point. It keeps a per-device view over a
//! [`store::ReservationStore`], refreshes it before every admission, and holds
//! a per-device lock across read-check-write so two overlapping requests for
//! the same device can never both be admitted.

pub mod access;
pub mod compactor;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod store;
pub mod wal;
