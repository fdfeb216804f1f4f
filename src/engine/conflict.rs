use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{EngineError, Rejection};

/// Admission rule: may `candidate` be added to `existing`?
///
/// Reservations on other devices never conflict. Overlap is half-open on both
/// ends, so a reservation ending on day D and one starting on D are both legal.
/// The first conflicting reservation in input order is reported.
pub fn check_availability(candidate: &Candidate, existing: &[Reservation]) -> Result<(), Rejection> {
    if !candidate.span.is_valid() {
        return Err(Rejection::InvalidRange);
    }
    for r in existing {
        if r.device_id != candidate.device_id {
            continue;
        }
        if candidate.span.start < r.span.end && candidate.span.end > r.span.start {
            return Err(Rejection::Overlap(r.id));
        }
    }
    Ok(())
}

/// Every same-device pair in `reservations` that overlaps.
/// An empty result means the set satisfies the no-overlap invariant.
pub fn find_overlaps(reservations: &[Reservation]) -> Vec<(Ulid, Ulid)> {
    let mut sorted: Vec<&Reservation> = reservations.iter().collect();
    sorted.sort_by_key(|r| (r.device_id, r.span.start));

    let mut pairs = Vec::new();
    for (i, a) in sorted.iter().enumerate() {
        for b in &sorted[i + 1..] {
            if b.device_id != a.device_id || b.span.start >= a.span.end {
                break;
            }
            pairs.push((a.id, b.id));
        }
    }
    pairs
}

/// Limits that sit in front of admission. Range errors are left to
/// `check_availability` so the caller sees `InvalidRange` for them.
pub(crate) fn validate_span(span: &DateSpan) -> Result<(), EngineError> {
    if span.start < MIN_VALID_DATE || span.end > MAX_VALID_DATE {
        return Err(EngineError::LimitExceeded("date out of range"));
    }
    if span.days() > MAX_RESERVATION_DAYS {
        return Err(EngineError::LimitExceeded("reservation too long"));
    }
    Ok(())
}
