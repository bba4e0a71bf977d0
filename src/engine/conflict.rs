use chrono::NaiveDateTime;

use crate::model::*;

use super::EngineError;

/// Closed-interval overlap: `[a_start, a_end]` and `[b_start, b_end]` share at
/// least one point. Touching endpoints count.
pub fn overlaps<T: PartialOrd>(a_start: T, a_end: T, b_start: T, b_end: T) -> bool {
    a_start <= b_end && b_start <= a_end
}

/// `start <= instant <= end`.
pub fn point_in_interval<T: PartialOrd>(instant: T, start: T, end: T) -> bool {
    start <= instant && instant <= end
}

/// Find the first existing appointment that blocks `candidate`.
///
/// An identical instant is `SlotAlreadyTaken`. Otherwise, if either side
/// carries a duration, a shared point of the occupied intervals is
/// `OverlappingAppointment`. `exclude` is skipped so a rescheduled
/// appointment never conflicts with itself.
pub(crate) fn find_conflict(
    existing: &[Appointment],
    at: NaiveDateTime,
    duration_minutes: Option<u32>,
    exclude: Option<AppointmentId>,
) -> Result<(), EngineError> {
    let others = move || existing.iter().filter(move |a| Some(a.id) != exclude);

    if let Some(taken) = others().find(|a| a.at == at) {
        return Err(EngineError::SlotAlreadyTaken(taken.id));
    }

    let (start, end) = occupied(at, duration_minutes)
        .ok_or(EngineError::InvalidRange("appointment ends out of range"))?;
    for other in others() {
        if duration_minutes.is_none() && other.duration_minutes.is_none() {
            continue;
        }
        // A stored visit whose end overflows runs to the end of time.
        let (o_start, o_end) = other.occupied().unwrap_or((other.at, NaiveDateTime::MAX));
        if overlaps(start, end, o_start, o_end) {
            return Err(EngineError::OverlappingAppointment(other.id));
        }
    }
    Ok(())
}
