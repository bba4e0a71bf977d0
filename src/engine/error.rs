use chrono::NaiveDate;

use crate::model::{AppointmentId, DoctorId, VaccineId, WindowId};

use super::store::StoreError;

/// Kind of record a `NotFound` refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Customer,
    Doctor,
    Animal,
    Window,
    Appointment,
    Vaccine,
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Entity::Customer => "customer",
            Entity::Doctor => "doctor",
            Entity::Animal => "animal",
            Entity::Window => "availability window",
            Entity::Appointment => "appointment",
            Entity::Vaccine => "vaccine",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub enum EngineError {
    NotFound(Entity, i64),
    DoctorUnavailable {
        doctor_id: DoctorId,
        date: NaiveDate,
    },
    SlotAlreadyTaken(AppointmentId),
    OverlappingAppointment(AppointmentId),
    StillProtected {
        vaccine_id: VaccineId,
        expires_on: NaiveDate,
    },
    WindowOverlap(WindowId),
    InvalidRange(&'static str),
    LimitExceeded(&'static str),
    PersistenceFailure(StoreError),
}

impl EngineError {
    /// True for expected, user-facing validation outcomes. Persistence
    /// failures are the only non-rejection.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, EngineError::PersistenceFailure(_))
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NotFound(..) => "not_found",
            EngineError::DoctorUnavailable { .. } => "doctor_unavailable",
            EngineError::SlotAlreadyTaken(_) => "slot_already_taken",
            EngineError::OverlappingAppointment(_) => "overlapping_appointment",
            EngineError::StillProtected { .. } => "still_protected",
            EngineError::WindowOverlap(_) => "window_overlap",
            EngineError::InvalidRange(_) => "invalid_range",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::PersistenceFailure(_) => "persistence_failure",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(entity, id) => write!(f, "{entity} not found: {id}"),
            EngineError::DoctorUnavailable { doctor_id, date } => {
                write!(f, "doctor {doctor_id} is not available on {date}")
            }
            EngineError::SlotAlreadyTaken(id) => {
                write!(f, "slot already taken by appointment {id}")
            }
            EngineError::OverlappingAppointment(id) => {
                write!(f, "overlaps appointment {id}")
            }
            EngineError::StillProtected { vaccine_id, expires_on } => write!(
                f,
                "still protected by vaccine {vaccine_id} until {expires_on}; next eligible date is {}",
                expires_on.succ_opt().unwrap_or(*expires_on)
            ),
            EngineError::WindowOverlap(id) => {
                write!(f, "overlaps availability window {id}")
            }
            EngineError::InvalidRange(msg) => write!(f, "invalid range: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::PersistenceFailure(e) => write!(f, "persistence failure: {e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::PersistenceFailure(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        EngineError::PersistenceFailure(e)
    }
}
