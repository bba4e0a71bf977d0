use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Store-assigned identifiers. Plain integers, stable for the entity's lifetime.
pub type CustomerId = i64;
pub type DoctorId = i64;
pub type AnimalId = i64;
pub type WindowId = i64;
pub type AppointmentId = i64;
pub type VaccineId = i64;

/// Closed range of calendar dates `[start, end]`. A single day has `start == end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateSpan {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateSpan {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start <= end, "DateSpan start must not be after end");
        Self { start, end }
    }

    pub fn day(date: NaiveDate) -> Self {
        Self { start: date, end: date }
    }

    /// Number of calendar days covered, endpoints included.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        crate::engine::point_in_interval(date, self.start, self.end)
    }

    pub fn overlaps(&self, other: &DateSpan) -> bool {
        crate::engine::overlaps(self.start, self.end, other.start, other.end)
    }
}

// ── Entities ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Doctor {
    pub id: DoctorId,
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Animal {
    pub id: AnimalId,
    pub customer_id: CustomerId,
    pub name: String,
    #[serde(default)]
    pub species: Option<String>,
    #[serde(default)]
    pub breed: Option<String>,
    #[serde(default)]
    pub birth_date: Option<NaiveDate>,
}

/// A doctor's declared availability. Deleting one never touches appointments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityWindow {
    pub id: WindowId,
    pub doctor_id: DoctorId,
    pub span: DateSpan,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: AppointmentId,
    pub doctor_id: DoctorId,
    pub animal_id: AnimalId,
    pub at: NaiveDateTime,
    /// `None` models the visit as a single instant.
    #[serde(default)]
    pub duration_minutes: Option<u32>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
}

impl Appointment {
    /// Closed interval the visit occupies: `[at, at + duration]`, or `[at, at]`.
    /// `None` when the end falls past the last representable instant.
    pub fn occupied(&self) -> Option<(NaiveDateTime, NaiveDateTime)> {
        occupied(self.at, self.duration_minutes)
    }
}

pub(crate) fn occupied(
    at: NaiveDateTime,
    duration_minutes: Option<u32>,
) -> Option<(NaiveDateTime, NaiveDateTime)> {
    let end = at.checked_add_signed(Duration::minutes(i64::from(duration_minutes.unwrap_or(0))))?;
    Some((at, end))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vaccine {
    pub id: VaccineId,
    pub animal_id: AnimalId,
    pub name: String,
    #[serde(default)]
    pub code: Option<String>,
    pub applied_on: NaiveDate,
    /// Last day of protection. Re-administration is blocked up to and including it.
    pub expires_on: NaiveDate,
}

// ── Requests ─────────────────────────────────────────────────────

/// Book (or reschedule to) a visit. On reschedule, `None` in an optional
/// field keeps the appointment's current value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookAppointment {
    pub doctor_id: DoctorId,
    pub animal_id: AnimalId,
    pub at: NaiveDateTime,
    #[serde(default)]
    pub duration_minutes: Option<u32>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
}

impl BookAppointment {
    pub fn new(doctor_id: DoctorId, animal_id: AnimalId, at: NaiveDateTime) -> Self {
        Self {
            doctor_id,
            animal_id,
            at,
            duration_minutes: None,
            status: None,
            description: None,
            price: None,
        }
    }

    pub fn lasting(mut self, minutes: u32) -> Self {
        self.duration_minutes = Some(minutes);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterVaccine {
    pub animal_id: AnimalId,
    pub name: String,
    #[serde(default)]
    pub code: Option<String>,
    pub applied_on: NaiveDate,
    pub expires_on: NaiveDate,
}

// ── Drafts (store input before an id is assigned) ───────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAppointment {
    pub doctor_id: DoctorId,
    pub animal_id: AnimalId,
    pub at: NaiveDateTime,
    pub duration_minutes: Option<u32>,
    pub status: Option<String>,
    pub description: Option<String>,
    pub price: Option<f64>,
}

impl NewAppointment {
    pub fn with_id(self, id: AppointmentId) -> Appointment {
        Appointment {
            id,
            doctor_id: self.doctor_id,
            animal_id: self.animal_id,
            at: self.at,
            duration_minutes: self.duration_minutes,
            status: self.status,
            description: self.description,
            price: self.price,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewVaccine {
    pub animal_id: AnimalId,
    pub name: String,
    pub code: Option<String>,
    pub applied_on: NaiveDate,
    pub expires_on: NaiveDate,
}

impl NewVaccine {
    pub fn with_id(self, id: VaccineId) -> Vaccine {
        Vaccine {
            id,
            animal_id: self.animal_id,
            name: self.name,
            code: self.code,
            applied_on: self.applied_on,
            expires_on: self.expires_on,
        }
    }
}

// ── Change feed ──────────────────────────────────────────────────

/// A committed change. Published on the owning doctor's or animal's topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    WindowAdded { window: AvailabilityWindow },
    WindowUpdated { window: AvailabilityWindow },
    WindowRemoved { window: AvailabilityWindow },
    AppointmentBooked { appointment: Appointment },
    AppointmentRescheduled { previous: Appointment, appointment: Appointment },
    AppointmentCancelled { appointment: Appointment },
    VaccineRegistered { vaccine: Vaccine },
    VaccineUpdated { vaccine: Vaccine },
    VaccineRemoved { vaccine: Vaccine },
}

/// Which subscription channel an event is delivered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Topic {
    Doctor(DoctorId),
    Animal(AnimalId),
}
