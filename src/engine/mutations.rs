use std::time::Instant;

use tracing::info;

use crate::limits::*;
use crate::model::*;
use crate::observability::COMMIT_CONFLICTS_TOTAL;

use super::availability::first_uncovered_day;
use super::conflict::find_conflict;
use super::store::{APPOINTMENT_SLOT_CONSTRAINT, StoreError};
use super::{record_decision, Engine, EngineError, Entity};

fn validate_booking(req: &BookAppointment) -> Result<(), EngineError> {
    if let Some(minutes) = req.duration_minutes {
        if minutes == 0 {
            return Err(EngineError::InvalidRange("duration must be positive"));
        }
        if minutes > MAX_APPOINTMENT_MINUTES {
            return Err(EngineError::LimitExceeded("appointment too long"));
        }
    }
    if occupied(req.at, req.duration_minutes).is_none() {
        return Err(EngineError::InvalidRange("appointment ends out of range"));
    }
    for text in [&req.status, &req.description].into_iter().flatten() {
        if text.len() > MAX_TEXT_LEN {
            return Err(EngineError::LimitExceeded("text field too long"));
        }
    }
    if let Some(price) = req.price
        && !(price.is_finite() && price >= 0.0) {
            return Err(EngineError::InvalidRange("price must be a non-negative amount"));
        }
    Ok(())
}

fn validate_window(span: &DateSpan) -> Result<(), EngineError> {
    if span.start > span.end {
        return Err(EngineError::InvalidRange("window ends before it starts"));
    }
    if span.days() > MAX_WINDOW_DAYS {
        return Err(EngineError::LimitExceeded("window too wide"));
    }
    Ok(())
}

/// Check a vaccine request and return it with its name trimmed. The trimmed
/// name is what gets locked, looked up and stored.
fn validate_vaccine(mut req: RegisterVaccine) -> Result<RegisterVaccine, EngineError> {
    let name = req.name.trim();
    if name.is_empty() || name.len() > MAX_VACCINE_NAME_LEN {
        return Err(EngineError::LimitExceeded("vaccine name must be 1-128 bytes"));
    }
    if name.len() != req.name.len() {
        req.name = name.to_string();
    }
    if req.expires_on < req.applied_on {
        return Err(EngineError::InvalidRange("vaccine expires before it is applied"));
    }
    Ok(req)
}

/// A slot-constraint violation at commit means another writer won the race.
fn commit_error(e: StoreError) -> EngineError {
    match e {
        StoreError::UniqueViolation { constraint, existing_id }
            if constraint == APPOINTMENT_SLOT_CONSTRAINT =>
        {
            metrics::counter!(COMMIT_CONFLICTS_TOTAL).increment(1);
            EngineError::SlotAlreadyTaken(existing_id)
        }
        other => EngineError::PersistenceFailure(other),
    }
}

impl Engine {
    // ── Appointments ─────────────────────────────────────

    /// Ordered booking checks. Caller holds the doctor's lock.
    ///
    /// 1. doctor exists  2. animal exists  3. doctor available on every
    /// occupied date  4. no appointment at the exact instant  5. no
    /// duration overlap. `exclude` is the appointment being rescheduled.
    async fn check_booking(
        &self,
        req: &BookAppointment,
        exclude: Option<AppointmentId>,
    ) -> Result<(), EngineError> {
        self.require_doctor(req.doctor_id).await?;
        self.require_animal(req.animal_id).await?;

        let (start, end) = occupied(req.at, req.duration_minutes)
            .ok_or(EngineError::InvalidRange("appointment ends out of range"))?;
        let days = DateSpan::new(start.date(), end.date());
        let windows = self.store().list_availability_windows(req.doctor_id).await?;
        if let Some(date) = first_uncovered_day(&windows, &days) {
            return Err(EngineError::DoctorUnavailable {
                doctor_id: req.doctor_id,
                date,
            });
        }

        if let Some(taken) = self.store().find_appointment(req.doctor_id, req.at).await?
            && Some(taken.id) != exclude {
                return Err(EngineError::SlotAlreadyTaken(taken.id));
            }

        let existing = self.store().find_appointments_by_doctor(req.doctor_id).await?;
        find_conflict(&existing, req.at, req.duration_minutes, exclude)
    }

    pub async fn validate_and_book(&self, req: BookAppointment) -> Result<Appointment, EngineError> {
        let started = Instant::now();
        let result = self.book(req).await;
        record_decision("book_appointment", started, &result);
        result
    }

    async fn book(&self, req: BookAppointment) -> Result<Appointment, EngineError> {
        validate_booking(&req)?;
        let _lock = self.doctor_locks.lock(req.doctor_id).await;
        self.check_booking(&req, None).await?;

        let appt = self
            .store()
            .insert_appointment(NewAppointment {
                doctor_id: req.doctor_id,
                animal_id: req.animal_id,
                at: req.at,
                duration_minutes: req.duration_minutes,
                status: req.status,
                description: req.description,
                price: req.price,
            })
            .await
            .map_err(commit_error)?;

        info!("booked appointment {} for doctor {} at {}", appt.id, appt.doctor_id, appt.at);
        self.publish(
            &[Topic::Doctor(appt.doctor_id), Topic::Animal(appt.animal_id)],
            Event::AppointmentBooked { appointment: appt.clone() },
        );
        Ok(appt)
    }

    /// Move an appointment through the same checks as a new booking. The
    /// appointment never conflicts with itself.
    pub async fn validate_and_reschedule(
        &self,
        id: AppointmentId,
        req: BookAppointment,
    ) -> Result<Appointment, EngineError> {
        let started = Instant::now();
        let result = self.reschedule(id, req).await;
        record_decision("reschedule_appointment", started, &result);
        result
    }

    async fn reschedule(&self, id: AppointmentId, req: BookAppointment) -> Result<Appointment, EngineError> {
        validate_booking(&req)?;
        let current = self
            .store()
            .get_appointment(id)
            .await?
            .ok_or(EngineError::NotFound(Entity::Appointment, id))?;
        let _locks = self.doctor_locks.lock_both(current.doctor_id, req.doctor_id).await;
        // Re-read under the locks; a concurrent cancel may have won.
        let previous = self
            .store()
            .get_appointment(id)
            .await?
            .ok_or(EngineError::NotFound(Entity::Appointment, id))?;

        let req = BookAppointment {
            doctor_id: req.doctor_id,
            animal_id: req.animal_id,
            at: req.at,
            duration_minutes: req.duration_minutes.or(previous.duration_minutes),
            status: req.status.or_else(|| previous.status.clone()),
            description: req.description.or_else(|| previous.description.clone()),
            price: req.price.or(previous.price),
        };
        self.check_booking(&req, Some(id)).await?;

        let appt = self
            .store()
            .update_appointment(Appointment {
                id,
                doctor_id: req.doctor_id,
                animal_id: req.animal_id,
                at: req.at,
                duration_minutes: req.duration_minutes,
                status: req.status,
                description: req.description,
                price: req.price,
            })
            .await
            .map_err(commit_error)?;

        info!("rescheduled appointment {id} from {} to {}", previous.at, appt.at);
        let mut topics = vec![Topic::Doctor(appt.doctor_id), Topic::Animal(appt.animal_id)];
        if previous.doctor_id != appt.doctor_id {
            topics.push(Topic::Doctor(previous.doctor_id));
        }
        if previous.animal_id != appt.animal_id {
            topics.push(Topic::Animal(previous.animal_id));
        }
        self.publish(
            &topics,
            Event::AppointmentRescheduled { previous, appointment: appt.clone() },
        );
        Ok(appt)
    }

    /// Delete an appointment. No invariant needs re-checking, but the doctor's
    /// lock keeps the delete out of a reschedule in flight.
    pub async fn cancel_appointment(&self, id: AppointmentId) -> Result<Appointment, EngineError> {
        let current = self
            .store()
            .get_appointment(id)
            .await?
            .ok_or(EngineError::NotFound(Entity::Appointment, id))?;
        let _lock = self.doctor_locks.lock(current.doctor_id).await;
        let appt = self
            .store()
            .delete_appointment(id)
            .await?
            .ok_or(EngineError::NotFound(Entity::Appointment, id))?;
        info!("cancelled appointment {id}");
        self.publish(
            &[Topic::Doctor(appt.doctor_id), Topic::Animal(appt.animal_id)],
            Event::AppointmentCancelled { appointment: appt.clone() },
        );
        Ok(appt)
    }

    // ── Availability windows ─────────────────────────────

    /// Declare a new availability window. Windows of one doctor never overlap.
    pub async fn add_availability_window(
        &self,
        doctor_id: DoctorId,
        span: DateSpan,
    ) -> Result<AvailabilityWindow, EngineError> {
        let started = Instant::now();
        let result = self.add_window(doctor_id, span).await;
        record_decision("add_availability", started, &result);
        result
    }

    async fn add_window(&self, doctor_id: DoctorId, span: DateSpan) -> Result<AvailabilityWindow, EngineError> {
        validate_window(&span)?;
        let _lock = self.doctor_locks.lock(doctor_id).await;
        self.require_doctor(doctor_id).await?;

        let windows = self.store().list_availability_windows(doctor_id).await?;
        if windows.len() >= MAX_WINDOWS_PER_DOCTOR {
            return Err(EngineError::LimitExceeded("too many availability windows"));
        }
        if let Some(clash) = windows.iter().find(|w| w.span.overlaps(&span)) {
            return Err(EngineError::WindowOverlap(clash.id));
        }

        let window = self.store().insert_availability_window(doctor_id, span).await?;
        info!("doctor {doctor_id} available {} to {}", span.start, span.end);
        self.publish(&[Topic::Doctor(doctor_id)], Event::WindowAdded { window });
        Ok(window)
    }

    pub async fn update_availability_window(
        &self,
        id: WindowId,
        span: DateSpan,
    ) -> Result<AvailabilityWindow, EngineError> {
        let started = Instant::now();
        let result = self.update_window(id, span).await;
        record_decision("update_availability", started, &result);
        result
    }

    async fn update_window(&self, id: WindowId, span: DateSpan) -> Result<AvailabilityWindow, EngineError> {
        validate_window(&span)?;
        let current = self
            .store()
            .get_availability_window(id)
            .await?
            .ok_or(EngineError::NotFound(Entity::Window, id))?;
        let _lock = self.doctor_locks.lock(current.doctor_id).await;

        let windows = self.store().list_availability_windows(current.doctor_id).await?;
        if !windows.iter().any(|w| w.id == id) {
            return Err(EngineError::NotFound(Entity::Window, id));
        }
        if let Some(clash) = windows.iter().find(|w| w.id != id && w.span.overlaps(&span)) {
            return Err(EngineError::WindowOverlap(clash.id));
        }

        let window = self
            .store()
            .update_availability_window(AvailabilityWindow { span, ..current })
            .await?;
        info!("window {id} of doctor {} now {} to {}", window.doctor_id, span.start, span.end);
        self.publish(&[Topic::Doctor(window.doctor_id)], Event::WindowUpdated { window });
        Ok(window)
    }

    /// Remove a window. Appointments already booked against it stay.
    pub async fn remove_availability_window(&self, id: WindowId) -> Result<AvailabilityWindow, EngineError> {
        let current = self
            .store()
            .get_availability_window(id)
            .await?
            .ok_or(EngineError::NotFound(Entity::Window, id))?;
        let _lock = self.doctor_locks.lock(current.doctor_id).await;
        let window = self
            .store()
            .delete_availability_window(id)
            .await?
            .ok_or(EngineError::NotFound(Entity::Window, id))?;
        info!("removed window {id} of doctor {}", window.doctor_id);
        self.publish(&[Topic::Doctor(window.doctor_id)], Event::WindowRemoved { window });
        Ok(window)
    }

    // ── Vaccines ─────────────────────────────────────────

    /// Reject when a same-named record for the animal is still protective
    /// on `applied_on`. Reports the latest blocking expiration.
    async fn check_protection(
        &self,
        req: &RegisterVaccine,
        exclude: Option<VaccineId>,
    ) -> Result<(), EngineError> {
        self.require_animal(req.animal_id).await?;
        let history = self
            .store()
            .find_vaccines_by_animal_and_name(req.animal_id, &req.name)
            .await?;
        let blocking = history
            .iter()
            .filter(|v| Some(v.id) != exclude && v.expires_on >= req.applied_on)
            .max_by_key(|v| (v.expires_on, v.id));
        match blocking {
            Some(v) => Err(EngineError::StillProtected {
                vaccine_id: v.id,
                expires_on: v.expires_on,
            }),
            None => Ok(()),
        }
    }

    pub async fn validate_and_register(&self, req: RegisterVaccine) -> Result<Vaccine, EngineError> {
        let started = Instant::now();
        let result = self.register_vaccine(req).await;
        record_decision("register_vaccine", started, &result);
        result
    }

    async fn register_vaccine(&self, req: RegisterVaccine) -> Result<Vaccine, EngineError> {
        let req = validate_vaccine(req)?;
        let _lock = self.vaccine_locks.lock((req.animal_id, req.name.clone())).await;
        self.check_protection(&req, None).await?;

        let vaccine = self
            .store()
            .insert_vaccine(NewVaccine {
                animal_id: req.animal_id,
                name: req.name,
                code: req.code,
                applied_on: req.applied_on,
                expires_on: req.expires_on,
            })
            .await?;

        info!(
            "registered {} for animal {} until {}",
            vaccine.name, vaccine.animal_id, vaccine.expires_on
        );
        self.publish(
            &[Topic::Animal(vaccine.animal_id)],
            Event::VaccineRegistered { vaccine: vaccine.clone() },
        );
        Ok(vaccine)
    }

    /// Edit a vaccine record. The edited record passes the same guard, with
    /// itself excluded.
    pub async fn validate_and_update_vaccine(
        &self,
        id: VaccineId,
        req: RegisterVaccine,
    ) -> Result<Vaccine, EngineError> {
        let started = Instant::now();
        let result = self.update_vaccine(id, req).await;
        record_decision("update_vaccine", started, &result);
        result
    }

    async fn update_vaccine(&self, id: VaccineId, req: RegisterVaccine) -> Result<Vaccine, EngineError> {
        let req = validate_vaccine(req)?;
        let current = self
            .store()
            .get_vaccine(id)
            .await?
            .ok_or(EngineError::NotFound(Entity::Vaccine, id))?;
        // A rename or move touches both the old and the new (animal, name) key.
        let _locks = self
            .vaccine_locks
            .lock_both((current.animal_id, current.name), (req.animal_id, req.name.clone()))
            .await;
        if self.store().get_vaccine(id).await?.is_none() {
            return Err(EngineError::NotFound(Entity::Vaccine, id));
        }
        self.check_protection(&req, Some(id)).await?;

        let vaccine = self
            .store()
            .update_vaccine(Vaccine {
                id,
                animal_id: req.animal_id,
                name: req.name,
                code: req.code,
                applied_on: req.applied_on,
                expires_on: req.expires_on,
            })
            .await?;
        info!("updated vaccine {id} for animal {}", vaccine.animal_id);
        self.publish(
            &[Topic::Animal(vaccine.animal_id)],
            Event::VaccineUpdated { vaccine: vaccine.clone() },
        );
        Ok(vaccine)
    }

    pub async fn remove_vaccine(&self, id: VaccineId) -> Result<Vaccine, EngineError> {
        let current = self
            .store()
            .get_vaccine(id)
            .await?
            .ok_or(EngineError::NotFound(Entity::Vaccine, id))?;
        let _lock = self.vaccine_locks.lock((current.animal_id, current.name)).await;
        let vaccine = self
            .store()
            .delete_vaccine(id)
            .await?
            .ok_or(EngineError::NotFound(Entity::Vaccine, id))?;
        info!("removed vaccine {id} from animal {}", vaccine.animal_id);
        self.publish(
            &[Topic::Animal(vaccine.animal_id)],
            Event::VaccineRemoved { vaccine: vaccine.clone() },
        );
        Ok(vaccine)
    }
}
