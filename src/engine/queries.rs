use chrono::{NaiveDate, NaiveDateTime};

use crate::limits::*;
use crate::model::*;

use super::availability::{availability, first_uncovered_day};
use super::{Engine, EngineError};

fn validate_query(from: NaiveDate, to: NaiveDate) -> Result<DateSpan, EngineError> {
    if from > to {
        return Err(EngineError::InvalidRange("query ends before it starts"));
    }
    let query = DateSpan::new(from, to);
    if query.days() > MAX_QUERY_WINDOW_DAYS {
        return Err(EngineError::LimitExceeded("query window too wide"));
    }
    Ok(query)
}

impl Engine {
    /// True iff one of the doctor's windows contains the instant's date.
    pub async fn is_available(&self, doctor_id: DoctorId, at: NaiveDateTime) -> Result<bool, EngineError> {
        self.require_doctor(doctor_id).await?;
        let windows = self.store().list_availability_windows(doctor_id).await?;
        Ok(first_uncovered_day(&windows, &DateSpan::day(at.date())).is_none())
    }

    /// Merged availability of a doctor, clamped to `[from, to]`.
    pub async fn available_days(
        &self,
        doctor_id: DoctorId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DateSpan>, EngineError> {
        let query = validate_query(from, to)?;
        self.require_doctor(doctor_id).await?;
        let windows = self.store().list_availability_windows(doctor_id).await?;
        Ok(availability(&windows, &query))
    }

    pub async fn appointments_for_doctor(
        &self,
        doctor_id: DoctorId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Appointment>, EngineError> {
        let query = validate_query(from, to)?;
        self.require_doctor(doctor_id).await?;
        let mut appts = self.store().find_appointments_by_doctor(doctor_id).await?;
        appts.retain(|a| query.contains(a.at.date()));
        appts.sort_by_key(|a| (a.at, a.id));
        Ok(appts)
    }

    pub async fn appointments_for_animal(
        &self,
        animal_id: AnimalId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Appointment>, EngineError> {
        let query = validate_query(from, to)?;
        self.require_animal(animal_id).await?;
        let mut appts = self.store().find_appointments_by_animal(animal_id).await?;
        appts.retain(|a| query.contains(a.at.date()));
        appts.sort_by_key(|a| (a.at, a.id));
        Ok(appts)
    }

    pub async fn vaccines_applied_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Vaccine>, EngineError> {
        let query = validate_query(from, to)?;
        let mut found = self.store().list_vaccines().await?;
        found.retain(|v| query.contains(v.applied_on));
        found.sort_by_key(|v| (v.applied_on, v.id));
        Ok(found)
    }

    /// One animal's vaccination history, optionally limited to doses applied
    /// in `[from, to]`. Either bound may be open.
    pub async fn vaccines_for_animal(
        &self,
        animal_id: AnimalId,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<Vaccine>, EngineError> {
        if let (Some(from), Some(to)) = (from, to)
            && from > to
        {
            return Err(EngineError::InvalidRange("query ends before it starts"));
        }
        self.require_animal(animal_id).await?;
        let mut history = self.store().find_vaccines_by_animal(animal_id).await?;
        history.retain(|v| {
            from.is_none_or(|from| v.applied_on >= from) && to.is_none_or(|to| v.applied_on <= to)
        });
        history.sort_by_key(|v| (v.applied_on, v.id));
        Ok(history)
    }

    /// Vaccines whose protection ends inside `[from, to]`: the reminder list.
    pub async fn vaccines_expiring_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Vaccine>, EngineError> {
        let query = validate_query(from, to)?;
        let mut found = self.store().list_vaccines().await?;
        found.retain(|v| query.contains(v.expires_on));
        found.sort_by_key(|v| (v.expires_on, v.id));
        Ok(found)
    }

    /// First day a new dose of `name` would be accepted, or `None` if the
    /// animal never had one.
    pub async fn next_eligible_date(
        &self,
        animal_id: AnimalId,
        name: &str,
    ) -> Result<Option<NaiveDate>, EngineError> {
        self.require_animal(animal_id).await?;
        let history = self
            .store()
            .find_vaccines_by_animal_and_name(animal_id, name.trim())
            .await?;
        Ok(history
            .iter()
            .map(|v| v.expires_on)
            .max()
            .and_then(|last| last.succ_opt()))
    }
}
