use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::NaiveDateTime;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Deserialize;

use crate::model::*;

/// Errors raised by a record store. Never a validation outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write. `existing_id` holds the row.
    UniqueViolation {
        constraint: &'static str,
        existing_id: i64,
    },
    /// The row an update targeted no longer exists.
    Missing(i64),
    Unavailable(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::UniqueViolation { constraint, existing_id } => {
                write!(f, "unique constraint {constraint} violated by row {existing_id}")
            }
            StoreError::Missing(id) => write!(f, "row {id} no longer exists"),
            StoreError::Unavailable(msg) => write!(f, "store unavailable: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Unique index on appointments: one row per `(doctor_id, at)`.
pub const APPOINTMENT_SLOT_CONSTRAINT: &str = "appointment_doctor_at";

/// Record store the engine reads from and commits to. Implementations must
/// enforce `APPOINTMENT_SLOT_CONSTRAINT` on insert and update.
#[async_trait]
pub trait ClinicStore: Send + Sync {
    // ── Directory ────────────────────────────────────────────
    async fn get_customer(&self, id: CustomerId) -> Result<Option<Customer>, StoreError>;
    async fn get_doctor(&self, id: DoctorId) -> Result<Option<Doctor>, StoreError>;
    async fn get_animal(&self, id: AnimalId) -> Result<Option<Animal>, StoreError>;

    // ── Availability ─────────────────────────────────────────
    async fn list_availability_windows(
        &self,
        doctor_id: DoctorId,
    ) -> Result<Vec<AvailabilityWindow>, StoreError>;
    async fn get_availability_window(
        &self,
        id: WindowId,
    ) -> Result<Option<AvailabilityWindow>, StoreError>;
    async fn insert_availability_window(
        &self,
        doctor_id: DoctorId,
        span: DateSpan,
    ) -> Result<AvailabilityWindow, StoreError>;
    async fn update_availability_window(
        &self,
        window: AvailabilityWindow,
    ) -> Result<AvailabilityWindow, StoreError>;
    async fn delete_availability_window(
        &self,
        id: WindowId,
    ) -> Result<Option<AvailabilityWindow>, StoreError>;

    // ── Appointments ─────────────────────────────────────────
    async fn get_appointment(&self, id: AppointmentId) -> Result<Option<Appointment>, StoreError>;
    async fn find_appointment(
        &self,
        doctor_id: DoctorId,
        at: NaiveDateTime,
    ) -> Result<Option<Appointment>, StoreError>;
    async fn find_appointments_by_doctor(
        &self,
        doctor_id: DoctorId,
    ) -> Result<Vec<Appointment>, StoreError>;
    async fn find_appointments_by_animal(
        &self,
        animal_id: AnimalId,
    ) -> Result<Vec<Appointment>, StoreError>;
    async fn insert_appointment(&self, appt: NewAppointment) -> Result<Appointment, StoreError>;
    async fn update_appointment(&self, appt: Appointment) -> Result<Appointment, StoreError>;
    async fn delete_appointment(&self, id: AppointmentId) -> Result<Option<Appointment>, StoreError>;

    // ── Vaccines ─────────────────────────────────────────────
    async fn get_vaccine(&self, id: VaccineId) -> Result<Option<Vaccine>, StoreError>;
    async fn find_vaccines_by_animal_and_name(
        &self,
        animal_id: AnimalId,
        name: &str,
    ) -> Result<Vec<Vaccine>, StoreError>;
    async fn find_vaccines_by_animal(&self, animal_id: AnimalId) -> Result<Vec<Vaccine>, StoreError>;
    async fn list_vaccines(&self) -> Result<Vec<Vaccine>, StoreError>;
    async fn insert_vaccine(&self, vaccine: NewVaccine) -> Result<Vaccine, StoreError>;
    async fn update_vaccine(&self, vaccine: Vaccine) -> Result<Vaccine, StoreError>;
    async fn delete_vaccine(&self, id: VaccineId) -> Result<Option<Vaccine>, StoreError>;
}

/// Seed data for an `InMemoryStore`, usually loaded from JSON.
#[derive(Debug, Default, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub customers: Vec<Customer>,
    #[serde(default)]
    pub doctors: Vec<Doctor>,
    #[serde(default)]
    pub animals: Vec<Animal>,
    #[serde(default)]
    pub availability: Vec<AvailabilityWindow>,
    #[serde(default)]
    pub appointments: Vec<Appointment>,
    #[serde(default)]
    pub vaccines: Vec<Vaccine>,
}

/// Reference store. Every table is a `DashMap`; ids come from one sequence.
pub struct InMemoryStore {
    next_id: AtomicI64,
    customers: DashMap<CustomerId, Customer>,
    doctors: DashMap<DoctorId, Doctor>,
    animals: DashMap<AnimalId, Animal>,
    windows: DashMap<WindowId, AvailabilityWindow>,
    appointments: DashMap<AppointmentId, Appointment>,
    /// `(doctor_id, at)` → appointment id. Backs `APPOINTMENT_SLOT_CONSTRAINT`.
    slots: DashMap<(DoctorId, NaiveDateTime), AppointmentId>,
    vaccines: DashMap<VaccineId, Vaccine>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            customers: DashMap::new(),
            doctors: DashMap::new(),
            animals: DashMap::new(),
            windows: DashMap::new(),
            appointments: DashMap::new(),
            slots: DashMap::new(),
            vaccines: DashMap::new(),
        }
    }

    pub fn from_fixture(fixture: Fixture) -> Result<Self, StoreError> {
        let store = Self::new();
        let mut max_id = 0;
        for c in fixture.customers {
            max_id = max_id.max(c.id);
            store.customers.insert(c.id, c);
        }
        for d in fixture.doctors {
            max_id = max_id.max(d.id);
            store.doctors.insert(d.id, d);
        }
        for a in fixture.animals {
            max_id = max_id.max(a.id);
            store.animals.insert(a.id, a);
        }
        for w in fixture.availability {
            max_id = max_id.max(w.id);
            store.windows.insert(w.id, w);
        }
        for appt in fixture.appointments {
            max_id = max_id.max(appt.id);
            match store.slots.entry((appt.doctor_id, appt.at)) {
                Entry::Occupied(e) => {
                    return Err(StoreError::UniqueViolation {
                        constraint: APPOINTMENT_SLOT_CONSTRAINT,
                        existing_id: *e.get(),
                    });
                }
                Entry::Vacant(e) => {
                    e.insert(appt.id);
                }
            }
            store.appointments.insert(appt.id, appt);
        }
        for v in fixture.vaccines {
            max_id = max_id.max(v.id);
            store.vaccines.insert(v.id, v);
        }
        store.next_id.store(max_id + 1, Ordering::SeqCst);
        Ok(store)
    }

    fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    // ── Directory seeding ────────────────────────────────────

    pub fn add_customer(&self, name: &str) -> Customer {
        let customer = Customer {
            id: self.allocate_id(),
            name: name.to_string(),
            phone: None,
            email: None,
        };
        self.customers.insert(customer.id, customer.clone());
        customer
    }

    pub fn add_doctor(&self, name: &str) -> Doctor {
        let doctor = Doctor {
            id: self.allocate_id(),
            name: name.to_string(),
            phone: None,
            email: None,
        };
        self.doctors.insert(doctor.id, doctor.clone());
        doctor
    }

    pub fn add_animal(&self, customer_id: CustomerId, name: &str) -> Animal {
        let animal = Animal {
            id: self.allocate_id(),
            customer_id,
            name: name.to_string(),
            species: None,
            breed: None,
            birth_date: None,
        };
        self.animals.insert(animal.id, animal.clone());
        animal
    }

    pub fn appointment_count(&self) -> usize {
        self.appointments.len()
    }

    pub fn vaccine_count(&self) -> usize {
        self.vaccines.len()
    }

    /// Claim `(doctor_id, at)` for `id`. The shard lock is released before returning.
    fn claim_slot(&self, doctor_id: DoctorId, at: NaiveDateTime, id: AppointmentId) -> Result<(), StoreError> {
        match self.slots.entry((doctor_id, at)) {
            Entry::Occupied(e) if *e.get() != id => Err(StoreError::UniqueViolation {
                constraint: APPOINTMENT_SLOT_CONSTRAINT,
                existing_id: *e.get(),
            }),
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(e) => {
                e.insert(id);
                Ok(())
            }
        }
    }

    fn release_slot(&self, doctor_id: DoctorId, at: NaiveDateTime, id: AppointmentId) {
        self.slots.remove_if(&(doctor_id, at), |_, owner| *owner == id);
    }
}

#[async_trait]
impl ClinicStore for InMemoryStore {
    async fn get_customer(&self, id: CustomerId) -> Result<Option<Customer>, StoreError> {
        Ok(self.customers.get(&id).map(|e| e.value().clone()))
    }

    async fn get_doctor(&self, id: DoctorId) -> Result<Option<Doctor>, StoreError> {
        Ok(self.doctors.get(&id).map(|e| e.value().clone()))
    }

    async fn get_animal(&self, id: AnimalId) -> Result<Option<Animal>, StoreError> {
        Ok(self.animals.get(&id).map(|e| e.value().clone()))
    }

    async fn list_availability_windows(
        &self,
        doctor_id: DoctorId,
    ) -> Result<Vec<AvailabilityWindow>, StoreError> {
        let mut windows: Vec<AvailabilityWindow> = self
            .windows
            .iter()
            .filter(|e| e.value().doctor_id == doctor_id)
            .map(|e| *e.value())
            .collect();
        windows.sort_by_key(|w| (w.span.start, w.id));
        Ok(windows)
    }

    async fn get_availability_window(
        &self,
        id: WindowId,
    ) -> Result<Option<AvailabilityWindow>, StoreError> {
        Ok(self.windows.get(&id).map(|e| *e.value()))
    }

    async fn insert_availability_window(
        &self,
        doctor_id: DoctorId,
        span: DateSpan,
    ) -> Result<AvailabilityWindow, StoreError> {
        let window = AvailabilityWindow {
            id: self.allocate_id(),
            doctor_id,
            span,
        };
        self.windows.insert(window.id, window);
        Ok(window)
    }

    async fn update_availability_window(
        &self,
        window: AvailabilityWindow,
    ) -> Result<AvailabilityWindow, StoreError> {
        let mut entry = self
            .windows
            .get_mut(&window.id)
            .ok_or(StoreError::Missing(window.id))?;
        *entry = window;
        Ok(window)
    }

    async fn delete_availability_window(
        &self,
        id: WindowId,
    ) -> Result<Option<AvailabilityWindow>, StoreError> {
        Ok(self.windows.remove(&id).map(|(_, w)| w))
    }

    async fn get_appointment(&self, id: AppointmentId) -> Result<Option<Appointment>, StoreError> {
        Ok(self.appointments.get(&id).map(|e| e.value().clone()))
    }

    async fn find_appointment(
        &self,
        doctor_id: DoctorId,
        at: NaiveDateTime,
    ) -> Result<Option<Appointment>, StoreError> {
        let Some(id) = self.slots.get(&(doctor_id, at)).map(|e| *e.value()) else {
            return Ok(None);
        };
        Ok(self.appointments.get(&id).map(|e| e.value().clone()))
    }

    async fn find_appointments_by_doctor(
        &self,
        doctor_id: DoctorId,
    ) -> Result<Vec<Appointment>, StoreError> {
        let mut appts: Vec<Appointment> = self
            .appointments
            .iter()
            .filter(|e| e.value().doctor_id == doctor_id)
            .map(|e| e.value().clone())
            .collect();
        appts.sort_by_key(|a| (a.at, a.id));
        Ok(appts)
    }

    async fn find_appointments_by_animal(
        &self,
        animal_id: AnimalId,
    ) -> Result<Vec<Appointment>, StoreError> {
        let mut appts: Vec<Appointment> = self
            .appointments
            .iter()
            .filter(|e| e.value().animal_id == animal_id)
            .map(|e| e.value().clone())
            .collect();
        appts.sort_by_key(|a| (a.at, a.id));
        Ok(appts)
    }

    async fn insert_appointment(&self, appt: NewAppointment) -> Result<Appointment, StoreError> {
        let id = self.allocate_id();
        self.claim_slot(appt.doctor_id, appt.at, id)?;
        let appt = appt.with_id(id);
        self.appointments.insert(id, appt.clone());
        Ok(appt)
    }

    async fn update_appointment(&self, appt: Appointment) -> Result<Appointment, StoreError> {
        // Hold the row for the whole update so a concurrent delete cannot be undone.
        let mut row = self
            .appointments
            .get_mut(&appt.id)
            .ok_or(StoreError::Missing(appt.id))?;
        self.claim_slot(appt.doctor_id, appt.at, appt.id)?;
        let (old_doctor, old_at) = (row.doctor_id, row.at);
        if (old_doctor, old_at) != (appt.doctor_id, appt.at) {
            self.release_slot(old_doctor, old_at, appt.id);
        }
        *row = appt.clone();
        Ok(appt)
    }

    async fn delete_appointment(&self, id: AppointmentId) -> Result<Option<Appointment>, StoreError> {
        let Some((_, appt)) = self.appointments.remove(&id) else {
            return Ok(None);
        };
        self.release_slot(appt.doctor_id, appt.at, id);
        Ok(Some(appt))
    }

    async fn get_vaccine(&self, id: VaccineId) -> Result<Option<Vaccine>, StoreError> {
        Ok(self.vaccines.get(&id).map(|e| e.value().clone()))
    }

    async fn find_vaccines_by_animal_and_name(
        &self,
        animal_id: AnimalId,
        name: &str,
    ) -> Result<Vec<Vaccine>, StoreError> {
        let mut found: Vec<Vaccine> = self
            .vaccines
            .iter()
            .filter(|e| e.value().animal_id == animal_id && e.value().name == name)
            .map(|e| e.value().clone())
            .collect();
        found.sort_by_key(|v| (v.applied_on, v.id));
        Ok(found)
    }

    async fn find_vaccines_by_animal(&self, animal_id: AnimalId) -> Result<Vec<Vaccine>, StoreError> {
        let mut found: Vec<Vaccine> = self
            .vaccines
            .iter()
            .filter(|e| e.value().animal_id == animal_id)
            .map(|e| e.value().clone())
            .collect();
        found.sort_by_key(|v| (v.applied_on, v.id));
        Ok(found)
    }

    async fn list_vaccines(&self) -> Result<Vec<Vaccine>, StoreError> {
        let mut all: Vec<Vaccine> = self.vaccines.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|v| (v.applied_on, v.id));
        Ok(all)
    }

    async fn insert_vaccine(&self, vaccine: NewVaccine) -> Result<Vaccine, StoreError> {
        let vaccine = vaccine.with_id(self.allocate_id());
        self.vaccines.insert(vaccine.id, vaccine.clone());
        Ok(vaccine)
    }

    async fn update_vaccine(&self, vaccine: Vaccine) -> Result<Vaccine, StoreError> {
        let mut entry = self
            .vaccines
            .get_mut(&vaccine.id)
            .ok_or(StoreError::Missing(vaccine.id))?;
        *entry = vaccine.clone();
        Ok(vaccine)
    }

    async fn delete_vaccine(&self, id: VaccineId) -> Result<Option<Vaccine>, StoreError> {
        Ok(self.vaccines.remove(&id).map(|(_, v)| v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> NaiveDateTime {
        s.parse().unwrap()
    }

    fn new_appt(doctor_id: DoctorId, animal_id: AnimalId, when: &str) -> NewAppointment {
        NewAppointment {
            doctor_id,
            animal_id,
            at: at(when),
            duration_minutes: None,
            status: None,
            description: None,
            price: None,
        }
    }

    #[tokio::test]
    async fn insert_enforces_slot_uniqueness() {
        let store = InMemoryStore::new();
        let first = store.insert_appointment(new_appt(1, 10, "2024-03-15T10:00:00")).await.unwrap();

        let err = store
            .insert_appointment(new_appt(1, 11, "2024-03-15T10:00:00"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::UniqueViolation {
                constraint: APPOINTMENT_SLOT_CONSTRAINT,
                existing_id: first.id,
            }
        );
        assert_eq!(store.appointment_count(), 1);

        // Another doctor at the same instant is a different slot
        store.insert_appointment(new_appt(2, 11, "2024-03-15T10:00:00")).await.unwrap();
    }

    #[tokio::test]
    async fn update_moves_slot_and_frees_old_one() {
        let store = InMemoryStore::new();
        let mut appt = store.insert_appointment(new_appt(1, 10, "2024-03-15T10:00:00")).await.unwrap();
        appt.at = at("2024-03-15T11:00:00");
        store.update_appointment(appt.clone()).await.unwrap();

        assert!(store.find_appointment(1, at("2024-03-15T10:00:00")).await.unwrap().is_none());
        assert_eq!(
            store.find_appointment(1, at("2024-03-15T11:00:00")).await.unwrap(),
            Some(appt)
        );
        store.insert_appointment(new_appt(1, 11, "2024-03-15T10:00:00")).await.unwrap();
    }

    #[tokio::test]
    async fn update_in_place_keeps_own_slot() {
        let store = InMemoryStore::new();
        let mut appt = store.insert_appointment(new_appt(1, 10, "2024-03-15T10:00:00")).await.unwrap();
        appt.description = Some("checkup".into());
        store.update_appointment(appt.clone()).await.unwrap();
        assert_eq!(store.get_appointment(appt.id).await.unwrap(), Some(appt));
    }

    #[tokio::test]
    async fn update_missing_row_fails() {
        let store = InMemoryStore::new();
        let ghost = new_appt(1, 10, "2024-03-15T10:00:00").with_id(999);
        assert_eq!(store.update_appointment(ghost).await.unwrap_err(), StoreError::Missing(999));
    }

    #[tokio::test]
    async fn delete_releases_slot() {
        let store = InMemoryStore::new();
        let appt = store.insert_appointment(new_appt(1, 10, "2024-03-15T10:00:00")).await.unwrap();
        assert_eq!(store.delete_appointment(appt.id).await.unwrap(), Some(appt));
        assert!(store.delete_appointment(999).await.unwrap().is_none());
        store.insert_appointment(new_appt(1, 11, "2024-03-15T10:00:00")).await.unwrap();
    }

    #[tokio::test]
    async fn fixture_loads_and_continues_sequence() {
        let json = r#"{
            "customers": [{"id": 1, "name": "Ada"}],
            "doctors": [{"id": 2, "name": "Dr. Vet"}],
            "animals": [{"id": 3, "customer_id": 1, "name": "Rex"}],
            "availability": [{"id": 4, "doctor_id": 2, "span": {"start": "2024-03-01", "end": "2024-03-31"}}],
            "vaccines": [{"id": 7, "animal_id": 3, "name": "Rabies", "applied_on": "2024-01-01", "expires_on": "2025-01-01"}]
        }"#;
        let fixture: Fixture = serde_json::from_str(json).unwrap();
        let store = InMemoryStore::from_fixture(fixture).unwrap();

        assert_eq!(store.get_doctor(2).await.unwrap().unwrap().name, "Dr. Vet");
        assert_eq!(store.list_availability_windows(2).await.unwrap().len(), 1);
        assert_eq!(store.find_vaccines_by_animal_and_name(3, "Rabies").await.unwrap().len(), 1);
        assert!(store.find_vaccines_by_animal_and_name(3, "rabies").await.unwrap().is_empty());

        let next = store.add_doctor("Dr. Next");
        assert_eq!(next.id, 8);
    }

    #[test]
    fn fixture_rejects_double_booked_slot() {
        let json = r#"{
            "appointments": [
                {"id": 1, "doctor_id": 2, "animal_id": 3, "at": "2024-03-15T10:00:00"},
                {"id": 2, "doctor_id": 2, "animal_id": 4, "at": "2024-03-15T10:00:00"}
            ]
        }"#;
        let fixture: Fixture = serde_json::from_str(json).unwrap();
        assert!(matches!(
            InMemoryStore::from_fixture(fixture),
            Err(StoreError::UniqueViolation { existing_id: 1, .. })
        ));
    }
}
