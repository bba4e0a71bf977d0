use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability::{request_label, REQUESTS_TOTAL};

/// One operation per variant, tagged by `"op"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    BookAppointment(BookAppointment),
    RescheduleAppointment {
        id: AppointmentId,
        booking: BookAppointment,
    },
    CancelAppointment {
        id: AppointmentId,
    },
    /// `end` omitted declares a single day.
    AddAvailability {
        doctor_id: DoctorId,
        start: NaiveDate,
        #[serde(default)]
        end: Option<NaiveDate>,
    },
    UpdateAvailability {
        id: WindowId,
        start: NaiveDate,
        #[serde(default)]
        end: Option<NaiveDate>,
    },
    RemoveAvailability {
        id: WindowId,
    },
    RegisterVaccine(RegisterVaccine),
    UpdateVaccine {
        id: VaccineId,
        vaccine: RegisterVaccine,
    },
    RemoveVaccine {
        id: VaccineId,
    },
    IsAvailable {
        doctor_id: DoctorId,
        at: NaiveDateTime,
    },
    AvailableDays {
        doctor_id: DoctorId,
        from: NaiveDate,
        to: NaiveDate,
    },
    DoctorAppointments {
        doctor_id: DoctorId,
        from: NaiveDate,
        to: NaiveDate,
    },
    AnimalAppointments {
        animal_id: AnimalId,
        from: NaiveDate,
        to: NaiveDate,
    },
    /// History of one animal; `from`/`to` bound `applied_on` when present.
    AnimalVaccines {
        animal_id: AnimalId,
        #[serde(default)]
        from: Option<NaiveDate>,
        #[serde(default)]
        to: Option<NaiveDate>,
    },
    VaccinesAppliedBetween {
        from: NaiveDate,
        to: NaiveDate,
    },
    VaccinesExpiringBetween {
        from: NaiveDate,
        to: NaiveDate,
    },
    NextEligibleDate {
        animal_id: AnimalId,
        name: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Ok { data: Value },
    Rejected { code: &'static str, message: String },
    Error { message: String },
}

impl Response {
    fn from_result<T: Serialize>(result: Result<T, EngineError>) -> Self {
        match result {
            Ok(data) => match serde_json::to_value(data) {
                Ok(data) => Response::Ok { data },
                Err(e) => Response::Error { message: e.to_string() },
            },
            Err(e) if e.is_rejection() => Response::Rejected {
                code: e.code(),
                message: e.to_string(),
            },
            Err(e) => Response::Error { message: e.to_string() },
        }
    }

    fn status_label(&self) -> &'static str {
        match self {
            Response::Ok { .. } => "ok",
            Response::Rejected { .. } => "rejected",
            Response::Error { .. } => "error",
        }
    }
}

fn span_of(start: NaiveDate, end: Option<NaiveDate>) -> Result<DateSpan, EngineError> {
    let end = end.unwrap_or(start);
    if end < start {
        return Err(EngineError::InvalidRange("window ends before it starts"));
    }
    Ok(DateSpan::new(start, end))
}

/// Run one request against the engine.
pub async fn dispatch(engine: &Engine, req: Request) -> Response {
    let label = request_label(&req);
    let response = match req {
        Request::BookAppointment(booking) => {
            Response::from_result(engine.validate_and_book(booking).await)
        }
        Request::RescheduleAppointment { id, booking } => {
            Response::from_result(engine.validate_and_reschedule(id, booking).await)
        }
        Request::CancelAppointment { id } => Response::from_result(engine.cancel_appointment(id).await),
        Request::AddAvailability { doctor_id, start, end } => match span_of(start, end) {
            Ok(span) => Response::from_result(engine.add_availability_window(doctor_id, span).await),
            Err(e) => Response::from_result::<()>(Err(e)),
        },
        Request::UpdateAvailability { id, start, end } => match span_of(start, end) {
            Ok(span) => Response::from_result(engine.update_availability_window(id, span).await),
            Err(e) => Response::from_result::<()>(Err(e)),
        },
        Request::RemoveAvailability { id } => {
            Response::from_result(engine.remove_availability_window(id).await)
        }
        Request::RegisterVaccine(vaccine) => {
            Response::from_result(engine.validate_and_register(vaccine).await)
        }
        Request::UpdateVaccine { id, vaccine } => {
            Response::from_result(engine.validate_and_update_vaccine(id, vaccine).await)
        }
        Request::RemoveVaccine { id } => Response::from_result(engine.remove_vaccine(id).await),
        Request::IsAvailable { doctor_id, at } => {
            Response::from_result(engine.is_available(doctor_id, at).await)
        }
        Request::AvailableDays { doctor_id, from, to } => {
            Response::from_result(engine.available_days(doctor_id, from, to).await)
        }
        Request::DoctorAppointments { doctor_id, from, to } => {
            Response::from_result(engine.appointments_for_doctor(doctor_id, from, to).await)
        }
        Request::AnimalAppointments { animal_id, from, to } => {
            Response::from_result(engine.appointments_for_animal(animal_id, from, to).await)
        }
        Request::AnimalVaccines { animal_id, from, to } => {
            Response::from_result(engine.vaccines_for_animal(animal_id, from, to).await)
        }
        Request::VaccinesAppliedBetween { from, to } => {
            Response::from_result(engine.vaccines_applied_between(from, to).await)
        }
        Request::VaccinesExpiringBetween { from, to } => {
            Response::from_result(engine.vaccines_expiring_between(from, to).await)
        }
        Request::NextEligibleDate { animal_id, name } => {
            Response::from_result(engine.next_eligible_date(animal_id, &name).await)
        }
    };
    metrics::counter!(REQUESTS_TOTAL, "op" => label, "status" => response.status_label())
        .increment(1);
    response
}

/// Parse one JSON line and dispatch it. Malformed input becomes an `Error` response.
pub async fn handle_line(engine: &Engine, line: &str) -> Response {
    match serde_json::from_str::<Request>(line) {
        Ok(req) => dispatch(engine, req).await,
        Err(e) => {
            metrics::counter!(REQUESTS_TOTAL, "op" => "unknown", "status" => "error").increment(1);
            Response::Error {
                message: format!("invalid request: {e}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::engine::InMemoryStore;
    use crate::notify::NotifyHub;

    fn setup() -> (Engine, DoctorId, AnimalId) {
        let store = Arc::new(InMemoryStore::new());
        let owner = store.add_customer("Ada");
        let doctor = store.add_doctor("Dr. Vet");
        let animal = store.add_animal(owner.id, "Rex");
        let engine = Engine::new(store, Arc::new(NotifyHub::new()));
        (engine, doctor.id, animal.id)
    }

    #[test]
    fn parses_booking_request() {
        let req: Request = serde_json::from_value(json!({
            "op": "book_appointment",
            "doctor_id": 1,
            "animal_id": 2,
            "at": "2024-03-15T10:00:00",
            "price": 40.0
        }))
        .unwrap();
        let Request::BookAppointment(booking) = req else {
            panic!("expected a booking request");
        };
        assert_eq!(booking.doctor_id, 1);
        assert_eq!(booking.duration_minutes, None);
        assert_eq!(booking.price, Some(40.0));
    }

    #[test]
    fn parses_single_day_availability() {
        let req: Request = serde_json::from_value(json!({
            "op": "add_availability",
            "doctor_id": 1,
            "start": "2024-03-01"
        }))
        .unwrap();
        assert_eq!(
            req,
            Request::AddAvailability {
                doctor_id: 1,
                start: "2024-03-01".parse().unwrap(),
                end: None,
            }
        );
    }

    #[test]
    fn unknown_op_is_rejected_by_parser() {
        let parsed = serde_json::from_value::<Request>(json!({"op": "drop_tables"}));
        assert!(parsed.is_err());
    }

    #[tokio::test]
    async fn booking_lines_round_through_engine() {
        let (engine, doctor, animal) = setup();

        let add = format!(r#"{{"op":"add_availability","doctor_id":{doctor},"start":"2024-03-01","end":"2024-03-31"}}"#);
        assert!(matches!(handle_line(&engine, &add).await, Response::Ok { .. }));

        let book = format!(
            r#"{{"op":"book_appointment","doctor_id":{doctor},"animal_id":{animal},"at":"2024-03-15T10:00:00"}}"#
        );
        let Response::Ok { data } = handle_line(&engine, &book).await else {
            panic!("booking should succeed");
        };
        assert_eq!(data["at"], "2024-03-15T10:00:00");

        let again = handle_line(&engine, &book).await;
        let Response::Rejected { code, .. } = again else {
            panic!("second booking should be rejected");
        };
        assert_eq!(code, "slot_already_taken");
    }

    #[tokio::test]
    async fn reversed_window_rejected_at_boundary() {
        let (engine, doctor, _) = setup();
        let resp = dispatch(
            &engine,
            Request::AddAvailability {
                doctor_id: doctor,
                start: "2024-03-31".parse().unwrap(),
                end: Some("2024-03-01".parse().unwrap()),
            },
        )
        .await;
        assert!(matches!(resp, Response::Rejected { code: "invalid_range", .. }));
    }

    #[tokio::test]
    async fn booking_past_calendar_end_is_rejected() {
        let (engine, doctor, animal) = setup();
        let line = format!(
            r#"{{"op":"book_appointment","doctor_id":{doctor},"animal_id":{animal},"at":"+262142-12-31T23:59:00","duration_minutes":30}}"#
        );
        let resp = handle_line(&engine, &line).await;
        assert!(matches!(resp, Response::Rejected { code: "invalid_range", .. }));
    }

    #[tokio::test]
    async fn animal_vaccine_history_line() {
        let (engine, _, animal) = setup();
        let register = format!(
            r#"{{"op":"register_vaccine","animal_id":{animal},"name":"Rabies","applied_on":"2024-01-01","expires_on":"2025-01-01"}}"#
        );
        assert!(matches!(handle_line(&engine, &register).await, Response::Ok { .. }));

        let list = format!(r#"{{"op":"animal_vaccines","animal_id":{animal},"from":"2023-06-01"}}"#);
        let Response::Ok { data } = handle_line(&engine, &list).await else {
            panic!("listing should succeed");
        };
        assert_eq!(data.as_array().unwrap().len(), 1);
        assert_eq!(data[0]["name"], "Rabies");

        let unknown = handle_line(&engine, r#"{"op":"animal_vaccines","animal_id":9999}"#).await;
        assert!(matches!(unknown, Response::Rejected { code: "not_found", .. }));
    }

    #[tokio::test]
    async fn malformed_line_is_error_response() {
        let (engine, _, _) = setup();
        let resp = handle_line(&engine, "{not json").await;
        let Response::Error { message } = resp else {
            panic!("expected error response");
        };
        assert!(message.starts_with("invalid request"));
    }

    #[tokio::test]
    async fn response_serializes_with_status_tag() {
        let (engine, doctor, _) = setup();
        let resp = dispatch(
            &engine,
            Request::IsAvailable {
                doctor_id: doctor,
                at: "2024-03-15T10:00:00".parse().unwrap(),
            },
        )
        .await;
        assert_eq!(
            serde_json::to_value(&resp).unwrap(),
            json!({"status": "ok", "data": false})
        );
    }
}
