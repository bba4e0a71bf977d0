use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};

use vetsched::engine::{Engine, EngineError, InMemoryStore};
use vetsched::model::{BookAppointment, DateSpan, DoctorId, RegisterVaccine};
use vetsched::notify::NotifyHub;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.3}ms, p50={:.3}ms, p95={:.3}ms, p99={:.3}ms, max={:.3}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

struct Clinic {
    engine: Arc<Engine>,
    doctors: Vec<DoctorId>,
    animal: i64,
}

fn year_start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
}

/// Slot `i` is hour `i` from the start of the year.
fn slot(i: i64) -> NaiveDateTime {
    year_start().and_hms_opt(0, 0, 0).unwrap() + TimeDelta::hours(i)
}

async fn setup(n_doctors: usize) -> Clinic {
    let store = Arc::new(InMemoryStore::new());
    let owner = store.add_customer("bench");
    let animal = store.add_animal(owner.id, "bench").id;
    let engine = Arc::new(Engine::new(store.clone(), Arc::new(NotifyHub::new())));

    let year = DateSpan::new(year_start(), NaiveDate::from_ymd_opt(2024, 12, 31).unwrap());
    let mut doctors = Vec::with_capacity(n_doctors);
    for i in 0..n_doctors {
        let doctor = store.add_doctor(&format!("doctor-{i}")).id;
        engine.add_availability_window(doctor, year).await.unwrap();
        doctors.push(doctor);
    }
    println!("  created {n_doctors} doctors");
    Clinic { engine, doctors, animal }
}

async fn phase1_sequential(clinic: &Clinic) {
    let doctor = clinic.doctors[0];
    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let req = BookAppointment::new(doctor, clinic.animal, slot(i as i64)).lasting(30);
        let t = Instant::now();
        clinic.engine.validate_and_book(req).await.unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("book latency", &mut latencies);
}

async fn phase2_concurrent(clinic: &Clinic) {
    let n_tasks = clinic.doctors.len();
    let n_per_task = 200;

    let start = Instant::now();
    let mut handles = Vec::new();

    // One task per doctor: no lock contention, measures raw parallel throughput
    for &doctor in &clinic.doctors[1..] {
        let engine = clinic.engine.clone();
        let animal = clinic.animal;
        handles.push(tokio::spawn(async move {
            for j in 0..n_per_task {
                let req = BookAppointment::new(doctor, animal, slot(j)).lasting(30);
                engine.validate_and_book(req).await.unwrap();
            }
        }));
    }

    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = (n_tasks - 1) * n_per_task as usize;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {} tasks x {n_per_task} bookings = {total} total in {:.2}s = {ops:.0} ops/sec",
        n_tasks - 1,
        elapsed.as_secs_f64()
    );
}

async fn phase3_contended_slot(clinic: &Clinic) {
    let doctor = clinic.doctors[0];
    let n_rounds = 100;
    let n_racers = 20;
    let accepted = Arc::new(AtomicUsize::new(0));
    let rejected = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    for round in 0..n_rounds {
        // Past phase 1's range so every round starts on a free slot
        let at = slot(5000 + round);
        let handles: Vec<_> = (0..n_racers)
            .map(|_| {
                let engine = clinic.engine.clone();
                let animal = clinic.animal;
                let accepted = accepted.clone();
                let rejected = rejected.clone();
                tokio::spawn(async move {
                    match engine.validate_and_book(BookAppointment::new(doctor, animal, at)).await {
                        Ok(_) => accepted.fetch_add(1, Ordering::Relaxed),
                        Err(EngineError::SlotAlreadyTaken(_)) => rejected.fetch_add(1, Ordering::Relaxed),
                        Err(e) => panic!("unexpected outcome: {e}"),
                    };
                })
            })
            .collect();
        for h in handles {
            h.await.unwrap();
        }
    }

    let elapsed = start.elapsed();
    let ok = accepted.load(Ordering::Relaxed);
    let taken = rejected.load(Ordering::Relaxed);
    println!(
        "  {n_rounds} rounds x {n_racers} racers: {ok} accepted, {taken} slot_already_taken in {:.2}s",
        elapsed.as_secs_f64()
    );
    assert_eq!(ok, n_rounds as usize, "exactly one booking per contended slot");
    println!("  locks alive after storm: {}", clinic.engine.held_locks());
}

async fn phase4_read_under_load(clinic: &Clinic) {
    let stop = Arc::new(AtomicBool::new(false));

    // Writers keep registering distinct vaccines while readers query
    let mut writer_handles = Vec::new();
    for w in 0..4i64 {
        let engine = clinic.engine.clone();
        let animal = clinic.animal;
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let mut i = 0i64;
            while !stop.load(Ordering::Relaxed) {
                let applied_on = year_start() + TimeDelta::days((w * 100_000 + i) % 300);
                let _ = engine
                    .validate_and_register(RegisterVaccine {
                        animal_id: animal,
                        name: format!("vaccine-{w}-{i}"),
                        code: None,
                        applied_on,
                        expires_on: applied_on + TimeDelta::days(30),
                    })
                    .await;
                i += 1;
                tokio::task::yield_now().await;
            }
        }));
    }

    let n_readers = 8;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();
    for r in 0..n_readers {
        let engine = clinic.engine.clone();
        let doctor = clinic.doctors[r % clinic.doctors.len()];
        reader_handles.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for i in 0..reads_per_reader {
                let t = Instant::now();
                engine.is_available(doctor, slot(i as i64)).await.unwrap();
                engine
                    .appointments_for_doctor(doctor, year_start(), year_start() + TimeDelta::days(7))
                    .await
                    .unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }
    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("availability + listing query", &mut all_latencies);
}

#[tokio::main]
async fn main() {
    let n_doctors: usize = std::env::var("VETSCHED_BENCH_DOCTORS")
        .unwrap_or_else(|_| "10".into())
        .parse()
        .expect("invalid VETSCHED_BENCH_DOCTORS");

    println!("=== vetsched stress benchmark ===\n");

    println!("[setup]");
    let clinic = setup(n_doctors.max(2)).await;

    println!("\n[phase 1] sequential booking throughput");
    phase1_sequential(&clinic).await;

    println!("\n[phase 2] concurrent booking throughput");
    phase2_concurrent(&clinic).await;

    println!("\n[phase 3] contended slot");
    phase3_contended_slot(&clinic).await;

    println!("\n[phase 4] read latency under write load");
    phase4_read_under_load(&clinic).await;

    println!("\n=== done ===");
}
