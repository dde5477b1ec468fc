use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Datelike, Days, NaiveDate, Utc, Weekday};
use ulid::Ulid;

use turnero::audit::MemoryAuditTrail;
use turnero::calendar::ShopConfig;
use turnero::directory::TrustingDirectory;
use turnero::engine::{Engine, EngineError, EngineOptions};
use turnero::lifecycle::TransitionRequest;
use turnero::model::{Actor, NewAppointment, Status};
use turnero::notify::NotifyHub;
use turnero::time::{ClockTime, ShopZone};

async fn open_engine(name: &str) -> Arc<Engine> {
    let dir = std::env::temp_dir().join(format!("turnero_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).expect("create bench dir");
    let engine = Engine::new(
        dir.join(format!("{name}.wal")),
        Arc::new(NotifyHub::new()),
        Arc::new(MemoryAuditTrail::new()),
        Arc::new(TrustingDirectory),
        EngineOptions::default(),
    )
    .expect("open engine");
    engine
        .configure_shop(ShopConfig::default())
        .await
        .expect("configure shop");
    Arc::new(engine)
}

/// Hourly 08:00..16:00 starts on working days, from a Monday onwards.
fn slots(n: usize) -> Vec<DateTime<Utc>> {
    let zone = ShopZone::default();
    let mut day = NaiveDate::from_ymd_opt(2030, 1, 7).expect("valid date");
    let mut out = Vec::with_capacity(n);
    while out.len() < n {
        if day.weekday() != Weekday::Sun {
            for hour in 8..17 {
                out.push(zone.at(day, ClockTime::from_minutes(hour * 60)));
            }
        }
        day = day + Days::new(1);
    }
    out.truncate(n);
    out
}

fn booking(at: DateTime<Utc>) -> NewAppointment {
    NewAppointment {
        customer_id: Ulid::new(),
        vehicle_id: Ulid::new(),
        scheduled_at: at,
        duration_minutes: Some(60),
    }
}

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
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

async fn phase1_sequential() {
    let engine = open_engine("sequential").await;
    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for at in slots(n) {
        let t = Instant::now();
        engine.create_appointment(booking(at)).await.unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

async fn phase2_booking_race() {
    let engine = open_engine("race").await;
    let n_slots = 300;
    let racers = 8;

    let start = Instant::now();
    let mut handles = Vec::new();
    for at in slots(n_slots) {
        for _ in 0..racers {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine.create_appointment(booking(at)).await
            }));
        }
    }

    let mut booked = 0;
    let mut taken = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => booked += 1,
            Err(EngineError::Scheduling(_)) => taken += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    let elapsed = start.elapsed();
    let total = n_slots * racers;
    println!(
        "  {racers} racers x {n_slots} slots = {total} attempts in {:.2}s: {booked} booked, {taken} rejected",
        elapsed.as_secs_f64()
    );
    assert_eq!(booked, n_slots, "every slot must be booked exactly once");
}

async fn phase3_read_under_load() {
    let engine = open_engine("reads").await;
    let all = slots(1800);
    let first_day = engine.zone().localize(all[0]).calendar_date();

    let writer = {
        let engine = engine.clone();
        tokio::spawn(async move {
            for at in all {
                let _ = engine.create_appointment(booking(at)).await;
            }
        })
    };

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    for i in 0..n {
        let date = first_day + Days::new((i % 200) as u64);
        let t = Instant::now();
        engine.available_slots(date, 60).await.unwrap();
        latencies.push(t.elapsed());
    }
    writer.await.unwrap();

    print_latency("available_slots latency", &mut latencies);
}

async fn phase4_transition_storm() {
    let engine = open_engine("transitions").await;
    let mut ids = Vec::new();
    for at in slots(500) {
        ids.push(engine.create_appointment(booking(at)).await.unwrap().id);
    }

    let start = Instant::now();
    let mut handles = Vec::new();
    for &id in &ids {
        for (target, actor) in [
            (Status::Confirmed, Actor::Shop),
            (Status::Rejected, Actor::Shop),
            (Status::Cancelled, Actor::Customer),
        ] {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .transition(id, TransitionRequest::to(target, actor))
                    .await
                    .is_ok()
            }));
        }
    }

    let mut won = 0;
    for h in handles {
        if h.await.unwrap() {
            won += 1;
        }
    }
    let elapsed = start.elapsed();
    println!(
        "  {} appointments, 3 racing transitions each: {won} committed in {:.2}s",
        ids.len(),
        elapsed.as_secs_f64()
    );
    assert_eq!(won, ids.len(), "exactly one transition per appointment wins");

    for id in ids {
        let history = engine.history(id).await.unwrap();
        assert_eq!(history.len(), 1);
    }
}

#[tokio::main]
async fn main() {
    println!("=== turnero stress benchmark ===\n");

    println!("[phase 1] sequential booking throughput");
    phase1_sequential().await;

    println!("\n[phase 2] concurrent booking race");
    phase2_booking_race().await;

    println!("\n[phase 3] slot query latency under write load");
    phase3_read_under_load().await;

    println!("\n[phase 4] transition storm");
    phase4_transition_storm().await;

    println!("\n=== benchmark complete ===");
}
