use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ulid::Ulid;

use spacegate::config::Policy;
use spacegate::engine::{now_ms, Engine, IssueRequest, NewBooking, ScanRequest};
use spacegate::model::*;
use spacegate::notify::AuditHub;

const HOUR: i64 = 3_600_000; // 1 hour in ms

fn bench_dir() -> PathBuf {
    let dir = std::env::var("SPACEGATE_BENCH_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir().join("spacegate_bench"));
    std::fs::create_dir_all(&dir).expect("cannot create bench dir");
    dir
}

/// Fresh engine on its own WAL, like a new tenant.
fn open_engine() -> Arc<Engine> {
    let path = bench_dir().join(format!("bench_{}.wal", Ulid::new()));
    Arc::new(Engine::new(path, Arc::new(AuditHub::new()), Policy::default()).expect("engine open failed"))
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

fn member() -> Actor {
    Actor {
        user_id: Ulid::new(),
        role: UserRole::Member,
    }
}

fn staff() -> Actor {
    Actor {
        user_id: Ulid::new(),
        role: UserRole::Staff,
    }
}

async fn add_space(engine: &Engine, name: &str) -> Ulid {
    let id = Ulid::new();
    engine
        .upsert_space(Space {
            id,
            name: name.into(),
            capacity: 10,
            hourly_rate_cents: Some(2_500),
            active: true,
            requires_approval: false,
        })
        .await
        .unwrap();
    id
}

/// First slot starts a day out; fixed per phase so racing tasks aim at identical slots.
fn slot_base() -> Ms {
    now_ms() + 24 * HOUR
}

async fn book_slot(engine: &Engine, space_id: Ulid, user: Actor, base: Ms, slot: i64) -> bool {
    let start = base + slot * HOUR;
    let req = NewBooking {
        space_id,
        user_id: user.user_id,
        title: "bench".into(),
        description: None,
        start,
        end: start + HOUR,
        attendees: vec![],
        equipment: vec![],
        notes: None,
    };
    engine.create_booking(user, req, now_ms()).await.is_ok()
}

async fn phase1_sequential() {
    let engine = open_engine();
    let sid = add_space(&engine, "Sequential").await;
    let user = member();
    let base = slot_base();

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let t = Instant::now();
        assert!(book_slot(&engine, sid, user, base, i as i64).await);
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

async fn phase2_concurrent() {
    let engine = open_engine();
    let n_tasks = 10;
    let n_per_task = 200;
    let n_spaces = 4;

    let mut spaces = Vec::new();
    for s in 0..n_spaces {
        spaces.push(add_space(&engine, &format!("Room {s}")).await);
    }

    let base = slot_base();
    let start = Instant::now();
    let mut handles = Vec::new();
    let booked = Arc::new(AtomicUsize::new(0));

    // Tasks share spaces and race for the same slots; exactly one wins each.
    for i in 0..n_tasks {
        let engine = engine.clone();
        let sid = spaces[i % n_spaces];
        let booked = booked.clone();
        handles.push(tokio::spawn(async move {
            let user = member();
            for j in 0..n_per_task {
                if book_slot(&engine, sid, user, base, j as i64).await {
                    booked.fetch_add(1, Ordering::Relaxed);
                }
            }
        }));
    }

    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    let won = booked.load(Ordering::Relaxed);
    println!(
        "  {n_tasks} tasks x {n_per_task} attempts = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
    println!("  {won} booked, {} refused as conflicts", total - won);
    assert_eq!(won, n_spaces * n_per_task);
}

async fn phase3_read_under_load() {
    let engine = open_engine();
    let read_space = add_space(&engine, "Read").await;
    let user = member();
    let base = slot_base();
    for i in 0..200 {
        book_slot(&engine, read_space, user, base, i * 2).await;
    }

    // Writers continuously add bookings on their own spaces.
    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for w in 0..5 {
        let engine = engine.clone();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let sid = add_space(&engine, &format!("Writer {w}")).await;
            let user = member();
            let mut i = 0i64;
            while !stop.load(Ordering::Relaxed) {
                book_slot(&engine, sid, user, base, i).await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();

    for r in 0..n_readers {
        let engine = engine.clone();
        reader_handles.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for k in 0..reads_per_reader {
                let slot = ((r * reads_per_reader + k) % 400) as i64;
                let start = base + slot * HOUR;
                let t = Instant::now();
                engine
                    .check_availability(read_space, start, start + 2 * HOUR, None)
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

    print_latency("availability query", &mut all_latencies);
}

async fn phase4_scan_storm() {
    let engine = open_engine();
    let n_credentials = 50;
    let scans_per_credential = 20;
    let max_scans = 10;

    let mut payloads = Vec::new();
    for _ in 0..n_credentials {
        let qr = engine
            .issue_credential(
                staff(),
                IssueRequest {
                    credential_type: CredentialType::Visitor,
                    subject: SubjectRef::Visitor(Ulid::new()),
                    valid_for_hours: 24,
                    permissions: vec![Permission::AllZones],
                    max_scans: Some(max_scans),
                },
                now_ms(),
            )
            .await
            .unwrap();
        payloads.push(qr.payload);
    }

    let start = Instant::now();
    let granted = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();

    // Two scanners per credential, racing on the scan limit.
    for payload in payloads.iter().chain(payloads.iter()) {
        let engine = engine.clone();
        let payload = payload.clone();
        let granted = granted.clone();
        handles.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(scans_per_credential / 2);
            for _ in 0..scans_per_credential / 2 {
                let t = Instant::now();
                let result = engine
                    .scan_credential(
                        ScanRequest {
                            payload: payload.clone(),
                            location: Some("bench".into()),
                            device_info: None,
                            scanned_by: None,
                        },
                        now_ms(),
                    )
                    .await
                    .unwrap();
                latencies.push(t.elapsed());
                if result.granted {
                    granted.fetch_add(1, Ordering::Relaxed);
                }
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in handles {
        all_latencies.extend(h.await.unwrap());
    }

    let elapsed = start.elapsed();
    let ok = granted.load(Ordering::Relaxed);
    let total = n_credentials * scans_per_credential;
    println!(
        "  {n_credentials} credentials, {scans_per_credential} scans each: {ok}/{total} granted in {:.2}s",
        elapsed.as_secs_f64()
    );
    assert_eq!(ok, n_credentials * max_scans as usize);
    print_latency("scan latency", &mut all_latencies);
}

#[tokio::main]
async fn main() {
    println!("=== spacegate stress benchmark ===");
    println!("data dir: {}\n", bench_dir().display());

    // Each phase opens its own engine to avoid interference

    println!("[phase 1] sequential write throughput");
    phase1_sequential().await;

    println!("\n[phase 2] concurrent write throughput");
    phase2_concurrent().await;

    println!("\n[phase 3] read latency under write load");
    phase3_read_under_load().await;

    println!("\n[phase 4] scan storm");
    phase4_scan_storm().await;

    println!("\n=== benchmark complete ===");
}
