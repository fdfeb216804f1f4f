use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{Datelike, Days, NaiveDate};
use ulid::Ulid;

use devbook::engine::{find_overlaps, Engine};
use devbook::model::{BookingRequest, DateSpan, Device};
use devbook::store::{ReservationStore, WalStore};

fn base_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
}

fn request(device_id: Ulid, offset: u64, len: u64) -> BookingRequest {
    let start = base_day() + Days::new(offset);
    BookingRequest {
        device_id,
        requester_id: Ulid::new(),
        span: DateSpan::new(start, start + Days::new(len)),
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
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
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
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

async fn setup(engine: &Engine) -> Vec<Device> {
    let names = (0..10).map(|i| format!("bench-device-{i}")).collect();
    let devices = engine.import_devices(names).await.unwrap();
    println!("  created {} devices", devices.len());
    devices
}

async fn phase1_sequential(engine: &Engine, device: &Device) {
    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n as u64 {
        let t = Instant::now();
        engine.book(request(device.id, i, 1)).await.unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("admission latency", &mut latencies);
}

/// Every task aims at the same devices with overlapping windows, so most
/// requests are rejected. Afterwards no device may hold an overlap.
async fn phase2_contended(engine: Arc<Engine>, devices: &[Device]) {
    let n_tasks = 16;
    let n_per_task = 200u64;

    let start = Instant::now();
    let mut handles = Vec::new();
    for t in 0..n_tasks {
        let engine = engine.clone();
        let device_id = devices[1 + t % (devices.len() - 1)].id;
        handles.push(tokio::spawn(async move {
            let mut admitted = 0u64;
            for j in 0..n_per_task {
                if engine.book(request(device_id, j * 2, 3)).await.is_ok() {
                    admitted += 1;
                }
            }
            admitted
        }));
    }

    let mut admitted = 0;
    for h in handles {
        admitted += h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks as u64 * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tasks x {n_per_task} requests = {total} total in {:.2}s = {ops:.0} ops/sec, {admitted} admitted",
        elapsed.as_secs_f64()
    );

    for device in &devices[1..] {
        let stored = engine.store().load_reservations(device.id).await.unwrap();
        assert!(find_overlaps(&stored).is_empty(), "overlap on {}", device.id);
    }
}

async fn phase3_calendar_under_load(engine: Arc<Engine>, devices: &[Device]) {
    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for (w, device) in devices.iter().enumerate().take(5) {
        let engine = engine.clone();
        let stop = stop.clone();
        let device_id = device.id;
        writer_handles.push(tokio::spawn(async move {
            let mut i = 0u64;
            while !stop.load(Ordering::Relaxed) {
                let _ = engine.book(request(device_id, 5_000 + w as u64 * 10_000 + i, 1)).await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 200;
    let mut reader_handles = Vec::new();
    for r in 0..n_readers {
        let engine = engine.clone();
        reader_handles.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for i in 0..reads_per_reader {
                let month = base_day() + Days::new(((r * reads_per_reader + i) % 365) as u64);
                let t = Instant::now();
                engine.calendar(month.year(), month.month()).await.unwrap();
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

    print_latency("calendar projection", &mut all_latencies);
}

async fn phase4_compaction(store: &WalStore) {
    let before = store.appends_since_compact().await;
    let t = Instant::now();
    store.compact().await.unwrap();
    println!(
        "  compacted {before} appends in {:.2}ms",
        t.elapsed().as_secs_f64() * 1000.0
    );
}

#[tokio::main]
async fn main() {
    let dir = std::env::temp_dir().join(format!("devbook_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("bookings.wal");

    println!("=== devbook stress benchmark ===");
    println!("wal: {}\n", path.display());

    let store = Arc::new(WalStore::open(&path).unwrap());
    let engine = Arc::new(Engine::open(store.clone()).await.unwrap());

    println!("[setup]");
    let devices = setup(&engine).await;

    println!("\n[phase 1] sequential admission throughput");
    phase1_sequential(&engine, &devices[0]).await;

    println!("\n[phase 2] contended admission");
    phase2_contended(engine.clone(), &devices).await;

    println!("\n[phase 3] calendar latency under write load");
    phase3_calendar_under_load(engine.clone(), &devices).await;

    println!("\n[phase 4] compaction");
    phase4_compaction(&store).await;

    let _ = std::fs::remove_dir_all(&dir);
    println!("\n=== done ===");
}
