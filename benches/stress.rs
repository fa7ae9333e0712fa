use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio_postgres::{Client, Config, NoTls};
use ulid::Ulid;

const HOUR: i64 = 3_600_000;
/// 2026-01-01T00:00:00Z
const EPOCH: i64 = 1_767_225_600_000;
/// Availability opened for every bench trainer: 360 days from EPOCH.
const OPEN_UNTIL: i64 = EPOCH + 360 * 24 * HOUR;

async fn connect(host: &str, port: u16, club: &str) -> Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname(club)
        .user("bench")
        .password("gymtime");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

fn fresh_club() -> String {
    format!("bench_{}", Ulid::new())
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
        percentile(latencies, 100.0).as_secs_f64() * 1000.0,
    );
}

/// Trainer with a year of availability, one room.
struct Staff {
    trainer: Ulid,
    room: Ulid,
}

async fn setup_staff(client: &Client) -> Staff {
    let trainer = Ulid::new();
    let room = Ulid::new();
    client
        .batch_execute(&format!("INSERT INTO trainers (id) VALUES ('{trainer}')"))
        .await
        .unwrap();
    client
        .batch_execute(&format!("INSERT INTO rooms (id) VALUES ('{room}')"))
        .await
        .unwrap();
    client
        .batch_execute(&format!(
            r#"INSERT INTO availability (id, trainer_id, start, "end") VALUES ('{}', '{trainer}', {EPOCH}, {OPEN_UNTIL})"#,
            Ulid::new()
        ))
        .await
        .unwrap();
    Staff { trainer, room }
}

async fn add_member(client: &Client) -> Ulid {
    let id = Ulid::new();
    client
        .batch_execute(&format!("INSERT INTO members (id) VALUES ('{id}')"))
        .await
        .unwrap();
    id
}

fn session_sql(staff: &Staff, member: Ulid, slot: i64) -> String {
    let s = EPOCH + slot * HOUR;
    let e = s + HOUR;
    format!(
        r#"INSERT INTO sessions (id, trainer_id, room_id, member_id, start, "end") VALUES ('{}', '{}', '{}', '{member}', {s}, {e})"#,
        Ulid::new(),
        staff.trainer,
        staff.room
    )
}

async fn phase1_sequential(host: &str, port: u16) {
    let client = connect(host, port, &fresh_club()).await;
    let staff = setup_staff(&client).await;
    let member = add_member(&client).await;

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let t = Instant::now();
        client
            .batch_execute(&session_sql(&staff, member, i as i64))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} sessions in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

/// Many members race for a handful of class places in one club.
async fn phase2_class_contention(host: &str, port: u16) {
    let club = fresh_club();
    let setup = connect(host, port, &club).await;
    let staff = setup_staff(&setup).await;

    let n_classes = 5usize;
    let capacity = 20usize;
    let mut classes = Vec::new();
    for c in 0..n_classes {
        let id = Ulid::new();
        let s = EPOCH + (c as i64) * HOUR;
        setup
            .batch_execute(&format!(
                r#"INSERT INTO classes (id, trainer_id, room_id, name, capacity, start, "end") VALUES ('{id}', '{}', '{}', 'Spin {c}', {capacity}, {s}, {})"#,
                staff.trainer,
                staff.room,
                s + HOUR
            ))
            .await
            .unwrap();
        classes.push(id);
    }

    let n_tasks = 10;
    let per_task = 30;
    let enrolled = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let mut handles = Vec::new();

    for _ in 0..n_tasks {
        let host = host.to_string();
        let club = club.clone();
        let classes = classes.clone();
        let enrolled = enrolled.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &club).await;
            for j in 0..per_task {
                let member = add_member(&client).await;
                let class = classes[j % classes.len()];
                let ok = client
                    .batch_execute(&format!(
                        "INSERT INTO registrations (class_id, member_id) VALUES ('{class}', '{member}')"
                    ))
                    .await
                    .is_ok();
                if ok {
                    enrolled.fetch_add(1, Ordering::Relaxed);
                }
            }
        }));
    }

    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks * per_task;
    let got = enrolled.load(Ordering::Relaxed);
    println!(
        "  {total} registrations for {} places: {got} enrolled in {:.2}s",
        n_classes * capacity,
        elapsed.as_secs_f64()
    );
    assert_eq!(got, (n_classes * capacity).min(total), "capacity breached");
}

async fn phase3_read_under_load(host: &str, port: u16) {
    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for _ in 0..5 {
        let host = host.to_string();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &fresh_club()).await;
            let staff = setup_staff(&client).await;
            let member = add_member(&client).await;
            let mut i = 0i64;
            while !stop.load(Ordering::Relaxed) && i < 8_000 {
                let _ = client.batch_execute(&session_sql(&staff, member, i)).await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();

    for _ in 0..n_readers {
        let host = host.to_string();
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &fresh_club()).await;
            let staff = setup_staff(&client).await;
            let member = add_member(&client).await;
            // Fragment the week so slot queries do real work.
            for i in (0..168).step_by(3) {
                client
                    .batch_execute(&session_sql(&staff, member, i))
                    .await
                    .unwrap();
            }

            let week_end = EPOCH + 168 * HOUR;
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for _ in 0..reads_per_reader {
                let t = Instant::now();
                client
                    .batch_execute(&format!(
                        r#"SELECT * FROM slots WHERE trainer_id = '{}' AND start >= {EPOCH} AND "end" <= {week_end}"#,
                        staff.trainer
                    ))
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

    print_latency("slot query", &mut all_latencies);
}

async fn phase4_connection_storm(host: &str, port: u16) {
    let n_conns = 50;
    let ops_per_conn = 10;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = Arc::new(AtomicUsize::new(0));

    for _ in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &fresh_club()).await;
            let staff = setup_staff(&client).await;
            let member = add_member(&client).await;
            for i in 0..ops_per_conn {
                client
                    .batch_execute(&session_sql(&staff, member, i))
                    .await
                    .unwrap();
            }
            success.fetch_add(1, Ordering::Relaxed);
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = success.load(Ordering::Relaxed);
    println!(
        "  {n_conns} connections, {ops_per_conn} ops each: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("GYMTIME_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("GYMTIME_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid GYMTIME_PORT");

    println!("=== gymtime stress benchmark ===");
    println!("target: {host}:{port}\n");

    // Each phase opens its own clubs so phases never interfere.

    println!("[phase 1] sequential session writes");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] class registration contention");
    phase2_class_contention(&host, port).await;

    println!("\n[phase 3] slot query latency under write load");
    phase3_read_under_load(&host, port).await;

    println!("\n[phase 4] connection storm");
    phase4_connection_storm(&host, port).await;

    println!("\n=== benchmark complete ===");
}
