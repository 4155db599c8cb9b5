use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Days, Utc};
use tokio::net::TcpListener;
use tokio_postgres::{Config, NoTls};
use ulid::Ulid;

use drivebook::school::SchoolDirectory;
use drivebook::wire;

async fn start_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let dir = std::env::temp_dir().join(format!("drivebook_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let schools = Arc::new(SchoolDirectory::new(dir, 100_000));

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let schools = schools.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, schools, "drivebook".to_string(), None).await;
            });
        }
    });

    addr
}

async fn connect(addr: SocketAddr, user: &str) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname(format!("bench_{}", Ulid::new()))
        .user(user)
        .password("drivebook");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
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

struct Instructor {
    file: Ulid,
}

/// Register 10 instructors, each with a student file and a fully open
/// month of availability.
async fn setup(client: &tokio_postgres::Client) -> Vec<Instructor> {
    let category = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO categories (id, name, session_minutes) VALUES ('{category}', 'B', 60)"
        ))
        .await
        .unwrap();

    let mut instructors = Vec::new();
    for _ in 0..10 {
        let instructor = Ulid::new();
        let student = Ulid::new();
        let file = Ulid::new();
        client
            .batch_execute(&format!(
                "INSERT INTO instructors (id) VALUES ('{instructor}')"
            ))
            .await
            .unwrap();
        client
            .batch_execute(&format!(
                "INSERT INTO files (id, student_id, instructor_id, vehicle_id, category_id) \
                 VALUES ('{file}', '{student}', '{instructor}', NULL, '{category}')"
            ))
            .await
            .unwrap();

        for day in 1..=28u64 {
            let date = Utc::now().date_naive() + Days::new(day);
            client
                .batch_execute(&format!(
                    r#"INSERT INTO availability (id, instructor_id, date, start, "end") VALUES ('{}', '{instructor}', '{date}', '08:00', '20:00')"#,
                    Ulid::new()
                ))
                .await
                .unwrap();
        }

        instructors.push(Instructor { file });
    }

    println!("  created {} instructors with 28 days of availability", instructors.len());
    instructors
}

#[tokio::main]
async fn main() {
    println!("drivebook stress: slot queries + bookings over the wire");

    let addr = start_server().await;
    let client = connect(addr, &format!("staff:{}", Ulid::new())).await;
    let instructors = setup(&client).await;

    // Phase 1: slot enumeration latency across files and days.
    let mut slot_latencies = Vec::new();
    for round in 0..20u64 {
        for instructor in &instructors {
            let date = Utc::now().date_naive() + Days::new(1 + round % 28);
            let start = Instant::now();
            client
                .simple_query(&format!(
                    "SELECT * FROM slots WHERE file_id = '{}' AND date = '{date}'",
                    instructor.file
                ))
                .await
                .unwrap();
            slot_latencies.push(start.elapsed());
        }
    }
    print_latency("slot enumeration", &mut slot_latencies);

    // Phase 2: booking latency, walking each instructor's grid.
    let mut booking_latencies = Vec::new();
    let mut booked = 0usize;
    for day in 1..=14u64 {
        let date = Utc::now().date_naive() + Days::new(day);
        for instructor in &instructors {
            for hour in 8..20u16 {
                let start_t = format!("{hour:02}:00");
                let end_t = format!("{:02}:00", hour + 1);
                let start = Instant::now();
                let result = client
                    .batch_execute(&format!(
                        r#"INSERT INTO appointments (id, file_id, date, start, "end") VALUES ('{}', '{}', '{date}', '{start_t}', '{end_t}')"#,
                        Ulid::new(),
                        instructor.file
                    ))
                    .await;
                booking_latencies.push(start.elapsed());
                if result.is_ok() {
                    booked += 1;
                }
            }
        }
    }
    println!("  booked {booked} lessons");
    print_latency("booking", &mut booking_latencies);

    // Phase 3: slot queries against saturated calendars.
    let mut saturated_latencies = Vec::new();
    for instructor in &instructors {
        for day in 1..=14u64 {
            let date = Utc::now().date_naive() + Days::new(day);
            let start = Instant::now();
            client
                .simple_query(&format!(
                    "SELECT * FROM slots WHERE file_id = '{}' AND date = '{date}'",
                    instructor.file
                ))
                .await
                .unwrap();
            saturated_latencies.push(start.elapsed());
        }
    }
    print_latency("slot enumeration (saturated)", &mut saturated_latencies);
}
