//! kvkit demo
//!
//! Walks through every component against a Redis-compatible server, or
//! against the embedded store with `--embedded`.

use anyhow::{bail, Context};
use kvkit::{ConnectionPool, Framework, MemoryStore, Store, StoreConfig};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Demo configuration
struct Config {
    store: StoreConfig,
    /// Run against the in-process store instead of a server
    embedded: bool,
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> Self {
        let mut config = Config {
            store: StoreConfig::default(),
            embedded: false,
        };
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--host" | "-h" => {
                    config.store.host = value_of(&args, i, "--host");
                    i += 2;
                }
                "--port" | "-p" => {
                    config.store.port = parse_value(&args, i, "--port");
                    i += 2;
                }
                "--db" | "-n" => {
                    config.store.db = parse_value(&args, i, "--db");
                    i += 2;
                }
                "--password" | "-a" => {
                    config.store.password = Some(value_of(&args, i, "--password"));
                    i += 2;
                }
                "--pool-size" => {
                    config.store.max_connections = parse_value(&args, i, "--pool-size");
                    i += 2;
                }
                "--embedded" => {
                    config.embedded = true;
                    i += 1;
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("kvkit version {}", kvkit::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", args[i]);
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        config
    }
}

fn value_of(args: &[String], i: usize, flag: &str) -> String {
    match args.get(i + 1) {
        Some(value) => value.clone(),
        None => {
            eprintln!("Error: {} requires a value", flag);
            std::process::exit(1);
        }
    }
}

fn parse_value<T: std::str::FromStr>(args: &[String], i: usize, flag: &str) -> T {
    value_of(args, i, flag).parse().unwrap_or_else(|_| {
        eprintln!("Error: invalid value for {}", flag);
        std::process::exit(1);
    })
}

fn print_help() {
    println!(
        r#"
kvkit - Coordination primitives over a Redis-compatible store

USAGE:
    kvkit [OPTIONS]

OPTIONS:
    -h, --host <HOST>          Store host (default: 127.0.0.1)
    -p, --port <PORT>          Store port (default: 6379)
    -n, --db <DB>              Logical database (default: 0)
    -a, --password <PASSWORD>  Password sent with AUTH
        --pool-size <N>        Maximum pooled connections (default: 10)
        --embedded             Use the in-process store, no server needed
    -v, --version              Print version information
        --help                 Print this help message

EXAMPLES:
    kvkit --embedded                 # Everything in-process
    kvkit --port 6380 --db 2         # Against a local server
    RUST_LOG=kvkit=debug kvkit       # Show cache hits, lock events
"#
    );
}

#[derive(Debug, Serialize, Deserialize)]
struct UserData {
    user_id: u32,
    name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Task {
    task: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Event {
    event: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_args();

    let _subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    let (store, _sweeper): (Arc<dyn Store>, _) = if config.embedded {
        let memory = Arc::new(MemoryStore::new());
        let sweeper = kvkit::start_expiry_sweeper(&memory);
        info!("Using embedded store");
        let store: Arc<dyn Store> = memory;
        (store, Some(sweeper))
    } else {
        let pool = ConnectionPool::shared(config.store.clone())
            .context("invalid store configuration")?;
        info!(address = %config.store.address(), "Using store server");
        (Arc::new(pool), None)
    };

    let kv = Framework::new(store);

    if !kv.health_check.check_connection().await {
        bail!(
            "store at {} is not reachable (try --embedded)",
            config.store.address()
        );
    }
    let server = kv.health_check.get_info().await?;
    info!(
        version = server
            .get("redis_version")
            .or_else(|| server.get("kvkit_version"))
            .unwrap_or("unknown"),
        "Store is healthy"
    );

    // Cache
    let get_user_data = kv.cache.wrap("get_user_data", Duration::from_secs(300), |user_id: u32| async move {
        info!(user_id, "Loading user data");
        UserData {
            user_id,
            name: "Test User".to_string(),
        }
    });
    let first = get_user_data.call(1).await?;
    let second = get_user_data.call(1).await?;
    info!(?first, ?second, "Second call served from cache");

    // Lock
    let lock = kv.create_lock("my_lock", Duration::from_secs(10));
    lock.scoped(true, Duration::from_millis(100), || async {
        info!("Inside critical section");
    })
    .await?;

    // Queue
    let queue = kv.create_queue("my_queue");
    queue
        .enqueue(&Task {
            task: "process_data".to_string(),
        })
        .await?;
    let task: Option<Task> = queue.dequeue(Duration::from_secs(1)).await?;
    info!(?task, remaining = queue.size().await?, "Dequeued task");

    // Publish / subscribe
    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = kv
        .pubsub
        .subscribe("my_channel", move |event: Event| {
            let _ = tx.send(event);
        })
        .await?;
    let receivers = kv
        .pubsub
        .publish(
            "my_channel",
            &Event {
                event: "update".to_string(),
            },
        )
        .await?;
    match tokio::time::timeout(Duration::from_secs(1), rx.recv()).await {
        Ok(Some(event)) => info!(?event, receivers, "Received published event"),
        _ => warn!("Published event did not arrive"),
    }
    subscription.unsubscribe();

    // Rate limiter
    let limiter = kv.create_rate_limiter("api_calls", 3, Duration::from_secs(60));
    for attempt in 1..=4 {
        let allowed = limiter.is_allowed("user_123").await?;
        info!(attempt, allowed, "Rate limited call");
    }

    // Data manager
    kv.data_manager
        .set_data("greeting", "hello", Some(Duration::from_secs(60)))
        .await?;
    let visits = kv.data_manager.increment("visits", 1).await?;
    let greeting: Option<String> = kv.data_manager.get_data("greeting").await?;
    info!(?greeting, visits, "Data manager round trip");

    info!("Demo complete");
    Ok(())
}
