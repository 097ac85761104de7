use std::{env, error::Error, fmt, sync::Arc, thread};

use log::LevelFilter;
use switchyard::{
    Event, Failure, Report,
    dispatch::{Config, Perform, Registry, Variant, registry::Shared},
    route::{Broker, Mediator, Router},
    tasks::Executor,
};

mod logger;

use logger::{ChannelLogger, drain};

struct Settings {
    threads: usize,
    log_level: LevelFilter,
}

impl Settings {
    fn from_env() -> Self {
        let threads = env::var("SWITCHYARD_THREADS")
            .ok()
            .and_then(|value| value.parse().ok())
            .filter(|&threads| threads > 0)
            .unwrap_or_else(|| thread::available_parallelism().map_or(1, |n| n.get()));

        let log_level = env::var("SWITCHYARD_LOG")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(LevelFilter::Info);

        Self { threads, log_level }
    }
}

// ==================== Workers ====================

struct Upload {
    name: &'static str,
    bytes: Vec<u8>,
}

struct Checksum;

impl Perform<Upload> for Checksum {
    fn perform(&self, upload: &Upload) -> Result<(), Failure> {
        let sum = upload
            .bytes
            .iter()
            .fold(0u32, |sum, &byte| sum.rotate_left(5) ^ u32::from(byte));
        log::info!("{}: checksum {sum:#010x}", upload.name);
        Ok(())
    }
}

struct SizeLimit {
    max: usize,
}

impl Perform<Upload> for SizeLimit {
    fn perform(&self, upload: &Upload) -> Result<(), Failure> {
        if upload.bytes.len() > self.max {
            return Err(Failure::new(format!(
                "{} is {} bytes, limit is {}",
                upload.name,
                upload.bytes.len(),
                self.max
            )));
        }
        Ok(())
    }
}

struct Thumbnail {
    width: u32,
}

impl Perform<Upload> for Thumbnail {
    fn perform(&self, upload: &Upload) -> Result<(), Failure> {
        if upload.bytes.is_empty() {
            return Err(Failure::new("nothing to scale"));
        }
        log::info!("{}: thumbnail at {}px", upload.name, self.width);
        Ok(())
    }
}

#[derive(Variant)]
enum Stage {
    Checksum(Checksum),
    SizeLimit(SizeLimit),
    Thumbnail(Thumbnail),
}

fn print_report<W: Variant>(registry: &Registry<W>, report: &Report<switchyard::dispatch::Id>) {
    for outcome in report {
        let kind = registry.get(outcome.id).map_or("?", Variant::kind);
        println!("  {} {kind:<10} {}", outcome.id, outcome.status);
    }
}

// ==================== Events ====================

#[derive(Debug)]
struct Order {
    id: u32,
    cents: u64,
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "order {} ({}.{:02})", self.id, self.cents / 100, self.cents % 100)
    }
}

fn orders() -> Vec<Event<Order>> {
    vec![
        Event::new("orders.normal", Order { id: 1, cents: 1250 }),
        Event::new("orders.urgent", Order { id: 2, cents: 99900 }),
        Event::new("invoices.new", Order { id: 3, cents: 500 }),
        Event::new("orders.normal", Order { id: 4, cents: 70 }),
    ]
}

/// Hands every event to `router` and returns how many were accepted.
fn feed<R>(router: &R, events: Vec<Event<Order>>) -> usize
where
    R: Router<Order>,
    R::Error: fmt::Display,
{
    let mut accepted = 0;
    for event in events {
        match router.accept(event) {
            Ok(_) => accepted += 1,
            Err(err) => println!("  rejected: {err}"),
        }
    }
    accepted
}

fn main() -> Result<(), Box<dyn Error>> {
    let settings = Settings::from_env();
    let logs = ChannelLogger::install(settings.log_level).map_err(|err| err.to_string())?;
    let executor = Executor::new(settings.threads);

    // Dispatch
    let mut registry = Registry::<Stage>::new();
    registry.register(Checksum);
    registry.register(SizeLimit { max: 16 });
    registry.register(Thumbnail { width: 128 });

    let small = Upload {
        name: "avatar.png",
        bytes: vec![0x89, b'P', b'N', b'G'],
    };
    let large = Upload {
        name: "scan.tiff",
        bytes: vec![0; 64],
    };

    let kinds: Vec<_> = registry.kinds().collect();
    println!("dispatch {} through {kinds:?}", small.name);
    print_report(&registry, &registry.dispatch_all(&small));
    drain(&logs);

    println!("dispatch {} on {} threads", large.name, executor.size());
    print_report(&registry, &registry.dispatch_parallel(&large, &executor));
    drain(&logs);

    registry.set_config(Config::new().stop_on_first_failure(true));
    println!("dispatch {} stopping at first failure", large.name);
    print_report(&registry, &registry.dispatch_all(&large));
    drain(&logs);

    let shared = Shared::from(registry);
    let handles: Vec<_> = [small, large]
        .into_iter()
        .map(|upload| {
            let shared = shared.clone();
            thread::spawn(move || shared.dispatch_all(&upload).failed_count())
        })
        .collect();
    let failed: usize = handles.into_iter().filter_map(|h| h.join().ok()).sum();
    println!("shared registry: {failed} failures across threads");
    drain(&logs);

    // Subscribers are owned here; channels only hold weak references.
    let billing = Arc::new(|event: &Event<Order>| -> Result<(), Failure> {
        println!("  billing   <- {} on {}", event.payload(), event.topic());
        Ok(())
    });
    let courier = Arc::new(|event: &Event<Order>| -> Result<(), Failure> {
        if event.payload().cents > 50_000 {
            return Err(Failure::new("needs manual approval"));
        }
        println!("  courier   <- {} on {}", event.payload(), event.topic());
        Ok(())
    });

    // Mediator
    let mediator = Mediator::<Order>::builder()
        .route("orders.*", "fulfilment")
        .route("orders.urgent", "expedite")
        .build()?;
    mediator.subscribe("fulfilment", &billing)?;
    mediator.subscribe("expedite", &billing)?;
    mediator.subscribe("expedite", &courier)?;

    println!("mediator");
    let accepted = feed(&mediator, orders());
    println!("  {accepted} queued");
    for forwarded in mediator.process_all() {
        println!(
            "  {} -> {}: {} ok, {} failed",
            forwarded.ticket,
            forwarded.target,
            forwarded.report.ok_count(),
            forwarded.report.failed_count()
        );
    }
    drain(&logs);

    // Broker
    let broker = Broker::<Order>::new();
    broker.subscribe("orders.normal", &billing);
    broker.subscribe("orders.urgent", &billing);
    broker.subscribe("orders.urgent", &courier);

    println!("broker");
    let delivered = feed(&broker, orders());
    println!("  {delivered} published to {:?}", broker.topics());
    let rush = Event::new("orders.urgent", Order { id: 5, cents: 10 });
    let report = broker.publish_parallel(&rush, &executor);
    println!("  parallel publish: {} ok", report.ok_count());
    drain(&logs);

    Ok(())
}
