//! Admission control load simulator.
//!
//! Drives a gate with several competing flows and reports, per flow, how many
//! requests were served or rejected and how long served requests took. Heavy
//! flows send several times the traffic of light ones; with fair queuing the
//! light flows should still be served.
//!
//! ```bash
//! apf-sim --seats 4 --queues 16 --hand-size 4 --flows 6 --heavy-flows 2
//! apf-sim --no-queuing --log-level debug
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use apf_fairqueue::{QueueWaitConfig, RequestContext, SelectorConfig, TracingEvents};
use apf_scheduler::{FnEstimator, GateBuilder, Outcome, RejectReason};
use clap::{Parser, ValueEnum};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::time::Instant;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Queue selection policy.
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum Selector {
    /// Shuffle-shard flows over hands of queues.
    #[default]
    ShuffleSharding,
    /// Cycle through the queues regardless of flow.
    RoundRobin,
}

/// Admission control load simulator.
#[derive(Parser, Debug)]
#[command(name = "apf-sim")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Seats available for concurrent execution.
    #[arg(long, default_value = "4")]
    seats: u32,

    /// Number of fair queues.
    #[arg(long, default_value = "16")]
    queues: u32,

    /// Per-queue depth at which requests are rejected while all seats are busy.
    #[arg(long, default_value = "32")]
    queue_length: usize,

    /// Queue selection policy.
    #[arg(long, value_enum, default_value = "shuffle-sharding")]
    selector: Selector,

    /// Queues dealt to each flow under shuffle sharding.
    #[arg(long, default_value = "4")]
    hand_size: u32,

    /// Reject instead of queuing when no seat is free.
    #[arg(long)]
    no_queuing: bool,

    /// Queue wait budget in milliseconds.
    #[arg(long, default_value = "500")]
    queue_wait_ms: u64,

    /// Number of flows.
    #[arg(long, default_value = "4")]
    flows: usize,

    /// How many of the flows are heavy.
    #[arg(long, default_value = "1")]
    heavy_flows: usize,

    /// Traffic multiplier of a heavy flow.
    #[arg(long, default_value = "8")]
    heavy_factor: usize,

    /// Requests sent by each light flow.
    #[arg(long, default_value = "25")]
    requests: usize,

    /// Widest request, in seats.
    #[arg(long, default_value = "2")]
    max_seats: u32,

    /// Mean service time in milliseconds.
    #[arg(long, default_value = "20")]
    service_ms: u64,

    /// Window over which arrivals are spread, in milliseconds.
    #[arg(long, default_value = "1000")]
    window_ms: u64,

    /// Random seed.
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: Level,
}

/// A simulated unit of work.
#[derive(Debug, Clone)]
struct SimRequest {
    flow: usize,
    sequence: usize,
    seats: u32,
    service: Duration,
    arrival: Duration,
}

/// Per-flow results.
#[derive(Debug, Default, Clone)]
struct FlowReport {
    sent: usize,
    served: usize,
    rejected: usize,
    expired: usize,
    total_latency: Duration,
}

impl FlowReport {
    fn mean_latency(&self) -> Duration {
        u32::try_from(self.served)
            .ok()
            .filter(|&served| served > 0)
            .map_or(Duration::ZERO, |served| self.total_latency / served)
    }
}

fn generate(args: &Args, rng: &mut ChaCha8Rng) -> Vec<SimRequest> {
    let service_ms = args.service_ms.max(2);
    let window_ms = args.window_ms.max(1);
    let mut requests = Vec::new();

    for flow in 0..args.flows {
        let count = if flow < args.heavy_flows {
            args.requests * args.heavy_factor
        } else {
            args.requests
        };
        for sequence in 0..count {
            requests.push(SimRequest {
                flow,
                sequence,
                seats: rng.gen_range(1..=args.max_seats.max(1)),
                service: Duration::from_millis(rng.gen_range(service_ms / 2..=service_ms * 3 / 2)),
                arrival: Duration::from_millis(rng.gen_range(0..window_ms)),
            });
        }
    }
    requests
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Logs go to stderr; the report goes to stdout.
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut builder = GateBuilder::<SimRequest>::new(args.seats)
        .with_name("apf-sim")
        .with_queue_wait(QueueWaitConfig {
            fallback: Duration::from_millis(args.queue_wait_ms),
            ..QueueWaitConfig::default()
        })
        .with_estimator(FnEstimator::new(|request: &SimRequest| {
            (request.seats, request.service)
        }))
        .with_flow_distinguisher(|request: &SimRequest| vec![format!("flow-{}", request.flow)])
        .with_labeler(|request: &SimRequest| format!("flow-{}#{}", request.flow, request.sequence))
        .with_events(Arc::new(TracingEvents));
    if !args.no_queuing {
        builder = builder.with_queuing(args.queue_length, args.queues);
        builder = builder.with_selector(match args.selector {
            Selector::ShuffleSharding => SelectorConfig::ShuffleSharding {
                hand_size: args.hand_size,
            },
            Selector::RoundRobin => SelectorConfig::RoundRobin,
        });
    }
    let gate = Arc::new(builder.build()?);

    let mut rng = ChaCha8Rng::seed_from_u64(args.seed);
    let requests = generate(&args, &mut rng);

    info!(
        seats = args.seats,
        queuing = !args.no_queuing,
        selector = ?args.selector,
        flows = args.flows,
        heavy_flows = args.heavy_flows,
        requests = requests.len(),
        "Starting simulation"
    );

    let start = Instant::now();
    let mut handles = Vec::with_capacity(requests.len());
    for request in requests {
        let gate = Arc::clone(&gate);
        handles.push(tokio::spawn(async move {
            tokio::time::sleep_until(start + request.arrival).await;
            let arrived = Instant::now();
            let service = request.service;
            let outcome = gate
                .serve(&request, RequestContext::new(), || tokio::time::sleep(service))
                .await;
            (request.flow, outcome, arrived.elapsed())
        }));
    }

    let mut reports = vec![FlowReport::default(); args.flows];
    for handle in handles {
        let (flow, outcome, latency) = handle.await?;
        let report = &mut reports[flow];
        report.sent += 1;
        match outcome? {
            Outcome::Served(()) | Outcome::Exempt(()) => {
                report.served += 1;
                report.total_latency += latency;
            }
            Outcome::Rejected(RejectReason::Accommodation) => report.rejected += 1,
            Outcome::Rejected(RejectReason::QueueWaitExpired) => report.expired += 1,
        }
    }

    info!(elapsed_ms = start.elapsed().as_millis(), "Simulation finished");

    println!(
        "{:<8} {:>6} {:>6} {:>8} {:>8} {:>12}",
        "flow", "sent", "served", "rejected", "expired", "mean_latency"
    );
    for (flow, report) in reports.iter().enumerate() {
        let kind = if flow < args.heavy_flows { "*" } else { "" };
        println!(
            "{:<8} {:>6} {:>6} {:>8} {:>8} {:>10}ms",
            format!("{flow}{kind}"),
            report.sent,
            report.served,
            report.rejected,
            report.expired,
            report.mean_latency().as_millis()
        );
    }
    println!("(* heavy flow)");

    Ok(())
}
