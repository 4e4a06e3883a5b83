use std::num::NonZeroU32;
use std::num::NonZeroUsize;
use std::time::Duration;
use std::time::Instant;

use clap::Parser;
use hdrhistogram::Histogram;
use rand::Rng;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tower::BoxError;
use tower::service_fn;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tower_lane::Lane;
use tower_lane::LaneConfig;
use tower_lane::LaneError;

/// Drives a simulated rate-limited API through an admission lane.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Downstream ceiling: requests allowed per `--per`.
    #[arg(long, default_value = "1000")]
    max_requests: NonZeroUsize,

    /// Window the ceiling applies to.
    #[arg(long, default_value = "1m", value_parser = humantime::parse_duration)]
    per: Duration,

    /// Requests allowed to wait for dispatch.
    #[arg(long, default_value = "10000")]
    queue_capacity: NonZeroUsize,

    /// Downstream invocations per request, first try included.
    #[arg(long, default_value = "5")]
    max_retries: NonZeroU32,

    #[arg(long, default_value = "500ms", value_parser = humantime::parse_duration)]
    base_backoff: Duration,

    #[arg(long, default_value = "30s", value_parser = humantime::parse_duration)]
    max_backoff: Duration,

    /// How long a caller waits for an outcome.
    #[arg(long, default_value = "5s", value_parser = humantime::parse_duration)]
    caller_deadline: Duration,

    /// Stop retrying requests whose caller has given up.
    #[arg(long)]
    cancel_abandoned: bool,

    /// Number of simulated callers.
    #[arg(long, default_value_t = 200)]
    requests: usize,

    /// Probability that the simulated API answers "rate limited".
    #[arg(long, default_value_t = 0.3)]
    rate_limited: f64,

    /// Probability that the simulated API fails outright.
    #[arg(long, default_value_t = 0.02)]
    broken: f64,

    /// Time allowed to drain the queue on shutdown.
    #[arg(long, default_value = "2s", value_parser = humantime::parse_duration)]
    grace: Duration,
}

#[derive(Default)]
struct Tally {
    success: usize,
    rate_limited: usize,
    exhausted: usize,
    permanent: usize,
    timed_out: usize,
    aborted: usize,
    overloaded: usize,
}

impl Tally {
    fn record(&mut self, err: &LaneError) {
        match err {
            LaneError::RateLimited => self.rate_limited += 1,
            LaneError::RetriesExhausted { .. } => self.exhausted += 1,
            LaneError::PermanentFailure(_) => self.permanent += 1,
            LaneError::TimedOut => self.timed_out += 1,
            LaneError::Aborted => self.aborted += 1,
            LaneError::Overloaded => self.overloaded += 1,
        }
    }
}

async fn third_party_api(
    user: String,
    rate_limited: f64,
    broken: f64,
) -> Result<String, BoxError> {
    sleep(Duration::from_millis(2)).await;

    let roll: f64 = rand::rng().random();
    if roll < rate_limited {
        return Err(Box::new(LaneError::RateLimited));
    }
    if roll < rate_limited + broken {
        return Err(format!("upstream rejected data for {user}").into());
    }
    Ok(format!("Processed data for user {user}"))
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let config = LaneConfig::default()
        .with_rate(args.max_requests, args.per)
        .with_queue_capacity(args.queue_capacity)
        .with_max_retries(args.max_retries)
        .with_base_backoff(args.base_backoff)
        .with_max_backoff(args.max_backoff)
        .with_caller_deadline(args.caller_deadline)
        .with_cancel_abandoned(args.cancel_abandoned);
    info!(
        interval = ?config.throttle_interval(),
        requests = args.requests,
        "starting lane"
    );

    let (rate_limited, broken) = (args.rate_limited, args.broken);
    let downstream = service_fn(move |user: String| third_party_api(user, rate_limited, broken));
    let lane = Lane::new(downstream, config);

    let start = Instant::now();
    let mut tasks = JoinSet::new();
    for i in 0..args.requests {
        let handle = lane.handle();
        tasks.spawn(async move {
            let user = format!("user-{i}");
            let req_start = Instant::now();
            let outcome = handle.submit(user.clone(), user).await;
            (outcome, req_start.elapsed())
        });
    }

    let mut latency = Histogram::<u64>::new_with_bounds(1, 60_000_000, 3)?;
    let mut tally = Tally::default();
    while let Some(task) = tasks.join_next().await {
        let (outcome, elapsed) = task?;
        match outcome {
            Ok(_) => {
                tally.success += 1;
                latency.record(elapsed.as_micros() as u64)?;
            }
            Err(err) => tally.record(&err),
        }
    }
    let total = start.elapsed();

    lane.shutdown(args.grace).await;

    println!("--- Admission Lane ---");
    println!("Total Duration:  {:.2?}", total);
    println!("Success/Total:   {}/{}", tally.success, args.requests);
    if tally.success > 0 {
        println!("P50 (Elapsed):   {}µs", latency.value_at_quantile(0.5));
        println!("P99 (Elapsed):   {}µs", latency.value_at_quantile(0.99));
    }
    println!("  └─ Exhausted:  {}", tally.exhausted);
    println!("  └─ Permanent:  {}", tally.permanent);
    println!("  └─ Timeouts:   {}", tally.timed_out);
    println!("  └─ Aborted:    {}", tally.aborted);
    if tally.rate_limited + tally.overloaded > 0 {
        println!("  └─ Other:      {}", tally.rate_limited + tally.overloaded);
    }

    Ok(())
}
