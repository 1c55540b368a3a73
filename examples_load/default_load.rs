use std::time::Instant;
use tracing::error;

use tracing_stack_sink::init::init_tracing;
use tracing_stack_sink::ShipperConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Point STACK_SINK_HOST at a local collector, e.g. http://127.0.0.1:8080
    let mut config = ShipperConfig::from_env();
    config.channel_capacity = 1_024;
    let shipper = init_tracing(config).await?;

    let n: u64 = 100_000;
    let start = Instant::now();

    shipper
        .scope(async {
            let mut stack = shipper.create_stack()?;
            stack.set_name("default-load");
            for i in 0..n {
                error!(iteration = i, "default load test error");
            }
            stack.end().await
        })
        .await?;

    let elapsed = start.elapsed();
    println!("default config: fired {} events in {:?} (~{:.0} ev/s)",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64()
    );

    let report = shipper.flush().await?;
    println!("shipped {} logs, {} failed batches", report.logs, report.failed_batches);
    Ok(())
}
