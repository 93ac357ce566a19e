use std::sync::Arc;
use std::time::Instant;
use tracing::error;

use logstream_shipper::init::init_tracing_with_service;
use logstream_shipper::memory::InMemoryLogStreamService;
use logstream_shipper::ShipperConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let service = Arc::new(InMemoryLogStreamService::new());
    let handle = init_tracing_with_service(service.clone(), ShipperConfig::new("load-test", "default")).await?;

    let n: u64 = 100_000;
    let start = Instant::now();

    for i in 0..n {
        error!(iteration = i, "default load test error");
    }

    let elapsed = start.elapsed();
    println!("default config: sent {} events in {:?} (~{:.0} ev/s)",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64()
    );

    // Final cycle ships everything still buffered
    handle.shutdown().await?;

    let shipped: usize = service
        .stream_names("load-test")
        .iter()
        .map(|stream| service.events("load-test", stream).len())
        .sum();
    println!("default config: shipped {shipped} events");
    Ok(())
}
