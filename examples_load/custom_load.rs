use std::sync::Arc;
use std::time::Instant;
use tokio::time::Duration;
use tracing::error;

use logstream_shipper::init::init_tracing_with_service;
use logstream_shipper::memory::InMemoryLogStreamService;
use logstream_shipper::publisher::FailurePolicy;
use logstream_shipper::ShipperConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let service = Arc::new(InMemoryLogStreamService::new());

    let config = ShipperConfig {
        flush_interval: Duration::from_millis(200),
        request_timeout: Duration::from_secs(2),
        failure_policy: FailurePolicy::Requeue { max_records: 50_000 },
        instance_tag: Some("load".to_string()),
        enable_stdout: false,
        ..ShipperConfig::new("load-test", "custom")
    };

    let handle = init_tracing_with_service(service.clone(), config).await?;

    let n: u64 = 100_000;
    let start = Instant::now();

    for i in 0..n {
        error!(iteration = i, "custom load test error");
    }

    let elapsed = start.elapsed();
    println!("custom config: sent {} events in {:?} (~{:.0} ev/s)",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64()
    );

    handle.shutdown().await?;

    let calls = service.calls();
    println!("custom config: {} appends, {} stream creations", calls.put_log_events, calls.create_log_stream);
    Ok(())
}
