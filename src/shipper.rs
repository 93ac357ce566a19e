use crate::backend::BackendBuildError;
use crate::buffer::LogBuffer;
use crate::config::{ConfigError, ShipperConfig};
use crate::host;
use crate::layer::StreamLayer;
use crate::lifecycle::StreamLifecycle;
use crate::naming::StreamNaming;
use crate::publisher::{PublishError, PublishOutcome, Publisher};
use crate::service::LogStreamService;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

#[derive(thiserror::Error, Debug)]
pub enum ShipperError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to build log-stream service: {0}")]
    Backend(#[from] BackendBuildError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),

    #[error("publisher task has stopped")]
    Stopped,
}

enum Command {
    Flush(oneshot::Sender<Result<PublishOutcome, PublishError>>),
    Shutdown,
}

/// Buffers records from [`StreamLayer`] and publishes them on a fixed
/// interval.
///
/// Construct once per process, install [`Shipper::layer`] in the
/// subscriber, then call [`Shipper::start`].
pub struct Shipper {
    buffer: Arc<LogBuffer>,
    layer: StreamLayer,
    publisher: Publisher,
    flush_interval: Duration,
}

impl Shipper {
    pub fn new(service: Arc<dyn LogStreamService>, config: ShipperConfig) -> Result<Self, ShipperError> {
        config.validate()?;

        let host = host::resolve();
        let naming = StreamNaming::new(&config.stream_prefix, host).with_instance_tag(config.instance_tag);
        let lifecycle = StreamLifecycle::new(service, config.log_group, naming, config.request_timeout);

        let buffer = Arc::new(LogBuffer::new());
        let layer = StreamLayer::new(buffer.clone(), config.min_level, config.suppressed_messages);
        let publisher = Publisher::new(buffer.clone(), lifecycle, config.failure_policy);

        Ok(Self {
            buffer,
            layer,
            publisher,
            flush_interval: config.flush_interval,
        })
    }

    /// Layer feeding this shipper's buffer. Clones share the buffer.
    pub fn layer(&self) -> StreamLayer {
        self.layer.clone()
    }

    pub fn buffer(&self) -> Arc<LogBuffer> {
        self.buffer.clone()
    }

    /// Create the log group and today's stream, then spawn the periodic
    /// publisher.
    ///
    /// A setup failure is reported through `error!` and the schedule starts
    /// anyway: every cycle finishes group and stream setup before appending,
    /// so records layered in during an outage are shipped once the service
    /// is reachable. No cycle failure stops the schedule.
    pub async fn start(mut self) -> ShipperHandle {
        let lifecycle = self.publisher.lifecycle_mut();
        match lifecycle.start().await {
            Ok(()) => info!(
                group = lifecycle.group(),
                stream = lifecycle.stream().unwrap_or_default(),
                interval = ?self.flush_interval,
                "log shipping started"
            ),
            Err(e) => error!(
                error = %e,
                group = lifecycle.group(),
                "log stream setup failed; retrying on the next cycle"
            ),
        }

        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(run(self.publisher, self.flush_interval, rx));

        ShipperHandle {
            commands: tx,
            task,
            buffer: self.buffer,
        }
    }
}

async fn run(mut publisher: Publisher, period: Duration, mut commands: mpsc::Receiver<Command>) {
    let mut ticker = interval_at(Instant::now() + period, period);
    // A slow cycle pushes the schedule back instead of bunching ticks.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // Failures are reported by the publisher itself.
                let _ = publisher.run_cycle().await;
            }
            command = commands.recv() => match command {
                Some(Command::Flush(reply)) => {
                    let _ = reply.send(publisher.run_cycle().await);
                }
                Some(Command::Shutdown) | None => {
                    let _ = publisher.run_cycle().await;
                    debug!("log shipping stopped");
                    break;
                }
            },
        }
    }
}

/// Control handle for a running [`Shipper`].
pub struct ShipperHandle {
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
    buffer: Arc<LogBuffer>,
}

impl ShipperHandle {
    /// Run a publish cycle now instead of waiting for the next tick.
    pub async fn flush_now(&self) -> Result<PublishOutcome, ShipperError> {
        let (reply, outcome) = oneshot::channel();
        self.commands
            .send(Command::Flush(reply))
            .await
            .map_err(|_| ShipperError::Stopped)?;
        Ok(outcome.await.map_err(|_| ShipperError::Stopped)??)
    }

    /// Stop the schedule after one final cycle for whatever is buffered.
    pub async fn shutdown(self) -> Result<(), ShipperError> {
        self.commands
            .send(Command::Shutdown)
            .await
            .map_err(|_| ShipperError::Stopped)?;
        self.task.await.map_err(|_| ShipperError::Stopped)
    }

    pub fn buffer(&self) -> &Arc<LogBuffer> {
        &self.buffer
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}
