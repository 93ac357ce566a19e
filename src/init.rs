use crate::backend::make_service_from_config;
use crate::config::ShipperConfig;
use crate::service::LogStreamService;
use crate::shipper::{Shipper, ShipperError, ShipperHandle};
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

/// Install the shipper as the global `tracing` subscriber, publishing to
/// `service`.
///
/// **Parameters**
/// - `service`: remote log-stream service receiving the batches.
/// - `config`: [`ShipperConfig`] with group, stream prefix and schedule.
///
/// **Effects**
///
/// Creates the log group and today's stream, then installs a [`Registry`]
/// combined with [`StreamLayer`](crate::layer::StreamLayer) as the global
/// default subscriber and starts the periodic publisher. Must be called
/// inside a tokio runtime.
pub async fn init_tracing_with_service(
    service: Arc<dyn LogStreamService>,
    config: ShipperConfig,
) -> Result<ShipperHandle, ShipperError> {
    let enable_stdout = config.enable_stdout;
    let shipper = Shipper::new(service, config)?;
    let layer = shipper.layer();

    // Ошибка подготовки группы/потока не фатальна: цикл повторит её сам.
    let handle = shipper.start().await;

    // Два варианта subscriber'а, чтобы типы слоёв совпадали.
    if enable_stdout {
        let fmt_layer = tracing_subscriber::fmt::layer();
        let subscriber = Registry::default().with(layer).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = Registry::default().with(layer);
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(handle)
}

/// Initialize shipping with the service named by `config`.
///
/// Equivalent to building the service with
/// [`make_service_from_config`] and calling [`init_tracing_with_service`].
/// With `ec2_instance_tag` set and no explicit `instance_tag`, the EC2
/// instance id is read from instance metadata first. Pair with
/// [`ShipperConfig::from_env`] for typical deployments.
pub async fn init_tracing(config: ShipperConfig) -> Result<ShipperHandle, ShipperError> {
    let config = resolve_instance_tag(config).await;
    let service = make_service_from_config(&config).await?;
    init_tracing_with_service(service, config).await
}

#[cfg(feature = "aws")]
async fn resolve_instance_tag(mut config: ShipperConfig) -> ShipperConfig {
    if config.ec2_instance_tag && config.instance_tag.is_none() {
        config.instance_tag = Some(crate::sdk::ec2_instance_id(config.request_timeout).await);
    }
    config
}

#[cfg(not(feature = "aws"))]
async fn resolve_instance_tag(config: ShipperConfig) -> ShipperConfig {
    if config.ec2_instance_tag && config.instance_tag.is_none() {
        tracing::warn!("ec2_instance_tag needs the aws feature; shipping without a tag");
    }
    config
}
