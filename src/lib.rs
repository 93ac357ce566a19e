pub mod record;
pub mod buffer;
pub mod layer;
pub mod format;
pub mod host;
pub mod naming;

pub mod service;
pub mod memory;
pub mod lifecycle;
pub mod publisher;

#[cfg(feature = "http")]
pub mod cloudwatch;
#[cfg(feature = "aws")]
pub mod sdk;

pub mod backend;
pub mod config;
pub mod env;
pub mod init;
pub mod shipper;

pub use config::ShipperConfig;
pub use init::{init_tracing, init_tracing_with_service};
pub use shipper::{Shipper, ShipperError, ShipperHandle};
