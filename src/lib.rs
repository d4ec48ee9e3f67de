//! HomeWizard P1 meter bridge
//!
//! Polls the meter's local REST API, normalizes each reading into a canonical
//! single- or three-phase record and publishes it onto a path-keyed data bus.

pub mod config;
pub mod data_bus;
pub mod error;
pub mod homewizard;
pub mod logging;
pub mod meter_client;
pub mod mock_meter;
pub mod normalize;
pub mod publisher;
pub mod service;

// Re-export commonly used types for easier access
pub use config::Config;
pub use data_bus::{BusValue, DataBus};
pub use error::MeterError;
pub use homewizard::{HomeWizardAPI, MeterReading};
pub use meter_client::MeterClient;
pub use normalize::{NormalizedReading, Topology};
pub use publisher::{Publisher, PublisherHandle};
pub use service::MeterService;
