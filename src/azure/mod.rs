// src/azure/mod.rs

//! HTTP clients for the two supported queue backends.
//!
//! These implement the narrow [`QueueService`](crate::source::QueueService)
//! and [`BusService`](crate::source::BusService) seams; everything above them
//! is backend-agnostic.

pub mod auth;
pub mod bus_client;
pub mod queue_client;

pub use bus_client::ServiceBusClient;
pub use queue_client::StorageQueueClient;
