//! Payment provider integration.
//!
//! - [`types`] - event records and webhook payload shapes
//! - [`processor`] - signature check, dedup, state-machine dispatch
//! - [`webhook`] - HTTP endpoint

pub mod processor;
pub mod types;
pub mod webhook;

pub use processor::PaymentEventProcessor;
pub use types::{PaymentEvent, ProcessingResult, ProcessingStatus, ProviderEventType};
