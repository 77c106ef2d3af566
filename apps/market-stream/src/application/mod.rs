//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for external systems (streaming transports).
pub mod ports;

/// Connection supervision and the subscription manager.
pub mod services;
