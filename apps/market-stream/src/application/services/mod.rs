//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `ConnectionSupervisor`: Runs one key's connection state machine
//! - `MarketStreamManager`: Keyed registry of supervisors, public entry point

pub mod manager;
pub mod supervisor;

pub use manager::MarketStreamManager;
pub use supervisor::{
    ConnectionSupervisor, SessionError, SharedStatus, StateCallback, SupervisorConfig,
    UpdateCallback,
};
