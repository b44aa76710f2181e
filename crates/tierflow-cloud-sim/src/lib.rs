//! Simulated cloud provider for Tierflow
//!
//! This crate implements the Provisioner trait against an in-memory cloud,
//! so stacks can be planned and applied without credentials or network access.
//!
//! # Features
//!
//! - Deterministic resource identifiers and outputs
//! - Idempotent provisioning keyed by input hash
//! - Injectable permanent and transient failures
//! - State persisted under `.tierflow/` with an exclusive lock
//!
//! # Example
//!
//! ```ignore
//! use tierflow_cloud_sim::{SimulatedProvider, StateManager};
//!
//! let manager = StateManager::new(".");
//! let _lock = manager.acquire_lock().await?;
//!
//! let provider = SimulatedProvider::open("ap-northeast-2", ".").await?;
//! let zones = provider.availability_zones().await?;
//! // ... run the engine ...
//! provider.persist(".").await?;
//! ```

pub mod error;
pub mod provider;
pub mod state;

pub use error::{Result, SimError};
pub use provider::{SimulatedProvider, resource_id};
pub use state::{STATE_DIR, StateLock, StateManager};
