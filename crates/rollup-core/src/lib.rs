//! rollup-core library.
//!
//! Recomputes numeric cost fields of a work-item hierarchy bottom-up and
//! decides which items need writing back.
//!
//! # Conventions
//!
//! - **Errors**: domain failures are [`error::RollupError`]; seams to
//!   external collaborators return `anyhow::Result`.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).

pub mod config;
pub mod engine;
pub mod error;
pub mod hierarchy;
pub mod model;
pub mod pipeline;
pub mod policy;
pub mod snapshot;
pub mod source;
pub mod writer;

pub use error::{ErrorCode, RollupError};
pub use model::{FieldSnapshot, FieldValue, WorkItemId};
