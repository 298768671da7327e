//! Core replication engine for Conveyor pipeline execution.
//!
//! The engine moves records from a source connector subprocess to a
//! destination connector subprocess, validating, mapping, and counting
//! in flight, and watches the destination's output for acknowledged
//! state checkpoints.

pub mod config_update;
pub mod error;
pub mod heartbeat;
pub mod mapper;
pub mod metrics;
pub mod persistence;
pub mod process;
pub mod timing;
pub mod tracker;
pub mod validator;
pub mod worker;

pub use error::{ReplicationError, WorkerError};
pub use worker::{CancellationHandle, ReplicationWorker};
