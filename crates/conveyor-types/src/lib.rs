//! Shared Conveyor protocol, catalog, and sync model types.
//!
//! Pure serde data types with no I/O. Both the engine and the CLI
//! depend on this crate; it must stay free of runtime concerns.

pub mod failure;
pub mod output;
pub mod protocol;
pub mod stats;
pub mod sync;
