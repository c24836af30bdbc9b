//! SagaLedger Common Types
//!
//! This crate contains shared types used across SagaLedger, including
//! identifiers, amount helpers, the error taxonomy and the event-sourced
//! aggregate abstraction.

pub mod aggregate;
pub mod error;
pub mod identifiers;
pub mod monetary;

pub use aggregate::*;
pub use error::*;
pub use identifiers::*;
pub use monetary::*;
