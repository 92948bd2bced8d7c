//! Pure utility functions.
//!
//! Stateless helpers shared by the pipeline components and the binary.

pub mod bootstrap;
pub mod retry;
